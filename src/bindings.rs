//! Backends turn a finished [`Device`] into source files. They only read the
//! IR, naming and formatting are their own business.

use std::path::PathBuf;

use proc_macro2::{Ident, Literal, TokenStream};
use quote::quote;

use crate::config::GeneratorConfig;
use crate::device::Device;
use crate::enumeration::Enumeration;
use crate::formater::Name;
use crate::function::Function;
use crate::helper;

/// One emitted file, `path` is relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

pub trait Backend {
    fn name(&self) -> &'static str;
    fn generate(&self, device: &Device) -> Vec<GeneratedFile>;
}

/// Emits one Rust module per device.
///
/// The module imports `DeviceCore` and `Error` from `rust.runtime_path`.
/// `DeviceCore` carries the packets:
///
/// ```text
/// fn request(&self, function_id: u8, payload: &[u8]) -> Result<Vec<u8>, Error>;
/// fn send(&self, function_id: u8, payload: &[u8]) -> Result<(), Error>;
/// ```
///
/// and `Error` has the `ShortResponse`, `StreamOverflow` and
/// `TruncatedStream` variants the generated calls return.
#[derive(Debug, Clone)]
pub struct RustBackend {
    runtime_path: String,
    locale: String,
    resend_factor: usize,
}

impl RustBackend {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            runtime_path: config.rust.runtime_path.clone(),
            locale: config.doc.locale.clone(),
            resend_factor: config.stream.resend_factor,
        }
    }

    pub fn struct_ident(device: &Device) -> Ident {
        helper::type_ident(&Name::new(&device.full_name()), None)
    }

    pub fn file_name(device: &Device) -> PathBuf {
        PathBuf::from(format!("{}.rs", helper::escape(&device.name.under())))
    }

    pub fn gen_device(&self, device: &Device) -> TokenStream {
        let runtime = helper::module_path(&self.runtime_path);
        let functions: Vec<_> = device
            .functions()
            .map(|packet| Function::new(packet, &self.locale, self.resend_factor))
            .collect();
        let callbacks: Vec<_> = device
            .callbacks()
            .map(|packet| Function::new(packet, &self.locale, self.resend_factor))
            .collect();
        let function_ids = functions.iter().map(Function::gen_id);
        let callback_ids = callbacks.iter().map(Function::gen_id);
        let enums = Enumeration::combine_all(device);
        let enums = enums.iter().map(Enumeration::gen_enum);
        let types = functions
            .iter()
            .chain(&callbacks)
            .map(Function::gen_types);
        let methods = functions.iter().map(Function::gen_methods);

        let struct_name = Self::struct_ident(device);
        let full_name = device.full_name();
        let identifier = Literal::u16_unsuffixed(device.identifier);
        let display_name = &device.display_name;
        let api_version = [
            device.api_version.0,
            device.api_version.1,
            device.api_version.2,
        ]
        .map(Literal::u8_unsuffixed);
        let module_doc = format!(" Bindings for the {full_name}.");
        let description = device
            .description
            .get(&self.locale)
            .or_else(|| device.description.get(crate::doc::FALLBACK_LOCALE))
            .map(|text| {
                let text = format!(" {text}");
                quote! {
                    #![doc = ""]
                    #![doc = #text]
                }
            });
        let struct_doc = format!(" {display_name}");

        quote! {
            #![doc = #module_doc]
            #description

            use #runtime::{DeviceCore, Error};

            pub const DEVICE_IDENTIFIER: u16 = #identifier;
            pub const DEVICE_DISPLAY_NAME: &str = #display_name;
            pub const API_VERSION: [u8; 3] = [#(#api_version),*];

            pub mod function_id {
                #(#function_ids)*
            }

            pub mod callback_id {
                #(#callback_ids)*
            }

            #[allow(dead_code)]
            mod wire {
                pub fn array<const N: usize>(data: &[u8]) -> [u8; N] {
                    let mut bytes = [0; N];
                    bytes.copy_from_slice(&data[..N]);
                    bytes
                }

                pub fn pack_bools(values: &[bool], payload: &mut Vec<u8>) {
                    let mut bytes = vec![0u8; values.len().div_ceil(8)];
                    for (i, value) in values.iter().enumerate() {
                        if *value {
                            bytes[i / 8] |= 1 << (i % 8);
                        }
                    }
                    payload.extend_from_slice(&bytes);
                }

                pub fn unpack_bools<const N: usize>(data: &[u8]) -> [bool; N] {
                    std::array::from_fn(|i| (data[i / 8] & (1 << (i % 8))) != 0)
                }

                pub fn pack_str(value: &str, len: usize, payload: &mut Vec<u8>) {
                    let mut bytes: Vec<u8> = value
                        .chars()
                        .map(|c| u8::try_from(c).unwrap_or(b'?'))
                        .take(len)
                        .collect();
                    bytes.resize(len, 0);
                    payload.extend_from_slice(&bytes);
                }

                pub fn unpack_str(data: &[u8]) -> String {
                    data.iter()
                        .take_while(|byte| **byte != 0)
                        .map(|byte| char::from(*byte))
                        .collect()
                }
            }

            #(#enums)*

            #(#types)*

            #[doc = #struct_doc]
            pub struct #struct_name {
                device: DeviceCore,
            }

            impl #struct_name {
                pub fn new(device: DeviceCore) -> Self {
                    Self { device }
                }

                pub fn core(&self) -> &DeviceCore {
                    &self.device
                }

                #(#methods)*
            }
        }
    }
}

impl Backend for RustBackend {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn generate(&self, device: &Device) -> Vec<GeneratedFile> {
        vec![GeneratedFile {
            path: Self::file_name(device),
            contents: self.gen_device(device).to_string(),
        }]
    }
}
