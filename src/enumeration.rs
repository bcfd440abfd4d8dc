use proc_macro2::{Ident, TokenStream};
use quote::quote;

use crate::constant_group::ConstantGroup;
use crate::device::Device;
use crate::helper;

/// The Rust rendering of one constant group.
///
/// Integer groups become a `#[repr]` enum, bool and char groups (rare, a
/// few status flags) become a module of constants.
pub struct Enumeration<'a> {
    enum_name: Ident,
    group: &'a ConstantGroup,
}

impl<'a> Enumeration<'a> {
    pub fn combine_all(device: &'a Device) -> Vec<Enumeration<'a>> {
        device.constant_groups.iter().map(Self::new).collect()
    }

    pub fn new(group: &'a ConstantGroup) -> Self {
        Self {
            enum_name: helper::type_ident(&group.name, None),
            group,
        }
    }

    fn variant(&self, label: &crate::formater::Name) -> Ident {
        helper::type_ident(label, Some(&self.group.name))
    }

    /// Every value of the type has a label, no conversion can fail.
    fn covers_type(&self) -> bool {
        self.group.base.integer_bounds().is_some_and(|(min, max)| {
            max - min + 1 == self.group.constants().len() as i128
        })
    }

    pub fn gen_enum(&self) -> TokenStream {
        if !self.group.base.is_integer() {
            return self.gen_consts();
        }
        let data_type = helper::base_type(self.group.base);
        let name = &self.enum_name;
        let discriminants = self.group.iter().map(|(label, value)| {
            let doc = format!(" `{}`", label.space());
            let variant = self.variant(label);
            let value = helper::value_tokens(value);
            quote! {
                #[doc = #doc]
                #variant = #value,
            }
        });
        let values: Vec<_> = self
            .group
            .iter()
            .map(|(_, value)| helper::value_tokens(value))
            .collect();
        let variants: Vec<_> =
            self.group.iter().map(|(label, _)| self.variant(label)).collect();

        let impl_from = if self.covers_type() {
            quote! {
                impl From<#data_type> for #name {
                    fn from(value: #data_type) -> #name {
                        match value {
                            #(#values => Self::#variants,)*
                            _ => unreachable!(),
                        }
                    }
                }
            }
        } else {
            quote! {
                impl TryFrom<#data_type> for #name {
                    type Error = #data_type;
                    fn try_from(value: #data_type) -> Result<#name, Self::Error> {
                        match value {
                            #(#values => Ok(Self::#variants),)*
                            _ => Err(value),
                        }
                    }
                }
            }
        };
        let doc = format!(" Constant group `{}`.", self.group.name);
        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            #[repr(#data_type)]
            pub enum #name {
                #(#discriminants)*
            }
            #impl_from
            impl From<#name> for #data_type {
                fn from(value: #name) -> #data_type {
                    value as #data_type
                }
            }
        }
    }

    fn gen_consts(&self) -> TokenStream {
        let module = helper::field_ident(&self.group.name);
        let data_type = helper::base_type(self.group.base);
        let consts = self.group.iter().map(|(label, value)| {
            let name = helper::const_ident(label);
            let value = helper::value_tokens(value);
            quote! { pub const #name: #data_type = #value; }
        });
        let doc = format!(" Constant group `{}`.", self.group.name);
        quote! {
            #[doc = #doc]
            pub mod #module {
                #(#consts)*
            }
        }
    }
}
