use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote, ToTokens};

use crate::element::{Direction, Element, Role};
use crate::formater::Name;
use crate::helper;
use crate::packet::{Packet, PacketKind, View};
use crate::stream::{HighLevel, StreamSpec};
use crate::types::{BaseType, Cardinality};

/// An element and its byte offset in the packet half it travels in.
struct Field<'a> {
    element: &'a Element,
    ident: Ident,
    offset: usize,
}

fn wire_fields(packet: &Packet, direction: Direction) -> Vec<Field<'_>> {
    let mut offset = 0;
    packet
        .elements_in(direction)
        .map(|element| {
            let field = Field {
                element,
                ident: helper::field_ident(&element.name),
                offset,
            };
            offset += element.effective_wire_width();
            field
        })
        .collect()
}

/// Appends `value` to `_payload`, little endian, bools bit packed.
fn encode(element: &Element, value: &Ident) -> TokenStream {
    let base = element.descriptor.base;
    match (base, element.cardinality()) {
        (BaseType::String, cardinality) => {
            let len = Literal::usize_unsuffixed(cardinality.count());
            quote! { wire::pack_str(#value, #len, &mut _payload); }
        }
        (BaseType::Bool, Cardinality::Scalar) => {
            quote! { _payload.push(u8::from(#value)); }
        }
        (BaseType::Char, Cardinality::Scalar) => {
            quote! { _payload.push(#value as u8); }
        }
        (_, Cardinality::Scalar) => {
            quote! { _payload.extend_from_slice(&#value.to_le_bytes()); }
        }
        (BaseType::Bool, _) => quote! { wire::pack_bools(&#value, &mut _payload); },
        (BaseType::Char, _) => {
            quote! { _payload.extend(#value.iter().map(|_c| *_c as u8)); }
        }
        (_, _) => quote! {
            for _value in #value {
                _payload.extend_from_slice(&_value.to_le_bytes());
            }
        },
    }
}

/// Reads an element out of `_response` at `offset`.
fn decode(element: &Element, offset: usize) -> TokenStream {
    let base = element.descriptor.base;
    let start = Literal::usize_unsuffixed(offset);
    let kind = helper::base_type(base);
    match (base, element.cardinality()) {
        (BaseType::String, cardinality) => {
            let end = Literal::usize_unsuffixed(offset + cardinality.count());
            quote! { wire::unpack_str(&_response[#start..#end]) }
        }
        (BaseType::Bool, Cardinality::Scalar) => quote! { _response[#start] != 0 },
        (BaseType::Char, Cardinality::Scalar) => {
            quote! { char::from(_response[#start]) }
        }
        (_, Cardinality::Scalar) => quote! {
            <#kind>::from_le_bytes(wire::array(&_response[#start..]))
        },
        (BaseType::Bool, _) => quote! { wire::unpack_bools(&_response[#start..]) },
        (BaseType::Char, _) => quote! {
            std::array::from_fn(|_i| char::from(_response[#start + _i]))
        },
        (_, _) => {
            let width = Literal::usize_unsuffixed(base.wire_bytes(1));
            quote! {
                std::array::from_fn(|_i| {
                    <#kind>::from_le_bytes(wire::array(&_response[#start + _i * #width..]))
                })
            }
        }
    }
}

/// `_ret` when the low-level call returns a single value, `_ret.field`
/// otherwise.
fn pick(outputs: &[Field], element: &Element) -> TokenStream {
    match outputs.iter().find(|field| field.element.name == element.name) {
        Some(_) if outputs.len() == 1 => quote! { _ret },
        Some(field) => {
            let ident = &field.ident;
            quote! { _ret.#ident }
        }
        None => quote! { Default::default() },
    }
}

fn role_field<'a, 'b>(outputs: &'b [Field<'a>], role: Role) -> Option<&'b Field<'a>> {
    outputs.iter().find(|field| field.element.has_role(role))
}

/// Response or callback struct.
fn gen_struct(name: &Ident, doc: &str, fields: &[&Element]) -> TokenStream {
    let fields = fields.iter().map(|element| {
        let ident = helper::field_ident(&element.name);
        let kind = helper::element_type(element);
        quote! { pub #ident: #kind, }
    });
    quote! {
        #[doc = #doc]
        #[derive(Debug, Clone, PartialEq)]
        pub struct #name {
            #(#fields)*
        }
    }
}

/// Code for one packet: the methods on the device struct and the types they
/// return.
pub struct Function<'a> {
    packet: &'a Packet,
    /// Name of the wire call, streamed packets not already called
    /// `... Low Level` get the suffix so the logical call can take the name.
    low_name: Name,
    high_name: Name,
    id_const: Ident,
    locale: &'a str,
    resend_factor: usize,
}

impl<'a> Function<'a> {
    pub fn new(packet: &'a Packet, locale: &'a str, resend_factor: usize) -> Self {
        let high_name = packet.high_level_name();
        let low_name = if packet.is_streamed() && high_name == packet.name {
            packet.name.join("Low Level")
        } else {
            packet.name.clone()
        };
        Self {
            packet,
            low_name,
            high_name,
            id_const: helper::const_ident(&packet.name),
            locale,
            resend_factor: resend_factor.max(1),
        }
    }

    /// `pub const WRITE_PIXELS_LOW_LEVEL: u8 = 1;`
    pub fn gen_id(&self) -> TokenStream {
        let name = &self.id_const;
        let id = Literal::u8_unsuffixed(self.packet.function_id);
        let doc = format!(" `{}`", self.packet.name);
        quote! {
            #[doc = #doc]
            pub const #name: u8 = #id;
        }
    }

    fn stream(&self) -> Option<&'a StreamSpec> {
        self.packet.high_level.as_ref().map(HighLevel::stream)
    }

    fn docs(&self) -> TokenStream {
        helper::doc_attrs(&self.packet.doc.blocks(self.locale))
    }

    fn low_ident(&self) -> Ident {
        helper::field_ident(&self.low_name)
    }

    fn low_return(&self, outputs: &[Field]) -> TokenStream {
        match outputs {
            [] => quote! { () },
            [single] => helper::element_type(single.element),
            _ => helper::response_ident(&self.low_name).into_token_stream(),
        }
    }

    pub fn gen_types(&self) -> TokenStream {
        match self.packet.kind {
            PacketKind::Function => self.gen_responses(),
            PacketKind::Callback => self.gen_callback(),
        }
    }

    pub fn gen_methods(&self) -> TokenStream {
        match self.packet.kind {
            PacketKind::Function => {
                let low = self.gen_low_level();
                let high = match &self.packet.high_level {
                    None => TokenStream::new(),
                    Some(HighLevel::StreamIn(_)) => self.gen_stream_in(),
                    Some(HighLevel::StreamOut(_)) => self.gen_stream_out(),
                };
                quote! { #low #high }
            }
            PacketKind::Callback => TokenStream::new(),
        }
    }

    fn gen_responses(&self) -> TokenStream {
        let outputs = wire_fields(self.packet, Direction::Out);
        let low = (outputs.len() > 1).then(|| {
            let elements: Vec<_> = outputs.iter().map(|field| field.element).collect();
            let doc = format!(" Response of `{}`.", self.low_name);
            gen_struct(&helper::response_ident(&self.low_name), &doc, &elements)
        });
        let high_outputs: Vec<_> = self.packet.outputs(View::HighLevel).collect();
        let high = (self.packet.is_streamed() && high_outputs.len() > 1).then(|| {
            let doc = format!(" Response of `{}`.", self.high_name);
            gen_struct(&helper::response_ident(&self.high_name), &doc, &high_outputs)
        });
        quote! { #low #high }
    }

    fn gen_low_level(&self) -> TokenStream {
        let inputs = wire_fields(self.packet, Direction::In);
        let outputs = wire_fields(self.packet, Direction::Out);
        let name = self.low_ident();
        let id = &self.id_const;
        let params = inputs.iter().map(|field| {
            let ident = &field.ident;
            let kind = helper::element_type(field.element);
            quote! { #ident: #kind }
        });
        let encoded = inputs.iter().map(|field| encode(field.element, &field.ident));
        let request_len = Literal::usize_unsuffixed(self.packet.request_bytes());
        let return_type = self.low_return(&outputs);

        let call = if outputs.is_empty() {
            quote! { self.device.send(function_id::#id, &_payload) }
        } else {
            let response_len = Literal::usize_unsuffixed(self.packet.response_bytes());
            let value = match outputs.as_slice() {
                [single] => decode(single.element, single.offset),
                _ => {
                    let struct_name = helper::response_ident(&self.low_name);
                    let fields = outputs.iter().map(|field| {
                        let ident = &field.ident;
                        let value = decode(field.element, field.offset);
                        quote! { #ident: #value, }
                    });
                    quote! { #struct_name { #(#fields)* } }
                }
            };
            quote! {
                let _response = self.device.request(function_id::#id, &_payload)?;
                if _response.len() < #response_len {
                    return Err(Error::ShortResponse {
                        function_id: function_id::#id,
                        expected: #response_len,
                        found: _response.len(),
                    });
                }
                Ok(#value)
            }
        };

        let docs = if self.packet.is_streamed() {
            let doc = format!(
                " Transfers one chunk of `{}`, see [`Self::{}`].",
                self.stream().map_or("", |stream| stream.name.space()),
                helper::field_ident(&self.high_name)
            );
            quote! { #[doc = #doc] }
        } else {
            let docs = self.docs();
            let ranges = helper::range_doc_attrs(self.packet.inputs(View::LowLevel));
            quote! { #docs #ranges }
        };
        quote! {
            #docs
            pub fn #name(&self, #(#params),*) -> Result<#return_type, Error> {
                #[allow(unused_mut)]
                let mut _payload: Vec<u8> = Vec::with_capacity(#request_len);
                #(#encoded)*
                #call
            }
        }
    }

    /// Arguments of the low-level call made by the logical one.
    fn low_args(&self, inputs: &[Field], length_type: &TokenStream) -> Vec<TokenStream> {
        inputs
            .iter()
            .map(|field| {
                let ident = &field.ident;
                match field.element.role {
                    Some(Role::StreamLength) => quote! { _length as #length_type },
                    Some(Role::StreamChunkOffset) => quote! { _offset as #length_type },
                    Some(Role::StreamChunkData) => quote! { _chunk },
                    _ => quote! { #ident },
                }
            })
            .collect()
    }

    /// The logical result built from the last low-level response `_ret`.
    fn high_result(&self, outputs: &[Field]) -> (TokenStream, TokenStream) {
        let high_outputs: Vec<_> = self.packet.outputs(View::HighLevel).collect();
        let value = |element: &Element| match element.role {
            Some(Role::StreamData(_)) => quote! { _data },
            Some(Role::StreamWritten) => {
                role_field(outputs, Role::StreamChunkWritten).map_or_else(
                    || quote! { Default::default() },
                    |field| pick(outputs, field.element),
                )
            }
            _ => pick(outputs, element),
        };
        match high_outputs.as_slice() {
            [] => (quote! { () }, quote! { Ok(()) }),
            [single] => (helper::element_type(single), {
                let value = value(*single);
                quote! { Ok(#value) }
            }),
            many => {
                let name = helper::response_ident(&self.high_name);
                let fields = many.iter().map(|element| {
                    let ident = helper::field_ident(&element.name);
                    let value = value(*element);
                    quote! { #ident: #value, }
                });
                (quote! { #name }, quote! { Ok(#name { #(#fields)* }) })
            }
        }
    }

    fn high_params(&self) -> Vec<TokenStream> {
        self.packet
            .inputs(View::HighLevel)
            .map(|element| {
                let ident = helper::field_ident(&element.name);
                let kind = helper::element_type(element);
                quote! { #ident: #kind }
            })
            .collect()
    }

    fn gen_stream_in(&self) -> TokenStream {
        let Some(stream) = self.stream() else {
            return TokenStream::new();
        };
        let (Some(shape), Some(max_count)) = (stream.shape(), stream.resolved_max_count())
        else {
            return TokenStream::new();
        };
        let inputs = wire_fields(self.packet, Direction::In);
        let outputs = wire_fields(self.packet, Direction::Out);
        let Some(data) = self
            .packet
            .inputs(View::HighLevel)
            .find(|element| element.has_role(Role::StreamData(*shape)))
        else {
            return TokenStream::new();
        };
        let data = helper::field_ident(&data.name);
        let name = helper::field_ident(&self.high_name);
        let low = self.low_ident();
        let length_type = helper::base_type(shape.length_type);
        let default = helper::default_value(shape.data_type);
        let args = self.low_args(&inputs, &length_type);
        let params = self.high_params();
        let (return_type, result) = self.high_result(&outputs);
        let max_count = Literal::usize_unsuffixed(max_count);
        let capacity = Literal::usize_unsuffixed(shape.capacity);

        let send = if stream.requires_multiple_chunks() {
            quote! {
                let mut _offset = 0;
                let _ret = loop {
                    let _end = (_offset + CAPACITY).min(_length);
                    let mut _chunk = [#default; CAPACITY];
                    _chunk[.._end - _offset].copy_from_slice(&#data[_offset.._end]);
                    let _ret = self.#low(#(#args),*)?;
                    _offset += CAPACITY;
                    if _offset >= _length {
                        break _ret;
                    }
                };
            }
        } else {
            quote! {
                let _offset = 0;
                let mut _chunk = [#default; CAPACITY];
                _chunk[.._length].copy_from_slice(#data);
                let _ret = self.#low(#(#args),*)?;
            }
        };
        let docs = self.docs();
        let ranges = helper::range_doc_attrs(self.packet.inputs(View::HighLevel));
        quote! {
            #docs
            #ranges
            pub fn #name(&self, #(#params),*) -> Result<#return_type, Error> {
                const MAX_COUNT: usize = #max_count;
                const CAPACITY: usize = #capacity;
                if #data.len() > MAX_COUNT {
                    return Err(Error::StreamOverflow {
                        len: #data.len(),
                        max: MAX_COUNT,
                    });
                }
                let _length = #data.len();
                #send
                #result
            }
        }
    }

    fn gen_stream_out(&self) -> TokenStream {
        let Some(stream) = self.stream() else {
            return TokenStream::new();
        };
        let (Some(shape), Some(max_count)) = (stream.shape(), stream.resolved_max_count())
        else {
            return TokenStream::new();
        };
        let inputs = wire_fields(self.packet, Direction::In);
        let outputs = wire_fields(self.packet, Direction::Out);
        let (Some(length), Some(chunk)) = (
            role_field(&outputs, Role::StreamLength),
            role_field(&outputs, Role::StreamChunkData),
        ) else {
            return TokenStream::new();
        };
        let length = pick(&outputs, length.element);
        let chunk = pick(&outputs, chunk.element);
        let offset = role_field(&outputs, Role::StreamChunkOffset)
            .map_or_else(|| quote! { 0 }, |field| pick(&outputs, field.element));
        let name = helper::field_ident(&self.high_name);
        let low = self.low_ident();
        let length_type = helper::base_type(shape.length_type);
        let data_type = helper::base_type(shape.data_type);
        let args = self.low_args(&inputs, &length_type);
        let params = self.high_params();
        let (return_type, result) = self.high_result(&outputs);
        let max_count_value = Literal::usize_unsuffixed(max_count);
        let capacity = Literal::usize_unsuffixed(shape.capacity);

        let receive = if stream.requires_multiple_chunks() {
            let max_chunks = Literal::usize_unsuffixed(
                shape.chunks_for(max_count).saturating_mul(self.resend_factor),
            );
            quote! {
                const MAX_CHUNKS: usize = #max_chunks;
                let mut _data: Vec<#data_type> = Vec::new();
                let mut _length: Option<usize> = None;
                let mut _received = 0;
                let _ret = loop {
                    let _ret = self.#low(#(#args),*)?;
                    let _chunk_length = #length as usize;
                    let _chunk_offset = #offset as usize;
                    if _chunk_length > MAX_COUNT {
                        return Err(Error::StreamOverflow {
                            len: _chunk_length,
                            max: MAX_COUNT,
                        });
                    }
                    if _length != Some(_chunk_length) {
                        _length = Some(_chunk_length);
                        _received = 0;
                        _data.clear();
                    }
                    _received += 1;
                    if _received > MAX_CHUNKS {
                        return Err(Error::TruncatedStream {
                            received: _received,
                            max_chunks: MAX_CHUNKS,
                        });
                    }
                    if _chunk_offset == _data.len() {
                        let _take = CAPACITY.min(_chunk_length - _chunk_offset);
                        _data.extend_from_slice(&#chunk[.._take]);
                    }
                    if _data.len() >= _chunk_length {
                        break _ret;
                    }
                };
            }
        } else {
            quote! {
                let _ret = self.#low(#(#args),*)?;
                let _chunk_length = #length as usize;
                if _chunk_length > MAX_COUNT.min(CAPACITY) {
                    return Err(Error::StreamOverflow {
                        len: _chunk_length,
                        max: MAX_COUNT,
                    });
                }
                let _data: Vec<#data_type> = #chunk[.._chunk_length].to_vec();
            }
        };
        let docs = self.docs();
        let ranges = helper::range_doc_attrs(self.packet.inputs(View::HighLevel));
        quote! {
            #docs
            #ranges
            pub fn #name(&self, #(#params),*) -> Result<#return_type, Error> {
                const MAX_COUNT: usize = #max_count_value;
                const CAPACITY: usize = #capacity;
                #receive
                #result
            }
        }
    }

    fn callback_ident(&self) -> Ident {
        format_ident!("{}Callback", helper::type_ident(&self.low_name, None))
    }

    fn gen_callback(&self) -> TokenStream {
        let outputs = wire_fields(self.packet, Direction::Out);
        let name = self.callback_ident();
        let id = &self.id_const;
        let elements: Vec<_> = outputs.iter().map(|field| field.element).collect();
        let docs = self.docs();
        let definition = gen_struct(
            &name,
            &format!(" `{}` callback.", self.packet.name),
            &elements,
        );
        let response_len = Literal::usize_unsuffixed(self.packet.response_bytes());
        let fields = outputs.iter().map(|field| {
            let ident = &field.ident;
            let value = decode(field.element, field.offset);
            quote! { #ident: #value, }
        });
        let assembler = self.gen_callback_assembler(&outputs);
        quote! {
            #docs
            #definition
            impl #name {
                pub const FUNCTION_ID: u8 = callback_id::#id;

                /// Decodes the payload of a callback packet.
                pub fn decode(_response: &[u8]) -> Result<Self, Error> {
                    if _response.len() < #response_len {
                        return Err(Error::ShortResponse {
                            function_id: Self::FUNCTION_ID,
                            expected: #response_len,
                            found: _response.len(),
                        });
                    }
                    Ok(Self { #(#fields)* })
                }
            }
            #assembler
        }
    }

    /// Streamed callbacks get a reassembly helper, same rules as the
    /// `stream_out` getters.
    fn gen_callback_assembler(&self, outputs: &[Field]) -> TokenStream {
        let Some(stream) = self.stream() else {
            return TokenStream::new();
        };
        let (Some(shape), Some(max_count)) = (stream.shape(), stream.resolved_max_count())
        else {
            return TokenStream::new();
        };
        let (Some(length), Some(chunk)) = (
            role_field(outputs, Role::StreamLength),
            role_field(outputs, Role::StreamChunkData),
        ) else {
            return TokenStream::new();
        };
        let length = &length.ident;
        let chunk = &chunk.ident;
        let offset = role_field(outputs, Role::StreamChunkOffset).map_or_else(
            || quote! { 0 },
            |field| {
                let ident = &field.ident;
                quote! { _callback.#ident }
            },
        );
        let name = format_ident!("{}CallbackAssembler", helper::type_ident(&self.high_name, None));
        let callback = self.callback_ident();
        let data_type = helper::base_type(shape.data_type);
        let max_chunks = Literal::usize_unsuffixed(
            shape.chunks_for(max_count).saturating_mul(self.resend_factor),
        );
        let max_count = Literal::usize_unsuffixed(max_count);
        let capacity = Literal::usize_unsuffixed(shape.capacity);
        let doc = format!(
            " Collects `{}` from [`{callback}`]s.",
            stream.name
        );
        quote! {
            #[doc = #doc]
            #[derive(Debug, Clone, Default)]
            pub struct #name {
                length: Option<usize>,
                received: usize,
                data: Vec<#data_type>,
            }

            impl #name {
                pub const MAX_COUNT: usize = #max_count;
                pub const CAPACITY: usize = #capacity;
                pub const MAX_CHUNKS: usize = #max_chunks;

                /// Feeds one callback, returns the data once it is complete.
                pub fn push(
                    &mut self,
                    _callback: &#callback,
                ) -> Result<Option<Vec<#data_type>>, Error> {
                    let _chunk_length = _callback.#length as usize;
                    let _chunk_offset = #offset as usize;
                    if _chunk_length > Self::MAX_COUNT {
                        return Err(Error::StreamOverflow {
                            len: _chunk_length,
                            max: Self::MAX_COUNT,
                        });
                    }
                    if self.length != Some(_chunk_length) {
                        self.length = Some(_chunk_length);
                        self.received = 0;
                        self.data.clear();
                    }
                    self.received += 1;
                    if self.received > Self::MAX_CHUNKS {
                        return Err(Error::TruncatedStream {
                            received: self.received,
                            max_chunks: Self::MAX_CHUNKS,
                        });
                    }
                    if _chunk_offset == self.data.len() {
                        let _take = Self::CAPACITY.min(_chunk_length - _chunk_offset);
                        self.data.extend_from_slice(&_callback.#chunk[.._take]);
                    }
                    if self.data.len() < _chunk_length {
                        return Ok(None);
                    }
                    self.length = None;
                    self.received = 0;
                    Ok(Some(std::mem::take(&mut self.data)))
                }
            }
        }
    }
}
