//! Rust flavoured names, types and docs for the generated bindings.

use proc_macro2::{Ident, Literal, Span, TokenStream};
use quote::{format_ident, quote};

use crate::doc::{AdmonitionKind, Block, Inline, Reference};
use crate::element::{Direction, Element};
use crate::formater::Name;
use crate::types::{BaseType, Cardinality, Value};

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate",
    "dyn", "else", "enum", "extern", "false", "fn", "for", "if", "impl", "in",
    "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "Self", "static", "struct", "super", "trait", "true", "type",
    "unsafe", "use", "where", "while", "yield", "abstract", "become", "do",
    "final", "macro", "override", "priv", "try", "typeof", "unsized",
    "virtual",
];

/// Turns `word` into something `Ident::new` accepts: anything but ascii
/// alphanumerics becomes `_`, a leading digit gets a `_` prefix and
/// keywords a `_` suffix.
pub fn escape(word: &str) -> String {
    let mut ident: String = word
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    if KEYWORDS.contains(&ident.as_str()) {
        ident.push('_');
    }
    ident
}

/// `pixels_chunk_offset`
pub fn field_ident(name: &Name) -> Ident {
    Ident::new(&escape(&name.under()), Span::call_site())
}

/// `ReadPixelsLowLevel`, types starting with a digit take `prefix` in front
/// (`VoltageRange0To5V`).
pub fn type_ident(name: &Name, prefix: Option<&Name>) -> Ident {
    let camel = name.camel();
    let camel = match prefix {
        Some(prefix) if camel.starts_with(|c: char| c.is_ascii_digit()) => {
            format!("{}{camel}", prefix.camel())
        }
        _ => camel,
    };
    Ident::new(&escape(&camel), Span::call_site())
}

/// `WRITE_PIXELS_LOW_LEVEL`
pub fn const_ident(name: &Name) -> Ident {
    Ident::new(&escape(&name.upper()), Span::call_site())
}

/// Path of the runtime module, `crate` or `tinkerforge::ip_connection`.
pub fn module_path(path: &str) -> TokenStream {
    let segments = path.split("::").map(|segment| match segment {
        "crate" | "self" | "super" => {
            Ident::new(segment, Span::call_site())
        }
        segment => Ident::new(&escape(segment), Span::call_site()),
    });
    quote! { #(#segments)::* }
}

pub fn base_type(base: BaseType) -> TokenStream {
    match base {
        BaseType::Int8 => quote! { i8 },
        BaseType::Uint8 => quote! { u8 },
        BaseType::Int16 => quote! { i16 },
        BaseType::Uint16 => quote! { u16 },
        BaseType::Int32 => quote! { i32 },
        BaseType::Uint32 => quote! { u32 },
        BaseType::Int64 => quote! { i64 },
        BaseType::Uint64 => quote! { u64 },
        BaseType::Float => quote! { f32 },
        BaseType::Bool => quote! { bool },
        BaseType::Char => quote! { char },
        BaseType::String => quote! { String },
    }
}

/// Type of an element as a parameter (`in`) or as a returned value (`out`).
pub fn element_type(element: &Element) -> TokenStream {
    let base = element.descriptor.base;
    let inner = base_type(base);
    let input = element.direction == Direction::In;
    match (base, element.cardinality()) {
        (BaseType::String, _) if input => quote! { &str },
        (BaseType::String, _) => quote! { String },
        (_, Cardinality::Scalar) => inner,
        (_, Cardinality::Fixed(count)) => {
            let count = Literal::usize_unsuffixed(count);
            quote! { [#inner; #count] }
        }
        (_, Cardinality::Variable { .. }) if input => quote! { &[#inner] },
        (_, Cardinality::Variable { .. }) => quote! { Vec<#inner> },
    }
}

/// A literal of the declared value, negative numbers as `-` and a literal.
pub fn value_tokens(value: &Value) -> TokenStream {
    match value {
        Value::Bool(value) => quote! { #value },
        Value::Int(value) if *value < 0 => {
            let value = Literal::u128_unsuffixed(value.unsigned_abs());
            quote! { -#value }
        }
        Value::Int(value) => {
            let value = Literal::u128_unsuffixed(value.unsigned_abs());
            quote! { #value }
        }
        Value::Float(value) => {
            let value = Literal::f64_unsuffixed(*value);
            quote! { #value }
        }
        Value::Char(value) => {
            let value = Literal::character(*value);
            quote! { #value }
        }
        Value::Str(value) => {
            let value = Literal::string(value);
            quote! { #value }
        }
    }
}

/// Zero value used to pad chunks.
pub fn default_value(base: BaseType) -> TokenStream {
    let kind = base_type(base);
    quote! { <#kind>::default() }
}

/// Renders documentation blocks as rustdoc markdown, one `#[doc]` per line.
pub fn doc_attrs(blocks: &[Block]) -> TokenStream {
    let mut lines = vec![];
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        render_block(block, &mut lines);
    }
    let lines = lines.iter().map(|line| format!(" {line}"));
    quote! { #(#[doc = #lines])* }
}

fn render_block(block: &Block, lines: &mut Vec<String>) {
    match block {
        Block::Paragraph(spans) => lines.push(render_inline(spans)),
        Block::List(items) => {
            lines.extend(items.iter().map(|item| format!("- {}", render_inline(item))))
        }
        Block::Admonition { kind, body } => {
            let label = match kind {
                AdmonitionKind::Note => "Note",
                AdmonitionKind::Warning => "Warning",
            };
            let mut inner = vec![];
            for block in body {
                render_block(block, &mut inner);
            }
            lines.push(format!("**{label}:**"));
            lines.extend(inner.into_iter().map(|line| format!("> {line}")));
        }
        Block::Table { header, rows } => {
            lines.push(format!("| {} |", header.join(" | ")));
            lines.push(format!("|{}", "---|".repeat(header.len().max(1))));
            for row in rows {
                let cells: Vec<_> = row.iter().map(|cell| render_inline(cell)).collect();
                lines.push(format!("| {} |", cells.join(" | ")));
            }
        }
    }
}

fn render_inline(spans: &[Inline]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Inline::Text(text) => text.clone(),
            Inline::Emphasis(text) => format!("*{text}*"),
            Inline::Code(text) | Inline::Word(text) => format!("`{text}`"),
            Inline::Param(name) => format!("`{}`", escape(&Name::new(name).under())),
            Inline::Ref(Reference::Function(name)) => {
                let name = name.strip_suffix("Low Level").unwrap_or_else(|| name.clone());
                format!("`{}`", escape(&name.under()))
            }
            Inline::Ref(Reference::Callback(name)) => {
                format!("`{}Callback`", name.camel())
            }
            Inline::Ref(Reference::Anchor { text, .. }) => text.clone(),
        })
        .collect()
}

/// One line per parameter with a documented range, unit or default.
pub fn range_doc_attrs<'a>(
    elements: impl Iterator<Item = &'a Element>,
) -> TokenStream {
    let lines: Vec<String> = elements
        .filter(|element| element.role.is_none())
        .filter_map(|element| {
            let mut parts = vec![];
            if let Some(range) = element.documented_range() {
                let unit = range.unit.map(|unit| format!(" {unit}")).unwrap_or_default();
                parts.push(format!("{} to {}{unit}", range.min_text, range.max_text));
            } else if let Some(unit) = &element.annotations.unit {
                parts.push(format!("in {unit}"));
            }
            if let Some(group) = &element.constant_group {
                parts.push(format!("see [`{}`]", type_ident(group, None)));
            }
            if let Some(default) = &element.annotations.default {
                parts.push(format!("default {default}"));
            }
            (!parts.is_empty()).then(|| {
                format!(" - `{}`: {}", field_ident(&element.name), parts.join(", "))
            })
        })
        .collect();
    if lines.is_empty() {
        return TokenStream::new();
    }
    quote! {
        #[doc = ""]
        #(#[doc = #lines])*
    }
}

pub fn response_ident(name: &Name) -> Ident {
    format_ident!("{}Response", type_ident(name, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::parse_blocks;
    use crate::types::TypeDescriptor;

    #[test]
    fn escaping() {
        assert_eq!(escape("type"), "type_");
        assert_eq!(escape("0_to_5v"), "_0_to_5v");
        assert_eq!(escape("x/y"), "x_y");
        assert_eq!(field_ident(&Name::new("Type")).to_string(), "type_");
        assert_eq!(
            type_ident(&Name::new("0 To 5V"), Some(&Name::new("Voltage Range"))).to_string(),
            "VoltageRange0To5V"
        );
        assert_eq!(const_ident(&Name::new("Get Identity")).to_string(), "GET_IDENTITY");
    }

    #[test]
    fn types() {
        let pixels = Element::plain(
            "Pixels",
            TypeDescriptor {
                base: BaseType::Bool,
                cardinality: Cardinality::Variable { max: 8192 },
            },
            Direction::In,
        );
        assert_eq!(element_type(&pixels).to_string(), "& [bool]");
        let uid = Element::plain(
            "Uid",
            TypeDescriptor::array(BaseType::String, 8),
            Direction::Out,
        );
        assert_eq!(element_type(&uid).to_string(), "String");
        let version = Element::plain(
            "Firmware Version",
            TypeDescriptor::array(BaseType::Uint8, 3),
            Direction::Out,
        );
        assert_eq!(element_type(&version).to_string(), "[u8 ; 3]");
        assert_eq!(
            module_path("tinkerforge::ip_connection").to_string(),
            "tinkerforge :: ip_connection"
        );
    }

    #[test]
    fn rustdoc() {
        let blocks = parse_blocks(
            "Reads pixels, see :func:`Write Pixels Low Level` and \
             :cb:`Touch Position`.\n\n* *one*\n* two\n",
        );
        let docs = doc_attrs(&blocks).to_string();
        assert!(docs.contains("`write_pixels`"));
        assert!(docs.contains("`TouchPositionCallback`"));
        assert!(docs.contains("- *one*"));
    }
}
