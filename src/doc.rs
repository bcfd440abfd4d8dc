//! Packet documentation as typed blocks. The source text uses a small
//! reStructuredText subset, backends get paragraphs, lists, admonitions and
//! tables and render them in their own syntax.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::formater::Name;

pub const FALLBACK_LOCALE: &str = "en";

/// Where a packet shows up in the documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    Basic,
    Advanced,
    CallbackConfig,
    Callback,
    LowLevel,
    Internal,
}

impl DocKind {
    pub fn parse(token: &str) -> Result<Self> {
        Ok(match token {
            "bf" => DocKind::Basic,
            "af" => DocKind::Advanced,
            "ccf" => DocKind::CallbackConfig,
            "c" => DocKind::Callback,
            "llf" => DocKind::LowLevel,
            "if" => DocKind::Internal,
            other => {
                return Err(Error::malformed(format!(
                    "unknown documentation kind `{other}`"
                )))
            }
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            DocKind::Basic => "bf",
            DocKind::Advanced => "af",
            DocKind::CallbackConfig => "ccf",
            DocKind::Callback => "c",
            DocKind::LowLevel => "llf",
            DocKind::Internal => "if",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doc {
    pub kind: DocKind,
    texts: BTreeMap<String, String>,
}

impl Doc {
    pub fn new(kind: DocKind) -> Self {
        Self {
            kind,
            texts: BTreeMap::new(),
        }
    }

    pub fn with_text(mut self, locale: &str, text: &str) -> Self {
        self.texts.insert(locale.to_string(), text.to_string());
        self
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.texts.keys().map(String::as_str)
    }

    /// Text for `locale`, falling back to english and then to whatever
    /// locale exists. Blank translations count as missing.
    pub fn text(&self, locale: &str) -> Option<&str> {
        let filled = |locale: &str| {
            self.texts
                .get(locale)
                .map(String::as_str)
                .filter(|text| !text.trim().is_empty())
        };
        filled(locale)
            .or_else(|| filled(FALLBACK_LOCALE))
            .or_else(|| {
                self.texts
                    .values()
                    .map(String::as_str)
                    .find(|text| !text.trim().is_empty())
            })
    }

    pub fn blocks(&self, locale: &str) -> Vec<Block> {
        self.text(locale).map(parse_blocks).unwrap_or_default()
    }

    /// Every cross reference in every locale.
    pub fn references(&self) -> Vec<Reference> {
        let mut references = vec![];
        for text in self.texts.values() {
            for block in parse_blocks(text) {
                block.collect_references(&mut references);
            }
        }
        references
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Function(Name),
    Callback(Name),
    /// Link to a documentation anchor outside the API.
    Anchor { text: String, target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Emphasis(String),
    Code(String),
    Ref(Reference),
    /// Name of an element of the documented packet.
    Param(String),
    /// Backend specific word, e.g. `true` or `None`.
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmonitionKind {
    Note,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    List(Vec<Vec<Inline>>),
    Admonition {
        kind: AdmonitionKind,
        body: Vec<Block>,
    },
    Table {
        header: Vec<String>,
        rows: Vec<Vec<Vec<Inline>>>,
    },
}

impl Block {
    fn collect_references(&self, references: &mut Vec<Reference>) {
        match self {
            Block::Paragraph(spans) => span_references(spans, references),
            Block::List(items) => items
                .iter()
                .for_each(|item| span_references(item, references)),
            Block::Table { rows, .. } => rows
                .iter()
                .flatten()
                .for_each(|cell| span_references(cell, references)),
            Block::Admonition { body, .. } => body
                .iter()
                .for_each(|block| block.collect_references(references)),
        }
    }
}

fn span_references(spans: &[Inline], references: &mut Vec<Reference>) {
    references.extend(spans.iter().filter_map(|span| match span {
        Inline::Ref(reference) => Some(reference.clone()),
        _ => None,
    }))
}

pub fn parse_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let mut blocks = vec![];
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
        } else if let Some(kind) = admonition(line) {
            let (body, next) = indented(&lines, i + 1);
            blocks.push(Block::Admonition {
                kind,
                body: parse_blocks(&body.join("\n")),
            });
            i = next;
        } else if line.trim_start().starts_with(".. csv-table::") {
            let (body, next) = indented(&lines, i + 1);
            blocks.push(table(&body));
            i = next;
        } else if line.starts_with("* ") {
            let mut items: Vec<String> = vec![];
            while i < lines.len() {
                let line = lines[i];
                if let Some(item) = line.strip_prefix("* ") {
                    items.push(item.trim().to_string());
                } else if line.starts_with("  ") && !line.trim().is_empty() {
                    // continuation of the previous item
                    if let Some(last) = items.last_mut() {
                        last.push(' ');
                        last.push_str(line.trim());
                    }
                } else if line.trim().is_empty()
                    && lines.get(i + 1).is_some_and(|l| l.starts_with("* "))
                {
                    // blank line between items
                } else {
                    break;
                }
                i += 1;
            }
            blocks.push(Block::List(
                items.iter().map(|item| parse_inline(item)).collect(),
            ));
        } else {
            let mut paragraph: Vec<&str> = vec![];
            while i < lines.len() {
                let line = lines[i];
                if line.trim().is_empty()
                    || line.starts_with("* ")
                    || line.trim_start().starts_with(".. ")
                {
                    break;
                }
                paragraph.push(line.trim());
                i += 1;
            }
            blocks.push(Block::Paragraph(parse_inline(&paragraph.join(" "))));
        }
    }
    blocks
}

fn admonition(line: &str) -> Option<AdmonitionKind> {
    match line.trim() {
        ".. note::" => Some(AdmonitionKind::Note),
        ".. warning::" => Some(AdmonitionKind::Warning),
        _ => None,
    }
}

// lines indented below a directive, with the indentation removed
fn indented(lines: &[&str], start: usize) -> (Vec<String>, usize) {
    let mut body = vec![];
    let mut i = start;
    while i < lines.len() {
        let line = lines[i];
        if !line.trim().is_empty() && !line.starts_with(' ') {
            break;
        }
        body.push(line.trim().to_string());
        i += 1;
    }
    while body.last().is_some_and(|line| line.is_empty()) {
        body.pop();
    }
    (body, i)
}

fn table(body: &[String]) -> Block {
    let mut header = vec![];
    let mut rows = vec![];
    for line in body {
        if let Some(cells) = line.strip_prefix(":header:") {
            header = csv_cells(cells);
        } else if line.starts_with(':') || line.is_empty() {
            // :widths: and friends only matter for the html output
        } else {
            rows.push(csv_cells(line).iter().map(|cell| parse_inline(cell)).collect());
        }
    }
    Block::Table { header, rows }
}

fn csv_cells(line: &str) -> Vec<String> {
    let mut cells = vec![];
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell).trim().to_string()),
            c => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

pub fn parse_inline(text: &str) -> Vec<Inline> {
    let mut spans = vec![];
    let mut plain = String::new();
    let mut rest = text;
    let flush = |plain: &mut String, spans: &mut Vec<Inline>| {
        if !plain.is_empty() {
            spans.push(Inline::Text(std::mem::take(plain)));
        }
    };
    while !rest.is_empty() {
        if let Some((span, after)) = role(rest) {
            flush(&mut plain, &mut spans);
            spans.push(span);
            rest = after;
            continue;
        }
        if let Some((inner, after)) = delimited(rest, "``") {
            flush(&mut plain, &mut spans);
            spans.push(Inline::Code(inner.to_string()));
            rest = after;
            continue;
        }
        if let Some((inner, after)) = delimited(rest, "*") {
            flush(&mut plain, &mut spans);
            spans.push(Inline::Emphasis(inner.to_string()));
            rest = after;
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            plain.push(c);
        }
        rest = chars.as_str();
    }
    flush(&mut plain, &mut spans);
    spans
}

// `*word*` or ``` ``code`` ```, not starting or ending on a space
fn delimited<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let after = text.strip_prefix(marker)?;
    let end = after.find(marker)?;
    let inner = &after[..end];
    if inner.is_empty() || inner.starts_with(' ') || inner.ends_with(' ') {
        return None;
    }
    Some((inner, &after[end + marker.len()..]))
}

// `:func:`Name``
fn role(text: &str) -> Option<(Inline, &str)> {
    let after = text.strip_prefix(':')?;
    let colon = after.find(':')?;
    let name = &after[..colon];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    let content = after[colon + 1..].strip_prefix('`')?;
    let end = content.find('`')?;
    let (inner, rest) = (&content[..end], &content[end + 1..]);
    let span = match name {
        "func" => Inline::Ref(Reference::Function(Name::new(inner))),
        "cb" => Inline::Ref(Reference::Callback(Name::new(inner))),
        "ref" => {
            let (text, target) = match (inner.rfind('<'), inner.ends_with('>')) {
                (Some(open), true) => (
                    inner[..open].trim(),
                    &inner[open + 1..inner.len() - 1],
                ),
                _ => (inner, inner),
            };
            Inline::Ref(Reference::Anchor {
                text: text.to_string(),
                target: target.to_string(),
            })
        }
        "param" => Inline::Param(inner.to_string()),
        "word" => Inline::Word(inner.to_string()),
        _ => Inline::Text(inner.to_string()),
    };
    Some((span, rest))
}
