use crate::constant_group::ConstantGroupRegistry;
use crate::declaration::{HighLevelDecl, PacketDecl};
use crate::doc::{Doc, DocKind};
use crate::element::{Direction, Element, Level};
use crate::error::{Error, Result};
use crate::formater::Name;
use crate::stream::{HighLevel, StreamIn, StreamOut, StreamSpec};
use crate::types::{BaseType, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Request from the client, the response echoes the function id.
    Function,
    /// Sent by the device on its own, only has `out` elements.
    Callback,
}

impl PacketKind {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "function" => Ok(PacketKind::Function),
            "callback" => Ok(PacketKind::Callback),
            other => Err(Error::malformed(format!(
                "packet type must be `function` or `callback`, not `{other}`"
            ))),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            PacketKind::Function => "function",
            PacketKind::Callback => "callback",
        }
    }
}

/// The two APIs a streamed packet is exposed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    LowLevel,
    HighLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub name: Name,
    pub kind: PacketKind,
    pub function_id: u8,
    pub elements: Vec<Element>,
    pub since_firmware: Version,
    pub high_level: Option<HighLevel>,
    pub doc: Doc,
}

impl Packet {
    /// Builds a packet, every problem of the declaration is collected.
    pub fn from_declaration(
        decl: &PacketDecl,
        function_id: u8,
        registry: &mut ConstantGroupRegistry,
    ) -> std::result::Result<Self, Vec<Error>> {
        let mut errors = vec![];
        let name = Name::new(&decl.name);
        if name.is_empty() {
            errors.push(Error::malformed("packet without a name"));
        }
        let kind = PacketKind::parse(&decl.kind).unwrap_or_else(|err| {
            errors.push(err);
            PacketKind::Function
        });
        let mut elements = Vec::with_capacity(decl.elements.len());
        for element in &decl.elements {
            match Element::from_declaration(&name, element, registry) {
                Ok(element) => elements.push(element),
                Err(err) => errors.push(err),
            }
        }
        let high_level = decl
            .high_level
            .as_ref()
            .and_then(|marker| match high_level(&name, marker) {
                Ok(high_level) => Some(high_level),
                Err(err) => {
                    errors.push(err);
                    None
                }
            });
        let doc_kind = match &decl.doc {
            Some(doc) => DocKind::parse(&doc.0).unwrap_or_else(|err| {
                errors.push(err);
                DocKind::Basic
            }),
            None => match kind {
                PacketKind::Function => DocKind::Basic,
                PacketKind::Callback => DocKind::Callback,
            },
        };
        if !errors.is_empty() {
            return Err(errors);
        }
        let mut doc = Doc::new(doc_kind);
        if let Some(decl) = &decl.doc {
            for (locale, text) in &decl.1 {
                doc = doc.with_text(locale, text);
            }
        }
        Ok(Self {
            name,
            kind,
            function_id,
            elements,
            since_firmware: decl.since_firmware,
            high_level,
            doc,
        })
    }

    pub fn find(&self, name: &Name) -> Option<usize> {
        self.elements.iter().position(|element| &element.name == name)
    }

    /// Elements of `view`, in declaration order.
    pub fn view(&self, view: View) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(move |element| {
            match (view, element.level) {
                (_, Level::Normal) => true,
                (View::LowLevel, Level::Low) => true,
                (View::HighLevel, Level::High) => true,
                _ => false,
            }
        })
    }

    pub fn inputs(&self, view: View) -> impl Iterator<Item = &Element> {
        self.view(view).filter(|e| e.direction == Direction::In)
    }

    pub fn outputs(&self, view: View) -> impl Iterator<Item = &Element> {
        self.view(view).filter(|e| e.direction == Direction::Out)
    }

    /// Wire elements going one way.
    pub fn elements_in(
        &self,
        direction: Direction,
    ) -> impl Iterator<Item = &Element> {
        self.view(View::LowLevel)
            .filter(move |e| e.direction == direction)
    }

    /// Payload of the request, zero for callbacks.
    pub fn request_bytes(&self) -> usize {
        match self.kind {
            PacketKind::Function => self
                .elements_in(Direction::In)
                .map(Element::effective_wire_width)
                .sum(),
            PacketKind::Callback => 0,
        }
    }

    /// Payload of the response, or of the callback itself.
    pub fn response_bytes(&self) -> usize {
        self.elements_in(Direction::Out)
            .map(Element::effective_wire_width)
            .sum()
    }

    pub fn is_streamed(&self) -> bool {
        self.high_level.is_some()
    }

    /// Name of the logical call, `Write Pixels Low Level` is `Write Pixels`.
    pub fn high_level_name(&self) -> Name {
        self.name
            .strip_suffix("Low Level")
            .unwrap_or_else(|| self.name.clone())
    }

    /// Packets replacing an older one carry a trailing number, `Get Value 2`
    /// belongs to the `Get Value` family.
    pub fn family(&self) -> Name {
        let last = self.name.words().last().unwrap_or_default();
        if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
            if let Some(family) = self.name.strip_suffix(last) {
                return family;
            }
        }
        self.name.clone()
    }
}

fn high_level(packet: &Name, marker: &HighLevelDecl) -> Result<HighLevel> {
    let (decl, is_in) = match marker {
        HighLevelDecl::StreamIn(decl) => (decl, true),
        HighLevelDecl::StreamOut(decl) => (decl, false),
    };
    let mut stream = StreamSpec::new(&decl.name);
    if stream.name.is_empty() {
        return Err(Error::malformed(format!("{packet}: stream without a name")));
    }
    stream.single_chunk = decl.single_chunk;
    stream.max_count = decl.max_count;
    stream.data_type = decl
        .data_type
        .as_deref()
        .map(str::parse::<BaseType>)
        .transpose()?;
    if let Some(length_type) = &decl.length_type {
        stream.length_type = length_type.parse()?;
    }
    Ok(if is_in {
        HighLevel::StreamIn(StreamIn {
            stream,
            short_write: decl.short_write,
        })
    } else {
        if decl.short_write {
            return Err(Error::malformed(format!(
                "{packet}: only stream_in can short write"
            )));
        }
        HighLevel::StreamOut(StreamOut { stream })
    })
}
