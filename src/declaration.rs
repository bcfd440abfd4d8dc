//! The declarative `com` device description, as loaded from disk. These
//! types only mirror the source layout, [`crate::device::Device::build`]
//! turns them into checked IR.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{RawValue, Version};

/// Keys this crate doesn't consume (`examples`, `openhab`, ...) are ignored,
/// other backends read them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceDecl {
    pub api_version: Version,
    pub category: String,
    pub device_identifier: u16,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub description: BTreeMap<String, String>,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub documented: bool,
    #[serde(default)]
    pub discontinued: bool,
    /// Legacy spelling of the `comcu_bricklet` and `bricklet_get_identity`
    /// features.
    #[serde(default)]
    pub comcu: bool,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub constant_groups: Vec<ConstantGroupDecl>,
    #[serde(default)]
    pub packets: Vec<PacketDecl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantGroupDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub type_token: String,
    pub constants: Vec<(String, RawValue)>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PacketDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub elements: Vec<ElementDecl>,
    pub since_firmware: Version,
    #[serde(default)]
    pub doc: Option<DocDecl>,
    #[serde(default)]
    pub high_level: Option<HighLevelDecl>,
    #[serde(default)]
    pub function_id: Option<u8>,
}

/// `["bf", {"en": "...", "de": "..."}]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocDecl(pub String, pub BTreeMap<String, String>);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighLevelDecl {
    StreamIn(StreamDecl),
    StreamOut(StreamDecl),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamDecl {
    pub name: String,
    #[serde(default, alias = "has_short_write")]
    pub short_write: bool,
    #[serde(default)]
    pub single_chunk: bool,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub length_type: Option<String>,
    #[serde(default)]
    pub max_count: Option<usize>,
}

/// `[name, type, cardinality, direction, extra?]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ElementTuple")]
pub struct ElementDecl {
    pub name: String,
    pub type_token: String,
    pub cardinality: i64,
    pub direction: String,
    pub extra: Option<ExtraDecl>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ElementTuple {
    Plain(String, String, i64, String),
    Extra(String, String, i64, String, ExtraDecl),
}

impl From<ElementTuple> for ElementDecl {
    fn from(tuple: ElementTuple) -> Self {
        let (name, type_token, cardinality, direction, extra) = match tuple {
            ElementTuple::Plain(name, kind, card, dir) => {
                (name, kind, card, dir, None)
            }
            ElementTuple::Extra(name, kind, card, dir, extra) => {
                (name, kind, card, dir, Some(extra))
            }
        };
        Self {
            name,
            type_token,
            cardinality,
            direction,
            extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExtraDecl {
    /// `["Motion", [["Not Detected", 0], ["Detected", 1]]]`
    InlineGroup(String, Vec<(String, RawValue)>),
    Annotations(AnnotationsDecl),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotationsDecl {
    pub constant_group: Option<String>,
    pub default: Option<RawValue>,
    pub unit: Option<String>,
    pub scale: Option<(u64, u64)>,
    pub range: Option<RangeDecl>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RangeDecl {
    /// `"type"` or `"constants"`
    Keyword(String),
    Bounds(RawValue, RawValue),
    List(Vec<(RawValue, RawValue)>),
}

pub fn from_json(text: &str) -> Result<DeviceDecl> {
    Ok(serde_json::from_str(text)?)
}

pub fn from_toml(text: &str) -> Result<DeviceDecl> {
    Ok(toml::from_str(text)?)
}

/// Loads a declaration, the format is picked by the file extension.
pub fn load(path: &Path) -> Result<DeviceDecl> {
    let text = std::fs::read_to_string(path)?;
    let decl = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => from_json(&text),
        Some("toml") => from_toml(&text),
        _ => Err(Error::malformed(format!(
            "{}: expected a .json or .toml file",
            path.display()
        ))),
    };
    decl.map_err(|err| match err {
        Error::MalformedDeclaration { reason } => {
            Error::malformed(format!("{}: {reason}", path.display()))
        }
        err => err,
    })
}
