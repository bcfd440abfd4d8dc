//! Generator settings, read from a TOML file. Every field has a default so
//! an empty file (or no file at all) is a valid configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub transport: Transport,
    pub doc: DocConfig,
    pub rust: RustConfig,
    pub stream: StreamConfig,
}

/// Fixed packet geometry of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Transport {
    /// Whole packet, header included.
    pub packet_length: usize,
    pub header_bytes: usize,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            packet_length: 72,
            header_bytes: 8,
        }
    }
}

impl Transport {
    pub fn max_payload(&self) -> usize {
        self.packet_length.saturating_sub(self.header_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocConfig {
    pub locale: String,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            locale: crate::doc::FALLBACK_LOCALE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RustConfig {
    /// Module the generated bindings import `IpConnection` and friends from.
    pub runtime_path: String,
}

impl Default for RustConfig {
    fn default() -> Self {
        Self {
            runtime_path: "crate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Responses a `stream_out` reassembly accepts per expected chunk.
    pub resend_factor: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { resend_factor: 2 }
    }
}

impl GeneratorConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    fn check(&self) -> Result<()> {
        if self.transport.header_bytes >= self.transport.packet_length {
            return Err(Error::malformed(format!(
                "transport header of {} bytes leaves no payload in {}-byte packets",
                self.transport.header_bytes, self.transport.packet_length
            )));
        }
        if self.stream.resend_factor == 0 {
            return Err(Error::malformed("stream resend_factor must be at least 1"));
        }
        if !is_module_path(&self.rust.runtime_path) {
            return Err(Error::malformed(format!(
                "`{}` is not a rust module path",
                self.rust.runtime_path
            )));
        }
        Ok(())
    }
}

// `crate`, `tinkerforge::ip_connection`
fn is_module_path(path: &str) -> bool {
    path.split("::").all(|segment| {
        let mut chars = segment.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
