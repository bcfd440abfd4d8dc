use std::fmt;

use thiserror::Error;

use crate::types::BaseType;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while turning a declaration into IR, plus
/// the client-side stream errors the generated bindings must reproduce.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown type `{token}`")]
    UnknownType { token: String },

    #[error("{element}: invalid cardinality {cardinality}")]
    InvalidCardinality { element: String, cardinality: i64 },

    #[error("{element}: expected {expected}, found {found}")]
    TypeMismatch {
        element: String,
        expected: BaseType,
        found: String,
    },

    #[error("unknown constant group `{name}`")]
    UnknownConstantGroup { name: String },

    #[error("duplicate {scope} name `{name}`")]
    DuplicateName { scope: String, name: String },

    #[error(
        "{packet}: stream capacity exhausted, {available_bytes} bytes left \
         for {element_bits}-bit elements"
    )]
    StreamCapacityExhausted {
        packet: String,
        available_bytes: i64,
        element_bits: u32,
    },

    #[error("stream truncated after {received} chunks (limit {max_chunks})")]
    TruncatedStream { received: usize, max_chunks: usize },

    #[error("stream of {len} elements exceeds the maximum of {max}")]
    StreamOverflow { len: usize, max: usize },

    #[error("malformed declaration: {reason}")]
    MalformedDeclaration { reason: String },

    #[error("{element}: {reason}")]
    InvalidAnnotation { element: String, reason: String },

    #[error("{packet}: {half} is {size} bytes, transport allows {limit}")]
    PacketTooLarge {
        packet: String,
        half: &'static str,
        size: usize,
        limit: usize,
    },

    #[error(
        "{packet}: since firmware {found} is older than {previous} declared \
         by `{previous_packet}`"
    )]
    VersionOrder {
        packet: String,
        found: String,
        previous: String,
        previous_packet: String,
    },

    #[error("function id {id} used by both `{first}` and `{second}`")]
    DuplicateFunctionId {
        id: u8,
        first: String,
        second: String,
    },

    #[error("{packet}: documentation references unknown {kind} `{target}`")]
    UnknownCrossReference {
        packet: String,
        kind: &'static str,
        target: String,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedDeclaration {
            reason: reason.into(),
        }
    }

    pub fn duplicate(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            scope: scope.into(),
            name: name.into(),
        }
    }

    pub fn annotation(
        element: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidAnnotation {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

/// All violations found for one device. Generation for that device stops
/// when this is returned.
#[derive(Debug, Error)]
pub struct Violations {
    pub device: String,
    pub errors: Vec<Error>,
}

impl Violations {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            errors: vec![],
        }
    }

    pub fn push(&mut self, error: Error) {
        self.errors.push(error)
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = Error>) {
        self.errors.extend(errors)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(value)` when nothing was collected, otherwise the whole batch.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, Self> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} violation(s)", self.device, self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}
