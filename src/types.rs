use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// The fixed set of scalar types an element can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Bool,
    Char,
    String,
}

impl BaseType {
    pub const ALL: [BaseType; 12] = [
        BaseType::Int8,
        BaseType::Uint8,
        BaseType::Int16,
        BaseType::Uint16,
        BaseType::Int32,
        BaseType::Uint32,
        BaseType::Int64,
        BaseType::Uint64,
        BaseType::Float,
        BaseType::Bool,
        BaseType::Char,
        BaseType::String,
    ];

    pub fn token(self) -> &'static str {
        match self {
            BaseType::Int8 => "int8",
            BaseType::Uint8 => "uint8",
            BaseType::Int16 => "int16",
            BaseType::Uint16 => "uint16",
            BaseType::Int32 => "int32",
            BaseType::Uint32 => "uint32",
            BaseType::Int64 => "int64",
            BaseType::Uint64 => "uint64",
            BaseType::Float => "float",
            BaseType::Bool => "bool",
            BaseType::Char => "char",
            BaseType::String => "string",
        }
    }

    /// Width of one item on the wire, in bits. Bools are packed.
    pub fn bits(self) -> u32 {
        match self {
            BaseType::Bool => 1,
            BaseType::Int8 | BaseType::Uint8 => 8,
            BaseType::Char | BaseType::String => 8,
            BaseType::Int16 | BaseType::Uint16 => 16,
            BaseType::Int32 | BaseType::Uint32 | BaseType::Float => 32,
            BaseType::Int64 | BaseType::Uint64 => 64,
        }
    }

    pub fn is_integer(self) -> bool {
        self.integer_bounds().is_some()
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BaseType::Uint8
                | BaseType::Uint16
                | BaseType::Uint32
                | BaseType::Uint64
        )
    }

    /// Inclusive value range of the integer types.
    pub fn integer_bounds(self) -> Option<(i128, i128)> {
        let bounds = match self {
            BaseType::Int8 => (i8::MIN as i128, i8::MAX as i128),
            BaseType::Uint8 => (0, u8::MAX as i128),
            BaseType::Int16 => (i16::MIN as i128, i16::MAX as i128),
            BaseType::Uint16 => (0, u16::MAX as i128),
            BaseType::Int32 => (i32::MIN as i128, i32::MAX as i128),
            BaseType::Uint32 => (0, u32::MAX as i128),
            BaseType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            BaseType::Uint64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }

    /// Bytes needed for `count` items of this type, saturating.
    pub fn wire_bytes(self, count: usize) -> usize {
        (self.bits() as usize)
            .saturating_mul(count)
            .div_ceil(8)
    }
}

impl FromStr for BaseType {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        BaseType::ALL
            .into_iter()
            .find(|kind| kind.token() == token)
            .ok_or_else(|| Error::UnknownType {
                token: token.to_string(),
            })
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Scalar,
    Fixed(usize),
    /// Up to `max` items, only produced by stream expansion.
    Variable { max: usize },
}

impl Cardinality {
    /// Largest declared array, no transport packet comes close.
    pub const MAX_DECLARED: i64 = u16::MAX as i64;

    /// From the declared integer, negative values are not allowed here.
    pub fn from_declared(element: &str, cardinality: i64) -> Result<Self> {
        match cardinality {
            1 => Ok(Cardinality::Scalar),
            n @ 2..=Self::MAX_DECLARED => Ok(Cardinality::Fixed(n as usize)),
            _ => Err(Error::InvalidCardinality {
                element: element.to_string(),
                cardinality,
            }),
        }
    }

    /// Number of items on the wire, the upper bound for variable ones.
    pub fn count(self) -> usize {
        match self {
            Cardinality::Scalar => 1,
            Cardinality::Fixed(n) | Cardinality::Variable { max: n } => n,
        }
    }

    /// The signed form used by the declarative source.
    pub fn signed(self) -> i64 {
        match self {
            Cardinality::Variable { max } => -(max as i64),
            other => other.count() as i64,
        }
    }
}

/// Canonical type of an element, what every backend type-mapper sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub base: BaseType,
    pub cardinality: Cardinality,
}

impl TypeDescriptor {
    pub fn resolve(
        element: &str,
        token: &str,
        cardinality: i64,
    ) -> Result<Self> {
        let base = token.parse()?;
        let cardinality = Cardinality::from_declared(element, cardinality)?;
        Ok(Self { base, cardinality })
    }

    pub fn scalar(base: BaseType) -> Self {
        Self {
            base,
            cardinality: Cardinality::Scalar,
        }
    }

    pub fn array(base: BaseType, count: usize) -> Self {
        let cardinality = match count {
            1 => Cardinality::Scalar,
            n => Cardinality::Fixed(n),
        };
        Self { base, cardinality }
    }

    /// Strings are fixed length but are not arrays.
    pub fn is_array(&self) -> bool {
        self.base != BaseType::String
            && !matches!(self.cardinality, Cardinality::Scalar)
    }

    pub fn wire_bytes(&self) -> usize {
        self.base.wire_bytes(self.cardinality.count())
    }
}

/// A typed literal from the declarative source.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Value {
    Bool(bool),
    Int(i128),
    Float(f64),
    Char(char),
    Str(String),
}

impl Value {
    /// Checks a raw value against `base`, turning one-letter strings into
    /// chars and integral numbers into floats where the type asks for it.
    pub fn typed(raw: &RawValue, base: BaseType, element: &str) -> Result<Self> {
        let mismatch = || Error::TypeMismatch {
            element: element.to_string(),
            expected: base,
            found: raw.to_string(),
        };
        let value = match (base, raw) {
            (BaseType::Bool, RawValue::Bool(b)) => Value::Bool(*b),
            (BaseType::Float, RawValue::Float(f)) => Value::Float(*f),
            (BaseType::Float, RawValue::Int(i)) => Value::Float(*i as f64),
            (BaseType::Float, RawValue::UInt(u)) => Value::Float(*u as f64),
            (BaseType::Char, RawValue::Str(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(mismatch()),
                }
            }
            (BaseType::String, RawValue::Str(s)) => Value::Str(s.clone()),
            (base, RawValue::Int(i)) => {
                Self::integer(base, *i as i128).ok_or_else(mismatch)?
            }
            (base, RawValue::UInt(u)) => {
                Self::integer(base, *u as i128).ok_or_else(mismatch)?
            }
            _ => return Err(mismatch()),
        };
        Ok(value)
    }

    fn integer(base: BaseType, value: i128) -> Option<Self> {
        let (min, max) = base.integer_bounds()?;
        (min..=max).contains(&value).then_some(Value::Int(value))
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Char(c) => write!(f, "'{c}'"),
            Value::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// An untyped literal exactly as the source wrote it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bool(b) => write!(f, "{b}"),
            RawValue::Int(i) => write!(f, "{i}"),
            RawValue::UInt(u) => write!(f, "{u}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Firmware or API version, `[major, minor, release]` in the source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize,
)]
pub struct Version(pub u8, pub u8, pub u8);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}
