use std::fmt;

use crate::constant_group::{ConstantGroup, ConstantGroupRegistry};
use crate::declaration::{AnnotationsDecl, ElementDecl, ExtraDecl, RangeDecl};
use crate::error::{Error, Result};
use crate::formater::Name;
use crate::stream::ChunkShape;
use crate::types::{BaseType, Cardinality, TypeDescriptor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(Error::malformed(format!(
                "direction must be `in` or `out`, not `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "in",
            Direction::Out => "out",
        })
    }
}

/// Which API an element shows up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Both the low- and the high-level call.
    Normal,
    /// Only the chunked low-level call.
    Low,
    /// Only the logical high-level call.
    High,
}

/// Tag put on elements by the stream expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    StreamLength,
    StreamChunkOffset,
    StreamChunkData,
    StreamChunkWritten,
    /// The logical array of the high-level call.
    StreamData(ChunkShape),
    /// The authoritative written count of a short-write stream.
    StreamWritten,
}

impl Role {
    pub fn token(&self) -> &'static str {
        match self {
            Role::StreamLength => "stream_length",
            Role::StreamChunkOffset => "stream_chunk_offset",
            Role::StreamChunkData => "stream_chunk_data",
            Role::StreamChunkWritten => "stream_chunk_written",
            Role::StreamData(_) => "stream_data",
            Role::StreamWritten => "stream_written",
        }
    }
}

/// Fixed-point factor, a raw value `v` means `v * num / den` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale {
    pub num: u64,
    pub den: u64,
}

impl Scale {
    /// Exact decimal rendering of a raw value, `10000` at `1/1000` is
    /// `10.000`.
    pub fn format(&self, raw: i128) -> String {
        let (num, den) = (self.num as i128, self.den as i128);
        if den % num == 0 {
            if let Some(digits) = decimal_digits(den / num) {
                let step = den / num;
                let sign = if raw < 0 { "-" } else { "" };
                let whole = raw.abs() / step;
                if digits == 0 {
                    return format!("{sign}{whole}");
                }
                let fraction = raw.abs() % step;
                return format!(
                    "{sign}{whole}.{fraction:0width$}",
                    width = digits as usize
                );
            }
        }
        if num % den == 0 {
            if let Some(scaled) = raw.checked_mul(num / den) {
                return scaled.to_string();
            }
        }
        (raw as f64 * num as f64 / den as f64).to_string()
    }

    pub fn apply(&self, raw: i128) -> f64 {
        raw as f64 * self.num as f64 / self.den as f64
    }
}

// number of zeros if `value` is a power of ten
fn decimal_digits(mut value: i128) -> Option<u32> {
    let mut digits = 0;
    while value > 1 {
        if value % 10 != 0 {
            return None;
        }
        value /= 10;
        digits += 1;
    }
    (value == 1).then_some(digits)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueRange {
    /// The whole range of the element type.
    Type,
    /// Only the values of the bound constant group.
    Constants,
    Bounds(Vec<(Value, Value)>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub unit: Option<String>,
    pub scale: Option<Scale>,
    pub range: Option<ValueRange>,
    pub default: Option<Value>,
}

/// Range of an element as the documentation shows it, already scaled.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentedRange {
    pub min: f64,
    pub max: f64,
    pub min_text: String,
    pub max_text: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: Name,
    pub descriptor: TypeDescriptor,
    pub direction: Direction,
    pub constant_group: Option<Name>,
    pub annotations: Annotations,
    pub role: Option<Role>,
    pub level: Level,
}

impl Element {
    pub fn plain(
        name: &str,
        descriptor: TypeDescriptor,
        direction: Direction,
    ) -> Self {
        Self {
            name: Name::new(name),
            descriptor,
            direction,
            constant_group: None,
            annotations: Annotations::default(),
            role: None,
            level: Level::Normal,
        }
    }

    /// Builds an element from its declaration tuple. Inline constant groups
    /// are registered on the way.
    pub fn from_declaration(
        packet: &Name,
        decl: &ElementDecl,
        registry: &mut ConstantGroupRegistry,
    ) -> Result<Self> {
        let qualified = format!("{packet}/{}", decl.name);
        if Name::new(&decl.name).is_empty() {
            return Err(Error::malformed(format!(
                "{packet}: element without a name"
            )));
        }
        let descriptor =
            TypeDescriptor::resolve(&qualified, &decl.type_token, decl.cardinality)?;
        let direction = Direction::parse(&decl.direction)?;
        let mut element = Self::plain(&decl.name, descriptor, direction);

        match &decl.extra {
            None => {}
            Some(ExtraDecl::InlineGroup(group_name, constants)) => {
                let group = ConstantGroup::new(
                    group_name,
                    descriptor.base,
                    constants,
                )?;
                registry.insert(group)?;
                registry.bind(&mut element, group_name)?;
            }
            Some(ExtraDecl::Annotations(annotations)) => {
                if let Some(group_name) = &annotations.constant_group {
                    registry.bind(&mut element, group_name)?;
                }
                let group = match &element.constant_group {
                    Some(name) => Some(registry.resolve(name.space())?),
                    None => None,
                };
                element.annotations =
                    Self::annotations(&qualified, descriptor, annotations, group)?;
            }
        }
        Ok(element)
    }

    fn annotations(
        qualified: &str,
        descriptor: TypeDescriptor,
        decl: &AnnotationsDecl,
        group: Option<&ConstantGroup>,
    ) -> Result<Annotations> {
        let base = descriptor.base;
        let scale = match decl.scale {
            Some((num, den)) if num == 0 || den == 0 => {
                return Err(Error::annotation(qualified, "scale can't be zero"))
            }
            Some((num, den)) => Some(Scale { num, den }),
            None => None,
        };
        let range = match &decl.range {
            None => None,
            Some(RangeDecl::Keyword(keyword)) => match keyword.as_str() {
                "type" => Some(ValueRange::Type),
                "constants" if group.is_some() => Some(ValueRange::Constants),
                "constants" => {
                    return Err(Error::annotation(
                        qualified,
                        "range `constants` without a constant group",
                    ))
                }
                other => {
                    return Err(Error::annotation(
                        qualified,
                        format!("unknown range keyword `{other}`"),
                    ))
                }
            },
            Some(RangeDecl::Bounds(min, max)) => Some(ValueRange::Bounds(vec![
                Self::bounds(qualified, base, min, max)?,
            ])),
            Some(RangeDecl::List(list)) => Some(ValueRange::Bounds(
                list.iter()
                    .map(|(min, max)| Self::bounds(qualified, base, min, max))
                    .collect::<Result<_>>()?,
            )),
        };
        if scale.is_some() && !(base.is_integer() || base == BaseType::Float) {
            return Err(Error::annotation(qualified, "only numbers can be scaled"));
        }

        let default = match &decl.default {
            Some(raw) => Some(Value::typed(raw, base, qualified)?),
            None => None,
        };
        if let Some(default) = &default {
            let in_range = match &range {
                Some(ValueRange::Bounds(bounds)) => bounds
                    .iter()
                    .any(|(min, max)| min <= default && default <= max),
                // typed already checked the type bounds
                Some(ValueRange::Type) => true,
                Some(ValueRange::Constants) | None => {
                    group.map_or(true, |group| group.contains_value(default))
                }
            };
            if !in_range {
                return Err(Error::annotation(
                    qualified,
                    format!("default {default} is outside the valid range"),
                ));
            }
        }

        Ok(Annotations {
            unit: decl.unit.clone(),
            scale,
            range,
            default,
        })
    }

    fn bounds(
        qualified: &str,
        base: BaseType,
        min: &crate::types::RawValue,
        max: &crate::types::RawValue,
    ) -> Result<(Value, Value)> {
        let min = Value::typed(min, base, qualified)?;
        let max = Value::typed(max, base, qualified)?;
        if min > max {
            return Err(Error::annotation(
                qualified,
                format!("range minimum {min} is above maximum {max}"),
            ));
        }
        Ok((min, max))
    }

    /// Bytes this element takes in one packet. For the logical stream
    /// element this is the `(chunk_offset, chunk_data)` pair.
    pub fn effective_wire_width(&self) -> usize {
        match &self.role {
            Some(Role::StreamData(shape)) => shape.pair_bytes(),
            _ => self.descriptor.wire_bytes(),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        self.descriptor.cardinality
    }

    pub fn has_role(&self, role: Role) -> bool {
        match (&self.role, role) {
            (Some(Role::StreamData(_)), Role::StreamData(_)) => true,
            (Some(own), role) => *own == role,
            (None, _) => false,
        }
    }

    /// The canonical tuple a backend name-mapper works from.
    pub fn canonical(
        &self,
    ) -> (TypeDescriptor, Cardinality, Direction, Option<Role>) {
        (
            self.descriptor,
            self.descriptor.cardinality,
            self.direction,
            self.role,
        )
    }

    pub fn documented_range(&self) -> Option<DocumentedRange> {
        let (min, max) = match self.annotations.range.as_ref()? {
            ValueRange::Bounds(bounds) => {
                let min = bounds.iter().filter_map(|(min, _)| min.as_int()).min()?;
                let max = bounds.iter().filter_map(|(_, max)| max.as_int()).max()?;
                (min, max)
            }
            ValueRange::Type => self.descriptor.base.integer_bounds()?,
            ValueRange::Constants => return None,
        };
        let (min_value, max_value, min_text, max_text) = match self.annotations.scale {
            Some(scale) => (
                scale.apply(min),
                scale.apply(max),
                scale.format(min),
                scale.format(max),
            ),
            None => (min as f64, max as f64, min.to_string(), max.to_string()),
        };
        Some(DocumentedRange {
            min: min_value,
            max: max_value,
            min_text,
            max_text,
            unit: self.annotations.unit.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawValue;

    fn decl(extra: Option<ExtraDecl>) -> ElementDecl {
        ElementDecl {
            name: "Voltage".to_string(),
            type_token: "uint16".to_string(),
            cardinality: 1,
            direction: "in".to_string(),
            extra,
        }
    }

    fn annotations(decl: AnnotationsDecl) -> Option<ExtraDecl> {
        Some(ExtraDecl::Annotations(decl))
    }

    #[test]
    fn voltage_with_scale_and_range() {
        let mut registry = ConstantGroupRegistry::new();
        let extra = annotations(AnnotationsDecl {
            scale: Some((1, 1000)),
            unit: Some("Volt".to_string()),
            range: Some(RangeDecl::Bounds(RawValue::Int(0), RawValue::Int(10000))),
            ..Default::default()
        });
        let element = Element::from_declaration(
            &Name::new("Set Voltage"),
            &decl(extra),
            &mut registry,
        )
        .unwrap();
        assert_eq!(element.descriptor, TypeDescriptor::scalar(BaseType::Uint16));
        assert_eq!(element.effective_wire_width(), 2);
        let range = element.documented_range().unwrap();
        assert_eq!(range.min, 0.0);
        assert_eq!(range.max, 10.0);
        assert_eq!(range.max_text, "10.000");
        assert_eq!(range.unit.as_deref(), Some("Volt"));
    }

    #[test]
    fn default_must_satisfy_range() {
        let mut registry = ConstantGroupRegistry::new();
        let extra = annotations(AnnotationsDecl {
            range: Some(RangeDecl::Bounds(RawValue::Int(0), RawValue::Int(100))),
            default: Some(RawValue::Int(101)),
            ..Default::default()
        });
        let err = Element::from_declaration(
            &Name::new("Set Voltage"),
            &decl(extra),
            &mut registry,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidAnnotation { .. }));
    }

    #[test]
    fn inline_group_is_registered() {
        let mut registry = ConstantGroupRegistry::new();
        let mut gesture = decl(Some(ExtraDecl::InlineGroup(
            "Gesture".to_string(),
            vec![
                ("Left To Right".to_string(), RawValue::Int(0)),
                ("Right To Left".to_string(), RawValue::Int(1)),
            ],
        )));
        gesture.type_token = "uint8".to_string();
        let element =
            Element::from_declaration(&Name::new("Get Gesture"), &gesture, &mut registry)
                .unwrap();
        assert_eq!(element.constant_group, Some(Name::new("Gesture")));
        assert_eq!(registry.resolve("Gesture").unwrap().constants().len(), 2);
    }

    #[test]
    fn unknown_group_is_reported() {
        let mut registry = ConstantGroupRegistry::new();
        let extra = annotations(AnnotationsDecl {
            constant_group: Some("Nope".to_string()),
            ..Default::default()
        });
        let err = Element::from_declaration(
            &Name::new("Set Voltage"),
            &decl(extra),
            &mut registry,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownConstantGroup { .. }));
    }

    #[test]
    fn scale_formatting() {
        let milli = Scale { num: 1, den: 1000 };
        assert_eq!(milli.format(10000), "10.000");
        assert_eq!(milli.format(-1500), "-1.500");
        assert_eq!(milli.format(0), "0.000");
        assert_eq!(Scale { num: 1, den: 1 }.format(42), "42");
        assert_eq!(Scale { num: 10, den: 1 }.format(42), "420");
        assert_eq!(Scale { num: 1, den: 4 }.format(2), "0.5");
        // past i128, rendered as a float
        let huge = Scale { num: u64::MAX, den: 1 };
        assert!(huge.format(u64::MAX as i128).starts_with("34028236692093846"));
        assert_eq!(huge.format(1), u64::MAX.to_string());
    }
}
