use log::debug;

use crate::element::Element;
use crate::error::{Error, Result};
use crate::formater::Name;
use crate::types::{BaseType, RawValue, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub label: Name,
    pub value: Value,
}

/// A named enumeration shared by elements. Insertion order is kept, the
/// documentation lists the constants in the order they were declared.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantGroup {
    pub name: Name,
    pub base: BaseType,
    constants: Vec<Constant>,
}

impl ConstantGroup {
    pub fn new(
        name: &str,
        base: BaseType,
        constants: &[(String, RawValue)],
    ) -> Result<Self> {
        let name = Name::new(name);
        if name.is_empty() {
            return Err(Error::malformed("constant group without a name"));
        }
        if matches!(base, BaseType::String | BaseType::Float) {
            return Err(Error::malformed(format!(
                "constant group `{name}` can't be of type {base}"
            )));
        }
        let mut group = Self {
            name,
            base,
            constants: Vec::with_capacity(constants.len()),
        };
        for (label, raw) in constants {
            let scope = format!("constant group `{}` entry", group.name);
            let value = Value::typed(raw, base, &scope)?;
            group.push(Constant {
                label: Name::new(label),
                value,
            })?;
        }
        Ok(group)
    }

    fn push(&mut self, constant: Constant) -> Result<()> {
        let scope = || format!("constant in group `{}`", self.name);
        if self.constants.iter().any(|c| c.label == constant.label) {
            return Err(Error::duplicate(scope(), constant.label.space()));
        }
        if self.constants.iter().any(|c| c.value == constant.value) {
            return Err(Error::duplicate(
                format!("{} value", scope()),
                constant.value.to_string(),
            ));
        }
        self.constants.push(constant);
        Ok(())
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// (label, value) pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Value)> {
        self.constants.iter().map(|c| (&c.label, &c.value))
    }

    pub fn contains_value(&self, value: &Value) -> bool {
        self.constants.iter().any(|c| &c.value == value)
    }

    pub fn label_of(&self, value: &Value) -> Option<&Name> {
        self.constants
            .iter()
            .find(|c| &c.value == value)
            .map(|c| &c.label)
    }
}

/// The constant groups of one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantGroupRegistry {
    groups: Vec<ConstantGroup>,
}

impl ConstantGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a group. Declaring the exact same group twice is accepted, that
    /// happens with inline groups repeated on getter and setter.
    pub fn insert(&mut self, group: ConstantGroup) -> Result<()> {
        match self.groups.iter().find(|g| g.name == group.name) {
            Some(existing) if *existing == group => {
                debug!("constant group `{}` declared again", group.name);
                Ok(())
            }
            Some(_) => Err(Error::duplicate("constant group", group.name.space())),
            None => {
                self.groups.push(group);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&ConstantGroup> {
        let name = Name::new(name);
        self.groups
            .iter()
            .find(|group| group.name == name)
            .ok_or_else(|| Error::UnknownConstantGroup {
                name: name.space().to_string(),
            })
    }

    /// Attaches `group_name` to `element`, the types must be the same.
    pub fn bind(&self, element: &mut Element, group_name: &str) -> Result<()> {
        let group = self.resolve(group_name)?;
        if group.base != element.descriptor.base {
            return Err(Error::TypeMismatch {
                element: element.name.space().to_string(),
                expected: element.descriptor.base,
                found: format!("constant group `{}` of {}", group.name, group.base),
            });
        }
        element.constant_group = Some(group.name.clone());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
