use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use crate::constant_group::{ConstantGroup, ConstantGroupRegistry};
use crate::declaration::{
    AnnotationsDecl, DeviceDecl, DocDecl, ElementDecl, ExtraDecl, PacketDecl,
};
use crate::error::{Error, Result, Violations};
use crate::formater::Name;
use crate::packet::{Packet, PacketKind};
use crate::types::{RawValue, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Brick,
    Bricklet,
}

impl Category {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "Brick" => Ok(Category::Brick),
            "Bricklet" => Ok(Category::Bricklet),
            other => Err(Error::malformed(format!(
                "category must be `Brick` or `Bricklet`, not `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Brick => "Brick",
            Category::Bricklet => "Bricklet",
        })
    }
}

/// Packet sets shared by whole device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    /// Answers `Get Identity` like every device on the stack.
    Device,
    /// Co-processor bricklet: bootloader, status LED, UID, SPITFP counters.
    ComcuBricklet,
    BrickletGetIdentity,
}

impl Feature {
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "device" => Ok(Feature::Device),
            "comcu_bricklet" => Ok(Feature::ComcuBricklet),
            "bricklet_get_identity" => Ok(Feature::BrickletGetIdentity),
            other => Err(Error::malformed(format!("unknown feature `{other}`"))),
        }
    }
}

/// The unit of code generation, every backend emits one file (or package)
/// per device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: Name,
    pub display_name: String,
    pub identifier: u16,
    pub category: Category,
    pub api_version: Version,
    pub author: Option<String>,
    pub manufacturer: Option<String>,
    pub description: BTreeMap<String, String>,
    pub released: bool,
    pub documented: bool,
    pub discontinued: bool,
    pub features: Vec<Feature>,
    pub constant_groups: ConstantGroupRegistry,
    pub packets: Vec<Packet>,
}

impl Device {
    /// Builds the IR of one device. Construction goes on after a failure so
    /// that every problem of the declaration is reported at once.
    pub fn build(decl: &DeviceDecl) -> std::result::Result<Self, Violations> {
        let mut violations = Violations::new(decl.name.clone());
        let mut device = Self {
            name: Name::new(&decl.name),
            display_name: decl.display_name.clone(),
            identifier: decl.device_identifier,
            category: Category::parse(&decl.category).unwrap_or_else(|err| {
                violations.push(err);
                Category::Bricklet
            }),
            api_version: decl.api_version,
            author: decl.author.clone(),
            manufacturer: decl.manufacturer.clone(),
            description: decl.description.clone(),
            released: decl.released,
            documented: decl.documented,
            discontinued: decl.discontinued,
            features: vec![],
            constant_groups: ConstantGroupRegistry::new(),
            packets: vec![],
        };
        if device.name.is_empty() {
            violations.push(Error::malformed("device without a name"));
        }

        for group in &decl.constant_groups {
            let built = group
                .type_token
                .parse()
                .and_then(|base| ConstantGroup::new(&group.name, base, &group.constants))
                .and_then(|group| device.constant_groups.insert(group));
            if let Err(err) = built {
                violations.push(err);
            }
        }

        let mut next_id: u16 = 1;
        for packet in &decl.packets {
            let function_id = match packet.function_id {
                Some(id) => id,
                None => {
                    let id = next_id;
                    next_id += 1;
                    match u8::try_from(id) {
                        Ok(id) => id,
                        Err(_) => {
                            violations.push(Error::malformed(format!(
                                "{}: out of function ids",
                                packet.name
                            )));
                            continue;
                        }
                    }
                }
            };
            match Packet::from_declaration(
                packet,
                function_id,
                &mut device.constant_groups,
            ) {
                Ok(packet) => device.packets.push(packet),
                Err(errors) => violations.extend(errors),
            }
        }

        let mut features = vec![];
        for token in &decl.features {
            match Feature::parse(token) {
                Ok(feature) => features.push(feature),
                Err(err) => violations.push(err),
            }
        }
        if decl.comcu {
            features.push(Feature::ComcuBricklet);
            features.push(Feature::BrickletGetIdentity);
        }
        features.sort();
        features.dedup();
        device.features = features;
        device.add_common_packets(&mut violations);

        debug!(
            "{}: {} packets, {} constant groups",
            device.name,
            device.packets.len(),
            device.constant_groups.len()
        );
        violations.into_result(device)
    }

    fn add_common_packets(&mut self, violations: &mut Violations) {
        let comcu = self.features.contains(&Feature::ComcuBricklet);
        let identity = self.features.contains(&Feature::Device)
            || self.features.contains(&Feature::BrickletGetIdentity);
        let mut common = vec![];
        if comcu {
            for (name, base, constants) in comcu_constant_groups() {
                let inserted = base
                    .parse()
                    .and_then(|base| ConstantGroup::new(name, base, &constants))
                    .and_then(|group| self.constant_groups.insert(group));
                if let Err(err) = inserted {
                    violations.push(err);
                }
            }
            common.extend(comcu_packets());
        }
        if identity {
            common.push(get_identity());
        }
        for decl in &common {
            let id = decl.function_id.unwrap_or_default();
            match Packet::from_declaration(decl, id, &mut self.constant_groups) {
                Ok(packet) => self.packets.push(packet),
                Err(errors) => violations.extend(errors),
            }
        }
    }

    /// `LCD 128x64 Bricklet`
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.category)
    }

    pub fn packet(&self, name: &Name) -> Option<&Packet> {
        self.packets.iter().find(|packet| &packet.name == name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Packet> {
        self.packets
            .iter()
            .filter(|packet| packet.kind == PacketKind::Function)
    }

    pub fn callbacks(&self) -> impl Iterator<Item = &Packet> {
        self.packets
            .iter()
            .filter(|packet| packet.kind == PacketKind::Callback)
    }
}

type Constants = Vec<(String, RawValue)>;

fn constants(pairs: &[(&str, i64)]) -> Constants {
    pairs
        .iter()
        .map(|(label, value)| (label.to_string(), RawValue::Int(*value)))
        .collect()
}

fn comcu_constant_groups() -> [(&'static str, &'static str, Constants); 3] {
    [
        (
            "Bootloader Mode",
            "uint8",
            constants(&[
                ("Bootloader", 0),
                ("Firmware", 1),
                ("Bootloader Wait For Reboot", 2),
                ("Firmware Wait For Reboot", 3),
                ("Firmware Wait For Erase And Reboot", 4),
            ]),
        ),
        (
            "Bootloader Status",
            "uint8",
            constants(&[
                ("OK", 0),
                ("Invalid Mode", 1),
                ("No Change", 2),
                ("Entry Function Not Present", 3),
                ("Device Identifier Incorrect", 4),
                ("CRC Mismatch", 5),
            ]),
        ),
        (
            "Status LED Config",
            "uint8",
            constants(&[
                ("Off", 0),
                ("On", 1),
                ("Show Heartbeat", 2),
                ("Show Status", 3),
            ]),
        ),
    ]
}

fn element(
    name: &str,
    kind: &str,
    cardinality: i64,
    direction: &str,
    group: Option<&str>,
) -> ElementDecl {
    ElementDecl {
        name: name.to_string(),
        type_token: kind.to_string(),
        cardinality,
        direction: direction.to_string(),
        extra: group.map(|group| {
            ExtraDecl::Annotations(AnnotationsDecl {
                constant_group: Some(group.to_string()),
                ..Default::default()
            })
        }),
    }
}

fn common_packet(
    name: &str,
    function_id: u8,
    elements: Vec<ElementDecl>,
    doc: &str,
) -> PacketDecl {
    PacketDecl {
        kind: "function".to_string(),
        name: name.to_string(),
        elements,
        since_firmware: Version(1, 0, 0),
        doc: Some(DocDecl(
            "af".to_string(),
            BTreeMap::from([("en".to_string(), doc.to_string())]),
        )),
        high_level: None,
        function_id: Some(function_id),
    }
}

fn comcu_packets() -> Vec<PacketDecl> {
    vec![
        common_packet(
            "Get SPITFP Error Count",
            234,
            vec![
                element("Error Count Ack Checksum", "uint32", 1, "out", None),
                element("Error Count Message Checksum", "uint32", 1, "out", None),
                element("Error Count Frame", "uint32", 1, "out", None),
                element("Error Count Overflow", "uint32", 1, "out", None),
            ],
            "Returns the error count for the communication between Brick and \
             Bricklet.",
        ),
        common_packet(
            "Set Bootloader Mode",
            235,
            vec![
                element("Mode", "uint8", 1, "in", Some("Bootloader Mode")),
                element("Status", "uint8", 1, "out", Some("Bootloader Status")),
            ],
            "Sets the bootloader mode and returns the status after the \
             requested mode change was instigated.",
        ),
        common_packet(
            "Get Bootloader Mode",
            236,
            vec![element("Mode", "uint8", 1, "out", Some("Bootloader Mode"))],
            "Returns the current bootloader mode, see :func:`Set Bootloader Mode`.",
        ),
        common_packet(
            "Set Write Firmware Pointer",
            237,
            vec![element("Pointer", "uint32", 1, "in", None)],
            "Sets the firmware pointer for :func:`Write Firmware`.",
        ),
        common_packet(
            "Write Firmware",
            238,
            vec![
                element("Data", "uint8", 64, "in", None),
                element("Status", "uint8", 1, "out", None),
            ],
            "Writes 64 Bytes of firmware at the position as written by \
             :func:`Set Write Firmware Pointer` before.",
        ),
        common_packet(
            "Set Status LED Config",
            239,
            vec![element("Config", "uint8", 1, "in", Some("Status LED Config"))],
            "Sets the status LED configuration.",
        ),
        common_packet(
            "Get Status LED Config",
            240,
            vec![element("Config", "uint8", 1, "out", Some("Status LED Config"))],
            "Returns the configuration as set by :func:`Set Status LED Config`.",
        ),
        common_packet(
            "Get Chip Temperature",
            242,
            vec![element("Temperature", "int16", 1, "out", None)],
            "Returns the temperature as measured inside the microcontroller.",
        ),
        common_packet(
            "Reset",
            243,
            vec![],
            "Calling this function will reset the Bricklet.",
        ),
        common_packet(
            "Write UID",
            248,
            vec![element("UID", "uint32", 1, "in", None)],
            "Writes a new UID into flash.",
        ),
        common_packet(
            "Read UID",
            249,
            vec![element("UID", "uint32", 1, "out", None)],
            "Returns the current UID as an integer.",
        ),
    ]
}

fn get_identity() -> PacketDecl {
    common_packet(
        "Get Identity",
        255,
        vec![
            element("Uid", "string", 8, "out", None),
            element("Connected Uid", "string", 8, "out", None),
            element("Position", "char", 1, "out", None),
            element("Hardware Version", "uint8", 3, "out", None),
            element("Firmware Version", "uint8", 3, "out", None),
            element("Device Identifier", "uint16", 1, "out", None),
        ],
        "Returns the UID, the UID where the device is connected to, the \
         position, the hardware and firmware version as well as the device \
         identifier.",
    )
}
