//! Whole-device checks, run once the packets are expanded. Every violation
//! is collected, a device with any of them is not generated.

use std::collections::{HashMap, HashSet};

use crate::config::Transport;
use crate::device::Device;
use crate::doc::Reference;
use crate::element::{Direction, Role};
use crate::error::Error;
use crate::formater::Name;
use crate::packet::{Packet, PacketKind};
use crate::stream::StreamLayout;
use crate::types::{Cardinality, Version};

pub fn validate(device: &Device, transport: &Transport) -> Vec<Error> {
    check(device, transport, true)
}

/// Validation following [`crate::stream::expand_all`]: streams still
/// pending failed to expand and were reported there.
pub(crate) fn validate_expanded(device: &Device, transport: &Transport) -> Vec<Error> {
    check(device, transport, false)
}

fn check(device: &Device, transport: &Transport, report_pending: bool) -> Vec<Error> {
    let mut errors = vec![];
    unique_packets(device, &mut errors);
    for packet in &device.packets {
        unique_elements(packet, &mut errors);
        constant_groups(device, packet, &mut errors);
        directions(packet, &mut errors);
        cardinalities(packet, &mut errors);
        stream_roles(packet, report_pending, &mut errors);
        sizes(packet, transport, &mut errors);
        references(device, packet, &mut errors);
    }
    version_order(device, &mut errors);
    errors
}

fn unique_packets(device: &Device, errors: &mut Vec<Error>) {
    let mut names = HashSet::new();
    let mut ids: HashMap<u8, &Name> = HashMap::new();
    for packet in &device.packets {
        if !names.insert(&packet.name) {
            errors.push(Error::duplicate("packet", packet.name.space()));
        }
        if let Some(first) = ids.insert(packet.function_id, &packet.name) {
            errors.push(Error::DuplicateFunctionId {
                id: packet.function_id,
                first: first.space().to_string(),
                second: packet.name.space().to_string(),
            });
        }
    }
}

fn unique_elements(packet: &Packet, errors: &mut Vec<Error>) {
    let mut names = HashSet::new();
    for element in &packet.elements {
        if !names.insert(&element.name) {
            errors.push(Error::duplicate(
                format!("element of `{}`", packet.name),
                element.name.space(),
            ));
        }
    }
}

fn constant_groups(device: &Device, packet: &Packet, errors: &mut Vec<Error>) {
    for element in &packet.elements {
        let Some(group) = &element.constant_group else {
            continue;
        };
        match device.constant_groups.resolve(group.space()) {
            Ok(group) if group.base != element.descriptor.base => {
                errors.push(Error::TypeMismatch {
                    element: format!("{}/{}", packet.name, element.name),
                    expected: element.descriptor.base,
                    found: format!("constant group `{}` of {}", group.name, group.base),
                })
            }
            Ok(_) => {}
            Err(err) => errors.push(err),
        }
    }
}

fn directions(packet: &Packet, errors: &mut Vec<Error>) {
    if packet.kind != PacketKind::Callback {
        return;
    }
    for element in &packet.elements {
        if element.direction != Direction::Out {
            errors.push(Error::malformed(format!(
                "{}: callback element `{}` must be `out`",
                packet.name, element.name
            )));
        }
    }
}

fn cardinalities(packet: &Packet, errors: &mut Vec<Error>) {
    for element in &packet.elements {
        let variable =
            matches!(element.cardinality(), Cardinality::Variable { .. });
        let stream_data = matches!(element.role, Some(Role::StreamData(_)));
        if variable != stream_data {
            errors.push(Error::InvalidCardinality {
                element: format!("{}/{}", packet.name, element.name),
                cardinality: element.cardinality().signed(),
            });
        }
    }
}

const ROLES: [&str; 6] = [
    "stream_length",
    "stream_chunk_offset",
    "stream_chunk_data",
    "stream_chunk_written",
    "stream_data",
    "stream_written",
];

fn stream_roles(packet: &Packet, report_pending: bool, errors: &mut Vec<Error>) {
    let wanted = match &packet.high_level {
        None => [0; 6],
        Some(high_level) => {
            let written = usize::from(high_level.short_write());
            match high_level.stream().layout {
                StreamLayout::Pending => {
                    if report_pending {
                        errors.push(Error::malformed(format!(
                            "{}: stream `{}` was never expanded",
                            packet.name,
                            high_level.stream().name
                        )));
                    }
                    return;
                }
                StreamLayout::Chunked { .. } => [1, 1, 1, written, 1, written],
                StreamLayout::SingleChunk { .. } => [1, 0, 1, written, 1, written],
            }
        }
    };
    for (token, wanted) in ROLES.into_iter().zip(wanted) {
        let found = packet
            .elements
            .iter()
            .filter(|element| {
                element.role.is_some_and(|role| role.token() == token)
            })
            .count();
        if found != wanted {
            errors.push(Error::malformed(format!(
                "{}: expected {wanted} `{token}` element(s), found {found}",
                packet.name
            )));
        }
    }
}

fn sizes(packet: &Packet, transport: &Transport, errors: &mut Vec<Error>) {
    let limit = transport.max_payload();
    for (half, size) in [
        ("request", packet.request_bytes()),
        ("response", packet.response_bytes()),
    ] {
        if size > limit {
            errors.push(Error::PacketTooLarge {
                packet: packet.name.space().to_string(),
                half,
                size,
                limit,
            });
        }
    }
}

fn references(device: &Device, packet: &Packet, errors: &mut Vec<Error>) {
    let exists = |kind: PacketKind, target: &Name| {
        device.packets.iter().any(|other| {
            other.kind == kind
                && (&other.name == target || &other.high_level_name() == target)
        })
    };
    let mut seen = HashSet::new();
    for reference in packet.doc.references() {
        let (kind, label, target) = match &reference {
            Reference::Function(target) => (PacketKind::Function, "function", target),
            Reference::Callback(target) => (PacketKind::Callback, "callback", target),
            Reference::Anchor { .. } => continue,
        };
        if !exists(kind, target) && seen.insert(target.clone()) {
            errors.push(Error::UnknownCrossReference {
                packet: packet.name.space().to_string(),
                kind: label,
                target: target.space().to_string(),
            });
        }
    }
}

fn version_order(device: &Device, errors: &mut Vec<Error>) {
    let mut latest: HashMap<Name, (Version, &Name)> = HashMap::new();
    for packet in &device.packets {
        let family = packet.family();
        match latest.get(&family).copied() {
            Some((previous, previous_packet))
                if packet.since_firmware < previous =>
            {
                errors.push(Error::VersionOrder {
                    packet: packet.name.space().to_string(),
                    found: packet.since_firmware.to_string(),
                    previous: previous.to_string(),
                    previous_packet: previous_packet.space().to_string(),
                });
            }
            _ => {
                latest.insert(family, (packet.since_firmware, &packet.name));
            }
        }
    }
}
