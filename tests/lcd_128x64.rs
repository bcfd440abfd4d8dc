use std::path::PathBuf;

use com2bindings::declaration;
use com2bindings::element::Role;
use com2bindings::formater::Name;
use com2bindings::packet::{PacketKind, View};
use com2bindings::stream::{self, StreamLayout};
use com2bindings::{compile, Backend, Device, GeneratorConfig, RustBackend};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn lcd() -> Device {
    let decl = declaration::load(&fixture("lcd_128x64.json")).unwrap();
    compile(&decl, &GeneratorConfig::default()).unwrap()
}

#[test]
fn declared_chunks_keep_their_capacity() {
    let device = lcd();
    assert_eq!(device.full_name(), "LCD 128x64 Bricklet");

    let write = device.packet(&Name::new("Write Pixels Low Level")).unwrap();
    let stream = write.high_level.as_ref().unwrap().stream();
    match stream.layout {
        StreamLayout::Chunked { shape, max_count } => {
            assert_eq!(shape.capacity, 448);
            assert_eq!(max_count, 8192);
        }
        other => panic!("unexpected layout {other:?}"),
    }
    assert_eq!(write.request_bytes(), 64);
    assert_eq!(write.response_bytes(), 0);

    let read = device.packet(&Name::new("Read Pixels Low Level")).unwrap();
    let shape = read.high_level.as_ref().unwrap().stream().shape().copied().unwrap();
    assert_eq!(shape.capacity, 480);
    assert_eq!(read.request_bytes(), 4);
    assert_eq!(read.response_bytes(), 64);
    assert_eq!(read.high_level_name(), Name::new("Read Pixels"));
}

#[test]
fn high_level_view_hides_the_chunks() {
    let device = lcd();
    let read = device.packet(&Name::new("Read Pixels Low Level")).unwrap();
    let high: Vec<_> = read
        .outputs(View::HighLevel)
        .map(|element| element.name.space())
        .collect();
    assert_eq!(high, ["Pixels"]);
    let low: Vec<_> = read
        .outputs(View::LowLevel)
        .map(|element| element.name.space())
        .collect();
    assert_eq!(
        low,
        ["Pixels Length", "Pixels Chunk Offset", "Pixels Chunk Data"]
    );
    let inputs = read.inputs(View::HighLevel).count();
    assert_eq!(inputs, 4);
    assert!(read
        .elements
        .iter()
        .any(|element| matches!(element.role, Some(Role::StreamData(_)))));
}

#[test]
fn function_ids_follow_declaration_order() {
    let device = lcd();
    let ids: Vec<_> = device
        .packets
        .iter()
        .take(3)
        .map(|packet| (packet.name.space(), packet.function_id))
        .collect();
    assert_eq!(
        ids,
        [
            ("Write Pixels Low Level", 1),
            ("Read Pixels Low Level", 2),
            ("Clear Display", 3),
        ]
    );
    let gesture = device.packet(&Name::new("Touch Gesture")).unwrap();
    assert_eq!(gesture.kind, PacketKind::Callback);
    assert_eq!(gesture.function_id, 13);

    // comcu: true
    let identity = device.packet(&Name::new("Get Identity")).unwrap();
    assert_eq!(identity.function_id, 255);
    assert!(device.packet(&Name::new("Get SPITFP Error Count")).is_some());
    assert!(device.constant_groups.resolve("Gesture").is_ok());
}

#[test]
fn expanding_again_changes_nothing() {
    let device = lcd();
    let mut again = device.clone();
    let errors = stream::expand_all(&mut again.packets, &GeneratorConfig::default().transport);
    assert!(errors.is_empty());
    assert_eq!(again, device);
}

#[test]
fn rust_bindings() {
    let device = lcd();
    let backend = RustBackend::new(&GeneratorConfig::default());
    let files = backend.generate(&device);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, PathBuf::from("lcd_128x64.rs"));
    let code = &files[0].contents;
    assert!(code.contains("pub struct LCD128x64Bricklet"));
    assert!(code.contains("pub fn write_pixels_low_level"));
    assert!(code.contains("pub fn write_pixels"));
    assert!(code.contains("pub fn read_pixels"));
    assert!(code.contains("pub struct TouchPositionCallback"));
    assert!(code.contains("pub struct GetTouchGestureResponse"));
    assert!(code.contains("pub enum Gesture"));
    assert!(code.contains("pub const DEVICE_IDENTIFIER : u16 = 298"));
    // cross references point at the Rust names
    assert!(code.contains("`draw_buffered_frame`"));
    assert!(code.contains("`TouchPositionCallback`"));
}
