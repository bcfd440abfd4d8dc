use com2bindings::declaration::from_json;
use com2bindings::{compile, Error, GeneratorConfig};

fn device(packets: &str) -> String {
    format!(
        r#"{{"api_version": [2, 0, 0], "category": "Bricklet", "device_identifier": 1000,
            "name": "Test", "display_name": "Test", "packets": [{packets}]}}"#
    )
}

#[test]
fn oversized_request_is_rejected() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Set Buffer", "since_firmware": [1, 0, 0],
            "elements": [["Buffer", "uint8", 65, "in"]]}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert_eq!(violations.device, "Test");
    assert!(matches!(
        violations.errors.as_slice(),
        [Error::PacketTooLarge {
            half: "request",
            size: 65,
            limit: 64,
            ..
        }]
    ));
}

#[test]
fn smaller_transport_shrinks_the_limit() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Set Buffer", "since_firmware": [1, 0, 0],
            "elements": [["Buffer", "uint8", 64, "in"]]}"#,
    ))
    .unwrap();
    assert!(compile(&decl, &GeneratorConfig::default()).is_ok());

    let mut config = GeneratorConfig::default();
    config.transport.packet_length = 40;
    let violations = compile(&decl, &config).unwrap_err();
    assert!(matches!(
        violations.errors[0],
        Error::PacketTooLarge { limit: 32, .. }
    ));
}

#[test]
fn stream_without_room_is_rejected() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Write Values Low Level", "since_firmware": [1, 0, 0],
            "elements": [["Header", "uint8", 60, "in"]],
            "high_level": {"stream_in": {"name": "Values", "data_type": "uint32"}}}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(
        violations.errors.as_slice(),
        [Error::StreamCapacityExhausted {
            available_bytes: 0,
            element_bits: 32,
            ..
        }]
    ));
}

#[test]
fn every_problem_is_reported_at_once() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Get Value", "since_firmware": [1, 0, 0],
            "elements": [["Value", "uint8", 65, "out"]],
            "doc": ["bf", {"en": "See :func:`Set Value`."}]},
           {"type": "function", "name": "Get Other", "function_id": 1,
            "since_firmware": [1, 0, 0], "elements": []}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert_eq!(violations.errors.len(), 3, "{violations}");
    let message = violations.to_string();
    assert!(message.starts_with("Test: 3 violation(s)"));
    assert!(message.contains("function id 1 used by both `Get Value` and `Get Other`"));
    assert!(message.contains("response is 65 bytes"));
    assert!(message.contains("unknown function `Set Value`"));
}

#[test]
fn build_errors_are_batched_too() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Get Value", "since_firmware": [1, 0, 0],
            "elements": [["Value", "uint12", 1, "out"]]},
           {"type": "function", "name": "Get Mode", "since_firmware": [1, 0, 0],
            "elements": [["Mode", "uint8", 1, "out", {"constant_group": "Mode"}]]},
           {"type": "function", "name": "Get Pair", "since_firmware": [1, 0, 0],
            "elements": [["A", "uint12", 1, "out"], ["B", "uint13", 1, "out"]]}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(
        violations.errors.as_slice(),
        [
            Error::UnknownType { .. },
            Error::UnknownConstantGroup { .. },
            Error::UnknownType { .. },
            Error::UnknownType { .. },
        ]
    ));
    let message = violations.to_string();
    assert!(message.contains("uint12"));
    assert!(message.contains("uint13"));
}

#[test]
fn huge_cardinality_is_rejected() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Get Values", "since_firmware": [1, 0, 0],
            "elements": [["A", "uint64", 4611686018427387904, "out"]]}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(
        violations.errors.as_slice(),
        [Error::InvalidCardinality {
            cardinality: 4611686018427387904,
            ..
        }]
    ));

    let decl = from_json(&device(
        r#"{"type": "function", "name": "Get Values", "since_firmware": [1, 0, 0],
            "elements": [["A", "uint64", 65535, "out"]]}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(
        violations.errors.as_slice(),
        [Error::PacketTooLarge {
            half: "response",
            size: 524280,
            ..
        }]
    ));
}

#[test]
fn stream_and_validation_errors_come_together() {
    let decl = from_json(&device(
        r#"{"type": "function", "name": "Get Value", "since_firmware": [1, 0, 0],
            "elements": [["Value", "uint16", 1, "out"]]},
           {"type": "function", "name": "Get Value", "since_firmware": [1, 0, 0],
            "elements": [["Value", "uint16", 1, "out"]]},
           {"type": "function", "name": "Read Values Low Level", "since_firmware": [1, 0, 0],
            "elements": [["Header", "uint8", 60, "out"]],
            "high_level": {"stream_out": {"name": "Values", "data_type": "uint64"}}}"#,
    ))
    .unwrap();
    let violations = compile(&decl, &GeneratorConfig::default()).unwrap_err();
    assert_eq!(violations.errors.len(), 2, "{violations}");
    assert!(matches!(
        violations.errors[0],
        Error::StreamCapacityExhausted {
            element_bits: 64,
            ..
        }
    ));
    assert!(matches!(
        &violations.errors[1],
        Error::DuplicateName { scope, .. } if scope == "packet"
    ));
}
