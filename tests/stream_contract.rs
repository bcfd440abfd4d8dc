use com2bindings::declaration::from_json;
use com2bindings::formater::Name;
use com2bindings::stream::{read_stream, write_stream, ChunkShape, StreamInChunks};
use com2bindings::{compile, Error, GeneratorConfig};

/// Chunk geometry and limit the generator picked for `packet`.
fn layout(packets: &str, packet: &str) -> (ChunkShape, usize) {
    let decl = from_json(&format!(
        r#"{{"api_version": [2, 0, 0], "category": "Bricklet", "device_identifier": 1000,
            "name": "Test", "display_name": "Test", "packets": [{packets}]}}"#
    ))
    .unwrap();
    let device = compile(&decl, &GeneratorConfig::default()).unwrap();
    let stream = device
        .packet(&Name::new(packet))
        .and_then(|packet| packet.high_level.as_ref())
        .unwrap()
        .stream();
    (*stream.shape().unwrap(), stream.resolved_max_count().unwrap())
}

fn read_values() -> (ChunkShape, usize) {
    layout(
        r#"{"type": "function", "name": "Read Values Low Level", "since_firmware": [1, 0, 0],
            "high_level": {"stream_out": {"name": "Values", "data_type": "uint16",
                                          "max_count": 1000}}}"#,
        "Read Values Low Level",
    )
}

fn write_values() -> (ChunkShape, usize) {
    layout(
        r#"{"type": "function", "name": "Write Values Low Level", "since_firmware": [1, 0, 0],
            "high_level": {"stream_in": {"name": "Values", "data_type": "uint8",
                                         "short_write": true}}}"#,
        "Write Values Low Level",
    )
}

/// Answers reads like a device holding `values`, wrapping at the end.
fn device(
    values: Vec<u16>,
    capacity: usize,
) -> impl FnMut() -> Result<(usize, usize, Vec<u16>), Error> {
    let mut offset = 0;
    move || {
        let mut chunk: Vec<u16> =
            values.iter().skip(offset).take(capacity).copied().collect();
        chunk.resize(capacity, 0);
        let response = (values.len(), offset, chunk);
        offset += capacity;
        if offset >= values.len() {
            offset = 0;
        }
        Ok(response)
    }
}

#[test]
fn synthesized_geometry() {
    let (shape, max_count) = read_values();
    assert_eq!(shape.capacity, 30);
    assert_eq!(max_count, 1000);
    // one byte per item, three length fields
    let (shape, max_count) = write_values();
    assert_eq!(shape.capacity, 58);
    assert_eq!(max_count, 65535);
}

#[test]
fn read_takes_ceil_of_count_over_capacity() {
    let (shape, max_count) = read_values();
    for count in [1usize, 29, 30, 31, 60, 61, 1000] {
        let values: Vec<u16> = (0..count).map(|v| (v as u16).wrapping_mul(31)).collect();
        let mut calls = 0;
        let mut answer = device(values.clone(), shape.capacity);
        let data = read_stream(&shape, max_count, 2, || {
            calls += 1;
            answer()
        })
        .unwrap();
        assert_eq!(data, values);
        assert_eq!(calls, count.div_ceil(shape.capacity), "{count} values");
    }
}

#[test]
fn read_of_nothing_takes_one_call() {
    let (shape, max_count) = read_values();
    let mut calls = 0;
    let data: Vec<u16> = read_stream(&shape, max_count, 2, || {
        calls += 1;
        Ok((0, 0, vec![0; shape.capacity]))
    })
    .unwrap();
    assert!(data.is_empty());
    assert_eq!(calls, 1);
}

#[test]
fn stuck_device_truncates_the_read() {
    let (shape, max_count) = read_values();
    let mut calls = 0;
    let result: Result<Vec<u16>, _> = read_stream(&shape, max_count, 2, || {
        calls += 1;
        // never gets past the first chunk
        Ok((100, 30, vec![0; shape.capacity]))
    });
    // ceil(1000 / 30) * 2
    assert!(matches!(
        result,
        Err(Error::TruncatedStream {
            received: 69,
            max_chunks: 68
        })
    ));
    assert_eq!(calls, 69);
}

#[test]
fn changed_length_restarts_the_read() {
    let (shape, max_count) = read_values();
    let old: Vec<u16> = (0..45).collect();
    let new: Vec<u16> = (100..140).collect();
    let mut responses = vec![
        (old.len(), 0, old[..30].to_vec()),
        (new.len(), 30, new[30..].to_vec()),
        (new.len(), 0, new[..30].to_vec()),
        (new.len(), 30, new[30..].to_vec()),
    ]
    .into_iter();
    let data = read_stream(&shape, max_count, 2, || {
        let (length, offset, mut chunk) = responses.next().unwrap();
        chunk.resize(shape.capacity, 0);
        Ok((length, offset, chunk))
    })
    .unwrap();
    assert_eq!(data, new);
}

#[test]
fn read_longer_than_the_maximum_overflows() {
    let (shape, max_count) = read_values();
    let result: Result<Vec<u16>, _> =
        read_stream(&shape, max_count, 2, || Ok((1001, 0, vec![0; shape.capacity])));
    assert!(matches!(
        result,
        Err(Error::StreamOverflow {
            len: 1001,
            max: 1000
        })
    ));
}

#[test]
fn write_at_capacity_boundary() {
    let (shape, max_count) = write_values();
    let exact = vec![7u8; shape.capacity];
    let chunks: Vec<_> = StreamInChunks::new(&exact, &shape, max_count).unwrap().collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].used, shape.capacity);

    let over = vec![7u8; shape.capacity + 1];
    let chunks: Vec<_> = StreamInChunks::new(&over, &shape, max_count).unwrap().collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[1].chunk_offset, shape.capacity);
    assert_eq!(chunks[1].used, 1);
    assert_eq!(chunks[1].chunk_data.len(), shape.capacity);
    assert!(chunks[1].chunk_data[1..].iter().all(|item| *item == 0));
}

#[test]
fn short_write_reports_the_final_chunk() {
    let (shape, max_count) = write_values();
    let data: Vec<u8> = (0..150).collect();
    let mut sent = vec![];
    let written = write_stream(&data, &shape, max_count, |chunk| {
        sent.push((chunk.length, chunk.chunk_offset));
        // the device stops accepting in the last chunk
        Ok(Some(if chunk.chunk_offset == 116 { 10 } else { chunk.used }))
    })
    .unwrap();
    assert_eq!(sent, [(150, 0), (150, 58), (150, 116)]);
    assert_eq!(written, Some(10));
}

#[test]
fn oversized_write_sends_nothing() {
    let (shape, _) = write_values();
    let data = vec![0u8; 100];
    let mut sent = 0;
    let result = write_stream(&data, &shape, 99, |_chunk| {
        sent += 1;
        Ok(None)
    });
    assert!(matches!(
        result,
        Err(Error::StreamOverflow { len: 100, max: 99 })
    ));
    assert_eq!(sent, 0);
}
