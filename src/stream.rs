//! Stream expansion: turns a high-level "transfer up to N items" declaration
//! into the fixed-size chunked packet shape the wire protocol can carry, and
//! the client-side contract to split and reassemble those chunks.
//!
//! For `stream_out` the client keeps calling the low-level function, each
//! response carries `length`, `chunk_offset` and `chunk_data`, until it has
//! `length` items. For `stream_in` the client sends the data split in
//! chunks, each request carrying the same fields. A short-write `stream_in`
//! also returns `chunk_written`, only the last chunk's count is the result.
//!
//! The chunk capacity is fixed per packet:
//!
//! ```text
//! capacity = (packet_length - header - other fields - length - offset
//!             [- written, stream_in with short write]) * 8 / bits(T)
//! ```

use log::{debug, warn};

use crate::config::Transport;
use crate::element::{Direction, Element, Level, Role};
use crate::error::{Error, Result};
use crate::formater::Name;
use crate::packet::{Packet, PacketKind};
use crate::types::{BaseType, Cardinality, TypeDescriptor};

/// Per-packet chunk geometry, fixed once the packet is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkShape {
    /// Type of `length`, `chunk_offset` and `chunk_written`.
    pub length_type: BaseType,
    /// `None` when the stream goes in a single chunk without an offset.
    pub offset_type: Option<BaseType>,
    pub data_type: BaseType,
    pub capacity: usize,
}

impl ChunkShape {
    /// Wire width of the `(chunk_offset, chunk_data)` pair.
    pub fn pair_bytes(&self) -> usize {
        self.offset_type.map_or(0, |kind| kind.wire_bytes(1))
            + self.data_type.wire_bytes(self.capacity)
    }

    /// Low-level packets needed for `count` items, at least one.
    pub fn chunks_for(&self, count: usize) -> usize {
        count.div_ceil(self.capacity).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    Pending,
    Chunked { shape: ChunkShape, max_count: usize },
    /// Fits one packet and the declaration opted out of chunking.
    SingleChunk { shape: ChunkShape, max_count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: Name,
    pub single_chunk: bool,
    /// Only needed when the low-level fields are synthesized.
    pub data_type: Option<BaseType>,
    pub length_type: BaseType,
    pub max_count: Option<usize>,
    pub layout: StreamLayout,
}

impl StreamSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: Name::new(name),
            single_chunk: false,
            data_type: None,
            length_type: BaseType::Uint16,
            max_count: None,
            layout: StreamLayout::Pending,
        }
    }

    pub fn is_expanded(&self) -> bool {
        !matches!(self.layout, StreamLayout::Pending)
    }

    pub fn shape(&self) -> Option<&ChunkShape> {
        match &self.layout {
            StreamLayout::Pending => None,
            StreamLayout::Chunked { shape, .. }
            | StreamLayout::SingleChunk { shape, .. } => Some(shape),
        }
    }

    pub fn resolved_max_count(&self) -> Option<usize> {
        match self.layout {
            StreamLayout::Pending => None,
            StreamLayout::Chunked { max_count, .. }
            | StreamLayout::SingleChunk { max_count, .. } => Some(max_count),
        }
    }

    /// Whether the high-level call needs a driving loop. Backends are
    /// expected to emit a straight call when this is false.
    pub fn requires_multiple_chunks(&self) -> bool {
        match (self.shape(), self.resolved_max_count()) {
            (Some(shape), Some(max_count)) => max_count > shape.capacity,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIn {
    pub stream: StreamSpec,
    pub short_write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOut {
    pub stream: StreamSpec,
}

/// Marks a packet as the low-level half of a bulk transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighLevel {
    StreamIn(StreamIn),
    StreamOut(StreamOut),
}

impl HighLevel {
    pub fn stream(&self) -> &StreamSpec {
        match self {
            HighLevel::StreamIn(s) => &s.stream,
            HighLevel::StreamOut(s) => &s.stream,
        }
    }

    fn stream_mut(&mut self) -> &mut StreamSpec {
        match self {
            HighLevel::StreamIn(s) => &mut s.stream,
            HighLevel::StreamOut(s) => &mut s.stream,
        }
    }

    /// Direction of the elements carrying the chunks.
    pub fn direction(&self) -> Direction {
        match self {
            HighLevel::StreamIn(_) => Direction::In,
            HighLevel::StreamOut(_) => Direction::Out,
        }
    }

    pub fn short_write(&self) -> bool {
        matches!(self, HighLevel::StreamIn(StreamIn { short_write: true, .. }))
    }
}

/// Expands every streamed packet of `packets`, collecting the failures.
pub fn expand_all(packets: &mut [Packet], transport: &Transport) -> Vec<Error> {
    packets
        .iter_mut()
        .filter_map(|packet| expand(packet, transport).err())
        .collect()
}

/// Rewrites a packet carrying a `stream_in`/`stream_out` marker into its
/// chunked shape. Packets already expanded are left alone.
pub fn expand(packet: &mut Packet, transport: &Transport) -> Result<()> {
    let Some(high_level) = packet.high_level.as_ref() else {
        return Ok(());
    };
    if high_level.stream().is_expanded() {
        return Ok(());
    }
    let direction = high_level.direction();
    let short_write = high_level.short_write();
    let stream = high_level.stream().clone();
    if packet.kind == PacketKind::Callback {
        if direction == Direction::In {
            return Err(Error::malformed(format!(
                "{}: callbacks can't carry a stream_in",
                packet.name
            )));
        }
        if short_write {
            return Err(Error::malformed(format!(
                "{}: callbacks can't short write",
                packet.name
            )));
        }
    }

    // a failed expansion leaves the packet as declared
    let mut expanded = packet.clone();
    let layout = if expanded.find(&stream.name.join("Chunk Data")).is_some() {
        tag_declared(&mut expanded, &stream, direction, short_write)?
    } else {
        synthesize(&mut expanded, &stream, direction, short_write, transport)?
    };
    add_high_level_elements(&mut expanded, &stream, layout, direction, short_write)?;

    if let Some(high_level) = expanded.high_level.as_mut() {
        high_level.stream_mut().layout = layout;
    }
    *packet = expanded;
    match layout {
        StreamLayout::Chunked { shape, max_count } => debug!(
            "{}: {} chunked, {} x {} per packet, up to {} items",
            packet.name, stream.name, shape.capacity, shape.data_type, max_count
        ),
        StreamLayout::SingleChunk { shape, .. } => debug!(
            "{}: {} in a single chunk of {} x {}",
            packet.name, stream.name, shape.capacity, shape.data_type
        ),
        StreamLayout::Pending => {}
    }
    Ok(())
}

fn length_max(packet: &Packet, length_type: BaseType) -> Result<usize> {
    match length_type.integer_bounds() {
        Some((0, max)) => Ok(usize::try_from(max).unwrap_or(usize::MAX)),
        _ => Err(Error::malformed(format!(
            "{}: stream length must be an unsigned integer, not {length_type}",
            packet.name
        ))),
    }
}

/// The low-level fields are declared, just give them their roles.
fn tag_declared(
    packet: &mut Packet,
    stream: &StreamSpec,
    direction: Direction,
    short_write: bool,
) -> Result<StreamLayout> {
    let name = &stream.name;
    let lookup = |packet: &Packet, suffix: &str, direction: Direction| {
        let full = name.join(suffix);
        match packet.find(&full) {
            Some(i) if packet.elements[i].direction == direction => Ok(Some(i)),
            Some(_) => Err(Error::malformed(format!(
                "{}: `{full}` must be an {direction} element",
                packet.name
            ))),
            None => Ok(None),
        }
    };
    let missing = |suffix: &str| {
        Error::malformed(format!(
            "{}: stream `{name}` has no `{}` element",
            packet.name,
            name.join(suffix)
        ))
    };

    let length = lookup(packet, "Length", direction)?.ok_or_else(|| missing("Length"))?;
    let data = lookup(packet, "Chunk Data", direction)?.ok_or_else(|| missing("Chunk Data"))?;
    let offset = lookup(packet, "Chunk Offset", direction)?;
    if offset.is_none() && !stream.single_chunk {
        return Err(missing("Chunk Offset"));
    }
    let written = if short_write {
        Some(
            lookup(packet, "Chunk Written", Direction::Out)?
                .ok_or_else(|| missing("Chunk Written"))?,
        )
    } else {
        None
    };

    let length_type = packet.elements[length].descriptor.base;
    let length_max = length_max(packet, length_type)?;
    for i in offset.into_iter().chain(written) {
        if packet.elements[i].descriptor != TypeDescriptor::scalar(length_type) {
            return Err(Error::malformed(format!(
                "{}: `{}` must be a {length_type} like the stream length",
                packet.name, packet.elements[i].name
            )));
        }
    }
    let data_desc = packet.elements[data].descriptor;
    if data_desc.base == BaseType::String {
        return Err(Error::malformed(format!(
            "{}: stream data must be an array of char, not a string",
            packet.name
        )));
    }
    let shape = ChunkShape {
        length_type,
        offset_type: offset.map(|_| length_type),
        data_type: data_desc.base,
        capacity: data_desc.cardinality.count(),
    };

    for (index, role) in [
        (Some(length), Role::StreamLength),
        (offset, Role::StreamChunkOffset),
        (Some(data), Role::StreamChunkData),
        (written, Role::StreamChunkWritten),
    ] {
        if let Some(index) = index {
            let element = &mut packet.elements[index];
            element.role = Some(role);
            element.level = Level::Low;
        }
    }

    let layout = if offset.is_some() {
        let max_count = stream.max_count.unwrap_or(length_max);
        StreamLayout::Chunked { shape, max_count }
    } else {
        let max_count = stream.max_count.unwrap_or(shape.capacity);
        if max_count > shape.capacity {
            return Err(Error::malformed(format!(
                "{}: single chunk stream `{name}` can't hold {max_count} items",
                packet.name
            )));
        }
        StreamLayout::SingleChunk { shape, max_count }
    };
    check_max_count(packet, &layout, length_max)?;
    Ok(layout)
}

fn check_max_count(
    packet: &Packet,
    layout: &StreamLayout,
    length_max: usize,
) -> Result<()> {
    let max_count = match layout {
        StreamLayout::Chunked { max_count, .. }
        | StreamLayout::SingleChunk { max_count, .. } => *max_count,
        StreamLayout::Pending => return Ok(()),
    };
    if max_count == 0 || max_count > length_max {
        return Err(Error::malformed(format!(
            "{}: stream max_count {max_count} must be within 1..={length_max}",
            packet.name
        )));
    }
    Ok(())
}

/// Only the marker is declared, append the low-level fields sized to fill
/// the rest of the packet.
fn synthesize(
    packet: &mut Packet,
    stream: &StreamSpec,
    direction: Direction,
    short_write: bool,
    transport: &Transport,
) -> Result<StreamLayout> {
    let name = &stream.name;
    let data_type = stream.data_type.ok_or_else(|| {
        Error::malformed(format!(
            "{}: stream `{name}` needs either a `{}` element or a data_type",
            packet.name,
            name.join("Chunk Data")
        ))
    })?;
    if data_type == BaseType::String {
        return Err(Error::malformed(format!(
            "{}: stream `{name}` of strings, use char",
            packet.name
        )));
    }
    let length_type = stream.length_type;
    let length_max = length_max(packet, length_type)?;
    let max_count = stream.max_count.unwrap_or(length_max);

    let length_bytes = length_type.wire_bytes(1) as i64;
    let used: usize = packet
        .elements_in(direction)
        .map(Element::effective_wire_width)
        .sum();
    let mut available = transport.packet_length as i64
        - transport.header_bytes as i64
        - used as i64
        - length_bytes // length
        - length_bytes; // chunk offset
    if short_write {
        available -= length_bytes;
    }
    let bits = data_type.bits();
    if available * 8 < bits as i64 {
        return Err(Error::StreamCapacityExhausted {
            packet: packet.name.space().to_string(),
            available_bytes: available,
            element_bits: bits,
        });
    }
    let capacity = (available as usize * 8) / bits as usize;

    let length_elem = || {
        let mut length = Element::plain(
            name.join("Length").space(),
            TypeDescriptor::scalar(length_type),
            direction,
        );
        length.role = Some(Role::StreamLength);
        length.level = Level::Low;
        length
    };
    let written_elem = || {
        let mut written = Element::plain(
            name.join("Chunk Written").space(),
            TypeDescriptor::scalar(length_type),
            Direction::Out,
        );
        written.role = Some(Role::StreamChunkWritten);
        written.level = Level::Low;
        written
    };
    let layout = if stream.single_chunk && max_count <= capacity {
        let shape = ChunkShape {
            length_type,
            offset_type: None,
            data_type,
            capacity: max_count,
        };
        let mut data = Element::plain(
            name.join("Data").space(),
            TypeDescriptor::array(data_type, max_count),
            direction,
        );
        data.role = Some(Role::StreamChunkData);
        data.level = Level::Low;
        packet.elements.push(length_elem());
        packet.elements.push(data);
        if short_write {
            packet.elements.push(written_elem());
        }
        StreamLayout::SingleChunk { shape, max_count }
    } else {
        if stream.single_chunk {
            warn!(
                "{}: stream `{name}` doesn't fit one packet ({max_count} > \
                 {capacity}), chunking it",
                packet.name
            );
        }
        let shape = ChunkShape {
            length_type,
            offset_type: Some(length_type),
            data_type,
            capacity,
        };
        let mut offset = Element::plain(
            name.join("Chunk Offset").space(),
            TypeDescriptor::scalar(length_type),
            direction,
        );
        offset.role = Some(Role::StreamChunkOffset);
        offset.level = Level::Low;
        let mut data = Element::plain(
            name.join("Chunk Data").space(),
            TypeDescriptor::array(data_type, capacity),
            direction,
        );
        data.role = Some(Role::StreamChunkData);
        data.level = Level::Low;
        packet.elements.push(length_elem());
        packet.elements.push(offset);
        packet.elements.push(data);
        if short_write {
            packet.elements.push(written_elem());
        }
        StreamLayout::Chunked { shape, max_count }
    };
    check_max_count(packet, &layout, length_max)?;
    Ok(layout)
}

fn add_high_level_elements(
    packet: &mut Packet,
    stream: &StreamSpec,
    layout: StreamLayout,
    direction: Direction,
    short_write: bool,
) -> Result<()> {
    let (shape, max_count) = match layout {
        StreamLayout::Chunked { shape, max_count }
        | StreamLayout::SingleChunk { shape, max_count } => (shape, max_count),
        StreamLayout::Pending => return Ok(()),
    };
    let position = packet
        .elements
        .iter()
        .position(|e| e.has_role(Role::StreamLength))
        .unwrap_or(packet.elements.len());
    let mut data = Element::plain(
        stream.name.space(),
        TypeDescriptor {
            base: shape.data_type,
            cardinality: Cardinality::Variable { max: max_count },
        },
        direction,
    );
    data.role = Some(Role::StreamData(shape));
    data.level = Level::High;
    packet.elements.insert(position, data);

    if short_write {
        let mut written = Element::plain(
            stream.name.join("Written").space(),
            TypeDescriptor::scalar(shape.length_type),
            Direction::Out,
        );
        written.role = Some(Role::StreamWritten);
        written.level = Level::High;
        packet.elements.push(written);
    }
    Ok(())
}

/// Progress of a `stream_out` reassembly.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembly<T> {
    Pending,
    Complete(Vec<T>),
}

/// Client side of `stream_out`: feed it every low-level response.
///
/// A response repeating an offset already assembled is ignored, so is one
/// ahead of the assembled prefix (the device's chunking will come around).
/// A changed `length` restarts the assembly with the new length. More than
/// `max_chunks` responses since the last (re)start is a truncated stream.
#[derive(Debug, Clone)]
pub struct StreamOutAssembler<T> {
    capacity: usize,
    max_count: usize,
    max_chunks: usize,
    length: Option<usize>,
    received: usize,
    data: Vec<T>,
}

impl<T: Clone> StreamOutAssembler<T> {
    pub fn new(shape: &ChunkShape, max_count: usize, resend_factor: usize) -> Self {
        Self {
            capacity: shape.capacity,
            max_count,
            max_chunks: shape
                .chunks_for(max_count)
                .saturating_mul(resend_factor.max(1)),
            length: None,
            received: 0,
            data: vec![],
        }
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    pub fn push(
        &mut self,
        length: usize,
        chunk_offset: usize,
        chunk_data: &[T],
    ) -> Result<Assembly<T>> {
        if length > self.max_count {
            return Err(Error::StreamOverflow {
                len: length,
                max: self.max_count,
            });
        }
        if self.length != Some(length) {
            if let Some(previous) = self.length {
                warn!("stream length changed from {previous} to {length}, restarting");
            }
            self.length = Some(length);
            self.received = 0;
            self.data.clear();
        }
        self.received += 1;
        if self.received > self.max_chunks {
            return Err(Error::TruncatedStream {
                received: self.received,
                max_chunks: self.max_chunks,
            });
        }

        if chunk_offset == self.data.len() {
            let take = self
                .capacity
                .min(length - chunk_offset)
                .min(chunk_data.len());
            self.data.extend_from_slice(&chunk_data[..take]);
        }

        if self.data.len() < length {
            return Ok(Assembly::Pending);
        }
        self.length = None;
        self.received = 0;
        Ok(Assembly::Complete(std::mem::take(&mut self.data)))
    }
}

/// One low-level `stream_in` request.
#[derive(Debug, Clone, PartialEq)]
pub struct LowLevelChunk<T> {
    pub length: usize,
    pub chunk_offset: usize,
    /// Always `capacity` items, padded with `T::default()`.
    pub chunk_data: Vec<T>,
    /// Items of `chunk_data` that carry data.
    pub used: usize,
}

/// Client side of `stream_in`: the requests to send, in order. At least
/// one chunk is produced, an empty write still tells the device its length.
#[derive(Debug, Clone)]
pub struct StreamInChunks<'a, T> {
    data: &'a [T],
    capacity: usize,
    offset: usize,
    done: bool,
}

impl<'a, T: Clone + Default> StreamInChunks<'a, T> {
    pub fn new(data: &'a [T], shape: &ChunkShape, max_count: usize) -> Result<Self> {
        if data.len() > max_count {
            return Err(Error::StreamOverflow {
                len: data.len(),
                max: max_count,
            });
        }
        Ok(Self {
            data,
            capacity: shape.capacity,
            offset: 0,
            done: false,
        })
    }
}

impl<T: Clone + Default> Iterator for StreamInChunks<'_, T> {
    type Item = LowLevelChunk<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let end = (self.offset + self.capacity).min(self.data.len());
        let mut chunk_data = self.data[self.offset..end].to_vec();
        let used = chunk_data.len();
        chunk_data.resize(self.capacity, T::default());
        let chunk = LowLevelChunk {
            length: self.data.len(),
            chunk_offset: self.offset,
            chunk_data,
            used,
        };
        self.offset += self.capacity;
        self.done = self.offset >= self.data.len();
        Some(chunk)
    }
}

/// Tracks `chunk_written` acknowledgements of a short-write stream. Only the
/// terminal chunk's count is the result, earlier ones are discarded.
#[derive(Debug, Clone, Default)]
pub struct ShortWriteAck {
    last: Option<usize>,
    acknowledged: usize,
}

impl ShortWriteAck {
    pub fn acknowledge(&mut self, chunk_written: usize) {
        self.last = Some(chunk_written);
        self.acknowledged += 1;
    }

    pub fn chunks(&self) -> usize {
        self.acknowledged
    }

    pub fn written(&self) -> usize {
        self.last.unwrap_or(0)
    }
}

/// Drives a whole `stream_in`: `send` gets every chunk and returns the
/// response's `chunk_written` for short-write streams. The result is the
/// final acknowledgement, `None` without short write.
pub fn write_stream<T, F>(
    data: &[T],
    shape: &ChunkShape,
    max_count: usize,
    mut send: F,
) -> Result<Option<usize>>
where
    T: Clone + Default,
    F: FnMut(&LowLevelChunk<T>) -> Result<Option<usize>>,
{
    let mut ack: Option<ShortWriteAck> = None;
    for chunk in StreamInChunks::new(data, shape, max_count)? {
        if let Some(written) = send(&chunk)? {
            ack.get_or_insert_with(ShortWriteAck::default)
                .acknowledge(written);
        }
    }
    Ok(ack.map(|ack| ack.written()))
}

/// Drives a whole `stream_out`: `receive` performs one low-level call and
/// returns `(length, chunk_offset, chunk_data)`.
pub fn read_stream<T, F>(
    shape: &ChunkShape,
    max_count: usize,
    resend_factor: usize,
    mut receive: F,
) -> Result<Vec<T>>
where
    T: Clone,
    F: FnMut() -> Result<(usize, usize, Vec<T>)>,
{
    let mut assembler = StreamOutAssembler::new(shape, max_count, resend_factor);
    loop {
        let (length, chunk_offset, chunk_data) = receive()?;
        if let Assembly::Complete(data) =
            assembler.push(length, chunk_offset, &chunk_data)?
        {
            return Ok(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Doc, DocKind};
    use crate::types::Version;

    fn transport() -> Transport {
        Transport::default()
    }

    fn packet(kind: PacketKind, high_level: HighLevel) -> Packet {
        Packet {
            name: Name::new("Read Values Low Level"),
            kind,
            function_id: 1,
            elements: vec![],
            since_firmware: Version(1, 0, 0),
            high_level: Some(high_level),
            doc: Doc::new(DocKind::LowLevel),
        }
    }

    fn out_stream(data_type: BaseType, max_count: Option<usize>) -> HighLevel {
        let mut stream = StreamSpec::new("Values");
        stream.data_type = Some(data_type);
        stream.max_count = max_count;
        HighLevel::StreamOut(StreamOut { stream })
    }

    fn in_stream(data_type: BaseType, short_write: bool) -> HighLevel {
        let mut stream = StreamSpec::new("Values");
        stream.data_type = Some(data_type);
        HighLevel::StreamIn(StreamIn {
            stream,
            short_write,
        })
    }

    fn declared_out(name: &str, descriptor: TypeDescriptor) -> Element {
        Element::plain(name, descriptor, Direction::Out)
    }

    fn names(packet: &Packet) -> Vec<&str> {
        packet.elements.iter().map(|e| e.name.space()).collect()
    }

    #[test]
    fn synthesized_stream_out_fills_the_packet() {
        let mut packet = packet(PacketKind::Function, out_stream(BaseType::Uint16, None));
        expand(&mut packet, &transport()).unwrap();
        // (72 - 8 - 2 - 2) / 2
        let shape = *packet.high_level.as_ref().unwrap().stream().shape().unwrap();
        assert_eq!(shape.capacity, 30);
        assert_eq!(
            names(&packet),
            [
                "Values",
                "Values Length",
                "Values Chunk Offset",
                "Values Chunk Data"
            ]
        );
        assert_eq!(packet.response_bytes(), 64);
        let data = &packet.elements[0];
        assert_eq!(data.level, Level::High);
        assert_eq!(data.cardinality(), Cardinality::Variable { max: 65535 });
        assert_eq!(data.effective_wire_width(), 2 + 60);
        assert!(packet.high_level.as_ref().unwrap().stream().requires_multiple_chunks());
    }

    #[test]
    fn bool_chunks_are_bit_packed() {
        let mut packet = packet(PacketKind::Function, out_stream(BaseType::Bool, None));
        expand(&mut packet, &transport()).unwrap();
        let shape = packet.high_level.as_ref().unwrap().stream().shape().copied();
        assert_eq!(shape.map(|s| s.capacity), Some(60 * 8));
    }

    #[test]
    fn other_fields_in_the_half_are_subtracted() {
        let mut packet = packet(PacketKind::Function, in_stream(BaseType::Bool, false));
        for name in ["X Start", "Y Start", "X End", "Y End"] {
            packet.elements.push(Element::plain(
                name,
                TypeDescriptor::scalar(BaseType::Uint8),
                Direction::In,
            ));
        }
        expand(&mut packet, &transport()).unwrap();
        let shape = packet.high_level.as_ref().unwrap().stream().shape().copied();
        assert_eq!(shape.map(|s| s.capacity), Some(56 * 8));
        assert_eq!(packet.request_bytes(), 64);
    }

    #[test]
    fn short_write_costs_a_length_in_the_request() {
        let mut packet = packet(PacketKind::Function, in_stream(BaseType::Uint8, true));
        expand(&mut packet, &transport()).unwrap();
        let shape = *packet.high_level.as_ref().unwrap().stream().shape().unwrap();
        // 72 - 8 - 2 - 2 - 2
        assert_eq!(shape.capacity, 58);
        let written = packet.find(&Name::new("Values Chunk Written")).unwrap();
        assert_eq!(packet.elements[written].direction, Direction::Out);
        assert_eq!(packet.elements[written].role, Some(Role::StreamChunkWritten));
        let high = packet.find(&Name::new("Values Written")).unwrap();
        assert_eq!(packet.elements[high].level, Level::High);
    }

    #[test]
    fn capacity_exhausted() {
        let mut packet = packet(PacketKind::Function, out_stream(BaseType::Uint64, None));
        packet.elements.push(Element::plain(
            "Padding",
            TypeDescriptor::array(BaseType::Uint8, 55),
            Direction::Out,
        ));
        let declared = packet.clone();
        // 72 - 8 - 55 - 4 = 5 bytes, not enough for 8
        let err = expand(&mut packet, &transport()).unwrap_err();
        assert!(matches!(
            err,
            Error::StreamCapacityExhausted {
                available_bytes: 5,
                element_bits: 64,
                ..
            }
        ));
        assert_eq!(packet, declared);
    }

    #[test]
    fn boundary_between_one_and_two_chunks() {
        let mut exact = packet(PacketKind::Function, out_stream(BaseType::Uint16, Some(30)));
        expand(&mut exact, &transport()).unwrap();
        let stream = exact.high_level.as_ref().unwrap().stream();
        assert!(!stream.requires_multiple_chunks());
        assert_eq!(stream.shape().unwrap().chunks_for(30), 1);

        let mut over = packet(PacketKind::Function, out_stream(BaseType::Uint16, Some(31)));
        expand(&mut over, &transport()).unwrap();
        let stream = over.high_level.as_ref().unwrap().stream();
        assert!(stream.requires_multiple_chunks());
        assert_eq!(stream.shape().unwrap().chunks_for(31), 2);
    }

    #[test]
    fn single_chunk_skips_the_offset() {
        let mut stream = StreamSpec::new("Text");
        stream.data_type = Some(BaseType::Char);
        stream.max_count = Some(22);
        stream.single_chunk = true;
        let mut packet = packet(
            PacketKind::Function,
            HighLevel::StreamIn(StreamIn {
                stream,
                short_write: false,
            }),
        );
        expand(&mut packet, &transport()).unwrap();
        assert_eq!(names(&packet), ["Text", "Text Length", "Text Data"]);
        let stream = packet.high_level.as_ref().unwrap().stream();
        assert!(matches!(stream.layout, StreamLayout::SingleChunk { max_count: 22, .. }));
        assert_eq!(packet.elements[2].descriptor.wire_bytes(), 22);
    }

    #[test]
    fn declared_fields_get_roles() {
        let mut stream = StreamSpec::new("Pixels");
        stream.single_chunk = false;
        let mut packet = packet(
            PacketKind::Function,
            HighLevel::StreamOut(StreamOut { stream }),
        );
        packet.elements = vec![
            Element::plain("X Start", TypeDescriptor::scalar(BaseType::Uint8), Direction::In),
            declared_out("Pixels Length", TypeDescriptor::scalar(BaseType::Uint16)),
            declared_out("Pixels Chunk Offset", TypeDescriptor::scalar(BaseType::Uint16)),
            declared_out("Pixels Chunk Data", TypeDescriptor::array(BaseType::Bool, 480)),
        ];
        expand(&mut packet, &transport()).unwrap();
        assert_eq!(
            names(&packet),
            ["X Start", "Pixels", "Pixels Length", "Pixels Chunk Offset", "Pixels Chunk Data"]
        );
        assert_eq!(packet.elements[2].role, Some(Role::StreamLength));
        assert_eq!(packet.elements[3].role, Some(Role::StreamChunkOffset));
        assert_eq!(packet.elements[4].role, Some(Role::StreamChunkData));
        assert_eq!(packet.elements[4].level, Level::Low);
        assert_eq!(packet.elements[0].level, Level::Normal);
    }

    #[test]
    fn declared_fields_must_match() {
        let stream = StreamSpec::new("Pixels");
        let mut packet = packet(
            PacketKind::Function,
            HighLevel::StreamOut(StreamOut { stream }),
        );
        packet.elements = vec![
            declared_out("Pixels Length", TypeDescriptor::scalar(BaseType::Uint16)),
            declared_out("Pixels Chunk Offset", TypeDescriptor::scalar(BaseType::Uint8)),
            declared_out("Pixels Chunk Data", TypeDescriptor::array(BaseType::Bool, 480)),
        ];
        assert!(matches!(
            expand(&mut packet, &transport()),
            Err(Error::MalformedDeclaration { .. })
        ));
    }

    #[test]
    fn expansion_is_idempotent() {
        let mut once = packet(PacketKind::Function, in_stream(BaseType::Uint8, true));
        expand(&mut once, &transport()).unwrap();
        let mut twice = once.clone();
        expand(&mut twice, &transport()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn callbacks_only_stream_out() {
        let mut callback = packet(PacketKind::Callback, in_stream(BaseType::Uint8, false));
        assert!(expand(&mut callback, &transport()).is_err());
        let mut callback = packet(PacketKind::Callback, out_stream(BaseType::Uint8, None));
        expand(&mut callback, &transport()).unwrap();
    }

    fn shape(capacity: usize) -> ChunkShape {
        ChunkShape {
            length_type: BaseType::Uint16,
            offset_type: Some(BaseType::Uint16),
            data_type: BaseType::Uint16,
            capacity,
        }
    }

    /// A device answering `stream_out` calls in order, one chunk per call.
    fn device(
        values: Vec<u16>,
        capacity: usize,
    ) -> impl FnMut() -> Result<(usize, usize, Vec<u16>)> {
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
    fn stream_out_round_trip_takes_ceil_chunks() {
        for (count, capacity) in [(100usize, 30usize), (30, 30), (31, 30), (1, 7)] {
            let values: Vec<u16> = (0..count as u16).map(|v| v.wrapping_mul(7919)).collect();
            let mut calls = 0;
            let mut answer = device(values.clone(), capacity);
            let result = read_stream(&shape(capacity), 1000, 2, || {
                calls += 1;
                answer()
            })
            .unwrap();
            assert_eq!(result, values);
            assert_eq!(calls, count.div_ceil(capacity));
        }
    }

    #[test]
    fn stream_out_tolerates_resends() {
        let mut assembler = StreamOutAssembler::new(&shape(2), 10, 2);
        assert_eq!(assembler.push(3, 0, &[1, 2]).unwrap(), Assembly::Pending);
        // same offset again
        assert_eq!(assembler.push(3, 0, &[1, 2]).unwrap(), Assembly::Pending);
        assert_eq!(
            assembler.push(3, 2, &[3, 0]).unwrap(),
            Assembly::Complete(vec![1, 2, 3])
        );
    }

    #[test]
    fn stream_out_restarts_on_new_length() {
        let mut assembler = StreamOutAssembler::new(&shape(2), 10, 2);
        assert_eq!(assembler.push(4, 0, &[1, 2]).unwrap(), Assembly::Pending);
        // device data changed, offset 2 of the new stream is ignored
        assert_eq!(assembler.push(3, 2, &[9, 0]).unwrap(), Assembly::Pending);
        assert_eq!(assembler.push(3, 0, &[7, 8]).unwrap(), Assembly::Pending);
        assert_eq!(
            assembler.push(3, 2, &[9, 0]).unwrap(),
            Assembly::Complete(vec![7, 8, 9])
        );
    }

    #[test]
    fn stream_out_truncates_after_budget() {
        let mut assembler = StreamOutAssembler::<u16>::new(&shape(2), 4, 1);
        assert_eq!(assembler.max_chunks(), 2);
        assembler.push(4, 0, &[1, 2]).unwrap();
        assembler.push(4, 0, &[1, 2]).unwrap();
        assert!(matches!(
            assembler.push(4, 0, &[1, 2]),
            Err(Error::TruncatedStream {
                received: 3,
                max_chunks: 2
            })
        ));
    }

    #[test]
    fn stream_out_empty_completes() {
        let mut assembler = StreamOutAssembler::<u16>::new(&shape(2), 4, 1);
        assert_eq!(assembler.push(0, 0, &[0, 0]).unwrap(), Assembly::Complete(vec![]));
    }

    #[test]
    fn stream_in_chunks_are_padded_and_ordered() {
        let data: Vec<u16> = (1..=5).collect();
        let chunks: Vec<_> = StreamInChunks::new(&data, &shape(2), 10).unwrap().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.chunk_offset).collect::<Vec<_>>(),
            [0, 2, 4]
        );
        assert!(chunks.iter().all(|c| c.length == 5));
        assert_eq!(chunks[2].chunk_data, [5, 0]);
        assert_eq!(chunks[2].used, 1);

        let empty: Vec<u16> = vec![];
        let chunks: Vec<_> = StreamInChunks::new(&empty, &shape(2), 10).unwrap().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, 0);

        assert!(matches!(
            StreamInChunks::new(&data, &shape(2), 4),
            Err(Error::StreamOverflow { len: 5, max: 4 })
        ));
    }

    #[test]
    fn short_write_result_is_the_final_ack() {
        let data: Vec<u16> = (0..6).collect();
        let mut acks = vec![2, 2, 1].into_iter();
        let written = write_stream(&data, &shape(2), 10, |_chunk| Ok(acks.next())).unwrap();
        // not 2 + 2 + 1
        assert_eq!(written, Some(1));

        let written = write_stream(&data, &shape(2), 10, |_chunk| Ok(None)).unwrap();
        assert_eq!(written, None);
    }
}
