//! Protobuf-style output primitives
//!
//! An [`Encoder`] writes through a [`Sink`]. Two sinks exist: [`SizingSink`]
//! only counts bytes, and `Vec<u8>` stores them. Length-prefixed nested
//! messages are produced by running the same closure twice, first against a
//! sizing sink to learn the prefix and then against the real output.

/// Protobuf wire types used by the value encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub(crate) fn bits(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }

    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// Destination for encoded bytes
pub trait Sink {
    /// Append `bytes`
    fn write(&mut self, bytes: &[u8]);

    /// Total bytes appended so far
    fn bytes_written(&self) -> usize;

    /// The sink as a byte counter, if it only counts
    fn as_sizer(&mut self) -> Option<&mut SizingSink> {
        None
    }
}

/// Sink that discards bytes and counts them
#[derive(Debug, Default)]
pub struct SizingSink {
    count: usize,
}

impl Sink for SizingSink {
    fn write(&mut self, bytes: &[u8]) {
        self.count += bytes.len();
    }

    fn bytes_written(&self) -> usize {
        self.count
    }

    fn as_sizer(&mut self) -> Option<&mut SizingSink> {
        Some(self)
    }
}

impl Sink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn bytes_written(&self) -> usize {
        self.len()
    }
}

/// Number of bytes `value` occupies as a varint
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Writes protobuf primitives to a sink
pub struct Encoder<'a> {
    sink: &'a mut dyn Sink,
}

impl<'a> Encoder<'a> {
    pub fn new(sink: &'a mut dyn Sink) -> Self {
        Self { sink }
    }

    pub fn bytes_written(&self) -> usize {
        self.sink.bytes_written()
    }

    pub fn write_varint(&mut self, mut value: u64) {
        let mut buf = [0u8; 10];
        let mut i = 0;
        while value >= 0x80 {
            buf[i] = (value as u8) | 0x80;
            value >>= 7;
            i += 1;
        }
        buf[i] = value as u8;
        self.sink.write(&buf[..=i]);
    }

    pub fn write_tag(&mut self, field: u32, wire_type: WireType) {
        self.write_varint((u64::from(field) << 3) | u64::from(wire_type.bits()));
    }

    pub fn write_fixed64(&mut self, value: u64) {
        self.sink.write(&value.to_le_bytes());
    }

    /// Length prefix followed by raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.sink.write(bytes);
    }

    /// Writes a length-prefixed nested message produced by `body`
    ///
    /// `body` runs twice: once to size the message, once to write it. Both
    /// runs must emit the same number of bytes. When this encoder is itself
    /// only sizing, `body` runs once.
    pub fn write_nested<F>(&mut self, body: F)
    where
        F: Fn(&mut Encoder<'_>),
    {
        let mut sizer = SizingSink::default();
        body(&mut Encoder::new(&mut sizer));
        let size = sizer.bytes_written();

        if let Some(outer) = self.sink.as_sizer() {
            outer.count += varint_len(size as u64) + size;
            return;
        }

        self.write_varint(size as u64);
        let before = self.bytes_written();
        body(self);
        let written = self.bytes_written() - before;
        assert_eq!(
            written, size,
            "nested message wrote {} bytes but was sized at {}",
            written, size
        );
    }
}
