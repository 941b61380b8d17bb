//! Value codec
//!
//! Field values are encoded as a protobuf `Value` message holding exactly one
//! field:
//!
//! ```text
//! field  kind      wire type
//!   1    boolean   varint (0 | 1)
//!   2    integer   varint (two's complement)
//!   3    double    fixed64
//!   6    map       length-delimited MapValue
//!   9    array     length-delimited ArrayValue
//!  11    null      varint (0)
//!  17    string    length-delimited UTF-8
//!  18    bytes     length-delimited
//! ```
//!
//! `MapValue` is a sequence of field-1 entries, each a nested message with
//! key (field 1, string) and value (field 2, nested `Value`). `ArrayValue` is
//! a sequence of field-1 nested `Value`s.
//!
//! Decoding fails closed. Unknown fields, wire-type mismatches, truncation,
//! trailing bytes and duplicate map keys are all [`DecodeError`]s. Both
//! directions share [`MAX_NESTING_DEPTH`]: anything the encoder accepts
//! decodes again.

use crate::error::{DecodeError, EncodeError};
use crate::reader::Decoder;
use crate::writer::{Encoder, SizingSink, Sink, WireType};
use docsync_core::{FieldValue, ObjectValue};

/// Maximum depth of nested objects and arrays accepted by the codec
pub const MAX_NESTING_DEPTH: usize = 100;

const TAG_BOOLEAN: u32 = 1;
const TAG_INTEGER: u32 = 2;
const TAG_DOUBLE: u32 = 3;
const TAG_MAP: u32 = 6;
const TAG_ARRAY: u32 = 9;
const TAG_NULL: u32 = 11;
const TAG_STRING: u32 = 17;
const TAG_BYTES: u32 = 18;

const TAG_MAP_FIELDS: u32 = 1;
const TAG_ENTRY_KEY: u32 = 1;
const TAG_ENTRY_VALUE: u32 = 2;
const TAG_ARRAY_VALUES: u32 = 1;

// ============================================================================
// Encoding
// ============================================================================

fn write_value(e: &mut Encoder<'_>, value: &FieldValue) {
    match value {
        FieldValue::Null => {
            e.write_tag(TAG_NULL, WireType::Varint);
            e.write_varint(0);
        }
        FieldValue::Boolean(b) => {
            e.write_tag(TAG_BOOLEAN, WireType::Varint);
            e.write_varint(u64::from(*b));
        }
        FieldValue::Integer(i) => {
            e.write_tag(TAG_INTEGER, WireType::Varint);
            e.write_varint(*i as u64);
        }
        FieldValue::Double(d) => {
            e.write_tag(TAG_DOUBLE, WireType::Fixed64);
            e.write_fixed64(d.to_bits());
        }
        FieldValue::String(s) => {
            e.write_tag(TAG_STRING, WireType::LengthDelimited);
            e.write_bytes(s.as_bytes());
        }
        FieldValue::Bytes(b) => {
            e.write_tag(TAG_BYTES, WireType::LengthDelimited);
            e.write_bytes(b);
        }
        FieldValue::Array(values) => {
            e.write_tag(TAG_ARRAY, WireType::LengthDelimited);
            e.write_nested(|inner| {
                for v in values {
                    inner.write_tag(TAG_ARRAY_VALUES, WireType::LengthDelimited);
                    inner.write_nested(|value_msg| write_value(value_msg, v));
                }
            });
        }
        FieldValue::Object(map) => {
            e.write_tag(TAG_MAP, WireType::LengthDelimited);
            e.write_nested(|inner| write_map_fields(inner, map));
        }
    }
}

fn write_map_fields(e: &mut Encoder<'_>, map: &ObjectValue) {
    for (key, value) in map.iter() {
        e.write_tag(TAG_MAP_FIELDS, WireType::LengthDelimited);
        e.write_nested(|entry| {
            entry.write_tag(TAG_ENTRY_KEY, WireType::LengthDelimited);
            entry.write_bytes(key.as_bytes());
            entry.write_tag(TAG_ENTRY_VALUE, WireType::LengthDelimited);
            entry.write_nested(|value_msg| write_value(value_msg, value));
        });
    }
}

/// Rejects values the decoder would refuse for nesting depth
fn check_encodable(value: &FieldValue, depth: usize) -> Result<(), EncodeError> {
    match value {
        FieldValue::Array(values) => {
            check_nested(depth)?;
            values.iter().try_for_each(|v| check_encodable(v, depth + 1))
        }
        FieldValue::Object(map) => {
            check_nested(depth)?;
            map.iter().try_for_each(|(_, v)| check_encodable(v, depth + 1))
        }
        _ => Ok(()),
    }
}

fn check_nested(depth: usize) -> Result<(), EncodeError> {
    if depth + 1 > MAX_NESTING_DEPTH {
        return Err(EncodeError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    Ok(())
}

/// Encodes a value
///
/// Fails for values nested deeper than [`MAX_NESTING_DEPTH`], which
/// [`decode_value`] would not read back.
pub fn encode_value(value: &FieldValue) -> Result<Vec<u8>, EncodeError> {
    check_encodable(value, 0)?;
    let mut out = Vec::with_capacity(encoded_len(value));
    write_value(&mut Encoder::new(&mut out), value);
    Ok(out)
}

/// Size of `encode_value(value)` without producing the bytes
pub fn encoded_len(value: &FieldValue) -> usize {
    let mut sizer = SizingSink::default();
    write_value(&mut Encoder::new(&mut sizer), value);
    sizer.bytes_written()
}

/// Encodes a document's fields as a `MapValue` message body
///
/// Field values count depth from zero, as in [`decode_object`].
pub fn encode_object(object: &ObjectValue) -> Result<Vec<u8>, EncodeError> {
    for (_, value) in object.iter() {
        check_encodable(value, 0)?;
    }
    let mut out = Vec::new();
    write_map_fields(&mut Encoder::new(&mut out), object);
    Ok(out)
}

/// Size of `encode_object(object)`
pub fn encoded_object_len(object: &ObjectValue) -> usize {
    let mut sizer = SizingSink::default();
    write_map_fields(&mut Encoder::new(&mut sizer), object);
    sizer.bytes_written()
}

// ============================================================================
// Decoding
// ============================================================================

fn expect_wire(field: u32, expected: WireType, actual: WireType) -> Result<(), DecodeError> {
    if expected != actual {
        return Err(DecodeError::WireTypeMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_depth(depth: usize) -> Result<(), DecodeError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    Ok(())
}

fn read_string(d: &mut Decoder<'_>) -> Result<String, DecodeError> {
    let bytes = d.read_length_delimited()?;
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

fn read_value_message(bytes: &[u8], depth: usize) -> Result<FieldValue, DecodeError> {
    let mut d = Decoder::new(bytes);
    if d.is_at_end() {
        return Err(DecodeError::Empty);
    }
    let (field, wire) = d.read_tag()?;
    let value = match field {
        TAG_NULL => {
            expect_wire(field, WireType::Varint, wire)?;
            match d.read_varint()? {
                0 => FieldValue::Null,
                other => return Err(DecodeError::InvalidNull(other)),
            }
        }
        TAG_BOOLEAN => {
            expect_wire(field, WireType::Varint, wire)?;
            match d.read_varint()? {
                0 => FieldValue::Boolean(false),
                1 => FieldValue::Boolean(true),
                other => return Err(DecodeError::InvalidBoolean(other)),
            }
        }
        TAG_INTEGER => {
            expect_wire(field, WireType::Varint, wire)?;
            FieldValue::Integer(d.read_varint()? as i64)
        }
        TAG_DOUBLE => {
            expect_wire(field, WireType::Fixed64, wire)?;
            FieldValue::Double(f64::from_bits(d.read_fixed64()?))
        }
        TAG_STRING => {
            expect_wire(field, WireType::LengthDelimited, wire)?;
            FieldValue::String(read_string(&mut d)?)
        }
        TAG_BYTES => {
            expect_wire(field, WireType::LengthDelimited, wire)?;
            FieldValue::Bytes(d.read_length_delimited()?.to_vec())
        }
        TAG_ARRAY => {
            expect_wire(field, WireType::LengthDelimited, wire)?;
            check_depth(depth + 1)?;
            FieldValue::Array(read_array(d.read_length_delimited()?, depth + 1)?)
        }
        TAG_MAP => {
            expect_wire(field, WireType::LengthDelimited, wire)?;
            check_depth(depth + 1)?;
            FieldValue::Object(read_map_fields(d.read_length_delimited()?, depth + 1)?)
        }
        other => return Err(DecodeError::UnknownTag(other)),
    };
    if !d.is_at_end() {
        return Err(DecodeError::TrailingBytes {
            remaining: d.remaining(),
        });
    }
    Ok(value)
}

fn read_array(bytes: &[u8], depth: usize) -> Result<Vec<FieldValue>, DecodeError> {
    let mut d = Decoder::new(bytes);
    let mut values = Vec::new();
    while !d.is_at_end() {
        let (field, wire) = d.read_tag()?;
        if field != TAG_ARRAY_VALUES {
            return Err(DecodeError::UnexpectedTag(field));
        }
        expect_wire(field, WireType::LengthDelimited, wire)?;
        values.push(read_value_message(d.read_length_delimited()?, depth)?);
    }
    Ok(values)
}

fn read_map_fields(bytes: &[u8], depth: usize) -> Result<ObjectValue, DecodeError> {
    let mut d = Decoder::new(bytes);
    let mut map = ObjectValue::new();
    while !d.is_at_end() {
        let (field, wire) = d.read_tag()?;
        if field != TAG_MAP_FIELDS {
            return Err(DecodeError::UnexpectedTag(field));
        }
        expect_wire(field, WireType::LengthDelimited, wire)?;
        let (key, value) = read_map_entry(d.read_length_delimited()?, depth)?;
        if map.contains_key(&key) {
            return Err(DecodeError::DuplicateKey(key));
        }
        map = map.insert(key, value);
    }
    Ok(map)
}

fn read_map_entry(bytes: &[u8], depth: usize) -> Result<(String, FieldValue), DecodeError> {
    let mut d = Decoder::new(bytes);
    let mut key = None;
    let mut value = None;
    while !d.is_at_end() {
        let (field, wire) = d.read_tag()?;
        match field {
            TAG_ENTRY_KEY if key.is_none() => {
                expect_wire(field, WireType::LengthDelimited, wire)?;
                key = Some(read_string(&mut d)?);
            }
            TAG_ENTRY_VALUE if value.is_none() => {
                expect_wire(field, WireType::LengthDelimited, wire)?;
                value = Some(read_value_message(d.read_length_delimited()?, depth)?);
            }
            other => return Err(DecodeError::UnexpectedTag(other)),
        }
    }
    let key = key.ok_or(DecodeError::MissingField("key"))?;
    let value = value.ok_or(DecodeError::MissingField("value"))?;
    Ok((key, value))
}

/// Decodes bytes produced by [`encode_value`]
pub fn decode_value(bytes: &[u8]) -> Result<FieldValue, DecodeError> {
    read_value_message(bytes, 0)
}

/// Decodes bytes produced by [`encode_object`]
pub fn decode_object(bytes: &[u8]) -> Result<ObjectValue, DecodeError> {
    read_map_fields(bytes, 0)
}
