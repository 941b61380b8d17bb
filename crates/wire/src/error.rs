//! Codec errors
//!
//! Malformed input fails closed: the decoder never returns a partially built
//! value, and it never skips fields it does not understand.

use crate::writer::WireType;
use thiserror::Error;

/// Why a byte sequence could not be decoded into a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended inside a varint, fixed-width field or length-prefixed region
    #[error("truncated input at offset {offset}")]
    Truncated { offset: usize },

    /// Varint longer than ten bytes
    #[error("malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },

    /// Wire type bits outside the protobuf set
    #[error("invalid wire type {0}")]
    InvalidWireType(u8),

    /// Known field carried the wrong wire type
    #[error("field {field}: expected wire type {expected:?}, found {actual:?}")]
    WireTypeMismatch {
        field: u32,
        expected: WireType,
        actual: WireType,
    },

    /// Field number not part of the value message
    #[error("unknown field tag {0}")]
    UnknownTag(u32),

    /// Field number valid elsewhere but not allowed at this position
    #[error("unexpected field tag {0}")]
    UnexpectedTag(u32),

    /// Bytes left over after a complete value
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes { remaining: usize },

    /// Boolean varint other than 0 or 1
    #[error("invalid boolean encoding {0}")]
    InvalidBoolean(u64),

    /// Null value varint other than 0
    #[error("invalid null encoding {0}")]
    InvalidNull(u64),

    /// String payload is not UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Map entry without its key or value
    #[error("map entry missing its {0}")]
    MissingField(&'static str),

    /// Map contains the same key twice
    #[error("duplicate map key {0:?}")]
    DuplicateKey(String),

    /// Objects or arrays nested beyond the depth limit
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A value message with no field at all
    #[error("empty value")]
    Empty,
}

/// Why a value could not be encoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Objects or arrays nested beyond the depth the decoder accepts
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

impl From<EncodeError> for docsync_core::Error {
    fn from(e: EncodeError) -> Self {
        docsync_core::Error::InvalidInput(e.to_string())
    }
}

impl From<DecodeError> for docsync_core::Error {
    fn from(e: DecodeError) -> Self {
        docsync_core::Error::Decode(e.to_string())
    }
}
