use rmp::encode::ValueWriteError;
use thiserror::Error;

use crate::replicatable::TypeTag;

/// Errors raised while encoding or decoding a snapshot.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying MessagePack writer failed
    #[error("failed to write snapshot value: {0}")]
    Write(#[from] ValueWriteError),

    /// Plain I/O failure from the writer (markers without a payload)
    #[error("failed to write snapshot marker: {0}")]
    Io(#[from] std::io::Error),

    /// A container has more entries than MessagePack can describe
    #[error("container of {len} entries exceeds the 32-bit length limit")]
    LengthOverflow { len: usize },

    /// The encoder was driven with different counts than it announced
    #[error("snapshot encoder announced {announced} {what} but received {received}")]
    CountMismatch {
        what: &'static str,
        announced: usize,
        received: usize,
    },

    /// An object's own encode hook refused to produce its fields
    #[error("{type_tag} refused to encode: {reason}")]
    Rejected { type_tag: TypeTag, reason: String },

    /// Input ended in the middle of a value
    #[error("snapshot truncated at offset {offset}")]
    Truncated { offset: usize },

    /// A marker that is not valid at this position of the snapshot layout
    #[error("unexpected marker 0x{byte:02x} at offset {offset}, expected {expected}")]
    UnexpectedMarker {
        byte: u8,
        offset: usize,
        expected: &'static str,
    },

    /// A string payload that is not UTF-8
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// An instance key that does not fit an instance tag
    #[error("instance tag {value} does not fit in 32 bits")]
    InstanceTagRange { value: u64 },

    /// Field nesting deeper than the decoder accepts
    #[error("field nesting exceeds {limit} levels at offset {offset}")]
    TooDeep { limit: usize, offset: usize },

    /// Bytes left over after a complete snapshot
    #[error("{count} trailing bytes after snapshot")]
    TrailingBytes { count: usize },
}

impl CodecError {
    /// True when more input could turn this failure into a successful decode.
    pub fn is_truncated(&self) -> bool {
        matches!(self, CodecError::Truncated { .. })
    }
}
