use thiserror::Error;

/// Failure to decode a wire record.
///
/// Every variant means the byte stream is malformed; a peer that produced it
/// cannot be trusted to stay in sync, so callers treat these as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid command size_bytes={size_bytes}")]
    InvalidCommandSize { size_bytes: u32 },

    #[error("command size_bytes={size_bytes} is not 4-byte aligned")]
    MisalignedCommandSize { size_bytes: u32 },

    #[error("unknown opcode 0x{0:04x}")]
    UnknownOpcode(u32),

    #[error("invalid {what} value {value}")]
    InvalidEnum { what: &'static str, value: u32 },

    #[error("invalid bool byte {0}")]
    InvalidBool(u8),

    #[error("invalid option tag {0}")]
    InvalidOptionTag(u8),

    #[error("declared length {count} x {stride} bytes exceeds the {remaining} remaining bytes")]
    LengthOverflow {
        count: u64,
        stride: usize,
        remaining: usize,
    },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("command body left {trailing} unread bytes")]
    TrailingBytes { trailing: usize },

    #[error("non-zero padding byte in command")]
    NonZeroPadding,
}

impl DecodeError {
    /// Returns true when more input could have turned this failure into a
    /// successful decode.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::Truncated { .. })
    }
}
