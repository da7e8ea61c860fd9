//! Byte layout constants shared by the ring and the chunk framing.

/// Size of the little-endian `u32` length that prefixes each ring record.
pub const FRAME_LEN_BYTES: usize = 4;

/// Chunk header layout (all little-endian):
/// - `total_size: u64`: size of the whole message
/// - `chunk_len: u32`: payload bytes following this header
/// - `flags: u32`: [`chunk_flags`]
pub mod chunk_header {
    pub const TOTAL_SIZE: usize = 0;
    pub const CHUNK_LEN: usize = 8;
    pub const FLAGS: usize = 12;
    pub const BYTES: usize = 16;
}

pub mod chunk_flags {
    /// First chunk of a message.
    pub const FIRST: u32 = 1 << 0;
    /// Last chunk of a message.
    pub const LAST: u32 = 1 << 1;
    pub const ALL: u32 = FIRST | LAST;
}

/// Default ceiling on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 128 * 1024 * 1024;

/// Default payload bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
