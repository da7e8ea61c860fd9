//! Byte transport for the gpuwire command stream.
//!
//! - [`CommandSerializer`]: where runtimes reserve space for outgoing records.
//! - [`chunk`]: chunk framing that bounds per-frame and per-message sizes.
//! - [`ring`]: a lock-free multi-producer frame ring.
//! - [`loopback`]: an in-process channel built from two rings.

pub mod chunk;
pub mod layout;
pub mod loopback;
pub mod ring;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

pub use chunk::{ChunkHeader, ChunkReassembler, ChunkedSerializer};
pub use loopback::{loopback_pair, LoopbackEndpoint};

/// Outgoing record buffer used by the client and server runtimes.
pub trait CommandSerializer {
    /// Largest size [`CommandSerializer::get_cmd_space`] can ever satisfy.
    fn max_allocation_size(&self) -> usize;

    /// Reserves `size` zeroed bytes for one record.
    ///
    /// Returns `None` when the request exceeds
    /// [`CommandSerializer::max_allocation_size`] or the transport has failed.
    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]>;

    /// Hands every reserved record to the transport. Returns false once the
    /// transport is severed.
    fn flush(&mut self) -> bool;
}

/// The raw channel under a [`ChunkedSerializer`].
pub trait FrameSink {
    /// Sends one frame. Returns false if the channel is closed or full.
    fn send_frame(&mut self, frame: &[u8]) -> bool;
}

impl FrameSink for Vec<Vec<u8>> {
    fn send_frame(&mut self, frame: &[u8]) -> bool {
        self.push(frame.to_vec());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Ceiling for a reassembled message and for a single reservation.
    pub max_message_bytes: usize,
    /// Payload bytes per chunk frame.
    pub chunk_size: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: layout::DEFAULT_MAX_MESSAGE_BYTES,
            chunk_size: layout::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransportLimits {
    pub fn validate(&self) -> Result<(), TransportError> {
        // Record and chunk headers carry 32-bit lengths.
        if self.chunk_size == 0 || self.chunk_size > self.max_message_bytes || self.max_message_bytes > u32::MAX as usize {
            return Err(TransportError::InvalidLimits {
                chunk_size: self.chunk_size,
                max_message_bytes: self.max_message_bytes,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: u64, max: usize },

    #[error("first-chunk flag while a message is still being reassembled")]
    UnexpectedFirstChunk,

    #[error("continuation chunk without a message in progress")]
    UnexpectedContinuation,

    #[error("chunk declares total size {found}, message started with {expected}")]
    TotalSizeMismatch { expected: u64, found: u64 },

    #[error("chunk would bring message to {received} bytes, declared {total_size}")]
    ChunkOverrun { total_size: u64, received: u64 },

    #[error("message declared {declared} bytes but its last chunk ended at {received}")]
    LengthMismatch { declared: u64, received: u64 },

    #[error("invalid chunk flags 0x{flags:x}")]
    InvalidChunkFlags { flags: u32 },

    #[error("stream ended inside a message ({pending} bytes pending)")]
    TruncatedStream { pending: usize },

    #[error("frame ring is corrupt")]
    RingCorrupt,

    #[error("invalid transport limits: chunk_size={chunk_size}, max_message_bytes={max_message_bytes}")]
    InvalidLimits {
        chunk_size: usize,
        max_message_bytes: usize,
    },
}

/// In-memory [`CommandSerializer`]; flushed bytes land in a shared
/// [`FlushedBytes`] handle.
pub struct MemorySerializer {
    staging: Vec<u8>,
    max_allocation: usize,
    shared: Arc<MemoryShared>,
}

#[derive(Default)]
struct MemoryShared {
    flushed: Mutex<Vec<u8>>,
    refuse: AtomicBool,
}

/// Reader side of a [`MemorySerializer`].
#[derive(Clone)]
pub struct FlushedBytes {
    shared: Arc<MemoryShared>,
}

impl MemorySerializer {
    pub fn new(max_allocation: usize) -> (Self, FlushedBytes) {
        let shared = Arc::new(MemoryShared::default());
        let ser = Self {
            staging: Vec::new(),
            max_allocation,
            shared: Arc::clone(&shared),
        };
        (ser, FlushedBytes { shared })
    }
}

impl FlushedBytes {
    /// Takes everything flushed so far.
    pub fn take(&self) -> Vec<u8> {
        match self.shared.flushed.lock() {
            Ok(mut bytes) => std::mem::take(&mut *bytes),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Makes every later flush fail, as if the transport were severed.
    pub fn sever(&self) {
        self.shared.refuse.store(true, Ordering::Release);
    }
}

impl CommandSerializer for MemorySerializer {
    fn max_allocation_size(&self) -> usize {
        self.max_allocation
    }

    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.max_allocation {
            return None;
        }
        let start = self.staging.len();
        self.staging.resize(start + size, 0);
        Some(&mut self.staging[start..])
    }

    fn flush(&mut self) -> bool {
        if self.shared.refuse.load(Ordering::Acquire) {
            self.staging.clear();
            return false;
        }
        let Ok(mut out) = self.shared.flushed.lock() else {
            return false;
        };
        out.append(&mut self.staging);
        true
    }
}
