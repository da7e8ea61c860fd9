//! Strategies for moving mapped buffer contents between the endpoints.
//!
//! Each mappable buffer gets a read handle and/or a write handle when it is
//! created. The client serializes a create record describing the handle, the
//! server attaches to it, and afterwards only data updates (server → client
//! on read maps) and flushes (client → server on unmap of a write map) travel
//! with the map commands. Whether those carry bytes or just hand off shared
//! memory is up to the implementation.

pub mod inline;
pub mod shared;

use thiserror::Error;

pub use inline::{InlineClientService, InlineServerService};
pub use shared::{SharedClientService, SharedMemoryPool, SharedServerService};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryTransferError {
    #[error("malformed {kind} handle create info ({len} bytes)")]
    InvalidCreateInfo { kind: &'static str, len: usize },

    #[error("shared memory region {handle} is unknown or already attached")]
    UnknownRegion { handle: u64 },

    #[error("data update of {len} bytes does not match range [{offset}, {offset}+{size})")]
    DataUpdateMismatch { offset: u64, size: u64, len: usize },
}

pub trait ClientMemoryTransferService: Send {
    fn create_read_handle(&mut self, size: u64) -> Box<dyn ClientReadHandle>;
    fn create_write_handle(&mut self, size: u64) -> Box<dyn ClientWriteHandle>;
}

pub trait ClientReadHandle: Send {
    fn serialize_create_size(&self) -> usize;
    fn serialize_create(&self, out: &mut [u8]);

    /// Applies the server's data update for `[offset, offset + size)`.
    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, size: u64) -> Result<(), MemoryTransferError>;

    /// Copies mapped contents starting at `offset` into `out`.
    fn read(&self, offset: u64, out: &mut [u8]);
}

pub trait ClientWriteHandle: Send {
    fn serialize_create_size(&self) -> usize;
    fn serialize_create(&self, out: &mut [u8]);

    /// Writes into the mapped memory the application sees.
    fn write(&mut self, offset: u64, data: &[u8]);

    fn serialize_flush_size(&self, offset: u64, size: u64) -> usize;

    /// Serializes the update that makes the server's copy of
    /// `[offset, offset + size)` match this handle.
    fn serialize_flush(&self, offset: u64, size: u64, out: &mut [u8]);
}

pub trait ServerMemoryTransferService: Send {
    fn deserialize_read_handle(&mut self, create_info: &[u8]) -> Result<Box<dyn ServerReadHandle>, MemoryTransferError>;
    fn deserialize_write_handle(&mut self, create_info: &[u8])
        -> Result<Box<dyn ServerWriteHandle>, MemoryTransferError>;
}

pub trait ServerReadHandle: Send {
    /// Publishes `mapped` (the native range at `offset`) to the client and
    /// returns the data update to send with the map completion.
    fn serialize_data_update(&mut self, mapped: &[u8], offset: u64) -> Vec<u8>;
}

pub trait ServerWriteHandle: Send {
    /// Applies a client flush to `mapped`, the native range at `offset`.
    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, mapped: &mut [u8]) -> Result<(), MemoryTransferError>;
}

/// Grows `buf` so `[offset, offset + len)` is addressable and returns that
/// range.
pub(crate) fn range_mut(buf: &mut Vec<u8>, offset: u64, len: usize) -> &mut [u8] {
    let start = offset as usize;
    let end = start + len;
    if buf.len() < end {
        buf.resize(end, 0);
    }
    &mut buf[start..end]
}

/// Copies `[offset, offset + out.len())` of `buf` into `out`, reading zeros
/// past the end.
pub(crate) fn copy_out(buf: &[u8], offset: u64, out: &mut [u8]) {
    let start = (offset as usize).min(buf.len());
    let avail = &buf[start..];
    let n = avail.len().min(out.len());
    out[..n].copy_from_slice(&avail[..n]);
    out[n..].fill(0);
}
