//! Bounded byte ring carrying length-prefixed frames between threads.
//!
//! Each record is a little-endian `u32` frame length followed by the frame
//! bytes, with no padding. Read and write positions are monotonically
//! increasing `u64` byte counts, and a record may straddle the end of the
//! storage.
//!
//! Senders serialize on one lock and receivers on another, so a sender and a
//! receiver never wait for each other. A record becomes visible only when the
//! sender publishes the new tail, after every byte of it is written.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::layout::FRAME_LEN_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("ring is full")]
    Full,
    #[error("frame can never fit in the ring")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    #[error("ring is empty")]
    Empty,
    #[error("ring contents are corrupt")]
    Corrupt,
}

pub struct FrameRing {
    storage: Box<[UnsafeCell<u8>]>,
    /// Position of the next unread byte. Written only under `recv_lock`.
    head: AtomicU64,
    /// End of the last published record. Written only under `send_lock`.
    tail: AtomicU64,
    send_lock: Mutex<()>,
    recv_lock: Mutex<()>,
}

// SAFETY: bytes in `[head, tail)` are only read, by the receiver holding
// `recv_lock`. Bytes outside it are only written, by the sender holding
// `send_lock`. `head` and `tail` hand regions over with Release/Acquire.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameRing {
    /// # Panics
    ///
    /// Panics if `capacity_bytes` cannot hold even an empty frame.
    pub fn new(capacity_bytes: usize) -> Self {
        assert!(capacity_bytes >= FRAME_LEN_BYTES, "ring of {capacity_bytes} bytes holds no frames");
        Self {
            storage: (0..capacity_bytes).map(|_| UnsafeCell::new(0)).collect(),
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            send_lock: Mutex::new(()),
            recv_lock: Mutex::new(()),
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.storage.len()
    }

    /// Largest frame an empty ring accepts.
    pub fn max_frame_len(&self) -> usize {
        max_frame_len_for_capacity(self.capacity_bytes())
    }

    /// Bytes of published records not yet received.
    pub fn queued_bytes(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.queued_bytes() == 0
    }

    pub fn try_push(&self, frame: &[u8]) -> Result<(), PushError> {
        self.try_push_parts(&[frame])
    }

    /// Pushes the concatenation of `parts` as a single frame.
    pub fn try_push_parts(&self, parts: &[&[u8]]) -> Result<(), PushError> {
        let frame_len: usize = parts.iter().map(|p| p.len()).sum();
        if frame_len > self.max_frame_len() {
            return Err(PushError::TooLarge);
        }
        let len_field = u32::try_from(frame_len).map_err(|_| PushError::TooLarge)?;

        let _guard = lock(&self.send_lock);
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let free = self.capacity_bytes() - (tail - head) as usize;
        if record_size(frame_len) > free {
            return Err(PushError::Full);
        }

        let mut at = tail;
        // SAFETY: `[tail, tail + record)` lies outside `[head, tail)` because
        // the record fits the free space, and we hold `send_lock`.
        unsafe {
            self.write_at(at, &len_field.to_le_bytes());
            at += FRAME_LEN_BYTES as u64;
            for part in parts {
                self.write_at(at, part);
                at += part.len() as u64;
            }
        }
        self.tail.store(at, Ordering::Release);
        Ok(())
    }

    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        let _guard = lock(&self.recv_lock);
        self.pop_locked()
    }

    /// Pops every frame currently published.
    pub fn drain(&self) -> Result<Vec<Vec<u8>>, PopError> {
        let _guard = lock(&self.recv_lock);
        let mut frames = Vec::new();
        loop {
            match self.pop_locked() {
                Ok(frame) => frames.push(frame),
                Err(PopError::Empty) => return Ok(frames),
                Err(err) => return Err(err),
            }
        }
    }

    /// Caller holds `recv_lock`.
    fn pop_locked(&self) -> Result<Vec<u8>, PopError> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let published = (tail - head) as usize;
        if published == 0 {
            return Err(PopError::Empty);
        }
        // Tails only advance by whole records.
        if published < FRAME_LEN_BYTES {
            return Err(PopError::Corrupt);
        }

        let mut len_field = [0u8; FRAME_LEN_BYTES];
        // SAFETY: `[head, tail)` is published and only this receiver reads it.
        unsafe { self.read_at(head, &mut len_field) };
        let len = u32::from_le_bytes(len_field) as usize;
        if record_size(len) > published {
            return Err(PopError::Corrupt);
        }

        let mut frame = vec![0u8; len];
        // SAFETY: as above; the whole record lies below `tail`.
        unsafe { self.read_at(head + FRAME_LEN_BYTES as u64, &mut frame) };
        self.head.store(head + record_size(len) as u64, Ordering::Release);
        Ok(frame)
    }

    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// Copies `bytes` into the ring starting at position `pos`, wrapping at
    /// the end of the storage.
    ///
    /// # Safety
    ///
    /// No reader may access `[pos, pos + bytes.len())` concurrently.
    unsafe fn write_at(&self, pos: u64, bytes: &[u8]) {
        let cap = self.capacity_bytes();
        let start = (pos % cap as u64) as usize;
        let first = bytes.len().min(cap - start);
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().add(start), first);
        core::ptr::copy_nonoverlapping(bytes[first..].as_ptr(), self.base(), bytes.len() - first);
    }

    /// Copies `out.len()` bytes starting at position `pos` out of the ring.
    ///
    /// # Safety
    ///
    /// No writer may access `[pos, pos + out.len())` concurrently.
    unsafe fn read_at(&self, pos: u64, out: &mut [u8]) {
        let cap = self.capacity_bytes();
        let start = (pos % cap as u64) as usize;
        let first = out.len().min(cap - start);
        core::ptr::copy_nonoverlapping(self.base().add(start), out.as_mut_ptr(), first);
        core::ptr::copy_nonoverlapping(self.base(), out[first..].as_mut_ptr(), out.len() - first);
    }
}

/// Bytes a frame of `frame_len` bytes occupies in the ring.
pub fn record_size(frame_len: usize) -> usize {
    FRAME_LEN_BYTES + frame_len
}

/// Largest frame that fits an empty ring of `capacity_bytes`.
pub fn max_frame_len_for_capacity(capacity_bytes: usize) -> usize {
    capacity_bytes
        .saturating_sub(FRAME_LEN_BYTES)
        .min(u32::MAX as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_straddle_the_end_of_storage() {
        let ring = FrameRing::new(16);
        ring.try_push(b"abcdefgh").unwrap();
        assert_eq!(ring.try_pop().unwrap(), b"abcdefgh".to_vec());

        // Starts at offset 12: length field at the end, payload wrapped.
        ring.try_push(b"0123456789").unwrap();
        assert_eq!(ring.queued_bytes(), record_size(10));
        assert_eq!(ring.try_pop().unwrap(), b"0123456789".to_vec());
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_refuses_until_drained() {
        let ring = FrameRing::new(12);
        ring.try_push(b"1234").unwrap();
        assert_eq!(ring.try_push(b""), Ok(()));
        assert_eq!(ring.try_push(b""), Err(PushError::Full));
        assert_eq!(ring.drain().unwrap(), vec![b"1234".to_vec(), Vec::new()]);
        ring.try_push(b"12345678").unwrap();
    }
}
