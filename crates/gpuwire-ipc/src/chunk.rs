//! Splitting outgoing messages into bounded chunks and reassembling them.
//!
//! A message is whatever the sender flushed in one go (usually a batch of
//! command records). It travels as one or more chunks, each prefixed by a
//! [`ChunkHeader`]. The receiver buffers a message until its declared total
//! has arrived and only then hands it on.

use tracing::{debug, trace};

use crate::layout::{chunk_flags, chunk_header};
use crate::{CommandSerializer, FrameSink, TransportError, TransportLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub total_size: u64,
    pub chunk_len: u32,
    pub flags: u32,
}

impl ChunkHeader {
    pub const SIZE: usize = chunk_header::BYTES;

    pub fn to_bytes(self) -> [u8; chunk_header::BYTES] {
        let mut out = [0u8; chunk_header::BYTES];
        out[chunk_header::TOTAL_SIZE..chunk_header::CHUNK_LEN]
            .copy_from_slice(&self.total_size.to_le_bytes());
        out[chunk_header::CHUNK_LEN..chunk_header::FLAGS].copy_from_slice(&self.chunk_len.to_le_bytes());
        out[chunk_header::FLAGS..].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8; chunk_header::BYTES]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let mut total = [0u8; 8];
        total.copy_from_slice(&buf[chunk_header::TOTAL_SIZE..chunk_header::CHUNK_LEN]);
        Self {
            total_size: u64::from_le_bytes(total),
            chunk_len: u32_at(chunk_header::CHUNK_LEN),
            flags: u32_at(chunk_header::FLAGS),
        }
    }

    pub fn is_first(&self) -> bool {
        self.flags & chunk_flags::FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.flags & chunk_flags::LAST != 0
    }
}

/// Splits `message` into `(header, payload)` pairs of at most `chunk_size`
/// payload bytes. An empty message still produces one chunk.
pub fn split_message(message: &[u8], chunk_size: usize) -> impl Iterator<Item = (ChunkHeader, &[u8])> {
    let chunk_size = chunk_size.max(1);
    let total_size = message.len() as u64;
    let count = message.len().div_ceil(chunk_size).max(1);
    (0..count).map(move |i| {
        let start = i * chunk_size;
        let end = (start + chunk_size).min(message.len());
        let mut flags = 0;
        if i == 0 {
            flags |= chunk_flags::FIRST;
        }
        if i + 1 == count {
            flags |= chunk_flags::LAST;
        }
        let payload = &message[start..end];
        let header = ChunkHeader {
            total_size,
            chunk_len: payload.len() as u32,
            flags,
        };
        (header, payload)
    })
}

/// [`CommandSerializer`] that stages records and ships them as chunk frames.
///
/// Staged bytes are flushed before a reservation would push the staging
/// buffer past one chunk, so most messages travel as a single chunk; only a
/// record larger than a chunk is split.
pub struct ChunkedSerializer<S> {
    sink: S,
    limits: TransportLimits,
    staging: Vec<u8>,
    frame: Vec<u8>,
    failed: bool,
}

impl<S: FrameSink> ChunkedSerializer<S> {
    pub fn new(sink: S, limits: TransportLimits) -> Self {
        Self {
            sink,
            limits,
            staging: Vec::new(),
            frame: Vec::new(),
            failed: false,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }

    fn send_staged(&mut self) -> bool {
        if self.failed {
            return false;
        }
        if self.staging.is_empty() {
            return true;
        }

        let mut staging = std::mem::take(&mut self.staging);
        trace!(bytes = staging.len(), "flushing staged commands");
        for (header, payload) in split_message(&staging, self.limits.chunk_size) {
            self.frame.clear();
            self.frame.extend_from_slice(&header.to_bytes());
            self.frame.extend_from_slice(payload);
            if !self.sink.send_frame(&self.frame) {
                debug!("frame sink refused a chunk; transport is severed");
                self.failed = true;
                return false;
            }
        }
        // Keep the allocation for the next batch.
        staging.clear();
        self.staging = staging;
        true
    }
}

impl<S: FrameSink> CommandSerializer for ChunkedSerializer<S> {
    fn max_allocation_size(&self) -> usize {
        self.limits.max_message_bytes
    }

    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]> {
        if self.failed || size > self.limits.max_message_bytes {
            return None;
        }
        if !self.staging.is_empty() && self.staging.len() + size > self.limits.chunk_size && !self.send_staged() {
            return None;
        }
        let start = self.staging.len();
        self.staging.resize(start + size, 0);
        Some(&mut self.staging[start..])
    }

    fn flush(&mut self) -> bool {
        self.send_staged()
    }
}

/// Incremental receiver for chunk frames.
///
/// Accepts bytes with arbitrary boundaries and yields each message once every
/// byte it declared has arrived. Memory is bounded by
/// [`TransportLimits::max_message_bytes`]: an oversized declaration is refused
/// as soon as its header is read.
#[derive(Debug)]
pub struct ChunkReassembler {
    limits: TransportLimits,
    header: [u8; chunk_header::BYTES],
    header_filled: usize,
    /// Payload bytes still expected for the current chunk, if inside one.
    chunk_remaining: Option<usize>,
    chunk_is_last: bool,
    message: Option<PartialMessage>,
}

#[derive(Debug)]
struct PartialMessage {
    total_size: usize,
    buf: Vec<u8>,
}

impl ChunkReassembler {
    pub fn new(limits: TransportLimits) -> Self {
        Self {
            limits,
            header: [0u8; chunk_header::BYTES],
            header_filled: 0,
            chunk_remaining: None,
            chunk_is_last: false,
            message: None,
        }
    }

    /// Bytes of the current message received so far.
    pub fn buffered_len(&self) -> usize {
        self.message.as_ref().map_or(0, |m| m.buf.len())
    }

    pub fn push(&mut self, mut bytes: &[u8]) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut complete = Vec::new();

        while !bytes.is_empty() {
            match self.chunk_remaining {
                None => {
                    let need = chunk_header::BYTES - self.header_filled;
                    let take = need.min(bytes.len());
                    self.header[self.header_filled..self.header_filled + take].copy_from_slice(&bytes[..take]);
                    self.header_filled += take;
                    bytes = &bytes[take..];
                    if self.header_filled < chunk_header::BYTES {
                        continue;
                    }
                    self.header_filled = 0;

                    let header = ChunkHeader::from_bytes(&self.header);
                    self.begin_chunk(header)?;
                    if self.chunk_remaining == Some(0) {
                        self.end_chunk(&mut complete)?;
                    }
                }
                Some(remaining) => {
                    let take = remaining.min(bytes.len());
                    if let Some(msg) = self.message.as_mut() {
                        msg.buf.extend_from_slice(&bytes[..take]);
                    }
                    bytes = &bytes[take..];
                    self.chunk_remaining = Some(remaining - take);
                    if remaining == take {
                        self.end_chunk(&mut complete)?;
                    }
                }
            }
        }

        Ok(complete)
    }

    fn begin_chunk(&mut self, header: ChunkHeader) -> Result<(), TransportError> {
        if header.flags & !chunk_flags::ALL != 0 {
            return Err(TransportError::InvalidChunkFlags { flags: header.flags });
        }

        let total_size = usize::try_from(header.total_size).unwrap_or(usize::MAX);
        if header.is_first() {
            if self.message.is_some() {
                return Err(TransportError::UnexpectedFirstChunk);
            }
            if total_size > self.limits.max_message_bytes {
                return Err(TransportError::MessageTooLarge {
                    size: header.total_size,
                    max: self.limits.max_message_bytes,
                });
            }
            // Capacity follows the bytes that actually arrive, not the declaration.
            self.message = Some(PartialMessage {
                total_size,
                buf: Vec::with_capacity(total_size.min(self.limits.chunk_size)),
            });
        }

        let Some(msg) = self.message.as_ref() else {
            return Err(TransportError::UnexpectedContinuation);
        };
        if msg.total_size != total_size {
            return Err(TransportError::TotalSizeMismatch {
                expected: msg.total_size as u64,
                found: header.total_size,
            });
        }
        let chunk_len = header.chunk_len as usize;
        if msg.buf.len() + chunk_len > msg.total_size {
            return Err(TransportError::ChunkOverrun {
                total_size: header.total_size,
                received: (msg.buf.len() + chunk_len) as u64,
            });
        }

        self.chunk_remaining = Some(chunk_len);
        self.chunk_is_last = header.is_last();
        Ok(())
    }

    fn end_chunk(&mut self, complete: &mut Vec<Vec<u8>>) -> Result<(), TransportError> {
        self.chunk_remaining = None;
        if !self.chunk_is_last {
            return Ok(());
        }
        let Some(msg) = self.message.take() else {
            return Err(TransportError::UnexpectedContinuation);
        };
        if msg.buf.len() != msg.total_size {
            return Err(TransportError::LengthMismatch {
                declared: msg.total_size as u64,
                received: msg.buf.len() as u64,
            });
        }
        complete.push(msg.buf);
        Ok(())
    }

    /// Checks that the stream ended on a message boundary.
    pub fn finish(&self) -> Result<(), TransportError> {
        if self.header_filled != 0 || self.chunk_remaining.is_some() || self.message.is_some() {
            return Err(TransportError::TruncatedStream {
                pending: self.header_filled + self.buffered_len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let header = ChunkHeader {
            total_size: 0x0102_0304_0506_0708,
            chunk_len: 0x0A0B_0C0D,
            flags: chunk_flags::FIRST,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 0x08);
        assert_eq!(bytes[8], 0x0D);
        assert_eq!(bytes[12], 0x01);
        assert_eq!(ChunkHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn empty_message_is_one_chunk() {
        let chunks: Vec<_> = split_message(&[], 16).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0.flags, chunk_flags::ALL);
        assert_eq!(chunks[0].0.chunk_len, 0);
    }

    #[test]
    fn serializer_flushes_before_exceeding_a_chunk() {
        let limits = TransportLimits {
            max_message_bytes: 1024,
            chunk_size: 64,
        };
        let mut ser = ChunkedSerializer::new(Vec::<Vec<u8>>::new(), limits);
        ser.get_cmd_space(40).unwrap().fill(1);
        assert!(ser.sink().is_empty());
        ser.get_cmd_space(40).unwrap().fill(2);
        assert_eq!(ser.sink().len(), 1);
        assert_eq!(ser.staged_len(), 40);
        assert!(ser.flush());
        assert_eq!(ser.sink().len(), 2);
        assert!(ser.get_cmd_space(1025).is_none());
    }

    #[test]
    fn refused_flush_drops_staged_bytes_and_stays_failed() {
        struct Refuse;
        impl FrameSink for Refuse {
            fn send_frame(&mut self, _frame: &[u8]) -> bool {
                false
            }
        }
        let limits = TransportLimits {
            max_message_bytes: 1024,
            chunk_size: 16,
        };
        let mut ser = ChunkedSerializer::new(Refuse, limits);
        ser.get_cmd_space(40).unwrap().fill(7);
        assert!(!ser.flush());
        assert_eq!(ser.staged_len(), 0);
        assert!(ser.get_cmd_space(4).is_none());
        assert!(!ser.flush());
    }

    #[test]
    fn staging_is_reused_across_flushes() {
        let limits = TransportLimits {
            max_message_bytes: 1024,
            chunk_size: 64,
        };
        let mut ser = ChunkedSerializer::new(Vec::<Vec<u8>>::new(), limits);
        ser.get_cmd_space(48).unwrap().fill(3);
        assert!(ser.flush());
        assert_eq!(ser.staged_len(), 0);
        assert!(ser.staging.capacity() >= 48);
        ser.get_cmd_space(8).unwrap().fill(4);
        assert!(ser.flush());
        assert_eq!(ser.sink().len(), 2);
        assert_eq!(ser.sink()[1].len(), ChunkHeader::SIZE + 8);
    }

    #[test]
    fn declared_size_does_not_preallocate() {
        let limits = TransportLimits {
            max_message_bytes: 1 << 20,
            chunk_size: 256,
        };
        let mut rx = ChunkReassembler::new(limits);
        let header = ChunkHeader {
            total_size: 1 << 20,
            chunk_len: 8,
            flags: chunk_flags::FIRST,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[1; 8]);
        assert!(rx.push(&bytes).unwrap().is_empty());

        let msg = rx.message.as_ref().unwrap();
        assert_eq!(msg.buf.len(), 8);
        assert!(msg.buf.capacity() <= limits.chunk_size);
    }
}
