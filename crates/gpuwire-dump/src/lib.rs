//! Decoding of captured gpuwire transport streams.
//!
//! A capture is the exact byte sequence one endpoint wrote to the transport:
//! chunk frames (see [`gpuwire_ipc::chunk`]) or, with [`DumpOptions::raw`],
//! bare records.

use std::fmt;

use gpuwire_ipc::{ChunkReassembler, TransportError, TransportLimits};
use gpuwire_protocol::{Command, DecodeError, Records, Return, WireMessage};

/// Which record set the capture holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → server.
    Commands,
    /// Server → client.
    Returns,
}

#[derive(Debug, Clone, Copy)]
pub struct DumpOptions {
    pub direction: Direction,
    /// The capture has no chunk framing.
    pub raw: bool,
    pub limits: TransportLimits,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRecord {
    /// Index of the reassembled message the record came from.
    pub message: usize,
    /// Byte offset of the record inside that message.
    pub offset: usize,
    pub size: usize,
    pub opcode: &'static str,
    pub detail: String,
}

impl fmt::Display for DumpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "msg {} +0x{:06x} {:>6}B {}: {}",
            self.message, self.offset, self.size, self.opcode, self.detail
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("record decode error in message {message} at offset {offset}: {source}")]
    Decode {
        message: usize,
        offset: usize,
        #[source]
        source: DecodeError,
    },
}

trait Named: WireMessage + fmt::Debug {
    fn opcode_name(&self) -> &'static str;
}

impl Named for Command {
    fn opcode_name(&self) -> &'static str {
        self.opcode().name()
    }
}

impl Named for Return {
    fn opcode_name(&self) -> &'static str {
        self.opcode().name()
    }
}

/// Splits a capture into the messages the peer would have handed to
/// `handle_commands`.
pub fn messages(capture: &[u8], opts: &DumpOptions) -> Result<Vec<Vec<u8>>, DumpError> {
    if opts.raw {
        return Ok(vec![capture.to_vec()]);
    }
    opts.limits.validate()?;
    let mut reassembler = ChunkReassembler::new(opts.limits);
    let messages = reassembler.push(capture)?;
    reassembler.finish()?;
    Ok(messages)
}

/// Decodes every record of a capture.
pub fn decode_capture(capture: &[u8], opts: &DumpOptions) -> Result<Vec<DumpRecord>, DumpError> {
    let mut out = Vec::new();
    for (index, message) in messages(capture, opts)?.iter().enumerate() {
        match opts.direction {
            Direction::Commands => decode_message::<Command>(index, message, &mut out)?,
            Direction::Returns => decode_message::<Return>(index, message, &mut out)?,
        }
    }
    Ok(out)
}

fn decode_message<M: Named>(index: usize, bytes: &[u8], out: &mut Vec<DumpRecord>) -> Result<(), DumpError> {
    let mut records = Records::<M>::new(bytes);
    while let Some(record) = records.next() {
        let (offset, msg) = record.map_err(|source| DumpError::Decode {
            message: index,
            offset: records.offset(),
            source,
        })?;
        out.push(DumpRecord {
            message: index,
            offset,
            size: msg.required_size(),
            opcode: msg.opcode_name(),
            detail: format!("{msg:?}"),
        });
    }
    Ok(())
}
