//! Binary encoding of the gpuwire command stream.
//!
//! A stream is a sequence of 4-byte aligned records, each starting with a
//! [`codec::CmdHeader`]. Client → server records decode into [`cmd::Command`],
//! server → client records into [`ret::Return`]. Object references are raw
//! [`ids::ObjectId`] pairs; resolving them is the runtime's job.

#[macro_use]
mod macros;

pub mod cmd;
pub mod codec;
pub mod error;
pub mod ids;
pub mod ret;
pub mod types;

use core::marker::PhantomData;

pub use cmd::{Command, Opcode};
pub use codec::{
    CmdHeader, Reader, WireDecode, WireEncode, WireMessage, Writer, CMD_ALIGN, CMD_HEADER_SIZE, MAX_RECORD_SIZE,
};
pub use error::DecodeError;
pub use ids::{ObjectId, ObjectType};
pub use ret::{Return, ReturnOpcode};

/// Iterator over records packed back to back in a byte slice.
///
/// Yields `(offset, record)` pairs and stops after the first error.
pub struct Records<'a, M> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
    _marker: PhantomData<M>,
}

impl<'a, M: WireMessage> Records<'a, M> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            failed: false,
            _marker: PhantomData,
        }
    }

    /// Bytes consumed by the records yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<M: WireMessage> Iterator for Records<'_, M> {
    type Item = Result<(usize, M), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        match M::deserialize(&self.bytes[self.offset..]) {
            Ok((msg, size)) => {
                let at = self.offset;
                self.offset += size;
                Some(Ok((at, msg)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{BufferUnmap, ComputePassDispatch};

    #[test]
    fn records_walks_a_packed_stream() {
        let a: Command = BufferUnmap {
            buffer: ObjectId::new(1, 0),
        }
        .into();
        let b: Command = ComputePassDispatch {
            pass: ObjectId::new(2, 3),
            x: 4,
            y: 1,
            z: 1,
        }
        .into();

        let mut bytes = a.to_bytes();
        bytes.extend_from_slice(&b.to_bytes());

        let records: Vec<_> = Records::<Command>::new(&bytes)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records, vec![(0, a.clone()), (a.required_size(), b)]);
    }

    #[test]
    fn records_stops_after_first_error() {
        let mut bytes = Command::from(BufferUnmap {
            buffer: ObjectId::new(0, 0),
        })
        .to_bytes();
        bytes.extend_from_slice(&[0xff; 8]);

        let mut it = Records::<Command>::new(&bytes);
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }
}
