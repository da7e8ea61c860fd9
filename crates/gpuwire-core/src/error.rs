use gpuwire_ipc::TransportError;
use gpuwire_protocol::{DecodeError, ObjectId, ObjectType};
use thiserror::Error;

use crate::memory_transfer::MemoryTransferError;
use crate::object_table::TableError;

/// A protocol violation. The connection must be torn down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("malformed record: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("{object_type} {id} does not exist")]
    UnknownObject { object_type: ObjectType, id: ObjectId },

    #[error("cannot adopt {object_type} {id}: {source}")]
    IdCollision {
        object_type: ObjectType,
        id: ObjectId,
        #[source]
        source: TableError,
    },

    #[error("memory transfer: {0}")]
    MemoryTransfer(#[from] MemoryTransferError),

    #[error("{what} for buffer {buffer} while it is not mapped")]
    NotMapped { buffer: ObjectId, what: &'static str },

    #[error("request id {request_id} is already outstanding")]
    DuplicateRequest { request_id: u64 },

    #[error("reply {opcode} does not match request {request_id}")]
    MismatchedReply { request_id: u64, opcode: &'static str },

    #[error("outgoing record of {size} bytes does not fit the transport")]
    OutOfCommandSpace { size: usize },

    #[error("connection already failed")]
    ConnectionSevered,
}

/// Failure of a client call. Protocol-level causes never surface here; the
/// client reports them as a disconnect instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("the wire is disconnected")]
    Disconnected,

    #[error("{object_type} {id} is not a live client object")]
    UnknownObject { object_type: ObjectType, id: ObjectId },

    #[error("record of {size} bytes exceeds the {max} byte limit")]
    CommandTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("buffer {buffer}: {reason}")]
    InvalidMapState { buffer: ObjectId, reason: &'static str },

    #[error("range [{offset}, {offset}+{size}) is outside the mapped range")]
    OutOfMappedRange { offset: u64, size: u64 },
}

/// Result of executing one well-formed command on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// The command referenced an object in an error state (or an unknown
    /// optional object). It was consumed without reaching the native API.
    ErrorObject,
}
