//! Server → client records.

use crate::ids::ObjectId;
use crate::types::*;

wire_messages! {
    /// Completions and events sent back to the client.
    pub enum Return: ReturnOpcode {
        RequestAdapterCallback = 0x8001 {
            request_id: u64,
            status: RequestStatus,
            message: String,
            info: Option<AdapterInfo>,
        },
        RequestDeviceCallback = 0x8002 {
            request_id: u64,
            status: RequestStatus,
            message: String,
            limits: Option<Limits>,
        },
        CreateComputePipelineAsyncCallback = 0x8003 {
            request_id: u64,
            status: CreatePipelineAsyncStatus,
            message: String,
        },
        PopErrorScopeCallback = 0x8004 {
            request_id: u64,
            status: PopErrorScopeStatus,
            error_type: ErrorType,
            message: String,
        },
        QueueWorkDoneCallback = 0x8005 {
            request_id: u64,
            status: WorkDoneStatus,
        },
        BufferMapAsyncCallback = 0x8006 {
            buffer: ObjectId,
            request_id: u64,
            status: MapAsyncStatus,
            message: String,
            /// Read-handle data update; empty for write maps and zero-copy transfer.
            read_data: Vec<u8>,
        },
        DeviceUncapturedError = 0x8010 {
            device: ObjectId,
            error_type: ErrorType,
            message: String,
        },
        DeviceLost = 0x8011 {
            device: ObjectId,
            reason: DeviceLostReason,
            message: String,
        },
    }
}

impl Return {
    /// The human-readable text carried by the record, if it has one.
    pub fn message_mut(&mut self) -> Option<&mut String> {
        match self {
            Return::RequestAdapterCallback(r) => Some(&mut r.message),
            Return::RequestDeviceCallback(r) => Some(&mut r.message),
            Return::CreateComputePipelineAsyncCallback(r) => Some(&mut r.message),
            Return::PopErrorScopeCallback(r) => Some(&mut r.message),
            Return::QueueWorkDoneCallback(_) => None,
            Return::BufferMapAsyncCallback(r) => Some(&mut r.message),
            Return::DeviceUncapturedError(r) => Some(&mut r.message),
            Return::DeviceLost(r) => Some(&mut r.message),
        }
    }
}

/// Shortens `message` by at least `excess` bytes, cutting on a char boundary.
pub fn truncate_message(message: &mut String, excess: usize) {
    let mut keep = message.len().saturating_sub(excess);
    while !message.is_char_boundary(keep) {
        keep -= 1;
    }
    message.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut message = "ab\u{e9}cd".to_owned();
        truncate_message(&mut message, 3);
        assert_eq!(message, "ab");

        let mut message = "short".to_owned();
        truncate_message(&mut message, 64);
        assert_eq!(message, "");
    }

    #[test]
    fn work_done_has_no_message() {
        let mut ret: Return = QueueWorkDoneCallback {
            request_id: 1,
            status: WorkDoneStatus::Success,
        }
        .into();
        assert!(ret.message_mut().is_none());
    }
}
