use gpuwire_protocol::ret::*;
use gpuwire_protocol::types::*;
use gpuwire_protocol::{ObjectId, ObjectType, Records, Return};
use tracing::{debug, error, warn};

use super::objects::MapState;
use super::pending::*;
use super::{Adapter, ComputePipeline, Device, Queue, WireClient, WireObject};
use crate::error::FatalError;

impl WireClient {
    /// Decodes and applies a batch of server returns.
    ///
    /// Returns for unknown requests or released objects are dropped. Any
    /// protocol violation disconnects the client.
    pub fn handle_commands(&mut self, bytes: &[u8]) -> Result<(), FatalError> {
        if self.disconnected {
            return Err(FatalError::ConnectionSevered);
        }
        for record in Records::<Return>::new(bytes) {
            let result = record
                .map_err(FatalError::from)
                .and_then(|(_, ret)| self.handle_return(ret));
            if let Err(err) = result {
                error!(%err, "fatal return from server");
                self.disconnect();
                return Err(err);
            }
        }
        Ok(())
    }

    fn take_pending(&mut self, request_id: u64, opcode: &'static str) -> Option<PendingRequest> {
        let request = self.pending.remove(&request_id);
        if request.is_none() {
            debug!(request_id, opcode, "return for unknown request ignored");
        }
        request
    }

    fn handle_return(&mut self, ret: Return) -> Result<(), FatalError> {
        let opcode = ret.opcode().name();
        match ret {
            Return::RequestAdapterCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::Adapter { adapter, callback }) => {
                    self.on_adapter(adapter, r, callback);
                    Ok(())
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::RequestDeviceCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::Device {
                    device,
                    queue,
                    callback,
                }) => {
                    self.on_device(device, queue, r, callback);
                    Ok(())
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::CreateComputePipelineAsyncCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::ComputePipeline {
                    pipeline, callback, ..
                }) => {
                    self.on_pipeline(pipeline, r, callback);
                    Ok(())
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::PopErrorScopeCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::PopErrorScope { callback, .. }) => {
                    callback(ErrorScopeResponse {
                        status: r.status,
                        error_type: r.error_type,
                        message: r.message,
                    });
                    Ok(())
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::QueueWorkDoneCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::WorkDone { callback, .. }) => {
                    callback(r.status);
                    Ok(())
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::BufferMapAsyncCallback(r) => match self.take_pending(r.request_id, opcode) {
                None => Ok(()),
                Some(PendingRequest::Map { buffer, callback, .. }) if buffer == r.buffer => {
                    self.on_map(r, callback)
                }
                Some(other) => Err(self.mismatched(r.request_id, other, opcode)),
            },
            Return::DeviceUncapturedError(r) => {
                self.on_uncaptured_error(r);
                Ok(())
            }
            Return::DeviceLost(r) => {
                self.on_device_lost(r.device, r.reason, &r.message);
                Ok(())
            }
        }
    }

    /// Puts `request` back so the disconnect that follows resolves it.
    fn mismatched(&mut self, request_id: u64, request: PendingRequest, opcode: &'static str) -> FatalError {
        warn!(request_id, expected = request.kind(), opcode, "reply does not match its request");
        self.pending.insert(request_id, request);
        FatalError::MismatchedReply { request_id, opcode }
    }

    fn on_adapter(&mut self, adapter: ObjectId, r: RequestAdapterCallback, callback: Callback<AdapterResponse>) {
        if r.status != RequestStatus::Success {
            self.destroy_remote(ObjectType::Adapter, adapter);
            callback(AdapterResponse::failed(r.status, r.message));
            return;
        }
        callback(AdapterResponse {
            status: r.status,
            message: r.message,
            adapter: Some(Adapter::from_id(adapter)),
            info: r.info,
        });
    }

    fn on_device(&mut self, device: ObjectId, queue: ObjectId, r: RequestDeviceCallback, callback: Callback<DeviceResponse>) {
        if r.status != RequestStatus::Success {
            if let Some(state) = self.tables.device_mut(device) {
                state.lose(DeviceLostReason::FailedCreation, &r.message);
            }
            self.destroy_remote(ObjectType::Queue, queue);
            self.destroy_remote(ObjectType::Device, device);
            callback(DeviceResponse::failed(r.status, r.message));
            return;
        }

        if let Some(state) = self.tables.device_mut(device) {
            state.limits = r.limits.clone();
        }
        callback(DeviceResponse {
            status: r.status,
            message: r.message,
            device: Some(Device::from_id(device)),
            queue: Some(Queue::from_id(queue)),
            limits: r.limits,
        });
    }

    fn on_pipeline(
        &mut self,
        pipeline: ObjectId,
        r: CreateComputePipelineAsyncCallback,
        callback: Option<Callback<PipelineResponse>>,
    ) {
        let Some(callback) = callback else {
            // Answered when the device was lost; the id was only held for this reply.
            self.destroy_remote(ObjectType::ComputePipeline, pipeline);
            return;
        };
        if r.status != CreatePipelineAsyncStatus::Success {
            self.destroy_remote(ObjectType::ComputePipeline, pipeline);
            callback(PipelineResponse::failed(r.status, r.message));
            return;
        }
        callback(PipelineResponse {
            status: r.status,
            message: r.message,
            pipeline: Some(ComputePipeline::from_id(pipeline)),
        });
    }

    fn on_map(&mut self, r: BufferMapAsyncCallback, callback: Callback<MapResponse>) -> Result<(), FatalError> {
        let Some(state) = self.tables.buffer_mut(r.buffer) else {
            callback(MapResponse::new(MapAsyncStatus::Aborted, "buffer was released"));
            return Ok(());
        };
        let MapState::Pending {
            request_id,
            mode,
            offset,
            size,
        } = state.map
        else {
            warn!(buffer = %r.buffer, "map reply for a buffer with no map pending");
            callback(MapResponse::new(MapAsyncStatus::Aborted, "mapping was cancelled"));
            return Ok(());
        };
        if request_id != r.request_id {
            callback(MapResponse::new(MapAsyncStatus::Disconnected, "the wire is disconnected"));
            return Err(FatalError::MismatchedReply {
                request_id: r.request_id,
                opcode: "BufferMapAsyncCallback",
            });
        }

        if r.status != MapAsyncStatus::Success {
            state.map = MapState::Unmapped;
            callback(MapResponse::new(r.status, r.message));
            return Ok(());
        }

        if mode.contains(MapMode::READ) {
            if let Some(read) = state.read.as_mut() {
                if let Err(err) = read.deserialize_data_update(&r.read_data, offset, size) {
                    callback(MapResponse::new(MapAsyncStatus::Disconnected, "the wire is disconnected"));
                    return Err(err.into());
                }
            }
        }
        state.map = MapState::Mapped {
            mode,
            offset,
            size,
            dirty: None,
        };
        callback(MapResponse::new(r.status, r.message));
        Ok(())
    }

    fn on_uncaptured_error(&mut self, r: DeviceUncapturedError) {
        let Some(state) = self.tables.device_mut(r.device) else {
            debug!(device = %r.device, "uncaptured error for unknown device ignored");
            return;
        };
        if state.lost {
            return;
        }
        match state.callbacks.uncaptured_error.as_mut() {
            Some(callback) => callback(r.error_type, &r.message),
            None => warn!(device = %r.device, error_type = ?r.error_type, detail = %r.message, "uncaptured device error"),
        }
    }

    /// Marks `device` lost once and fails every request that depends on it.
    fn on_device_lost(&mut self, device: ObjectId, reason: DeviceLostReason, message: &str) {
        let Some(state) = self.tables.device_mut(device) else {
            debug!(%device, "loss of unknown device ignored");
            return;
        };
        if !state.lose(reason, message) {
            return;
        }
        debug!(%device, ?reason, detail = message, "device lost");

        let affected: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, request)| request.device() == Some(device))
            .map(|(id, _)| *id)
            .collect();
        for request_id in affected {
            let Some(request) = self.pending.remove(&request_id) else {
                continue;
            };
            match request {
                PendingRequest::ComputePipeline {
                    device,
                    pipeline,
                    callback,
                } => {
                    if let Some(callback) = callback {
                        callback(PipelineResponse::failed(CreatePipelineAsyncStatus::DeviceLost, message));
                    }
                    // Keep the id reserved until the server's reply arrives.
                    self.pending.insert(
                        request_id,
                        PendingRequest::ComputePipeline {
                            device,
                            pipeline,
                            callback: None,
                        },
                    );
                }
                PendingRequest::PopErrorScope { callback, .. } => {
                    callback(ErrorScopeResponse::failed(PopErrorScopeStatus::DeviceLost, message));
                }
                PendingRequest::WorkDone { callback, .. } => callback(WorkDoneStatus::DeviceLost),
                PendingRequest::Map { buffer, callback, .. } => {
                    if let Some(state) = self.tables.buffer_mut(buffer) {
                        state.map = MapState::Unmapped;
                    }
                    callback(MapResponse::new(MapAsyncStatus::DeviceLost, message));
                }
                other @ (PendingRequest::Adapter { .. } | PendingRequest::Device { .. }) => {
                    self.pending.insert(request_id, other);
                }
            }
        }
    }
}
