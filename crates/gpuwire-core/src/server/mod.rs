//! The server half of the wire.
//!
//! [`WireServer::handle_commands`] decodes client records, resolves the ids
//! they carry, and drives a [`NativeProcs`] implementation. Results of
//! asynchronous native work come back as returns on the next
//! [`WireServer::tick`], [`WireServer::flush`] or `handle_commands`.
//!
//! Errors fall in two classes. A malformed or inconsistent stream is fatal:
//! the server poisons itself and every later call fails. A well-formed
//! command that references an error object is consumed, reported to the
//! owning device, and never reaches the native API.

mod completion;
mod handlers;
mod objects;

use std::collections::HashSet;

use gpuwire_ipc::CommandSerializer;
use gpuwire_protocol::ret::*;
use gpuwire_protocol::types::*;
use gpuwire_protocol::{
    Command, ObjectId, ObjectType, Records, Return, WireEncode, WireMessage, CMD_HEADER_SIZE, MAX_RECORD_SIZE,
};
use tracing::{debug, error, trace, warn};

use crate::config::WireConfig;
use crate::error::{CommandOutcome, FatalError};
use crate::memory_transfer::{InlineServerService, ServerMemoryTransferService};
use crate::native::{NativeHandle, NativeProcs};

use completion::{Completion, CompletionQueue};
use objects::{MappedRange, ServerTables};

pub use objects::ObjectState;

/// Counters for one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub commands: u64,
    /// Commands consumed because they referenced an error object.
    pub error_objects: u64,
    pub returns: u64,
    /// Completions dropped because nothing was waiting for them.
    pub stale_completions: u64,
}

pub struct WireServer<N: NativeProcs> {
    native: N,
    serializer: Box<dyn CommandSerializer + Send>,
    memory: Box<dyn ServerMemoryTransferService>,
    tables: ServerTables,
    completions: CompletionQueue,
    outstanding: HashSet<u64>,
    lost_devices: HashSet<ObjectId>,
    poisoned: bool,
    stats: ServerStats,
}

impl<N: NativeProcs> WireServer<N> {
    pub fn new(native: N, serializer: Box<dyn CommandSerializer + Send>, config: &WireConfig) -> Self {
        Self::with_memory_transfer(native, serializer, Box::new(InlineServerService), config)
    }

    pub fn with_memory_transfer(
        native: N,
        serializer: Box<dyn CommandSerializer + Send>,
        memory: Box<dyn ServerMemoryTransferService>,
        config: &WireConfig,
    ) -> Self {
        Self {
            native,
            serializer,
            memory,
            tables: ServerTables::new(config.max_objects_per_type),
            completions: CompletionQueue::default(),
            outstanding: HashSet::new(),
            lost_devices: HashSet::new(),
            poisoned: false,
            stats: ServerStats::default(),
        }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn object_state(&self, ty: ObjectType, id: ObjectId) -> Option<ObjectState> {
        self.tables.get(ty, id).map(|obj| obj.state)
    }

    pub fn native_handle(&self, ty: ObjectType, id: ObjectId) -> Option<NativeHandle> {
        self.object_state(ty, id).and_then(ObjectState::handle)
    }

    /// Number of live ids of one type.
    pub fn object_count(&self, ty: ObjectType) -> usize {
        self.tables.table(ty).len()
    }

    /// Executes every record in `bytes`, then sends whatever completed.
    ///
    /// Returns the number of commands executed. The first fatal error
    /// poisons the server; records after it are not executed.
    pub fn handle_commands(&mut self, bytes: &[u8]) -> Result<usize, FatalError> {
        if self.poisoned {
            return Err(FatalError::ConnectionSevered);
        }

        let mut executed = 0;
        for record in Records::<Command>::new(bytes) {
            let result = record
                .map_err(FatalError::from)
                .and_then(|(offset, cmd)| {
                    trace!(offset, opcode = cmd.opcode().name(), "executing command");
                    self.execute(cmd)
                });
            match result {
                Ok(CommandOutcome::Success) => {}
                Ok(CommandOutcome::ErrorObject) => self.stats.error_objects += 1,
                Err(err) => return Err(self.poison(err)),
            }
            executed += 1;
            self.stats.commands += 1;
        }

        self.process_completions()?;
        self.flush()?;
        Ok(executed)
    }

    /// Lets the native side make progress and sends resulting returns.
    pub fn tick(&mut self) -> Result<(), FatalError> {
        if self.poisoned {
            return Err(FatalError::ConnectionSevered);
        }
        self.native.tick();
        self.process_completions()?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<(), FatalError> {
        if self.poisoned {
            return Err(FatalError::ConnectionSevered);
        }
        self.process_completions()?;
        if !self.serializer.flush() {
            return Err(self.poison(FatalError::ConnectionSevered));
        }
        Ok(())
    }

    fn poison(&mut self, err: FatalError) -> FatalError {
        error!(error = %err, "fatal wire error; dropping connection");
        self.poisoned = true;
        err
    }

    /// Queues one return. Oversized message text is cut to fit the transport.
    fn send(&mut self, mut ret: Return) -> Result<(), FatalError> {
        let max = self.serializer.max_allocation_size().min(MAX_RECORD_SIZE);
        let mut size = ret.required_size();
        while size > max {
            let Some(message) = ret.message_mut().filter(|m| !m.is_empty()) else {
                break;
            };
            let len = message.len();
            truncate_message(message, size - max);
            warn!(opcode = ret.opcode().name(), len, max, "truncated oversized return message");
            size = ret.required_size();
        }
        if size > max {
            return Err(FatalError::OutOfCommandSpace { size });
        }
        let space = self
            .serializer
            .get_cmd_space(size)
            .ok_or(FatalError::OutOfCommandSpace { size })?;
        ret.serialize(space);
        self.stats.returns += 1;
        Ok(())
    }

    /// Registers an asynchronous request. Reusing an outstanding id is fatal.
    fn begin_request(&mut self, request_id: u64) -> Result<(), FatalError> {
        if !self.outstanding.insert(request_id) {
            return Err(FatalError::DuplicateRequest { request_id });
        }
        Ok(())
    }

    /// Retires a request. Returns false for completions nobody is waiting on.
    fn finish_request(&mut self, request_id: u64) -> bool {
        if self.outstanding.remove(&request_id) {
            return true;
        }
        warn!(request_id, "dropping completion for unknown request");
        self.stats.stale_completions += 1;
        false
    }

    /// Reports a failure on `device` through the native error machinery.
    fn report_error(&mut self, device: Option<ObjectId>, message: &str) {
        let handle = device.and_then(|id| self.tables.get(ObjectType::Device, id)?.state.handle());
        match handle {
            Some(handle) => self.native.inject_error(handle, ErrorType::Validation, message),
            None => debug!(message, "error on an invalid device dropped"),
        }
    }

    /// Releases a handle whose wire object went away before its creation
    /// completed.
    fn release_orphan(&mut self, ty: ObjectType, handle: NativeHandle) {
        debug!(object_type = %ty, "releasing native object created for a destroyed id");
        self.native.release(ty, handle);
    }

    fn process_completions(&mut self) -> Result<(), FatalError> {
        loop {
            let batch = self.completions.drain();
            if batch.is_empty() {
                return Ok(());
            }
            for completion in batch {
                if let Err(err) = self.complete(completion) {
                    return Err(self.poison(err));
                }
            }
        }
    }

    fn complete(&mut self, completion: Completion) -> Result<(), FatalError> {
        match completion {
            Completion::Adapter {
                request_id,
                adapter,
                result,
            } => {
                if !self.finish_request(request_id) {
                    if let Ok((handle, _)) = result {
                        self.release_orphan(ObjectType::Adapter, handle);
                    }
                    return Ok(());
                }
                let ret = match result {
                    Ok((handle, info)) => {
                        if self.tables.get(ObjectType::Adapter, adapter).is_some() {
                            self.tables
                                .set_state(ObjectType::Adapter, adapter, ObjectState::Alive(handle));
                        } else {
                            self.release_orphan(ObjectType::Adapter, handle);
                        }
                        RequestAdapterCallback {
                            request_id,
                            status: RequestStatus::Success,
                            message: String::new(),
                            info: Some(info),
                        }
                    }
                    Err(failure) => {
                        self.tables.set_state(ObjectType::Adapter, adapter, ObjectState::Error);
                        RequestAdapterCallback {
                            request_id,
                            status: failure.status,
                            message: failure.message,
                            info: None,
                        }
                    }
                };
                self.send(ret.into())
            }

            Completion::Device {
                request_id,
                device,
                queue,
                result,
            } => {
                if !self.finish_request(request_id) {
                    if let Ok(native) = result {
                        self.release_orphan(ObjectType::Queue, native.queue);
                        self.release_orphan(ObjectType::Device, native.device);
                    }
                    return Ok(());
                }
                let ret = match result {
                    Ok(native) => {
                        if self.tables.get(ObjectType::Device, device).is_some() {
                            self.tables
                                .set_state(ObjectType::Device, device, ObjectState::Alive(native.device));
                        } else {
                            self.release_orphan(ObjectType::Device, native.device);
                        }
                        if self.tables.get(ObjectType::Queue, queue).is_some() {
                            self.tables
                                .set_state(ObjectType::Queue, queue, ObjectState::Alive(native.queue));
                        } else {
                            self.release_orphan(ObjectType::Queue, native.queue);
                        }
                        RequestDeviceCallback {
                            request_id,
                            status: RequestStatus::Success,
                            message: String::new(),
                            limits: Some(native.limits),
                        }
                    }
                    Err(failure) => {
                        self.tables.set_state(ObjectType::Device, device, ObjectState::Error);
                        self.tables.set_state(ObjectType::Queue, queue, ObjectState::Error);
                        RequestDeviceCallback {
                            request_id,
                            status: failure.status,
                            message: failure.message,
                            limits: None,
                        }
                    }
                };
                self.send(ret.into())
            }

            Completion::ComputePipeline {
                request_id,
                pipeline,
                result,
            } => {
                if !self.finish_request(request_id) {
                    if let Ok(handle) = result {
                        self.release_orphan(ObjectType::ComputePipeline, handle);
                    }
                    return Ok(());
                }
                let (status, message) = match result {
                    Ok(handle) => {
                        if self.tables.get(ObjectType::ComputePipeline, pipeline).is_some() {
                            self.tables
                                .set_state(ObjectType::ComputePipeline, pipeline, ObjectState::Alive(handle));
                        } else {
                            self.release_orphan(ObjectType::ComputePipeline, handle);
                        }
                        (CreatePipelineAsyncStatus::Success, String::new())
                    }
                    Err(failure) => {
                        self.tables
                            .set_state(ObjectType::ComputePipeline, pipeline, ObjectState::Error);
                        (failure.status, failure.message)
                    }
                };
                self.send(
                    CreateComputePipelineAsyncCallback {
                        request_id,
                        status,
                        message,
                    }
                    .into(),
                )
            }

            Completion::PopErrorScope { request_id, result } => {
                if !self.finish_request(request_id) {
                    return Ok(());
                }
                self.send(
                    PopErrorScopeCallback {
                        request_id,
                        status: result.status,
                        error_type: result.error_type,
                        message: result.message,
                    }
                    .into(),
                )
            }

            Completion::WorkDone { request_id, status } => {
                if !self.finish_request(request_id) {
                    return Ok(());
                }
                self.send(QueueWorkDoneCallback { request_id, status }.into())
            }

            Completion::Map {
                buffer,
                request_id,
                mode,
                offset,
                size,
                result,
            } => {
                if !self.finish_request(request_id) {
                    return Ok(());
                }
                let ret = self.complete_map(buffer, request_id, mode, offset, size, result);
                self.send(ret.into())
            }

            Completion::DeviceEvent { device, event } => {
                if self.tables.get(ObjectType::Device, device).is_none() {
                    debug!(%device, "dropping event for a released device");
                    return Ok(());
                }
                match event {
                    crate::native::DeviceEvent::UncapturedError { error_type, message } => self.send(
                        DeviceUncapturedError {
                            device,
                            error_type,
                            message,
                        }
                        .into(),
                    ),
                    crate::native::DeviceEvent::Lost { reason, message } => {
                        if !self.lost_devices.insert(device) {
                            return Ok(());
                        }
                        debug!(%device, reason = reason.name(), "device lost");
                        self.send(DeviceLost { device, reason, message }.into())
                    }
                }
            }
        }
    }

    fn complete_map(
        &mut self,
        buffer: ObjectId,
        request_id: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
        result: crate::native::MapAsyncResult,
    ) -> BufferMapAsyncCallback {
        let reply = |status: MapAsyncStatus, message: String, read_data: Vec<u8>| BufferMapAsyncCallback {
            buffer,
            request_id,
            status,
            message,
            read_data,
        };

        let handle = self.native_handle(ObjectType::Buffer, buffer);
        let Some(state) = self
            .tables
            .get_mut(ObjectType::Buffer, buffer)
            .and_then(|obj| obj.buffer.as_deref_mut())
        else {
            return reply(MapAsyncStatus::Aborted, "buffer was released".into(), Vec::new());
        };

        if state.map_request != Some(request_id) {
            return reply(
                MapAsyncStatus::Aborted,
                "buffer was unmapped before the mapping resolved".into(),
                Vec::new(),
            );
        }
        state.map_request = None;
        if result.status != MapAsyncStatus::Success {
            return reply(result.status, result.message, Vec::new());
        }
        let Some(handle) = handle else {
            return reply(MapAsyncStatus::Error, "buffer is invalid".into(), Vec::new());
        };

        state.mapped = Some(MappedRange { mode, offset, size });
        if !mode.contains(MapMode::READ) {
            return reply(MapAsyncStatus::Success, String::new(), Vec::new());
        }
        let Some(read) = state.read.as_mut() else {
            return reply(MapAsyncStatus::Error, "buffer has no read handle".into(), Vec::new());
        };

        let mut data = None;
        let visible = self
            .native
            .buffer_mapped_range(handle, offset, size, &mut |mapped| {
                data = Some(read.serialize_data_update(mapped, offset));
            });
        let failure = match data {
            Some(data) if visible => {
                let ret = reply(MapAsyncStatus::Success, String::new(), data);
                if CMD_HEADER_SIZE + ret.wire_size() <= self.serializer.max_allocation_size() {
                    return ret;
                }
                "mapped range exceeds the transport's message limit"
            }
            _ => {
                warn!(%buffer, offset, size, "mapped range not accessible after successful map");
                "mapped range is not accessible"
            }
        };

        // The client will not consider the buffer mapped.
        state.mapped = None;
        self.native.buffer_unmap(handle);
        reply(MapAsyncStatus::Error, failure.into(), Vec::new())
    }
}

impl<N: NativeProcs> Drop for WireServer<N> {
    fn drop(&mut self) {
        for (ty, handle) in self.tables.drain_alive() {
            self.native.release(ty, handle);
        }
    }
}
