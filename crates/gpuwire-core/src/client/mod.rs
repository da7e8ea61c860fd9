//! The client half of the wire.
//!
//! [`WireClient`] hands out typed handles, allocates their ids locally and
//! serializes one command per call. Asynchronous calls register a callback
//! keyed by request id; [`WireClient::handle_commands`] feeds server returns
//! back in and fires them.
//!
//! Callbacks run synchronously inside the client call that resolves them and
//! must not call back into the same client.

mod buffer;
mod objects;
mod pending;
mod returns;

use std::collections::BTreeMap;

use gpuwire_ipc::CommandSerializer;
use gpuwire_protocol::cmd::*;
use gpuwire_protocol::types::{self, *};
use gpuwire_protocol::{Command, ObjectId, ObjectType, WireMessage, MAX_RECORD_SIZE};
use tracing::{debug, trace};

use crate::config::WireConfig;
use crate::error::ClientError;
use crate::memory_transfer::{ClientMemoryTransferService, InlineClientService};

use objects::{ClientObject, ClientTables, DeviceState, MapState, ObjectExtra};
use pending::PendingRequest;

pub use objects::{
    Adapter, BindGroup, BindGroupLayout, Buffer, CommandBuffer, CommandEncoder, ComputePassEncoder,
    ComputePipeline, Device, DeviceCallbacks, FutureId, PipelineLayout, Queue, Sampler, ShaderModule, Texture,
    TextureView, WireObject,
};
pub use pending::{AdapterResponse, Callback, DeviceResponse, ErrorScopeResponse, MapResponse, PipelineResponse};

/// What one bind group entry binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    Buffer {
        buffer: Buffer,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(Sampler),
    TextureView(TextureView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: Option<&'a str>,
    pub layout: Option<PipelineLayout>,
    pub module: ShaderModule,
    pub entry_point: &'a str,
}

pub struct WireClient {
    serializer: Box<dyn CommandSerializer + Send>,
    memory: Box<dyn ClientMemoryTransferService>,
    tables: ClientTables,
    /// Keyed by request id, so disconnect resolves calls in issue order.
    pending: BTreeMap<u64, PendingRequest>,
    next_request: u64,
    disconnected: bool,
}

impl WireClient {
    pub fn new(serializer: Box<dyn CommandSerializer + Send>, config: &WireConfig) -> Self {
        Self::with_memory_transfer(serializer, Box::new(InlineClientService), config)
    }

    pub fn with_memory_transfer(
        serializer: Box<dyn CommandSerializer + Send>,
        memory: Box<dyn ClientMemoryTransferService>,
        config: &WireConfig,
    ) -> Self {
        Self {
            serializer,
            memory,
            tables: ClientTables::new(config.max_objects_per_type),
            pending: BTreeMap::new(),
            next_request: 1,
            disconnected: false,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Asynchronous calls still waiting for the server.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of allocated ids of one type.
    pub fn live_objects(&self, ty: ObjectType) -> usize {
        self.tables.table(ty).len()
    }

    /// Limits the server reported for `device`.
    pub fn device_limits(&self, device: Device) -> Option<Limits> {
        self.tables
            .get(ObjectType::Device, device.id())?
            .device_state()?
            .limits
            .clone()
    }

    /// Hands every serialized command to the transport.
    pub fn flush(&mut self) -> Result<(), ClientError> {
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }
        if !self.serializer.flush() {
            debug!("transport refused flush");
            self.disconnect();
            return Err(ClientError::Disconnected);
        }
        Ok(())
    }

    /// Severs the wire. Every pending call resolves with a disconnected
    /// status and every live device reports itself lost. Idempotent.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        debug!(pending = self.pending.len(), "client disconnected");

        for (_, request) in std::mem::take(&mut self.pending) {
            self.resolve_disconnected(request);
        }

        for id in self.tables.table(ObjectType::Device).ids() {
            if let Some(device) = self.tables.device_mut(id) {
                device.lose(DeviceLostReason::Disconnected, "the wire is disconnected");
            }
        }
    }

    fn resolve_disconnected(&mut self, request: PendingRequest) {
        const MESSAGE: &str = "the wire is disconnected";
        match request {
            PendingRequest::Adapter { adapter, callback } => {
                self.free_local(ObjectType::Adapter, adapter);
                callback(AdapterResponse::failed(RequestStatus::Disconnected, MESSAGE));
            }
            PendingRequest::Device {
                device,
                queue,
                callback,
            } => {
                self.free_local(ObjectType::Queue, queue);
                self.free_local(ObjectType::Device, device);
                callback(DeviceResponse::failed(RequestStatus::Disconnected, MESSAGE));
            }
            PendingRequest::ComputePipeline {
                pipeline, callback, ..
            } => {
                self.free_local(ObjectType::ComputePipeline, pipeline);
                if let Some(callback) = callback {
                    callback(PipelineResponse::failed(CreatePipelineAsyncStatus::Disconnected, MESSAGE));
                }
            }
            PendingRequest::PopErrorScope { callback, .. } => {
                callback(ErrorScopeResponse::failed(PopErrorScopeStatus::Disconnected, MESSAGE));
            }
            PendingRequest::WorkDone { callback, .. } => callback(WorkDoneStatus::Disconnected),
            PendingRequest::Map { buffer, callback, .. } => {
                if let Some(state) = self.tables.buffer_mut(buffer) {
                    state.map = MapState::Unmapped;
                }
                callback(MapResponse::new(MapAsyncStatus::Disconnected, MESSAGE));
            }
        }
    }

    /// Serializes one command, or fails without side effects.
    fn serialize(&mut self, cmd: impl Into<Command>) -> Result<(), ClientError> {
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }
        let cmd = cmd.into();
        let size = cmd.required_size();
        let max = self.serializer.max_allocation_size().min(MAX_RECORD_SIZE);
        if size > max {
            return Err(ClientError::CommandTooLarge { size, max });
        }
        match self.serializer.get_cmd_space(size) {
            Some(space) => {
                trace!(opcode = cmd.opcode().name(), size, "serialized command");
                cmd.serialize(space);
                Ok(())
            }
            None => {
                debug!(size, "transport refused command space");
                self.disconnect();
                Err(ClientError::Disconnected)
            }
        }
    }

    /// Registers `request` and serializes `cmd` for it. If the transport
    /// refuses the bytes, the resulting disconnect resolves the request like
    /// any other pending call. Other failures unwind the registration.
    fn submit_request(
        &mut self,
        request_id: u64,
        cmd: impl Into<Command>,
        request: PendingRequest,
    ) -> Result<FutureId, ClientError> {
        self.pending.insert(request_id, request);
        match self.serialize(cmd) {
            Ok(()) | Err(ClientError::Disconnected) => Ok(FutureId(request_id)),
            Err(err) => {
                if let Some(request) = self.pending.remove(&request_id) {
                    self.forget(request);
                }
                Err(err)
            }
        }
    }

    /// Undoes the local bookkeeping of a request that was never sent.
    fn forget(&mut self, request: PendingRequest) {
        match request {
            PendingRequest::Adapter { adapter, .. } => self.free_local(ObjectType::Adapter, adapter),
            PendingRequest::Device { device, queue, .. } => {
                self.free_local(ObjectType::Queue, queue);
                self.free_local(ObjectType::Device, device);
            }
            PendingRequest::ComputePipeline { pipeline, .. } => self.free_local(ObjectType::ComputePipeline, pipeline),
            PendingRequest::Map { buffer, .. } => {
                if let Some(state) = self.tables.buffer_mut(buffer) {
                    state.map = MapState::Unmapped;
                }
            }
            PendingRequest::PopErrorScope { .. } | PendingRequest::WorkDone { .. } => {}
        }
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    /// Resolves a typed handle to its id, failing if it is not live.
    fn check<T: WireObject>(&self, handle: T) -> Result<ObjectId, ClientError> {
        let id = handle.id();
        if self.tables.table(T::TYPE).contains(id) {
            Ok(id)
        } else {
            Err(ClientError::UnknownObject {
                object_type: T::TYPE,
                id,
            })
        }
    }

    fn owner<T: WireObject>(&self, handle: T) -> Result<Option<ObjectId>, ClientError> {
        let id = self.check(handle)?;
        Ok(self.tables.get(T::TYPE, id).and_then(|obj| obj.device))
    }

    /// Drops an id without telling the server.
    fn free_local(&mut self, ty: ObjectType, id: ObjectId) {
        if self.tables.table_mut(ty).free(id).is_err() {
            debug!(object_type = %ty, %id, "freeing an id that is not allocated");
        }
    }

    /// Drops an id and releases the server's copy.
    fn destroy_remote(&mut self, ty: ObjectType, id: ObjectId) {
        self.free_local(ty, id);
        if !self.disconnected {
            // Failing here already disconnected the client.
            let _ = self.serialize(DestroyObject { object_type: ty, id });
        }
    }

    /// Allocates an id, serializes the command `build` produces for it, and
    /// frees the id again if serialization fails.
    fn create<T: WireObject>(
        &mut self,
        device: Option<ObjectId>,
        build: impl FnOnce(ObjectId) -> Command,
    ) -> Result<T, ClientError> {
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }
        let id = self.tables.table_mut(T::TYPE).allocate(ClientObject::new(device))?;
        if let Err(err) = self.serialize(build(id)) {
            self.free_local(T::TYPE, id);
            return Err(err);
        }
        Ok(T::from_id(id))
    }

    pub fn add_ref<T: WireObject>(&mut self, handle: T) -> Result<(), ClientError> {
        let id = self.check(handle)?;
        if let Some(obj) = self.tables.get_mut(T::TYPE, id) {
            obj.refcount += 1;
        }
        Ok(())
    }

    /// Drops one reference. The last release destroys the object on both
    /// sides; after a disconnect it only frees the local id.
    pub fn release<T: WireObject>(&mut self, handle: T) -> Result<(), ClientError> {
        let id = self.check(handle)?;
        let Some(obj) = self.tables.get_mut(T::TYPE, id) else {
            return Ok(());
        };
        obj.refcount -= 1;
        if obj.refcount > 0 {
            return Ok(());
        }

        let map = obj.buffer().map(|b| b.map);
        if let Some(MapState::Pending { request_id, .. }) = map {
            self.abort_map(request_id, "buffer was released before the mapping resolved");
        }
        self.destroy_remote(T::TYPE, id);
        Ok(())
    }

    pub fn request_adapter(
        &mut self,
        options: &RequestAdapterOptions,
        callback: impl FnOnce(AdapterResponse) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(AdapterResponse::failed(RequestStatus::Disconnected, "the wire is disconnected"));
            return Ok(FutureId(request_id));
        }

        let adapter = self
            .tables
            .table_mut(ObjectType::Adapter)
            .allocate(ClientObject::new(None))?;
        let cmd = InstanceRequestAdapter {
            request_id,
            adapter,
            options: options.clone(),
        };
        self.submit_request(
            request_id,
            cmd,
            PendingRequest::Adapter {
                adapter,
                callback: Box::new(callback),
            },
        )
    }

    pub fn adapter_request_device(
        &mut self,
        adapter: Adapter,
        desc: &DeviceDescriptor,
        callbacks: DeviceCallbacks,
        callback: impl FnOnce(DeviceResponse) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let adapter = self.check(adapter)?;
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(DeviceResponse::failed(RequestStatus::Disconnected, "the wire is disconnected"));
            return Ok(FutureId(request_id));
        }

        let devices = self.tables.table_mut(ObjectType::Device);
        let device = devices.allocate(ClientObject {
            refcount: 1,
            device: None,
            extra: ObjectExtra::Device(Box::new(DeviceState {
                callbacks,
                limits: None,
                lost: false,
            })),
        })?;
        if let Some(obj) = devices.get_mut(device) {
            obj.device = Some(device);
        }
        let queue = match self
            .tables
            .table_mut(ObjectType::Queue)
            .allocate(ClientObject::new(Some(device)))
        {
            Ok(queue) => queue,
            Err(err) => {
                self.free_local(ObjectType::Device, device);
                return Err(err.into());
            }
        };

        let cmd = AdapterRequestDevice {
            adapter,
            request_id,
            device,
            queue,
            desc: desc.clone(),
        };
        self.submit_request(
            request_id,
            cmd,
            PendingRequest::Device {
                device,
                queue,
                callback: Box::new(callback),
            },
        )
    }

    pub fn device_create_texture(&mut self, device: Device, desc: &TextureDescriptor) -> Result<Texture, ClientError> {
        let device = self.check(device)?;
        self.create(Some(device), |result| {
            DeviceCreateTexture {
                device,
                result,
                desc: desc.clone(),
            }
            .into()
        })
    }

    pub fn texture_create_view(
        &mut self,
        texture: Texture,
        desc: &TextureViewDescriptor,
    ) -> Result<TextureView, ClientError> {
        let owner = self.owner(texture)?;
        let texture = texture.id();
        self.create(owner, |result| {
            TextureCreateView {
                texture,
                result,
                desc: desc.clone(),
            }
            .into()
        })
    }

    pub fn device_create_sampler(&mut self, device: Device, desc: &SamplerDescriptor) -> Result<Sampler, ClientError> {
        let device = self.check(device)?;
        self.create(Some(device), |result| {
            DeviceCreateSampler {
                device,
                result,
                desc: desc.clone(),
            }
            .into()
        })
    }

    pub fn device_create_shader_module(
        &mut self,
        device: Device,
        desc: &ShaderModuleDescriptor,
    ) -> Result<ShaderModule, ClientError> {
        let device = self.check(device)?;
        self.create(Some(device), |result| {
            DeviceCreateShaderModule {
                device,
                result,
                desc: desc.clone(),
            }
            .into()
        })
    }

    pub fn device_create_bind_group_layout(
        &mut self,
        device: Device,
        label: Option<&str>,
        entries: &[BindGroupLayoutEntry],
    ) -> Result<BindGroupLayout, ClientError> {
        let device = self.check(device)?;
        self.create(Some(device), |result| {
            DeviceCreateBindGroupLayout {
                device,
                result,
                label: label.map(str::to_owned),
                entries: entries.to_vec(),
            }
            .into()
        })
    }

    pub fn device_create_bind_group(
        &mut self,
        device: Device,
        label: Option<&str>,
        layout: BindGroupLayout,
        entries: &[BindGroupEntry],
    ) -> Result<BindGroup, ClientError> {
        let device = self.check(device)?;
        let layout = self.check(layout)?;
        let entries = entries
            .iter()
            .map(|entry| {
                let mut wire = types::BindGroupEntry {
                    binding: entry.binding,
                    ..Default::default()
                };
                match entry.resource {
                    BindingResource::Buffer { buffer, offset, size } => {
                        wire.buffer = Some(self.check(buffer)?);
                        wire.offset = offset;
                        wire.size = size;
                    }
                    BindingResource::Sampler(sampler) => wire.sampler = Some(self.check(sampler)?),
                    BindingResource::TextureView(view) => wire.texture_view = Some(self.check(view)?),
                }
                Ok(wire)
            })
            .collect::<Result<Vec<_>, ClientError>>()?;
        self.create(Some(device), |result| {
            DeviceCreateBindGroup {
                device,
                result,
                label: label.map(str::to_owned),
                layout,
                entries,
            }
            .into()
        })
    }

    pub fn device_create_pipeline_layout(
        &mut self,
        device: Device,
        label: Option<&str>,
        bind_group_layouts: &[BindGroupLayout],
    ) -> Result<PipelineLayout, ClientError> {
        let device = self.check(device)?;
        let bind_group_layouts = bind_group_layouts
            .iter()
            .map(|layout| self.check(*layout))
            .collect::<Result<Vec<_>, _>>()?;
        self.create(Some(device), |result| {
            DeviceCreatePipelineLayout {
                device,
                result,
                label: label.map(str::to_owned),
                bind_group_layouts,
            }
            .into()
        })
    }

    pub fn device_create_compute_pipeline(
        &mut self,
        device: Device,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<ComputePipeline, ClientError> {
        let device = self.check(device)?;
        let (layout, stage) = self.pipeline_parts(desc)?;
        self.create(Some(device), |result| {
            DeviceCreateComputePipeline {
                device,
                result,
                label: desc.label.map(str::to_owned),
                layout,
                stage,
            }
            .into()
        })
    }

    fn pipeline_parts(
        &self,
        desc: &ComputePipelineDescriptor<'_>,
    ) -> Result<(Option<ObjectId>, ProgrammableStage), ClientError> {
        let layout = desc.layout.map(|layout| self.check(layout)).transpose()?;
        let stage = ProgrammableStage {
            module: self.check(desc.module)?,
            entry_point: desc.entry_point.to_owned(),
        };
        Ok((layout, stage))
    }

    /// The pipeline handle is only handed out through `callback`, on success.
    pub fn device_create_compute_pipeline_async(
        &mut self,
        device: Device,
        desc: &ComputePipelineDescriptor<'_>,
        callback: impl FnOnce(PipelineResponse) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let device = self.check(device)?;
        let (layout, stage) = self.pipeline_parts(desc)?;
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(PipelineResponse::failed(
                CreatePipelineAsyncStatus::Disconnected,
                "the wire is disconnected",
            ));
            return Ok(FutureId(request_id));
        }
        if self.device_is_lost(device) {
            callback(PipelineResponse::failed(CreatePipelineAsyncStatus::DeviceLost, "device is lost"));
            return Ok(FutureId(request_id));
        }

        let pipeline = self
            .tables
            .table_mut(ObjectType::ComputePipeline)
            .allocate(ClientObject::new(Some(device)))?;
        let cmd = DeviceCreateComputePipelineAsync {
            device,
            request_id,
            result: pipeline,
            label: desc.label.map(str::to_owned),
            layout,
            stage,
        };
        self.submit_request(
            request_id,
            cmd,
            PendingRequest::ComputePipeline {
                device,
                pipeline,
                callback: Some(Box::new(callback)),
            },
        )
    }

    pub fn device_create_command_encoder(
        &mut self,
        device: Device,
        label: Option<&str>,
    ) -> Result<CommandEncoder, ClientError> {
        let device = self.check(device)?;
        self.create(Some(device), |result| {
            DeviceCreateCommandEncoder {
                device,
                result,
                label: label.map(str::to_owned),
            }
            .into()
        })
    }

    pub fn device_push_error_scope(&mut self, device: Device, filter: ErrorFilter) -> Result<(), ClientError> {
        let device = self.check(device)?;
        self.serialize(DevicePushErrorScope { device, filter })
    }

    pub fn device_pop_error_scope(
        &mut self,
        device: Device,
        callback: impl FnOnce(ErrorScopeResponse) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let device = self.check(device)?;
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(ErrorScopeResponse::failed(
                PopErrorScopeStatus::Disconnected,
                "the wire is disconnected",
            ));
            return Ok(FutureId(request_id));
        }
        if self.device_is_lost(device) {
            callback(ErrorScopeResponse::failed(PopErrorScopeStatus::DeviceLost, "device is lost"));
            return Ok(FutureId(request_id));
        }
        self.submit_request(
            request_id,
            DevicePopErrorScope { device, request_id },
            PendingRequest::PopErrorScope {
                device,
                callback: Box::new(callback),
            },
        )
    }

    pub fn device_destroy(&mut self, device: Device) -> Result<(), ClientError> {
        let device = self.check(device)?;
        self.serialize(DeviceDestroy { device })
    }

    fn device_is_lost(&self, device: ObjectId) -> bool {
        self.tables
            .get(ObjectType::Device, device)
            .and_then(ClientObject::device_state)
            .is_some_and(|state| state.lost)
    }

    pub fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder: CommandEncoder,
        source: Buffer,
        source_offset: u64,
        destination: Buffer,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), ClientError> {
        let cmd = CommandEncoderCopyBufferToBuffer {
            encoder: self.check(encoder)?,
            source: self.check(source)?,
            source_offset,
            destination: self.check(destination)?,
            destination_offset,
            size,
        };
        self.serialize(cmd)
    }

    pub fn command_encoder_begin_compute_pass(
        &mut self,
        encoder: CommandEncoder,
        label: Option<&str>,
    ) -> Result<ComputePassEncoder, ClientError> {
        let owner = self.owner(encoder)?;
        let encoder = encoder.id();
        self.create(owner, |result| {
            CommandEncoderBeginComputePass {
                encoder,
                result,
                label: label.map(str::to_owned),
            }
            .into()
        })
    }

    pub fn command_encoder_finish(
        &mut self,
        encoder: CommandEncoder,
        label: Option<&str>,
    ) -> Result<CommandBuffer, ClientError> {
        let owner = self.owner(encoder)?;
        let encoder = encoder.id();
        self.create(owner, |result| {
            CommandEncoderFinish {
                encoder,
                result,
                label: label.map(str::to_owned),
            }
            .into()
        })
    }

    pub fn compute_pass_set_pipeline(
        &mut self,
        pass: ComputePassEncoder,
        pipeline: ComputePipeline,
    ) -> Result<(), ClientError> {
        let cmd = ComputePassSetPipeline {
            pass: self.check(pass)?,
            pipeline: self.check(pipeline)?,
        };
        self.serialize(cmd)
    }

    pub fn compute_pass_set_bind_group(
        &mut self,
        pass: ComputePassEncoder,
        index: u32,
        group: Option<BindGroup>,
        dynamic_offsets: &[u32],
    ) -> Result<(), ClientError> {
        let cmd = ComputePassSetBindGroup {
            pass: self.check(pass)?,
            index,
            group: group.map(|g| self.check(g)).transpose()?,
            dynamic_offsets: dynamic_offsets.to_vec(),
        };
        self.serialize(cmd)
    }

    pub fn compute_pass_dispatch(&mut self, pass: ComputePassEncoder, x: u32, y: u32, z: u32) -> Result<(), ClientError> {
        let pass = self.check(pass)?;
        self.serialize(ComputePassDispatch { pass, x, y, z })
    }

    pub fn compute_pass_end(&mut self, pass: ComputePassEncoder) -> Result<(), ClientError> {
        let pass = self.check(pass)?;
        self.serialize(ComputePassEnd { pass })
    }

    pub fn queue_submit(&mut self, queue: Queue, command_buffers: &[CommandBuffer]) -> Result<(), ClientError> {
        let queue = self.check(queue)?;
        let command_buffers = command_buffers
            .iter()
            .map(|cb| self.check(*cb))
            .collect::<Result<Vec<_>, _>>()?;
        self.serialize(QueueSubmit { queue, command_buffers })
    }

    pub fn queue_write_buffer(&mut self, queue: Queue, buffer: Buffer, offset: u64, data: &[u8]) -> Result<(), ClientError> {
        let cmd = QueueWriteBuffer {
            queue: self.check(queue)?,
            buffer: self.check(buffer)?,
            offset,
            data: data.to_vec(),
        };
        self.serialize(cmd)
    }

    pub fn queue_on_submitted_work_done(
        &mut self,
        queue: Queue,
        callback: impl FnOnce(WorkDoneStatus) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let device = self.owner(queue)?.unwrap_or_default();
        let queue = queue.id();
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(WorkDoneStatus::Disconnected);
            return Ok(FutureId(request_id));
        }
        if self.device_is_lost(device) {
            callback(WorkDoneStatus::DeviceLost);
            return Ok(FutureId(request_id));
        }
        self.submit_request(
            request_id,
            QueueOnSubmittedWorkDone { queue, request_id },
            PendingRequest::WorkDone {
                device,
                callback: Box::new(callback),
            },
        )
    }
}
