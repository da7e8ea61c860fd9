//! One `exec_*` method per command.

use gpuwire_protocol::cmd::*;
use gpuwire_protocol::ret::*;
use gpuwire_protocol::types::*;
use gpuwire_protocol::{Command, ObjectId, ObjectType};
use tracing::{debug, warn};

use super::completion::Completion;
use super::objects::{MappedRange, ObjectState, Resolver, ServerBuffer, ServerObject};
use super::WireServer;
use crate::error::{CommandOutcome, FatalError};
use crate::native::{NativeBindGroupEntry, NativeComputePipelineDescriptor, NativeError, NativeHandle, NativeProcs};

impl<N: NativeProcs> WireServer<N> {
    pub(super) fn execute(&mut self, cmd: Command) -> Result<CommandOutcome, FatalError> {
        match cmd {
            Command::InstanceRequestAdapter(c) => self.exec_request_adapter(c),
            Command::AdapterRequestDevice(c) => self.exec_request_device(c),
            Command::DestroyObject(c) => self.exec_destroy_object(c.object_type, c.id),

            Command::DeviceCreateBuffer(c) => self.exec_create_buffer(c),
            Command::DeviceCreateTexture(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let failed = r.failed();
                self.create(ObjectType::Texture, c.result, Some(c.device), failed, |native| {
                    native.device_create_texture(device, &c.desc)
                })
            }
            Command::TextureCreateView(c) => {
                let mut r = Resolver::new(&self.tables);
                let texture = r.required(ObjectType::Texture, c.texture)?;
                let failed = r.failed();
                let owner = self.tables.owner(ObjectType::Texture, c.texture);
                self.create(ObjectType::TextureView, c.result, owner, failed, |native| {
                    native.texture_create_view(texture, &c.desc)
                })
            }
            Command::DeviceCreateSampler(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let failed = r.failed();
                self.create(ObjectType::Sampler, c.result, Some(c.device), failed, |native| {
                    native.device_create_sampler(device, &c.desc)
                })
            }
            Command::DeviceCreateShaderModule(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let failed = r.failed();
                self.create(ObjectType::ShaderModule, c.result, Some(c.device), failed, |native| {
                    native.device_create_shader_module(device, &c.desc)
                })
            }
            Command::DeviceCreateBindGroupLayout(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let failed = r.failed();
                self.create(ObjectType::BindGroupLayout, c.result, Some(c.device), failed, |native| {
                    native.device_create_bind_group_layout(device, c.label.as_deref(), &c.entries)
                })
            }
            Command::DeviceCreateBindGroup(c) => self.exec_create_bind_group(c),
            Command::DeviceCreatePipelineLayout(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let layouts = r.all(ObjectType::BindGroupLayout, &c.bind_group_layouts)?;
                let failed = r.failed();
                self.create(ObjectType::PipelineLayout, c.result, Some(c.device), failed, |native| {
                    native.device_create_pipeline_layout(device, c.label.as_deref(), &layouts)
                })
            }
            Command::DeviceCreateComputePipeline(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let desc = resolve_pipeline(&mut r, c.label, c.layout, c.stage)?;
                let failed = r.failed();
                self.create(ObjectType::ComputePipeline, c.result, Some(c.device), failed, |native| {
                    native.device_create_compute_pipeline(device, &desc)
                })
            }
            Command::DeviceCreateComputePipelineAsync(c) => self.exec_create_compute_pipeline_async(c),
            Command::DeviceCreateCommandEncoder(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                let failed = r.failed();
                self.create(ObjectType::CommandEncoder, c.result, Some(c.device), failed, |native| {
                    native.device_create_command_encoder(device, c.label.as_deref())
                })
            }
            Command::DevicePushErrorScope(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                if r.failed() {
                    return Ok(CommandOutcome::ErrorObject);
                }
                self.native.device_push_error_scope(device, c.filter);
                Ok(CommandOutcome::Success)
            }
            Command::DevicePopErrorScope(c) => self.exec_pop_error_scope(c),
            Command::DeviceDestroy(c) => {
                let mut r = Resolver::new(&self.tables);
                let device = r.required(ObjectType::Device, c.device)?;
                if r.failed() {
                    return Ok(CommandOutcome::ErrorObject);
                }
                self.native.device_destroy(device);
                Ok(CommandOutcome::Success)
            }

            Command::CommandEncoderCopyBufferToBuffer(c) => {
                let mut r = Resolver::new(&self.tables);
                let encoder = r.required(ObjectType::CommandEncoder, c.encoder)?;
                let source = r.required(ObjectType::Buffer, c.source)?;
                let destination = r.required(ObjectType::Buffer, c.destination)?;
                let failed = r.failed();
                self.call(ObjectType::CommandEncoder, c.encoder, failed, |native| {
                    native.command_encoder_copy_buffer_to_buffer(
                        encoder,
                        source,
                        c.source_offset,
                        destination,
                        c.destination_offset,
                        c.size,
                    )
                })
            }
            Command::CommandEncoderBeginComputePass(c) => {
                let mut r = Resolver::new(&self.tables);
                let encoder = r.required(ObjectType::CommandEncoder, c.encoder)?;
                let failed = r.failed();
                let owner = self.tables.owner(ObjectType::CommandEncoder, c.encoder);
                self.create(ObjectType::ComputePassEncoder, c.result, owner, failed, |native| {
                    native.command_encoder_begin_compute_pass(encoder, c.label.as_deref())
                })
            }
            Command::CommandEncoderFinish(c) => {
                let mut r = Resolver::new(&self.tables);
                let encoder = r.required(ObjectType::CommandEncoder, c.encoder)?;
                let failed = r.failed();
                let owner = self.tables.owner(ObjectType::CommandEncoder, c.encoder);
                self.create(ObjectType::CommandBuffer, c.result, owner, failed, |native| {
                    native.command_encoder_finish(encoder, c.label.as_deref())
                })
            }

            Command::ComputePassSetPipeline(c) => {
                let mut r = Resolver::new(&self.tables);
                let pass = r.required(ObjectType::ComputePassEncoder, c.pass)?;
                let pipeline = r.required(ObjectType::ComputePipeline, c.pipeline)?;
                let failed = r.failed();
                self.call(ObjectType::ComputePassEncoder, c.pass, failed, |native| {
                    native.compute_pass_set_pipeline(pass, pipeline)
                })
            }
            Command::ComputePassSetBindGroup(c) => {
                let mut r = Resolver::new(&self.tables);
                let pass = r.required(ObjectType::ComputePassEncoder, c.pass)?;
                let group = r.optional(ObjectType::BindGroup, c.group);
                let failed = r.failed();
                self.call(ObjectType::ComputePassEncoder, c.pass, failed, |native| {
                    native.compute_pass_set_bind_group(pass, c.index, group, &c.dynamic_offsets)
                })
            }
            Command::ComputePassDispatch(c) => {
                let mut r = Resolver::new(&self.tables);
                let pass = r.required(ObjectType::ComputePassEncoder, c.pass)?;
                let failed = r.failed();
                self.call(ObjectType::ComputePassEncoder, c.pass, failed, |native| {
                    native.compute_pass_dispatch(pass, c.x, c.y, c.z)
                })
            }
            Command::ComputePassEnd(c) => {
                let mut r = Resolver::new(&self.tables);
                let pass = r.required(ObjectType::ComputePassEncoder, c.pass)?;
                let failed = r.failed();
                self.call(ObjectType::ComputePassEncoder, c.pass, failed, |native| native.compute_pass_end(pass))
            }

            Command::QueueSubmit(c) => {
                let mut r = Resolver::new(&self.tables);
                let queue = r.required(ObjectType::Queue, c.queue)?;
                let buffers = r.all(ObjectType::CommandBuffer, &c.command_buffers)?;
                let failed = r.failed();
                self.call(ObjectType::Queue, c.queue, failed, |native| native.queue_submit(queue, &buffers))
            }
            Command::QueueWriteBuffer(c) => {
                let mut r = Resolver::new(&self.tables);
                let queue = r.required(ObjectType::Queue, c.queue)?;
                let buffer = r.required(ObjectType::Buffer, c.buffer)?;
                let failed = r.failed();
                self.call(ObjectType::Queue, c.queue, failed, |native| {
                    native.queue_write_buffer(queue, buffer, c.offset, &c.data)
                })
            }
            Command::QueueOnSubmittedWorkDone(c) => self.exec_work_done(c),

            Command::BufferMapAsync(c) => self.exec_map_async(c),
            Command::BufferUpdateMappedData(c) => self.exec_update_mapped_data(c),
            Command::BufferUnmap(c) => {
                let mut r = Resolver::new(&self.tables);
                let handle = r.required(ObjectType::Buffer, c.buffer)?;
                let failed = r.failed();
                if let Some(state) = self.buffer_state(c.buffer) {
                    state.map_request = None;
                    state.mapped = None;
                }
                self.call(ObjectType::Buffer, c.buffer, failed, |native| native.buffer_unmap(handle))
            }
            Command::BufferDestroy(c) => {
                let mut r = Resolver::new(&self.tables);
                let handle = r.required(ObjectType::Buffer, c.buffer)?;
                let failed = r.failed();
                if let Some(state) = self.buffer_state(c.buffer) {
                    state.map_request = None;
                    state.mapped = None;
                }
                self.call(ObjectType::Buffer, c.buffer, failed, |native| native.buffer_destroy(handle))
            }
        }
    }

    /// Adopts `result` and creates its native object unless an argument was
    /// an error object.
    fn create(
        &mut self,
        ty: ObjectType,
        result: ObjectId,
        device: Option<ObjectId>,
        failed: bool,
        f: impl FnOnce(&mut N) -> Result<NativeHandle, NativeError>,
    ) -> Result<CommandOutcome, FatalError> {
        self.tables.adopt(ty, result, ServerObject::new(ObjectState::Error, device))?;
        if failed {
            self.reject(ty, result, device);
            return Ok(CommandOutcome::ErrorObject);
        }
        match f(&mut self.native) {
            Ok(handle) => self.tables.set_state(ty, result, ObjectState::Alive(handle)),
            Err(err) => debug!(object_type = %ty, id = %result, error = %err, "native creation failed"),
        }
        Ok(CommandOutcome::Success)
    }

    /// Runs a non-creating command unless an argument was an error object.
    fn call(
        &mut self,
        ty: ObjectType,
        target: ObjectId,
        failed: bool,
        f: impl FnOnce(&mut N),
    ) -> Result<CommandOutcome, FatalError> {
        let device = self.tables.owner(ty, target);
        if failed {
            self.reject(ty, target, device);
            return Ok(CommandOutcome::ErrorObject);
        }
        f(&mut self.native);
        Ok(CommandOutcome::Success)
    }

    fn reject(&mut self, ty: ObjectType, id: ObjectId, device: Option<ObjectId>) {
        warn!(object_type = %ty, %id, "command references an invalid object");
        self.report_error(device, &format!("{ty} {id} used with an invalid object"));
    }

    fn buffer_state(&mut self, buffer: ObjectId) -> Option<&mut ServerBuffer> {
        self.tables
            .get_mut(ObjectType::Buffer, buffer)
            .and_then(|obj| obj.buffer.as_deref_mut())
    }

    fn exec_request_adapter(&mut self, c: InstanceRequestAdapter) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        self.tables
            .adopt(ObjectType::Adapter, c.adapter, ServerObject::new(ObjectState::Pending, None))?;
        let (request_id, adapter) = (c.request_id, c.adapter);
        let callback = self.completions.callback(move |result| Completion::Adapter {
            request_id,
            adapter,
            result,
        });
        self.native.request_adapter(&c.options, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_request_device(&mut self, c: AdapterRequestDevice) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        let mut r = Resolver::new(&self.tables);
        let adapter = r.required(ObjectType::Adapter, c.adapter)?;
        let failed = r.failed();

        let state = if failed { ObjectState::Error } else { ObjectState::Pending };
        self.tables
            .adopt(ObjectType::Device, c.device, ServerObject::new(state, Some(c.device)))?;
        self.tables
            .adopt(ObjectType::Queue, c.queue, ServerObject::new(state, Some(c.device)))?;

        if failed {
            self.outstanding.remove(&c.request_id);
            self.send(
                RequestDeviceCallback {
                    request_id: c.request_id,
                    status: RequestStatus::Error,
                    message: "adapter is invalid".into(),
                    limits: None,
                }
                .into(),
            )?;
            return Ok(CommandOutcome::ErrorObject);
        }

        let (request_id, device, queue) = (c.request_id, c.device, c.queue);
        let events = self.completions.device_events(device);
        let callback = self.completions.callback(move |result| Completion::Device {
            request_id,
            device,
            queue,
            result,
        });
        self.native.adapter_request_device(adapter, &c.desc, events, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_destroy_object(&mut self, ty: ObjectType, id: ObjectId) -> Result<CommandOutcome, FatalError> {
        let obj = self
            .tables
            .table_mut(ty)
            .free(id)
            .map_err(|_| FatalError::UnknownObject { object_type: ty, id })?;
        if ty == ObjectType::Device {
            self.lost_devices.remove(&id);
        }
        if let Some(handle) = obj.state.handle() {
            self.native.release(ty, handle);
        }
        Ok(CommandOutcome::Success)
    }

    fn exec_create_buffer(&mut self, c: DeviceCreateBuffer) -> Result<CommandOutcome, FatalError> {
        let mut r = Resolver::new(&self.tables);
        let device = r.required(ObjectType::Device, c.device)?;
        let failed = r.failed();

        let read = c
            .read_handle
            .as_deref()
            .map(|info| self.memory.deserialize_read_handle(info))
            .transpose()?;
        let write = c
            .write_handle
            .as_deref()
            .map(|info| self.memory.deserialize_write_handle(info))
            .transpose()?;

        let outcome = self.create(ObjectType::Buffer, c.result, Some(c.device), failed, |native| {
            native.device_create_buffer(device, &c.desc)
        })?;

        let mapped = c.desc.mapped_at_creation.then_some(MappedRange {
            mode: MapMode::WRITE,
            offset: 0,
            size: c.desc.size,
        });
        if let Some(obj) = self.tables.get_mut(ObjectType::Buffer, c.result) {
            obj.buffer = Some(Box::new(ServerBuffer {
                read,
                write,
                map_request: None,
                mapped: mapped.filter(|_| matches!(obj.state, ObjectState::Alive(_))),
            }));
        }
        Ok(outcome)
    }

    fn exec_create_bind_group(&mut self, c: DeviceCreateBindGroup) -> Result<CommandOutcome, FatalError> {
        let mut r = Resolver::new(&self.tables);
        let device = r.required(ObjectType::Device, c.device)?;
        let layout = r.required(ObjectType::BindGroupLayout, c.layout)?;
        let entries: Vec<NativeBindGroupEntry> = c
            .entries
            .iter()
            .map(|e| NativeBindGroupEntry {
                binding: e.binding,
                buffer: r.optional(ObjectType::Buffer, e.buffer),
                offset: e.offset,
                size: e.size,
                sampler: r.optional(ObjectType::Sampler, e.sampler),
                texture_view: r.optional(ObjectType::TextureView, e.texture_view),
            })
            .collect();
        let failed = r.failed();
        self.create(ObjectType::BindGroup, c.result, Some(c.device), failed, |native| {
            native.device_create_bind_group(device, c.label.as_deref(), layout, &entries)
        })
    }

    fn exec_create_compute_pipeline_async(
        &mut self,
        c: DeviceCreateComputePipelineAsync,
    ) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        let mut r = Resolver::new(&self.tables);
        let device = r.required(ObjectType::Device, c.device)?;
        let desc = resolve_pipeline(&mut r, c.label, c.layout, c.stage)?;
        let failed = r.failed();

        let state = if failed { ObjectState::Error } else { ObjectState::Pending };
        self.tables.adopt(
            ObjectType::ComputePipeline,
            c.result,
            ServerObject::new(state, Some(c.device)),
        )?;

        if failed {
            self.reject(ObjectType::ComputePipeline, c.result, Some(c.device));
            self.outstanding.remove(&c.request_id);
            self.send(
                CreateComputePipelineAsyncCallback {
                    request_id: c.request_id,
                    status: CreatePipelineAsyncStatus::ValidationError,
                    message: "pipeline references an invalid object".into(),
                }
                .into(),
            )?;
            return Ok(CommandOutcome::ErrorObject);
        }

        let (request_id, pipeline) = (c.request_id, c.result);
        let callback = self.completions.callback(move |result| Completion::ComputePipeline {
            request_id,
            pipeline,
            result,
        });
        self.native.device_create_compute_pipeline_async(device, &desc, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_pop_error_scope(&mut self, c: DevicePopErrorScope) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        let mut r = Resolver::new(&self.tables);
        let device = r.required(ObjectType::Device, c.device)?;
        if r.failed() {
            self.outstanding.remove(&c.request_id);
            self.send(
                PopErrorScopeCallback {
                    request_id: c.request_id,
                    status: PopErrorScopeStatus::DeviceLost,
                    error_type: ErrorType::NoError,
                    message: "device is invalid".into(),
                }
                .into(),
            )?;
            return Ok(CommandOutcome::ErrorObject);
        }
        let request_id = c.request_id;
        let callback = self
            .completions
            .callback(move |result| Completion::PopErrorScope { request_id, result });
        self.native.device_pop_error_scope(device, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_work_done(&mut self, c: QueueOnSubmittedWorkDone) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        let mut r = Resolver::new(&self.tables);
        let queue = r.required(ObjectType::Queue, c.queue)?;
        if r.failed() {
            self.outstanding.remove(&c.request_id);
            self.send(
                QueueWorkDoneCallback {
                    request_id: c.request_id,
                    status: WorkDoneStatus::Error,
                }
                .into(),
            )?;
            return Ok(CommandOutcome::ErrorObject);
        }
        let request_id = c.request_id;
        let callback = self
            .completions
            .callback(move |status| Completion::WorkDone { request_id, status });
        self.native.queue_on_submitted_work_done(queue, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_map_async(&mut self, c: BufferMapAsync) -> Result<CommandOutcome, FatalError> {
        self.begin_request(c.request_id)?;
        let mut r = Resolver::new(&self.tables);
        let handle = r.required(ObjectType::Buffer, c.buffer)?;
        let failed = r.failed();

        let refusal = match self.buffer_state(c.buffer) {
            _ if failed => Some("buffer is invalid"),
            None => Some("buffer is invalid"),
            Some(state) if state.map_request.is_some() || state.mapped.is_some() => {
                Some("buffer is already mapped or has a map pending")
            }
            Some(state) if c.mode.contains(MapMode::READ) && state.read.is_none() => {
                Some("buffer was not created for read mapping")
            }
            Some(state) if c.mode.contains(MapMode::WRITE) && state.write.is_none() => {
                Some("buffer was not created for write mapping")
            }
            Some(state) => {
                state.map_request = Some(c.request_id);
                None
            }
        };
        if let Some(message) = refusal {
            self.outstanding.remove(&c.request_id);
            self.send(
                BufferMapAsyncCallback {
                    buffer: c.buffer,
                    request_id: c.request_id,
                    status: MapAsyncStatus::Error,
                    message: message.into(),
                    read_data: Vec::new(),
                }
                .into(),
            )?;
            return Ok(if failed {
                CommandOutcome::ErrorObject
            } else {
                CommandOutcome::Success
            });
        }

        let (buffer, request_id, mode, offset, size) = (c.buffer, c.request_id, c.mode, c.offset, c.size);
        let callback = self.completions.callback(move |result| Completion::Map {
            buffer,
            request_id,
            mode,
            offset,
            size,
            result,
        });
        self.native.buffer_map_async(handle, mode, offset, size, callback);
        Ok(CommandOutcome::Success)
    }

    fn exec_update_mapped_data(&mut self, c: BufferUpdateMappedData) -> Result<CommandOutcome, FatalError> {
        let mut r = Resolver::new(&self.tables);
        let handle = r.required(ObjectType::Buffer, c.buffer)?;
        if r.failed() {
            return Ok(CommandOutcome::ErrorObject);
        }

        let not_mapped = FatalError::NotMapped {
            buffer: c.buffer,
            what: "mapped data update",
        };
        let Some(state) = self
            .tables
            .get_mut(ObjectType::Buffer, c.buffer)
            .and_then(|obj| obj.buffer.as_deref_mut())
        else {
            return Err(not_mapped);
        };
        let writable = state
            .mapped
            .is_some_and(|m| m.mode.contains(MapMode::WRITE) && m.contains(c.offset, c.size));
        let Some(write) = state.write.as_mut().filter(|_| writable) else {
            return Err(not_mapped);
        };

        let mut applied = None;
        let visible = self
            .native
            .buffer_mapped_range(handle, c.offset, c.size, &mut |mapped| {
                applied = Some(write.deserialize_data_update(&c.data, c.offset, mapped));
            });
        match applied {
            Some(result) if visible => result?,
            _ => return Err(not_mapped),
        }
        Ok(CommandOutcome::Success)
    }
}

fn resolve_pipeline(
    r: &mut Resolver<'_>,
    label: Option<String>,
    layout: Option<ObjectId>,
    stage: ProgrammableStage,
) -> Result<NativeComputePipelineDescriptor, FatalError> {
    let layout = r.optional(ObjectType::PipelineLayout, layout);
    let module = r.required(ObjectType::ShaderModule, stage.module)?;
    Ok(NativeComputePipelineDescriptor {
        label,
        layout,
        module,
        entry_point: stage.entry_point,
    })
}
