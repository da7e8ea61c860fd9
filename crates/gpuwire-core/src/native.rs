//! The procedure table the server drives after resolving ids.
//!
//! Implementations wrap a real GPU API. Asynchronous entry points take a
//! [`NativeCallback`] that must be invoked exactly once, from any thread,
//! including when the owning device is lost or destroyed first.

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::sync::Arc;

use gpuwire_protocol::types::*;
use gpuwire_protocol::ObjectType;
use thiserror::Error;

/// Opaque handle owned by the native implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// A native entry point refused to create an object.
///
/// The native side has already reported the error through its own error
/// scopes or uncaptured-error sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type NativeCallback<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub status: RequestStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDevice {
    pub device: NativeHandle,
    pub queue: NativeHandle,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub status: CreatePipelineAsyncStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopErrorScopeResult {
    pub status: PopErrorScopeStatus,
    pub error_type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapAsyncResult {
    pub status: MapAsyncStatus,
    pub message: String,
}

impl MapAsyncResult {
    pub fn success() -> Self {
        Self {
            status: MapAsyncStatus::Success,
            message: String::new(),
        }
    }
}

/// Device-level notifications not tied to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    UncapturedError { error_type: ErrorType, message: String },
    Lost { reason: DeviceLostReason, message: String },
}

pub type DeviceEventSink = Arc<dyn Fn(DeviceEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub struct NativeBindGroupEntry {
    pub binding: u32,
    pub buffer: Option<NativeHandle>,
    pub offset: u64,
    pub size: Option<u64>,
    pub sampler: Option<NativeHandle>,
    pub texture_view: Option<NativeHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeComputePipelineDescriptor {
    pub label: Option<String>,
    pub layout: Option<NativeHandle>,
    pub module: NativeHandle,
    pub entry_point: String,
}

pub trait NativeProcs {
    fn request_adapter(
        &mut self,
        options: &RequestAdapterOptions,
        callback: NativeCallback<Result<(NativeHandle, AdapterInfo), RequestFailure>>,
    );

    fn adapter_request_device(
        &mut self,
        adapter: NativeHandle,
        desc: &DeviceDescriptor,
        events: DeviceEventSink,
        callback: NativeCallback<Result<NativeDevice, RequestFailure>>,
    );

    fn device_create_buffer(
        &mut self,
        device: NativeHandle,
        desc: &BufferDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_texture(
        &mut self,
        device: NativeHandle,
        desc: &TextureDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn texture_create_view(
        &mut self,
        texture: NativeHandle,
        desc: &TextureViewDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_sampler(
        &mut self,
        device: NativeHandle,
        desc: &SamplerDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_shader_module(
        &mut self,
        device: NativeHandle,
        desc: &ShaderModuleDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_bind_group_layout(
        &mut self,
        device: NativeHandle,
        label: Option<&str>,
        entries: &[BindGroupLayoutEntry],
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_bind_group(
        &mut self,
        device: NativeHandle,
        label: Option<&str>,
        layout: NativeHandle,
        entries: &[NativeBindGroupEntry],
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_pipeline_layout(
        &mut self,
        device: NativeHandle,
        label: Option<&str>,
        bind_group_layouts: &[NativeHandle],
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_compute_pipeline(
        &mut self,
        device: NativeHandle,
        desc: &NativeComputePipelineDescriptor,
    ) -> Result<NativeHandle, NativeError>;

    fn device_create_compute_pipeline_async(
        &mut self,
        device: NativeHandle,
        desc: &NativeComputePipelineDescriptor,
        callback: NativeCallback<Result<NativeHandle, PipelineFailure>>,
    );

    fn device_create_command_encoder(
        &mut self,
        device: NativeHandle,
        label: Option<&str>,
    ) -> Result<NativeHandle, NativeError>;

    fn device_push_error_scope(&mut self, device: NativeHandle, filter: ErrorFilter);

    fn device_pop_error_scope(&mut self, device: NativeHandle, callback: NativeCallback<PopErrorScopeResult>);

    /// Destroys the device. Outstanding callbacks on it must fire with a
    /// device-lost status.
    fn device_destroy(&mut self, device: NativeHandle);

    fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder: NativeHandle,
        source: NativeHandle,
        source_offset: u64,
        destination: NativeHandle,
        destination_offset: u64,
        size: u64,
    );

    fn command_encoder_begin_compute_pass(
        &mut self,
        encoder: NativeHandle,
        label: Option<&str>,
    ) -> Result<NativeHandle, NativeError>;

    fn command_encoder_finish(
        &mut self,
        encoder: NativeHandle,
        label: Option<&str>,
    ) -> Result<NativeHandle, NativeError>;

    fn compute_pass_set_pipeline(&mut self, pass: NativeHandle, pipeline: NativeHandle);

    fn compute_pass_set_bind_group(
        &mut self,
        pass: NativeHandle,
        index: u32,
        group: Option<NativeHandle>,
        dynamic_offsets: &[u32],
    );

    fn compute_pass_dispatch(&mut self, pass: NativeHandle, x: u32, y: u32, z: u32);

    fn compute_pass_end(&mut self, pass: NativeHandle);

    fn queue_submit(&mut self, queue: NativeHandle, command_buffers: &[NativeHandle]);

    fn queue_write_buffer(&mut self, queue: NativeHandle, buffer: NativeHandle, offset: u64, data: &[u8]);

    fn queue_on_submitted_work_done(&mut self, queue: NativeHandle, callback: NativeCallback<WorkDoneStatus>);

    fn buffer_map_async(
        &mut self,
        buffer: NativeHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: NativeCallback<MapAsyncResult>,
    );

    /// Runs `access` over `[offset, offset + size)` of a mapped buffer.
    /// Returns false if that range is not currently mapped.
    fn buffer_mapped_range(
        &mut self,
        buffer: NativeHandle,
        offset: u64,
        size: u64,
        access: &mut dyn FnMut(&mut [u8]),
    ) -> bool;

    fn buffer_unmap(&mut self, buffer: NativeHandle);

    fn buffer_destroy(&mut self, buffer: NativeHandle);

    /// Reports an error on `device` through its error scopes, or as an
    /// uncaptured error if no scope catches it.
    fn inject_error(&mut self, device: NativeHandle, error_type: ErrorType, message: &str);

    /// Drops the server's reference to a native object.
    fn release(&mut self, object_type: ObjectType, handle: NativeHandle);

    /// Processes pending native events. May invoke callbacks.
    fn tick(&mut self);
}
