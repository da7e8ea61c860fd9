//! Scriptable in-memory [`NativeProcs`] for exercising the server.
//!
//! Buffers hold real bytes, copies recorded on an encoder execute on submit,
//! and error scopes catch injected errors. Clones share state, so a test can
//! keep one handle while the server owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use gpuwire_protocol::types::*;
use gpuwire_protocol::ObjectType;

use super::*;

/// When asynchronous callbacks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Inside the native call that started the operation.
    Immediate,
    /// On the next [`NativeProcs::tick`].
    Deferred,
    /// On a spawned thread. See [`MockNative::wait_idle`].
    Threaded,
}

#[derive(Clone)]
pub struct MockNative {
    state: Arc<Mutex<MockState>>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    mode: CompletionMode,
}

/// Runs with the state locked when an operation completes; the returned
/// closure then invokes the user callback with the lock released.
type Op = Box<dyn FnOnce(&mut MockState, Outcome) -> Fire + Send>;
type Fire = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    DeviceLost,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    calls: Vec<&'static str>,
    failing: HashSet<&'static str>,
    released: Vec<(ObjectType, NativeHandle)>,
    /// Owning device of every live object.
    owners: HashMap<u64, u64>,
    devices: HashMap<u64, MockDevice>,
    queues: HashMap<u64, u64>,
    buffers: HashMap<u64, MockBuffer>,
    shaders: HashMap<u64, String>,
    encoders: HashMap<u64, Vec<BufferCopy>>,
    command_buffers: HashMap<u64, Vec<BufferCopy>>,
    pending: Vec<(u64, Op)>,
}

struct MockDevice {
    events: DeviceEventSink,
    limits: Limits,
    scopes: Vec<(ErrorFilter, Option<(ErrorType, String)>)>,
    lost: bool,
}

struct MockBuffer {
    data: Vec<u8>,
    usage: BufferUsages,
    mapped: Option<(MapMode, u64, u64)>,
    map_pending: bool,
    /// Bumped by unmap and destroy; a pending map whose serial changed is aborted.
    map_serial: u64,
    destroyed: bool,
}

#[derive(Debug, Clone, Copy)]
struct BufferCopy {
    source: u64,
    source_offset: u64,
    destination: u64,
    destination_offset: u64,
    size: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn filter_catches(filter: ErrorFilter, error_type: ErrorType) -> bool {
    matches!(
        (filter, error_type),
        (ErrorFilter::Validation, ErrorType::Validation)
            | (ErrorFilter::OutOfMemory, ErrorType::OutOfMemory)
            | (ErrorFilter::Internal, ErrorType::Internal)
    )
}

impl MockState {
    fn alloc(&mut self, device: u64) -> NativeHandle {
        self.next_handle += 1;
        self.owners.insert(self.next_handle, device);
        NativeHandle(self.next_handle)
    }

    fn device_of(&self, handle: NativeHandle) -> u64 {
        self.owners.get(&handle.0).copied().unwrap_or(0)
    }

    fn is_lost(&self, device: u64) -> bool {
        self.devices.get(&device).is_some_and(|d| d.lost)
    }

    /// Routes an error to the innermost matching scope. Returns the sink to
    /// notify if nothing caught it.
    fn report(&mut self, device: u64, error_type: ErrorType, message: &str) -> Option<(DeviceEventSink, DeviceEvent)> {
        let dev = self.devices.get_mut(&device)?;
        if dev.lost {
            return None;
        }
        for (filter, caught) in dev.scopes.iter_mut().rev() {
            if filter_catches(*filter, error_type) {
                if caught.is_none() {
                    *caught = Some((error_type, message.to_owned()));
                }
                return None;
            }
        }
        Some((
            Arc::clone(&dev.events),
            DeviceEvent::UncapturedError {
                error_type,
                message: message.to_owned(),
            },
        ))
    }

    /// Common failure path for synchronous creation.
    fn create_failed(&mut self, device: u64, message: &str) -> (NativeError, Option<(DeviceEventSink, DeviceEvent)>) {
        let event = self.report(device, ErrorType::Validation, message);
        (NativeError::new(message), event)
    }
}

fn notify(event: Option<(DeviceEventSink, DeviceEvent)>) {
    if let Some((sink, event)) = event {
        sink(event);
    }
}

impl MockNative {
    pub fn new(mode: CompletionMode) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            threads: Arc::new(Mutex::new(Vec::new())),
            mode,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Makes the named entry point fail from now on.
    pub fn fail(&self, entry: &'static str) {
        self.lock().failing.insert(entry);
    }

    /// Names of every entry point invoked, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, entry: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == entry).count()
    }

    pub fn released(&self) -> Vec<(ObjectType, NativeHandle)> {
        self.lock().released.clone()
    }

    pub fn buffer_contents(&self, buffer: NativeHandle) -> Option<Vec<u8>> {
        self.lock().buffers.get(&buffer.0).map(|b| b.data.clone())
    }

    /// Operations queued for the next tick.
    pub fn pending_ops(&self) -> usize {
        self.lock().pending.len()
    }

    /// Joins every completion thread spawned so far.
    pub fn wait_idle(&self) {
        let threads = std::mem::take(&mut *lock(&self.threads));
        for t in threads {
            let _ = t.join();
        }
    }

    /// Loses `device` as if the driver reset: pending operations on it
    /// complete with a device-lost status and the lost event fires.
    pub fn lose_device(&self, device: NativeHandle, reason: DeviceLostReason, message: &str) {
        let (ops, sink) = {
            let mut st = self.lock();
            let Some(dev) = st.devices.get_mut(&device.0) else {
                return;
            };
            if dev.lost {
                return;
            }
            dev.lost = true;
            let sink = Arc::clone(&dev.events);
            let (lost, kept) = std::mem::take(&mut st.pending)
                .into_iter()
                .partition::<Vec<_>, _>(|(d, _)| *d == device.0);
            st.pending = kept;
            (lost, sink)
        };
        for (_, op) in ops {
            complete(&self.state, op, Outcome::DeviceLost);
        }
        sink(DeviceEvent::Lost {
            reason,
            message: message.to_owned(),
        });
    }

    fn schedule(&self, device: u64, op: impl FnOnce(&mut MockState, Outcome) -> Fire + Send + 'static) {
        let op: Op = Box::new(op);
        match self.mode {
            CompletionMode::Immediate => complete(&self.state, op, Outcome::Complete),
            CompletionMode::Deferred => self.lock().pending.push((device, op)),
            CompletionMode::Threaded => {
                let state = Arc::clone(&self.state);
                let handle = std::thread::spawn(move || complete(&state, op, Outcome::Complete));
                lock(&self.threads).push(handle);
            }
        }
    }

    /// Records the call and reports whether it was scripted to fail.
    fn enter(&self, entry: &'static str) -> (MutexGuard<'_, MockState>, bool) {
        let mut st = self.lock();
        st.calls.push(entry);
        let fail = st.failing.contains(entry);
        (st, fail)
    }

    /// Logs the call and releases the state lock, returning whether it should fail.
    fn record(&self, entry: &'static str) -> bool {
        self.enter(entry).1
    }

    fn create_simple(&self, entry: &'static str, device: u64, invalid: Option<&str>) -> Result<NativeHandle, NativeError> {
        let (mut st, fail) = self.enter(entry);
        let message = match invalid {
            Some(message) => Some(message.to_owned()),
            None if fail => Some(format!("{entry} failed")),
            None => None,
        };
        if let Some(message) = message {
            let (err, event) = st.create_failed(device, &message);
            drop(st);
            notify(event);
            return Err(err);
        }
        Ok(st.alloc(device))
    }
}

fn complete(state: &Mutex<MockState>, op: Op, outcome: Outcome) {
    let fire = op(&mut lock(state), outcome);
    fire();
}

impl NativeProcs for MockNative {
    fn request_adapter(
        &mut self,
        options: &RequestAdapterOptions,
        callback: NativeCallback<Result<(NativeHandle, AdapterInfo), RequestFailure>>,
    ) {
        let fail = self.record("request_adapter");
        let fallback = options.force_fallback_adapter;
        self.schedule(
            0,
            move |st, _| {
                let result = if fail {
                    Err(RequestFailure {
                        status: RequestStatus::Unavailable,
                        message: "no adapter available".into(),
                    })
                } else {
                    let info = AdapterInfo {
                        vendor: "gpuwire".into(),
                        architecture: if fallback { "software" } else { "mock" }.into(),
                        device: "mock device".into(),
                        description: "in-memory test adapter".into(),
                        vendor_id: 0x1234,
                        device_id: 0x5678,
                    };
                    Ok((st.alloc(0), info))
                };
                Box::new(move || callback(result))
            },
        );
    }

    fn adapter_request_device(
        &mut self,
        adapter: NativeHandle,
        desc: &DeviceDescriptor,
        events: DeviceEventSink,
        callback: NativeCallback<Result<NativeDevice, RequestFailure>>,
    ) {
        let fail = self.record("adapter_request_device");
        let limits = desc.required_limits.clone().unwrap_or_default();
        self.schedule(
            adapter.0,
            move |st, _| {
                let result = if fail || limits.max_bind_groups > Limits::default().max_bind_groups {
                    Err(RequestFailure {
                        status: RequestStatus::Error,
                        message: "requested limits are not supported".into(),
                    })
                } else {
                    let device = st.alloc(0);
                    st.owners.insert(device.0, device.0);
                    let queue = st.alloc(device.0);
                    st.queues.insert(queue.0, device.0);
                    st.devices.insert(
                        device.0,
                        MockDevice {
                            events,
                            limits: limits.clone(),
                            scopes: Vec::new(),
                            lost: false,
                        },
                    );
                    Ok(NativeDevice { device, queue, limits })
                };
                Box::new(move || callback(result))
            },
        );
    }

    fn device_create_buffer(&mut self, device: NativeHandle, desc: &BufferDescriptor) -> Result<NativeHandle, NativeError> {
        let (mut st, fail) = self.enter("device_create_buffer");
        let max = st.devices.get(&device.0).map_or(0, |d| d.limits.max_buffer_size);
        if fail || desc.size > max {
            let (err, event) = st.create_failed(device.0, "buffer size exceeds max_buffer_size");
            drop(st);
            notify(event);
            return Err(err);
        }
        let handle = st.alloc(device.0);
        let mapped = desc.mapped_at_creation.then_some((MapMode::WRITE, 0, desc.size));
        st.buffers.insert(
            handle.0,
            MockBuffer {
                data: vec![0; desc.size as usize],
                usage: desc.usage,
                mapped,
                map_pending: false,
                map_serial: 0,
                destroyed: false,
            },
        );
        Ok(handle)
    }

    fn device_create_texture(&mut self, device: NativeHandle, desc: &TextureDescriptor) -> Result<NativeHandle, NativeError> {
        let invalid = (desc.size.width == 0 || desc.size.height == 0).then_some("texture extent must be non-zero");
        self.create_simple("device_create_texture", device.0, invalid)
    }

    fn texture_create_view(&mut self, texture: NativeHandle, _desc: &TextureViewDescriptor) -> Result<NativeHandle, NativeError> {
        let device = self.lock().device_of(texture);
        self.create_simple("texture_create_view", device, None)
    }

    fn device_create_sampler(&mut self, device: NativeHandle, desc: &SamplerDescriptor) -> Result<NativeHandle, NativeError> {
        let invalid = if desc.lod_min_clamp > desc.lod_max_clamp {
            Some("lod_min_clamp is greater than lod_max_clamp")
        } else if desc.max_anisotropy == 0 {
            Some("max_anisotropy must be at least 1")
        } else {
            None
        };
        self.create_simple("device_create_sampler", device.0, invalid)
    }

    fn device_create_shader_module(
        &mut self,
        device: NativeHandle,
        desc: &ShaderModuleDescriptor,
    ) -> Result<NativeHandle, NativeError> {
        let invalid = desc.code.trim().is_empty().then_some("shader source is empty");
        let handle = self.create_simple("device_create_shader_module", device.0, invalid)?;
        self.lock().shaders.insert(handle.0, desc.code.clone());
        Ok(handle)
    }

    fn device_create_bind_group_layout(
        &mut self,
        device: NativeHandle,
        _label: Option<&str>,
        entries: &[BindGroupLayoutEntry],
    ) -> Result<NativeHandle, NativeError> {
        let mut seen = HashSet::new();
        let invalid = (!entries.iter().all(|e| seen.insert(e.binding))).then_some("duplicate binding in layout");
        self.create_simple("device_create_bind_group_layout", device.0, invalid)
    }

    fn device_create_bind_group(
        &mut self,
        device: NativeHandle,
        _label: Option<&str>,
        _layout: NativeHandle,
        entries: &[NativeBindGroupEntry],
    ) -> Result<NativeHandle, NativeError> {
        let invalid = entries
            .iter()
            .any(|e| [e.buffer, e.sampler, e.texture_view].iter().flatten().count() != 1)
            .then_some("bind group entry must bind exactly one resource");
        self.create_simple("device_create_bind_group", device.0, invalid)
    }

    fn device_create_pipeline_layout(
        &mut self,
        device: NativeHandle,
        _label: Option<&str>,
        bind_group_layouts: &[NativeHandle],
    ) -> Result<NativeHandle, NativeError> {
        let max = self.lock().devices.get(&device.0).map_or(0, |d| d.limits.max_bind_groups);
        let invalid = (bind_group_layouts.len() > max as usize).then_some("too many bind group layouts");
        self.create_simple("device_create_pipeline_layout", device.0, invalid)
    }

    fn device_create_compute_pipeline(
        &mut self,
        device: NativeHandle,
        desc: &NativeComputePipelineDescriptor,
    ) -> Result<NativeHandle, NativeError> {
        let invalid = !self.lock().shaders.get(&desc.module.0).is_some_and(|code| code.contains(&desc.entry_point));
        self.create_simple(
            "device_create_compute_pipeline",
            device.0,
            invalid.then_some("entry point not found in shader module"),
        )
    }

    fn device_create_compute_pipeline_async(
        &mut self,
        device: NativeHandle,
        desc: &NativeComputePipelineDescriptor,
        callback: NativeCallback<Result<NativeHandle, PipelineFailure>>,
    ) {
        let (st, fail) = self.enter("device_create_compute_pipeline_async");
        let valid = !fail && st.shaders.get(&desc.module.0).is_some_and(|code| code.contains(&desc.entry_point));
        drop(st);
        let device = device.0;
        self.schedule(
            device,
            move |st, outcome| {
                let result = if outcome == Outcome::DeviceLost || st.is_lost(device) {
                    Err(PipelineFailure {
                        status: CreatePipelineAsyncStatus::DeviceLost,
                        message: "device lost".into(),
                    })
                } else if !valid {
                    Err(PipelineFailure {
                        status: CreatePipelineAsyncStatus::ValidationError,
                        message: "entry point not found in shader module".into(),
                    })
                } else {
                    Ok(st.alloc(device))
                };
                Box::new(move || callback(result))
            },
        );
    }

    fn device_create_command_encoder(&mut self, device: NativeHandle, _label: Option<&str>) -> Result<NativeHandle, NativeError> {
        let handle = self.create_simple("device_create_command_encoder", device.0, None)?;
        self.lock().encoders.insert(handle.0, Vec::new());
        Ok(handle)
    }

    fn device_push_error_scope(&mut self, device: NativeHandle, filter: ErrorFilter) {
        let (mut st, _) = self.enter("device_push_error_scope");
        if let Some(dev) = st.devices.get_mut(&device.0) {
            dev.scopes.push((filter, None));
        }
    }

    fn device_pop_error_scope(&mut self, device: NativeHandle, callback: NativeCallback<PopErrorScopeResult>) {
        let (mut st, _) = self.enter("device_pop_error_scope");
        let popped = st.devices.get_mut(&device.0).and_then(|d| d.scopes.pop());
        drop(st);
        let device = device.0;
        self.schedule(
            device,
            move |st, outcome| {
                let result = if outcome == Outcome::DeviceLost || st.is_lost(device) {
                    PopErrorScopeResult {
                        status: PopErrorScopeStatus::DeviceLost,
                        error_type: ErrorType::NoError,
                        message: String::new(),
                    }
                } else {
                    match popped {
                        None => PopErrorScopeResult {
                            status: PopErrorScopeStatus::EmptyStack,
                            error_type: ErrorType::NoError,
                            message: "no error scope to pop".into(),
                        },
                        Some((_, caught)) => {
                            let (error_type, message) = caught.unwrap_or((ErrorType::NoError, String::new()));
                            PopErrorScopeResult {
                                status: PopErrorScopeStatus::Success,
                                error_type,
                                message,
                            }
                        }
                    }
                };
                Box::new(move || callback(result))
            },
        );
    }

    fn device_destroy(&mut self, device: NativeHandle) {
        self.lock().calls.push("device_destroy");
        self.lose_device(device, DeviceLostReason::Destroyed, "device destroyed");
    }

    fn command_encoder_copy_buffer_to_buffer(
        &mut self,
        encoder: NativeHandle,
        source: NativeHandle,
        source_offset: u64,
        destination: NativeHandle,
        destination_offset: u64,
        size: u64,
    ) {
        let (mut st, _) = self.enter("command_encoder_copy_buffer_to_buffer");
        if let Some(copies) = st.encoders.get_mut(&encoder.0) {
            copies.push(BufferCopy {
                source: source.0,
                source_offset,
                destination: destination.0,
                destination_offset,
                size,
            });
        }
    }

    fn command_encoder_begin_compute_pass(&mut self, encoder: NativeHandle, _label: Option<&str>) -> Result<NativeHandle, NativeError> {
        let device = self.lock().device_of(encoder);
        self.create_simple("command_encoder_begin_compute_pass", device, None)
    }

    fn command_encoder_finish(&mut self, encoder: NativeHandle, _label: Option<&str>) -> Result<NativeHandle, NativeError> {
        let device = self.lock().device_of(encoder);
        let handle = self.create_simple("command_encoder_finish", device, None)?;
        let mut st = self.lock();
        let copies = st.encoders.remove(&encoder.0).unwrap_or_default();
        st.command_buffers.insert(handle.0, copies);
        Ok(handle)
    }

    fn compute_pass_set_pipeline(&mut self, _pass: NativeHandle, _pipeline: NativeHandle) {
        self.record("compute_pass_set_pipeline");
    }

    fn compute_pass_set_bind_group(&mut self, _pass: NativeHandle, _index: u32, _group: Option<NativeHandle>, _dynamic_offsets: &[u32]) {
        self.record("compute_pass_set_bind_group");
    }

    fn compute_pass_dispatch(&mut self, _pass: NativeHandle, _x: u32, _y: u32, _z: u32) {
        self.record("compute_pass_dispatch");
    }

    fn compute_pass_end(&mut self, _pass: NativeHandle) {
        self.record("compute_pass_end");
    }

    fn queue_submit(&mut self, queue: NativeHandle, command_buffers: &[NativeHandle]) {
        let (mut st, _) = self.enter("queue_submit");
        let device = st.queues.get(&queue.0).copied().unwrap_or(0);
        let mut event = None;
        for cb in command_buffers {
            let copies = st.command_buffers.remove(&cb.0).unwrap_or_default();
            for copy in copies {
                if !execute_copy(&mut st, copy) {
                    event = event.or(st.report(device, ErrorType::Validation, "invalid buffer copy"));
                }
            }
        }
        drop(st);
        notify(event);
    }

    fn queue_write_buffer(&mut self, queue: NativeHandle, buffer: NativeHandle, offset: u64, data: &[u8]) {
        let (mut st, _) = self.enter("queue_write_buffer");
        let device = st.queues.get(&queue.0).copied().unwrap_or(0);
        let written = st.buffers.get_mut(&buffer.0).is_some_and(|b| {
            let end = offset.checked_add(data.len() as u64);
            match end {
                Some(end) if !b.destroyed && b.mapped.is_none() && end <= b.data.len() as u64 => {
                    b.data[offset as usize..end as usize].copy_from_slice(data);
                    true
                }
                _ => false,
            }
        });
        let event = if written {
            None
        } else {
            st.report(device, ErrorType::Validation, "invalid queue write")
        };
        drop(st);
        notify(event);
    }

    fn queue_on_submitted_work_done(&mut self, queue: NativeHandle, callback: NativeCallback<WorkDoneStatus>) {
        let (st, _) = self.enter("queue_on_submitted_work_done");
        let device = st.queues.get(&queue.0).copied().unwrap_or(0);
        drop(st);
        self.schedule(
            device,
            move |st, outcome| {
                let status = if outcome == Outcome::DeviceLost || st.is_lost(device) {
                    WorkDoneStatus::DeviceLost
                } else {
                    WorkDoneStatus::Success
                };
                Box::new(move || callback(status))
            },
        );
    }

    fn buffer_map_async(
        &mut self,
        buffer: NativeHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: NativeCallback<MapAsyncResult>,
    ) {
        let (mut st, _) = self.enter("buffer_map_async");
        let device = st.device_of(buffer);
        let rejected = match st.buffers.get_mut(&buffer.0) {
            None => Some("unknown buffer"),
            Some(b) if b.destroyed => Some("buffer is destroyed"),
            Some(b) if b.mapped.is_some() || b.map_pending => Some("buffer is already mapped"),
            Some(b) if mode == MapMode::READ && !b.usage.contains(BufferUsages::MAP_READ) => {
                Some("buffer lacks MAP_READ usage")
            }
            Some(b) if mode == MapMode::WRITE && !b.usage.contains(BufferUsages::MAP_WRITE) => {
                Some("buffer lacks MAP_WRITE usage")
            }
            Some(_) if mode != MapMode::READ && mode != MapMode::WRITE => Some("map mode must be READ or WRITE"),
            Some(b) if offset.checked_add(size).map_or(true, |end| end > b.data.len() as u64) => {
                Some("map range is out of bounds")
            }
            Some(b) => {
                b.map_pending = true;
                None
            }
        };
        if let Some(message) = rejected {
            let event = st.report(device, ErrorType::Validation, message);
            drop(st);
            notify(event);
            let result = MapAsyncResult {
                status: MapAsyncStatus::Error,
                message: message.into(),
            };
            self.schedule(device, move |_, _| Box::new(move || callback(result)));
            return;
        }

        let serial = st.buffers.get(&buffer.0).map_or(0, |b| b.map_serial);
        drop(st);
        self.schedule(
            device,
            move |st, outcome| {
                let lost = outcome == Outcome::DeviceLost || st.is_lost(device);
                let result = match st.buffers.get_mut(&buffer.0) {
                    Some(b) if b.map_serial == serial && !b.destroyed => {
                        b.map_pending = false;
                        if lost {
                            MapAsyncResult {
                                status: MapAsyncStatus::DeviceLost,
                                message: "device lost".into(),
                            }
                        } else {
                            b.mapped = Some((mode, offset, size));
                            MapAsyncResult::success()
                        }
                    }
                    _ => MapAsyncResult {
                        status: MapAsyncStatus::Aborted,
                        message: "buffer was unmapped or destroyed before the mapping resolved".into(),
                    },
                };
                Box::new(move || callback(result))
            },
        );
    }

    fn buffer_mapped_range(
        &mut self,
        buffer: NativeHandle,
        offset: u64,
        size: u64,
        access: &mut dyn FnMut(&mut [u8]),
    ) -> bool {
        let (mut st, _) = self.enter("buffer_mapped_range");
        let Some(b) = st.buffers.get_mut(&buffer.0) else {
            return false;
        };
        let Some((_, map_offset, map_size)) = b.mapped else {
            return false;
        };
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        if offset < map_offset || end > map_offset + map_size {
            return false;
        }
        access(&mut b.data[offset as usize..end as usize]);
        true
    }

    fn buffer_unmap(&mut self, buffer: NativeHandle) {
        let (mut st, _) = self.enter("buffer_unmap");
        if let Some(b) = st.buffers.get_mut(&buffer.0) {
            b.mapped = None;
            b.map_pending = false;
            b.map_serial += 1;
        }
    }

    fn buffer_destroy(&mut self, buffer: NativeHandle) {
        let (mut st, _) = self.enter("buffer_destroy");
        if let Some(b) = st.buffers.get_mut(&buffer.0) {
            b.destroyed = true;
            b.mapped = None;
            b.map_pending = false;
            b.map_serial += 1;
        }
    }

    fn inject_error(&mut self, device: NativeHandle, error_type: ErrorType, message: &str) {
        let (mut st, _) = self.enter("inject_error");
        let event = st.report(device.0, error_type, message);
        drop(st);
        notify(event);
    }

    fn release(&mut self, object_type: ObjectType, handle: NativeHandle) {
        let mut st = self.lock();
        st.released.push((object_type, handle));
        st.owners.remove(&handle.0);
        st.shaders.remove(&handle.0);
        st.encoders.remove(&handle.0);
        st.command_buffers.remove(&handle.0);
    }

    fn tick(&mut self) {
        let ops = std::mem::take(&mut self.lock().pending);
        for (_, op) in ops {
            complete(&self.state, op, Outcome::Complete);
        }
    }
}

fn execute_copy(st: &mut MockState, copy: BufferCopy) -> bool {
    let range = |offset: u64, len: usize| {
        let end = offset.checked_add(copy.size)?;
        (end <= len as u64).then_some(offset as usize..end as usize)
    };
    let Some(src) = st.buffers.get(&copy.source).filter(|b| !b.destroyed && b.mapped.is_none()) else {
        return false;
    };
    let Some(src_range) = range(copy.source_offset, src.data.len()) else {
        return false;
    };
    let bytes = src.data[src_range].to_vec();
    let Some(dst) = st.buffers.get_mut(&copy.destination).filter(|b| !b.destroyed && b.mapped.is_none()) else {
        return false;
    };
    let Some(dst_range) = range(copy.destination_offset, dst.data.len()) else {
        return false;
    };
    dst.data[dst_range].copy_from_slice(&bytes);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_device(mock: &mut MockNative, events: DeviceEventSink) -> NativeDevice {
        let out = Arc::new(Mutex::new(None));
        let adapter_out = Arc::clone(&out);
        mock.request_adapter(
            &RequestAdapterOptions::default(),
            Box::new(move |r| *adapter_out.lock().unwrap() = Some(r.unwrap().0)),
        );
        let adapter = out.lock().unwrap().take().unwrap();

        let dev = Arc::new(Mutex::new(None));
        let dev_out = Arc::clone(&dev);
        mock.adapter_request_device(
            adapter,
            &DeviceDescriptor::default(),
            events,
            Box::new(move |r| *dev_out.lock().unwrap() = Some(r.unwrap())),
        );
        let device = dev.lock().unwrap().take().unwrap();
        device
    }

    #[test]
    fn scopes_catch_injected_errors() {
        let mut mock = MockNative::new(CompletionMode::Immediate);
        let uncaptured = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&uncaptured);
        let device = open_device(
            &mut mock,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        mock.device_push_error_scope(device.device, ErrorFilter::Validation);
        mock.inject_error(device.device, ErrorType::Validation, "first");
        mock.inject_error(device.device, ErrorType::Validation, "second");
        mock.inject_error(device.device, ErrorType::OutOfMemory, "oom");
        assert_eq!(uncaptured.load(Ordering::SeqCst), 1);

        let popped = Arc::new(Mutex::new(None));
        let out = Arc::clone(&popped);
        mock.device_pop_error_scope(device.device, Box::new(move |r| *out.lock().unwrap() = Some(r)));
        let popped = popped.lock().unwrap().take().unwrap();
        assert_eq!(popped.status, PopErrorScopeStatus::Success);
        assert_eq!(popped.error_type, ErrorType::Validation);
        assert_eq!(popped.message, "first");
    }

    #[test]
    fn destroy_fails_deferred_work_with_device_lost() {
        let mut mock = MockNative::new(CompletionMode::Deferred);
        let lost = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::clone(&lost);
        mock.request_adapter(&RequestAdapterOptions::default(), Box::new(|_| {}));
        mock.tick();

        let dev = Arc::new(Mutex::new(None));
        let dev_out = Arc::clone(&dev);
        mock.adapter_request_device(
            NativeHandle(1),
            &DeviceDescriptor::default(),
            Arc::new(move |e| events.lock().unwrap().push(e)),
            Box::new(move |r| *dev_out.lock().unwrap() = Some(r.unwrap())),
        );
        mock.tick();
        let device = dev.lock().unwrap().take().unwrap();

        let status = Arc::new(Mutex::new(None));
        let out = Arc::clone(&status);
        mock.queue_on_submitted_work_done(device.queue, Box::new(move |s| *out.lock().unwrap() = Some(s)));
        assert_eq!(mock.pending_ops(), 1);

        mock.device_destroy(device.device);
        assert_eq!(*status.lock().unwrap(), Some(WorkDoneStatus::DeviceLost));
        assert_eq!(mock.pending_ops(), 0);
        assert!(matches!(
            lost.lock().unwrap().as_slice(),
            [DeviceEvent::Lost {
                reason: DeviceLostReason::Destroyed,
                ..
            }]
        ));
    }

    #[test]
    fn unmap_aborts_a_pending_map() {
        let mut mock = MockNative::new(CompletionMode::Immediate);
        let device = open_device(&mut mock, Arc::new(|_| {}));
        let buffer = mock
            .device_create_buffer(
                device.device,
                &BufferDescriptor {
                    label: None,
                    size: 16,
                    usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                },
            )
            .unwrap();

        mock.mode = CompletionMode::Deferred;
        let status = Arc::new(Mutex::new(None));
        let out = Arc::clone(&status);
        mock.buffer_map_async(buffer, MapMode::READ, 0, 16, Box::new(move |r| *out.lock().unwrap() = Some(r.status)));
        mock.buffer_unmap(buffer);
        mock.tick();
        assert_eq!(*status.lock().unwrap(), Some(MapAsyncStatus::Aborted));
    }
}
