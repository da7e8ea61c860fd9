#![allow(dead_code)]

use gpuwire_protocol::cmd::*;
use gpuwire_protocol::ret::*;
use gpuwire_protocol::types::*;
use gpuwire_protocol::{Command, ObjectId, ObjectType, Return};

pub fn id(index: u32, generation: u32) -> ObjectId {
    ObjectId::new(index, generation)
}

/// One instance of every command, with non-default values in most fields.
pub fn sample_commands() -> Vec<Command> {
    vec![
        InstanceRequestAdapter {
            request_id: 1,
            adapter: id(0, 0),
            options: RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                force_fallback_adapter: true,
            },
        }
        .into(),
        AdapterRequestDevice {
            adapter: id(0, 0),
            request_id: 2,
            device: id(0, 0),
            queue: id(0, 0),
            desc: DeviceDescriptor {
                label: Some("device".into()),
                required_limits: Some(Limits::default()),
            },
        }
        .into(),
        DestroyObject {
            object_type: ObjectType::ComputePipeline,
            id: id(3, 9),
        }
        .into(),
        DeviceCreateBuffer {
            device: id(0, 0),
            result: id(1, 2),
            desc: BufferDescriptor {
                label: None,
                size: 4096,
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            },
            read_handle: Some(vec![1, 2, 3, 4, 5, 6, 7, 8]),
            write_handle: None,
        }
        .into(),
        DeviceCreateTexture {
            device: id(0, 0),
            result: id(0, 0),
            desc: TextureDescriptor {
                label: Some("tex".into()),
                size: Extent3d {
                    width: 256,
                    height: 128,
                    depth_or_array_layers: 6,
                },
                mip_level_count: 3,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: TextureFormat::Bgra8Unorm,
                usage: TextureUsages::COPY_DST | TextureUsages::TEXTURE_BINDING,
            },
        }
        .into(),
        TextureCreateView {
            texture: id(0, 0),
            result: id(4, 1),
            desc: TextureViewDescriptor {
                label: None,
                format: Some(TextureFormat::Rgba8UnormSrgb),
                dimension: Some(TextureViewDimension::Cube),
                base_mip_level: 1,
                mip_level_count: None,
                base_array_layer: 0,
                array_layer_count: Some(6),
            },
        }
        .into(),
        DeviceCreateSampler {
            device: id(0, 0),
            result: id(2, 0),
            desc: SamplerDescriptor {
                address_mode_u: AddressMode::Repeat,
                mag_filter: FilterMode::Linear,
                lod_min_clamp: 0.5,
                compare: Some(CompareFunction::LessEqual),
                max_anisotropy: 16,
                ..Default::default()
            },
        }
        .into(),
        DeviceCreateShaderModule {
            device: id(0, 0),
            result: id(0, 0),
            desc: ShaderModuleDescriptor {
                label: Some("cs".into()),
                code: "@compute @workgroup_size(64) fn main() {}".into(),
            },
        }
        .into(),
        DeviceCreateBindGroupLayout {
            device: id(0, 0),
            result: id(0, 0),
            label: None,
            entries: vec![
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    kind: BindingKind::StorageBuffer,
                    has_dynamic_offset: true,
                    min_binding_size: Some(16),
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE | ShaderStages::FRAGMENT,
                    kind: BindingKind::Sampler,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            ],
        }
        .into(),
        DeviceCreateBindGroup {
            device: id(0, 0),
            result: id(0, 0),
            label: Some("group".into()),
            layout: id(0, 0),
            entries: vec![
                BindGroupEntry {
                    binding: 0,
                    buffer: Some(id(1, 2)),
                    offset: 256,
                    size: Some(64),
                    ..Default::default()
                },
                BindGroupEntry {
                    binding: 1,
                    sampler: Some(id(2, 0)),
                    ..Default::default()
                },
            ],
        }
        .into(),
        DeviceCreatePipelineLayout {
            device: id(0, 0),
            result: id(0, 0),
            label: None,
            bind_group_layouts: vec![id(0, 0), id(1, 0)],
        }
        .into(),
        DeviceCreateComputePipeline {
            device: id(0, 0),
            result: id(0, 0),
            label: None,
            layout: Some(id(0, 0)),
            stage: ProgrammableStage {
                module: id(0, 0),
                entry_point: "main".into(),
            },
        }
        .into(),
        DeviceCreateComputePipelineAsync {
            device: id(0, 0),
            request_id: 3,
            result: id(1, 0),
            label: Some("async".into()),
            layout: None,
            stage: ProgrammableStage {
                module: id(0, 0),
                entry_point: "main".into(),
            },
        }
        .into(),
        DeviceCreateCommandEncoder {
            device: id(0, 0),
            result: id(0, 0),
            label: None,
        }
        .into(),
        DevicePushErrorScope {
            device: id(0, 0),
            filter: ErrorFilter::OutOfMemory,
        }
        .into(),
        DevicePopErrorScope {
            device: id(0, 0),
            request_id: 4,
        }
        .into(),
        DeviceDestroy { device: id(0, 0) }.into(),
        CommandEncoderCopyBufferToBuffer {
            encoder: id(0, 0),
            source: id(1, 2),
            source_offset: 16,
            destination: id(2, 0),
            destination_offset: 32,
            size: 1024,
        }
        .into(),
        CommandEncoderBeginComputePass {
            encoder: id(0, 0),
            result: id(0, 0),
            label: None,
        }
        .into(),
        CommandEncoderFinish {
            encoder: id(0, 0),
            result: id(0, 0),
            label: Some("cb".into()),
        }
        .into(),
        ComputePassSetPipeline {
            pass: id(0, 0),
            pipeline: id(0, 0),
        }
        .into(),
        ComputePassSetBindGroup {
            pass: id(0, 0),
            index: 0,
            group: Some(id(0, 0)),
            dynamic_offsets: vec![256],
        }
        .into(),
        ComputePassDispatch {
            pass: id(0, 0),
            x: 64,
            y: 2,
            z: 1,
        }
        .into(),
        ComputePassEnd { pass: id(0, 0) }.into(),
        QueueSubmit {
            queue: id(0, 0),
            command_buffers: vec![id(0, 0)],
        }
        .into(),
        QueueWriteBuffer {
            queue: id(0, 0),
            buffer: id(1, 2),
            offset: 8,
            data: vec![0xAB; 13],
        }
        .into(),
        QueueOnSubmittedWorkDone {
            queue: id(0, 0),
            request_id: 5,
        }
        .into(),
        BufferMapAsync {
            buffer: id(1, 2),
            request_id: 7,
            mode: MapMode::READ,
            offset: 0,
            size: 4096,
        }
        .into(),
        BufferUpdateMappedData {
            buffer: id(1, 2),
            offset: 4,
            size: 3,
            data: vec![1, 2, 3],
        }
        .into(),
        BufferUnmap { buffer: id(1, 2) }.into(),
        BufferDestroy { buffer: id(1, 2) }.into(),
    ]
}

pub fn sample_returns() -> Vec<Return> {
    vec![
        RequestAdapterCallback {
            request_id: 1,
            status: RequestStatus::Success,
            message: String::new(),
            info: Some(AdapterInfo {
                vendor: "mock".into(),
                architecture: "none".into(),
                device: "mock device".into(),
                description: "in-memory".into(),
                vendor_id: 0x1234,
                device_id: 0x5678,
            }),
        }
        .into(),
        RequestDeviceCallback {
            request_id: 2,
            status: RequestStatus::Error,
            message: "limits unsupported".into(),
            limits: None,
        }
        .into(),
        CreateComputePipelineAsyncCallback {
            request_id: 3,
            status: CreatePipelineAsyncStatus::ValidationError,
            message: "bad entry point".into(),
        }
        .into(),
        PopErrorScopeCallback {
            request_id: 4,
            status: PopErrorScopeStatus::Success,
            error_type: ErrorType::Validation,
            message: "oops".into(),
        }
        .into(),
        QueueWorkDoneCallback {
            request_id: 5,
            status: WorkDoneStatus::Success,
        }
        .into(),
        BufferMapAsyncCallback {
            buffer: id(1, 2),
            request_id: 7,
            status: MapAsyncStatus::Success,
            message: String::new(),
            read_data: vec![9; 17],
        }
        .into(),
        DeviceUncapturedError {
            device: id(0, 0),
            error_type: ErrorType::OutOfMemory,
            message: "oom".into(),
        }
        .into(),
        DeviceLost {
            device: id(0, 0),
            reason: DeviceLostReason::Destroyed,
            message: "destroyed".into(),
        }
        .into(),
    ]
}
