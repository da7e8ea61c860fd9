//! Client → server records.
//!
//! Object-creating commands carry the id the client already allocated in a
//! `result` field; the server adopts it at the same index. Asynchronous
//! commands carry a `request_id` that the matching [`crate::ret::Return`]
//! echoes back.

use crate::ids::{ObjectId, ObjectType};
use crate::types::*;

wire_messages! {
    /// Every command the client can enqueue.
    pub enum Command: Opcode {
        InstanceRequestAdapter = 0x0001 {
            request_id: u64,
            adapter: ObjectId,
            options: RequestAdapterOptions,
        },
        AdapterRequestDevice = 0x0002 {
            adapter: ObjectId,
            request_id: u64,
            device: ObjectId,
            queue: ObjectId,
            desc: DeviceDescriptor,
        },
        /// Releases the server's reference to an object. Internal to the wire.
        DestroyObject = 0x0003 {
            object_type: ObjectType,
            id: ObjectId,
        },

        DeviceCreateBuffer = 0x0100 {
            device: ObjectId,
            result: ObjectId,
            desc: BufferDescriptor,
            /// Memory transfer create info for the read handle, if mappable for reading.
            read_handle: Option<Vec<u8>>,
            /// Memory transfer create info for the write handle, if mappable for writing.
            write_handle: Option<Vec<u8>>,
        },
        DeviceCreateTexture = 0x0101 {
            device: ObjectId,
            result: ObjectId,
            desc: TextureDescriptor,
        },
        TextureCreateView = 0x0102 {
            texture: ObjectId,
            result: ObjectId,
            desc: TextureViewDescriptor,
        },
        DeviceCreateSampler = 0x0103 {
            device: ObjectId,
            result: ObjectId,
            desc: SamplerDescriptor,
        },
        DeviceCreateShaderModule = 0x0104 {
            device: ObjectId,
            result: ObjectId,
            desc: ShaderModuleDescriptor,
        },
        DeviceCreateBindGroupLayout = 0x0105 {
            device: ObjectId,
            result: ObjectId,
            label: Option<String>,
            entries: Vec<BindGroupLayoutEntry>,
        },
        DeviceCreateBindGroup = 0x0106 {
            device: ObjectId,
            result: ObjectId,
            label: Option<String>,
            layout: ObjectId,
            entries: Vec<BindGroupEntry>,
        },
        DeviceCreatePipelineLayout = 0x0107 {
            device: ObjectId,
            result: ObjectId,
            label: Option<String>,
            bind_group_layouts: Vec<ObjectId>,
        },
        DeviceCreateComputePipeline = 0x0108 {
            device: ObjectId,
            result: ObjectId,
            label: Option<String>,
            layout: Option<ObjectId>,
            stage: ProgrammableStage,
        },
        DeviceCreateComputePipelineAsync = 0x0109 {
            device: ObjectId,
            request_id: u64,
            result: ObjectId,
            label: Option<String>,
            layout: Option<ObjectId>,
            stage: ProgrammableStage,
        },
        DeviceCreateCommandEncoder = 0x010A {
            device: ObjectId,
            result: ObjectId,
            label: Option<String>,
        },
        DevicePushErrorScope = 0x0110 {
            device: ObjectId,
            filter: ErrorFilter,
        },
        DevicePopErrorScope = 0x0111 {
            device: ObjectId,
            request_id: u64,
        },
        DeviceDestroy = 0x0112 {
            device: ObjectId,
        },

        CommandEncoderCopyBufferToBuffer = 0x0200 {
            encoder: ObjectId,
            source: ObjectId,
            source_offset: u64,
            destination: ObjectId,
            destination_offset: u64,
            size: u64,
        },
        CommandEncoderBeginComputePass = 0x0201 {
            encoder: ObjectId,
            result: ObjectId,
            label: Option<String>,
        },
        CommandEncoderFinish = 0x0202 {
            encoder: ObjectId,
            result: ObjectId,
            label: Option<String>,
        },

        ComputePassSetPipeline = 0x0210 {
            pass: ObjectId,
            pipeline: ObjectId,
        },
        ComputePassSetBindGroup = 0x0211 {
            pass: ObjectId,
            index: u32,
            group: Option<ObjectId>,
            dynamic_offsets: Vec<u32>,
        },
        ComputePassDispatch = 0x0212 {
            pass: ObjectId,
            x: u32,
            y: u32,
            z: u32,
        },
        ComputePassEnd = 0x0213 {
            pass: ObjectId,
        },

        QueueSubmit = 0x0300 {
            queue: ObjectId,
            command_buffers: Vec<ObjectId>,
        },
        QueueWriteBuffer = 0x0301 {
            queue: ObjectId,
            buffer: ObjectId,
            offset: u64,
            data: Vec<u8>,
        },
        QueueOnSubmittedWorkDone = 0x0302 {
            queue: ObjectId,
            request_id: u64,
        },

        BufferMapAsync = 0x0400 {
            buffer: ObjectId,
            request_id: u64,
            mode: MapMode,
            offset: u64,
            size: u64,
        },
        /// Write-handle flush for `[offset, offset + size)` of a write-mapped buffer.
        BufferUpdateMappedData = 0x0401 {
            buffer: ObjectId,
            offset: u64,
            size: u64,
            data: Vec<u8>,
        },
        BufferUnmap = 0x0402 {
            buffer: ObjectId,
        },
        BufferDestroy = 0x0403 {
            buffer: ObjectId,
        },
    }
}
