//! Argument types carried by commands and returns.
//!
//! These mirror the native API's descriptors closely enough to be passed
//! straight through; the wire never interprets them beyond decoding.

use bitflags::bitflags;

use crate::ids::ObjectId;

wire_enum! {
    #[derive(Default)]
    pub enum PowerPreference {
        #[default]
        Undefined = 0,
        LowPower = 1,
        HighPerformance = 2,
    }
}

wire_enum! {
    #[derive(Default)]
    pub enum TextureFormat {
        R8Unorm = 1,
        #[default]
        Rgba8Unorm = 2,
        Rgba8UnormSrgb = 3,
        Bgra8Unorm = 4,
        R32Float = 5,
        Rg32Float = 6,
        Rgba16Float = 7,
        Rgba32Float = 8,
        Depth32Float = 9,
        Depth24PlusStencil8 = 10,
    }
}

wire_enum! {
    #[derive(Default)]
    pub enum TextureDimension {
        D1 = 1,
        #[default]
        D2 = 2,
        D3 = 3,
    }
}

wire_enum! {
    pub enum TextureViewDimension {
        D1 = 1,
        D2 = 2,
        D2Array = 3,
        Cube = 4,
        CubeArray = 5,
        D3 = 6,
    }
}

wire_enum! {
    #[derive(Default)]
    pub enum AddressMode {
        #[default]
        ClampToEdge = 0,
        Repeat = 1,
        MirrorRepeat = 2,
    }
}

wire_enum! {
    #[derive(Default)]
    pub enum FilterMode {
        #[default]
        Nearest = 0,
        Linear = 1,
    }
}

wire_enum! {
    pub enum CompareFunction {
        Never = 1,
        Less = 2,
        Equal = 3,
        LessEqual = 4,
        Greater = 5,
        NotEqual = 6,
        GreaterEqual = 7,
        Always = 8,
    }
}

wire_enum! {
    pub enum BindingKind {
        UniformBuffer = 0,
        StorageBuffer = 1,
        ReadOnlyStorageBuffer = 2,
        Sampler = 3,
        ComparisonSampler = 4,
        SampledTexture = 5,
        StorageTexture = 6,
    }
}

wire_enum! {
    pub enum ErrorFilter {
        Validation = 0,
        OutOfMemory = 1,
        Internal = 2,
    }
}

wire_enum! {
    pub enum ErrorType {
        NoError = 0,
        Validation = 1,
        OutOfMemory = 2,
        Internal = 3,
        Unknown = 4,
    }
}

wire_enum! {
    pub enum DeviceLostReason {
        Unknown = 0,
        Destroyed = 1,
        Disconnected = 2,
        FailedCreation = 3,
    }
}

wire_enum! {
    /// Outcome of adapter and device requests.
    pub enum RequestStatus {
        Success = 0,
        Error = 1,
        Unavailable = 2,
        Disconnected = 3,
    }
}

wire_enum! {
    pub enum MapAsyncStatus {
        Success = 0,
        Error = 1,
        Aborted = 2,
        DeviceLost = 3,
        Disconnected = 4,
    }
}

wire_enum! {
    pub enum WorkDoneStatus {
        Success = 0,
        Error = 1,
        DeviceLost = 2,
        Disconnected = 3,
    }
}

wire_enum! {
    pub enum PopErrorScopeStatus {
        Success = 0,
        EmptyStack = 1,
        DeviceLost = 2,
        Disconnected = 3,
    }
}

wire_enum! {
    pub enum CreatePipelineAsyncStatus {
        Success = 0,
        ValidationError = 1,
        InternalError = 2,
        DeviceLost = 3,
        Disconnected = 4,
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsages: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
        const INDIRECT = 1 << 8;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct TextureUsages: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct MapMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

wire_flags!(BufferUsages, TextureUsages, MapMode, ShaderStages);

wire_struct! {
    #[derive(Default)]
    pub struct RequestAdapterOptions {
        pub power_preference: PowerPreference,
        pub force_fallback_adapter: bool,
    }
}

wire_struct! {
    #[derive(Default)]
    pub struct AdapterInfo {
        pub vendor: String,
        pub architecture: String,
        pub device: String,
        pub description: String,
        pub vendor_id: u32,
        pub device_id: u32,
    }
}

wire_struct! {
    #[derive(Eq)]
    pub struct Limits {
        pub max_texture_dimension_2d: u32,
        pub max_bind_groups: u32,
        pub max_bindings_per_bind_group: u32,
        pub max_storage_buffer_binding_size: u64,
        pub max_buffer_size: u64,
        pub min_storage_buffer_offset_alignment: u32,
        pub max_compute_workgroup_size_x: u32,
        pub max_compute_workgroup_size_y: u32,
        pub max_compute_workgroup_size_z: u32,
        pub max_compute_invocations_per_workgroup: u32,
        pub max_compute_workgroups_per_dimension: u32,
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 8192,
            max_bind_groups: 4,
            max_bindings_per_bind_group: 1000,
            max_storage_buffer_binding_size: 128 << 20,
            max_buffer_size: 256 << 20,
            min_storage_buffer_offset_alignment: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroups_per_dimension: 65535,
        }
    }
}

wire_struct! {
    #[derive(Default)]
    pub struct DeviceDescriptor {
        pub label: Option<String>,
        pub required_limits: Option<Limits>,
    }
}

wire_struct! {
    #[derive(Default)]
    pub struct BufferDescriptor {
        pub label: Option<String>,
        pub size: u64,
        pub usage: BufferUsages,
        pub mapped_at_creation: bool,
    }
}

wire_struct! {
    #[derive(Copy, Eq)]
    pub struct Extent3d {
        pub width: u32,
        pub height: u32,
        pub depth_or_array_layers: u32,
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        }
    }
}

wire_struct! {
    pub struct TextureDescriptor {
        pub label: Option<String>,
        pub size: Extent3d,
        pub mip_level_count: u32,
        pub sample_count: u32,
        pub dimension: TextureDimension,
        pub format: TextureFormat,
        pub usage: TextureUsages,
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING,
        }
    }
}

wire_struct! {
    /// `None` fields inherit from the texture.
    #[derive(Default)]
    pub struct TextureViewDescriptor {
        pub label: Option<String>,
        pub format: Option<TextureFormat>,
        pub dimension: Option<TextureViewDimension>,
        pub base_mip_level: u32,
        pub mip_level_count: Option<u32>,
        pub base_array_layer: u32,
        pub array_layer_count: Option<u32>,
    }
}

wire_struct! {
    pub struct SamplerDescriptor {
        pub label: Option<String>,
        pub address_mode_u: AddressMode,
        pub address_mode_v: AddressMode,
        pub address_mode_w: AddressMode,
        pub mag_filter: FilterMode,
        pub min_filter: FilterMode,
        pub mipmap_filter: FilterMode,
        pub lod_min_clamp: f32,
        pub lod_max_clamp: f32,
        pub compare: Option<CompareFunction>,
        pub max_anisotropy: u16,
    }
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            max_anisotropy: 1,
        }
    }
}

wire_struct! {
    #[derive(Default)]
    pub struct ShaderModuleDescriptor {
        pub label: Option<String>,
        pub code: String,
    }
}

wire_struct! {
    pub struct BindGroupLayoutEntry {
        pub binding: u32,
        pub visibility: ShaderStages,
        pub kind: BindingKind,
        pub has_dynamic_offset: bool,
        pub min_binding_size: Option<u64>,
    }
}

wire_struct! {
    /// Exactly one of `buffer`, `sampler` or `texture_view` is expected to be
    /// set; the native side validates that.
    #[derive(Default)]
    pub struct BindGroupEntry {
        pub binding: u32,
        pub buffer: Option<ObjectId>,
        pub offset: u64,
        pub size: Option<u64>,
        pub sampler: Option<ObjectId>,
        pub texture_view: Option<ObjectId>,
    }
}

wire_struct! {
    pub struct ProgrammableStage {
        pub module: ObjectId,
        pub entry_point: String,
    }
}
