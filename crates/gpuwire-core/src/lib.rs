//! Client and server runtimes for the gpuwire command stream.
//!
//! A [`WireClient`] turns GPU API calls into commands and hands them to a
//! [`gpuwire_ipc::CommandSerializer`]; a [`WireServer`] decodes them, resolves
//! object ids and replays each call on a [`native::NativeProcs`]
//! implementation. Results of asynchronous calls travel back as returns.
//!
//! Neither runtime owns a thread or a transport. Callers move bytes between
//! the two with whatever channel they have (see [`gpuwire_ipc::loopback`]).

pub mod client;
pub mod config;
pub mod error;
pub mod memory_transfer;
pub mod native;
pub mod object_table;
pub mod server;

pub use client::{
    Adapter, AdapterResponse, BindGroup, BindGroupEntry, BindGroupLayout, BindingResource, Buffer, CommandBuffer,
    CommandEncoder, ComputePassEncoder, ComputePipeline, ComputePipelineDescriptor, Device, DeviceCallbacks,
    DeviceResponse, ErrorScopeResponse, FutureId, MapResponse, PipelineLayout, PipelineResponse, Queue, Sampler,
    ShaderModule, Texture, TextureView, WireClient, WireObject,
};
pub use config::{ConfigError, WireConfig};
pub use error::{ClientError, CommandOutcome, FatalError};
pub use native::{NativeHandle, NativeProcs};
pub use object_table::{ObjectTable, TableError};
pub use server::{ObjectState, ServerStats, WireServer};
