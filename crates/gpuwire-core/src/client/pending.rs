use gpuwire_protocol::types::*;
use gpuwire_protocol::ObjectId;

use super::objects::{Adapter, ComputePipeline, Device, Queue};

pub type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResponse {
    pub status: RequestStatus,
    pub message: String,
    pub adapter: Option<Adapter>,
    pub info: Option<AdapterInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResponse {
    pub status: RequestStatus,
    pub message: String,
    pub device: Option<Device>,
    pub queue: Option<Queue>,
    pub limits: Option<Limits>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResponse {
    pub status: CreatePipelineAsyncStatus,
    pub message: String,
    pub pipeline: Option<ComputePipeline>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorScopeResponse {
    pub status: PopErrorScopeStatus,
    pub error_type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapResponse {
    pub status: MapAsyncStatus,
    pub message: String,
}

impl AdapterResponse {
    pub(crate) fn failed(status: RequestStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            adapter: None,
            info: None,
        }
    }
}

impl DeviceResponse {
    pub(crate) fn failed(status: RequestStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            device: None,
            queue: None,
            limits: None,
        }
    }
}

impl PipelineResponse {
    pub(crate) fn failed(status: CreatePipelineAsyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            pipeline: None,
        }
    }
}

impl ErrorScopeResponse {
    pub(crate) fn failed(status: PopErrorScopeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type: ErrorType::NoError,
            message: message.into(),
        }
    }
}

impl MapResponse {
    pub(crate) fn new(status: MapAsyncStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// An asynchronous call waiting for its return.
pub(crate) enum PendingRequest {
    Adapter {
        adapter: ObjectId,
        callback: Callback<AdapterResponse>,
    },
    Device {
        device: ObjectId,
        queue: ObjectId,
        callback: Callback<DeviceResponse>,
    },
    /// `callback` is `None` once the call was already answered locally; the
    /// entry then only keeps the id reserved until the server replies.
    ComputePipeline {
        device: ObjectId,
        pipeline: ObjectId,
        callback: Option<Callback<PipelineResponse>>,
    },
    PopErrorScope {
        device: ObjectId,
        callback: Callback<ErrorScopeResponse>,
    },
    WorkDone {
        device: ObjectId,
        callback: Callback<WorkDoneStatus>,
    },
    Map {
        device: ObjectId,
        buffer: ObjectId,
        callback: Callback<MapResponse>,
    },
}

impl PendingRequest {
    /// Device whose loss fails this request.
    pub fn device(&self) -> Option<ObjectId> {
        match self {
            Self::Adapter { .. } | Self::Device { .. } => None,
            Self::ComputePipeline { device, .. }
            | Self::PopErrorScope { device, .. }
            | Self::WorkDone { device, .. }
            | Self::Map { device, .. } => Some(*device),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Adapter { .. } => "RequestAdapter",
            Self::Device { .. } => "RequestDevice",
            Self::ComputePipeline { .. } => "CreateComputePipelineAsync",
            Self::PopErrorScope { .. } => "PopErrorScope",
            Self::WorkDone { .. } => "OnSubmittedWorkDone",
            Self::Map { .. } => "MapAsync",
        }
    }
}
