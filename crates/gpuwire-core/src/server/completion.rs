//! Native callbacks may fire on any thread. They only push a [`Completion`];
//! the server turns completions into returns on its own thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use gpuwire_protocol::types::*;
use gpuwire_protocol::ObjectId;

use crate::native::{
    DeviceEvent, DeviceEventSink, MapAsyncResult, NativeCallback, NativeDevice, NativeHandle, PipelineFailure,
    PopErrorScopeResult, RequestFailure,
};

pub(crate) enum Completion {
    Adapter {
        request_id: u64,
        adapter: ObjectId,
        result: Result<(NativeHandle, AdapterInfo), RequestFailure>,
    },
    Device {
        request_id: u64,
        device: ObjectId,
        queue: ObjectId,
        result: Result<NativeDevice, RequestFailure>,
    },
    ComputePipeline {
        request_id: u64,
        pipeline: ObjectId,
        result: Result<NativeHandle, PipelineFailure>,
    },
    PopErrorScope {
        request_id: u64,
        result: PopErrorScopeResult,
    },
    WorkDone {
        request_id: u64,
        status: WorkDoneStatus,
    },
    Map {
        buffer: ObjectId,
        request_id: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
        result: MapAsyncResult,
    },
    DeviceEvent {
        device: ObjectId,
        event: DeviceEvent,
    },
}

#[derive(Clone, Default)]
pub(crate) struct CompletionQueue {
    inner: Arc<Mutex<VecDeque<Completion>>>,
}

impl CompletionQueue {
    pub fn push(&self, completion: Completion) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(completion);
    }

    pub fn drain(&self) -> Vec<Completion> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }

    /// A native callback that forwards its result through `wrap`.
    pub fn callback<T: Send + 'static>(
        &self,
        wrap: impl FnOnce(T) -> Completion + Send + 'static,
    ) -> NativeCallback<T> {
        let queue = self.clone();
        Box::new(move |value| queue.push(wrap(value)))
    }

    pub fn device_events(&self, device: ObjectId) -> DeviceEventSink {
        let queue = self.clone();
        Arc::new(move |event| queue.push(Completion::DeviceEvent { device, event }))
    }
}
