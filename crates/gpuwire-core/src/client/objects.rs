use gpuwire_protocol::types::*;
use gpuwire_protocol::{ObjectId, ObjectType};

use crate::memory_transfer::{ClientReadHandle, ClientWriteHandle};
use crate::object_table::ObjectTable;

/// A typed client handle.
pub trait WireObject: Copy {
    const TYPE: ObjectType;

    fn id(self) -> ObjectId;

    fn from_id(id: ObjectId) -> Self;
}

macro_rules! wire_handles {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(ObjectId);

            impl WireObject for $name {
                const TYPE: ObjectType = ObjectType::$name;

                fn id(self) -> ObjectId {
                    self.0
                }

                fn from_id(id: ObjectId) -> Self {
                    Self(id)
                }
            }
        )*
    };
}

wire_handles!(
    Adapter,
    Device,
    Queue,
    Buffer,
    Texture,
    TextureView,
    Sampler,
    ShaderModule,
    BindGroupLayout,
    BindGroup,
    PipelineLayout,
    ComputePipeline,
    CommandEncoder,
    ComputePassEncoder,
    CommandBuffer,
);

/// Identifies one asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureId(pub u64);

pub(crate) struct ClientObject {
    pub refcount: u32,
    /// Owning device; a device owns itself. `None` for adapters.
    pub device: Option<ObjectId>,
    pub extra: ObjectExtra,
}

pub(crate) enum ObjectExtra {
    None,
    Buffer(Box<BufferState>),
    Device(Box<DeviceState>),
}

impl ClientObject {
    pub fn new(device: Option<ObjectId>) -> Self {
        Self {
            refcount: 1,
            device,
            extra: ObjectExtra::None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut BufferState> {
        match &mut self.extra {
            ObjectExtra::Buffer(state) => Some(state),
            _ => None,
        }
    }

    pub fn buffer(&self) -> Option<&BufferState> {
        match &self.extra {
            ObjectExtra::Buffer(state) => Some(state),
            _ => None,
        }
    }

    pub fn device_mut(&mut self) -> Option<&mut DeviceState> {
        match &mut self.extra {
            ObjectExtra::Device(state) => Some(state),
            _ => None,
        }
    }

    pub fn device_state(&self) -> Option<&DeviceState> {
        match &self.extra {
            ObjectExtra::Device(state) => Some(state),
            _ => None,
        }
    }
}

/// Device-level callbacks registered when requesting a device.
#[derive(Default)]
pub struct DeviceCallbacks {
    pub uncaptured_error: Option<Box<dyn FnMut(ErrorType, &str) + Send>>,
    /// Fires at most once: on loss, destruction, failed creation or
    /// disconnect.
    pub device_lost: Option<Box<dyn FnOnce(DeviceLostReason, &str) + Send>>,
}

pub(crate) struct DeviceState {
    pub callbacks: DeviceCallbacks,
    pub limits: Option<Limits>,
    pub lost: bool,
}

impl DeviceState {
    /// Marks the device lost and fires the lost callback the first time.
    pub fn lose(&mut self, reason: DeviceLostReason, message: &str) -> bool {
        if self.lost {
            return false;
        }
        self.lost = true;
        if let Some(callback) = self.callbacks.device_lost.take() {
            callback(reason, message);
        }
        true
    }
}

pub(crate) struct BufferState {
    pub size: u64,
    pub read: Option<Box<dyn ClientReadHandle>>,
    pub write: Option<Box<dyn ClientWriteHandle>>,
    pub map: MapState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MapState {
    Unmapped,
    Pending {
        request_id: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
    },
    Mapped {
        mode: MapMode,
        offset: u64,
        size: u64,
        /// Union of every range written since mapping.
        dirty: Option<(u64, u64)>,
    },
}

impl MapState {
    /// Checks that `[offset, offset + len)` lies inside a mapping of `want`.
    pub fn mapped_range(&self, want: MapMode, offset: u64, len: u64) -> Result<(), &'static str> {
        let MapState::Mapped {
            mode,
            offset: start,
            size,
            ..
        } = *self
        else {
            return Err("buffer is not mapped");
        };
        if !mode.contains(want) {
            return Err("buffer is not mapped in the requested mode");
        }
        let inside = offset >= start && offset.checked_add(len).is_some_and(|end| end <= start + size);
        if !inside {
            return Err("range is outside the mapped range");
        }
        Ok(())
    }
}

/// Per-type object tables.
pub(crate) struct ClientTables {
    tables: Vec<ObjectTable<ClientObject>>,
}

impl ClientTables {
    pub fn new(max_objects_per_type: u32) -> Self {
        Self {
            tables: ObjectType::ALL
                .iter()
                .map(|_| ObjectTable::new(max_objects_per_type))
                .collect(),
        }
    }

    pub fn table(&self, ty: ObjectType) -> &ObjectTable<ClientObject> {
        &self.tables[ty.table_index()]
    }

    pub fn table_mut(&mut self, ty: ObjectType) -> &mut ObjectTable<ClientObject> {
        &mut self.tables[ty.table_index()]
    }

    pub fn get(&self, ty: ObjectType, id: ObjectId) -> Option<&ClientObject> {
        self.table(ty).get(id)
    }

    pub fn get_mut(&mut self, ty: ObjectType, id: ObjectId) -> Option<&mut ClientObject> {
        self.table_mut(ty).get_mut(id)
    }

    pub fn device_mut(&mut self, id: ObjectId) -> Option<&mut DeviceState> {
        self.get_mut(ObjectType::Device, id)?.device_mut()
    }

    pub fn buffer_mut(&mut self, id: ObjectId) -> Option<&mut BufferState> {
        self.get_mut(ObjectType::Buffer, id)?.buffer_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_range_checks_mode_and_bounds() {
        let state = MapState::Mapped {
            mode: MapMode::WRITE,
            offset: 16,
            size: 32,
            dirty: None,
        };
        assert_eq!(state.mapped_range(MapMode::WRITE, 16, 32), Ok(()));
        assert!(state.mapped_range(MapMode::WRITE, 8, 4).is_err());
        assert!(state.mapped_range(MapMode::WRITE, 40, 16).is_err());
        assert!(state.mapped_range(MapMode::WRITE, u64::MAX, 2).is_err());
        assert!(state.mapped_range(MapMode::READ, 16, 4).is_err());
        assert!(MapState::Unmapped.mapped_range(MapMode::READ, 0, 0).is_err());
    }
}
