use gpuwire_protocol::types::MapMode;
use gpuwire_protocol::{ObjectId, ObjectType};

use crate::error::FatalError;
use crate::memory_transfer::{ServerReadHandle, ServerWriteHandle};
use crate::native::NativeHandle;
use crate::object_table::ObjectTable;

/// What a server-side id currently stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Adopted; an asynchronous creation has not completed yet.
    Pending,
    Alive(NativeHandle),
    /// Creation failed or referenced an error object. Commands on it are
    /// consumed without reaching the native API.
    Error,
}

impl ObjectState {
    pub fn handle(self) -> Option<NativeHandle> {
        match self {
            Self::Alive(handle) => Some(handle),
            Self::Pending | Self::Error => None,
        }
    }
}

pub(crate) struct ServerObject {
    pub state: ObjectState,
    /// Owning device; a device owns itself.
    pub device: Option<ObjectId>,
    pub buffer: Option<Box<ServerBuffer>>,
}

impl ServerObject {
    pub fn new(state: ObjectState, device: Option<ObjectId>) -> Self {
        Self {
            state,
            device,
            buffer: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct ServerBuffer {
    pub read: Option<Box<dyn ServerReadHandle>>,
    pub write: Option<Box<dyn ServerWriteHandle>>,
    /// Request id of the map in flight, if any.
    pub map_request: Option<u64>,
    pub mapped: Option<MappedRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MappedRange {
    pub mode: MapMode,
    pub offset: u64,
    pub size: u64,
}

impl MappedRange {
    pub fn contains(&self, offset: u64, size: u64) -> bool {
        offset >= self.offset && offset.checked_add(size).is_some_and(|end| end <= self.offset + self.size)
    }
}

/// One adopting table per object type.
pub(crate) struct ServerTables {
    tables: Vec<ObjectTable<ServerObject>>,
}

impl ServerTables {
    pub fn new(max_objects_per_type: u32) -> Self {
        Self {
            tables: ObjectType::ALL
                .iter()
                .map(|_| ObjectTable::adopting(max_objects_per_type))
                .collect(),
        }
    }

    pub fn table(&self, ty: ObjectType) -> &ObjectTable<ServerObject> {
        &self.tables[ty.table_index()]
    }

    pub fn table_mut(&mut self, ty: ObjectType) -> &mut ObjectTable<ServerObject> {
        &mut self.tables[ty.table_index()]
    }

    pub fn get(&self, ty: ObjectType, id: ObjectId) -> Option<&ServerObject> {
        self.table(ty).get(id)
    }

    pub fn get_mut(&mut self, ty: ObjectType, id: ObjectId) -> Option<&mut ServerObject> {
        self.table_mut(ty).get_mut(id)
    }

    /// Adopts a client-chosen id. Collisions are fatal.
    pub fn adopt(&mut self, ty: ObjectType, id: ObjectId, object: ServerObject) -> Result<(), FatalError> {
        self.table_mut(ty)
            .allocate_at(id, object)
            .map_err(|source| FatalError::IdCollision {
                object_type: ty,
                id,
                source,
            })
    }

    pub fn set_state(&mut self, ty: ObjectType, id: ObjectId, state: ObjectState) {
        if let Some(obj) = self.get_mut(ty, id) {
            obj.state = state;
        }
    }

    /// Owning device of `id`, if it is known.
    pub fn owner(&self, ty: ObjectType, id: ObjectId) -> Option<ObjectId> {
        self.get(ty, id).and_then(|obj| obj.device)
    }

    /// Every alive native handle, types in reverse dependency order.
    pub fn drain_alive(&mut self) -> Vec<(ObjectType, NativeHandle)> {
        let mut out = Vec::new();
        for ty in ObjectType::ALL.iter().rev() {
            for (_, obj) in self.table_mut(*ty).drain() {
                if let Some(handle) = obj.state.handle() {
                    out.push((*ty, handle));
                }
            }
        }
        out
    }
}

/// Resolves the ids a command references.
///
/// A reference to an unknown required object is fatal. A reference to a
/// pending or error object, or an unknown optional one, marks the command
/// as failed; callers must then skip the native call.
pub(crate) struct Resolver<'a> {
    tables: &'a ServerTables,
    failed: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(tables: &'a ServerTables) -> Self {
        Self { tables, failed: false }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Returns a placeholder handle when the object is not alive.
    pub fn required(&mut self, ty: ObjectType, id: ObjectId) -> Result<NativeHandle, FatalError> {
        let obj = self
            .tables
            .get(ty, id)
            .ok_or(FatalError::UnknownObject { object_type: ty, id })?;
        Ok(self.alive(obj.state))
    }

    pub fn optional(&mut self, ty: ObjectType, id: Option<ObjectId>) -> Option<NativeHandle> {
        let id = id?;
        match self.tables.get(ty, id) {
            Some(obj) => Some(self.alive(obj.state)),
            None => {
                self.failed = true;
                None
            }
        }
    }

    pub fn all(&mut self, ty: ObjectType, ids: &[ObjectId]) -> Result<Vec<NativeHandle>, FatalError> {
        ids.iter().map(|id| self.required(ty, *id)).collect()
    }

    fn alive(&mut self, state: ObjectState) -> NativeHandle {
        match state {
            ObjectState::Alive(handle) => handle,
            ObjectState::Pending | ObjectState::Error => {
                self.failed = true;
                NativeHandle(0)
            }
        }
    }
}
