use gpuwire_protocol::cmd::{BufferDestroy, BufferMapAsync, BufferUnmap, BufferUpdateMappedData, DeviceCreateBuffer};
use gpuwire_protocol::types::{BufferDescriptor, BufferUsages, MapAsyncStatus, MapMode};
use gpuwire_protocol::{ObjectId, ObjectType};
use tracing::debug;

use super::objects::{BufferState, ClientObject, MapState, ObjectExtra};
use super::pending::{MapResponse, PendingRequest};
use super::{Buffer, Device, FutureId, WireClient, WireObject};
use crate::error::ClientError;

impl WireClient {
    /// Creates a buffer. Mappable buffers get their memory transfer handles
    /// here; `mapped_at_creation` starts the buffer write-mapped over its
    /// whole size.
    pub fn device_create_buffer(&mut self, device: Device, desc: &BufferDescriptor) -> Result<Buffer, ClientError> {
        let device = self.check(device)?;
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }

        let read = desc
            .usage
            .contains(BufferUsages::MAP_READ)
            .then(|| self.memory.create_read_handle(desc.size));
        let write = (desc.usage.contains(BufferUsages::MAP_WRITE) || desc.mapped_at_creation)
            .then(|| self.memory.create_write_handle(desc.size));

        let read_handle = read.as_ref().map(|h| {
            let mut info = vec![0; h.serialize_create_size()];
            h.serialize_create(&mut info);
            info
        });
        let write_handle = write.as_ref().map(|h| {
            let mut info = vec![0; h.serialize_create_size()];
            h.serialize_create(&mut info);
            info
        });

        let map = if desc.mapped_at_creation {
            MapState::Mapped {
                mode: MapMode::WRITE,
                offset: 0,
                size: desc.size,
                dirty: None,
            }
        } else {
            MapState::Unmapped
        };
        let buffer = self.tables.table_mut(ObjectType::Buffer).allocate(ClientObject {
            refcount: 1,
            device: Some(device),
            extra: ObjectExtra::Buffer(Box::new(BufferState {
                size: desc.size,
                read,
                write,
                map,
            })),
        })?;

        let cmd = DeviceCreateBuffer {
            device,
            result: buffer,
            desc: desc.clone(),
            read_handle,
            write_handle,
        };
        if let Err(err) = self.serialize(cmd) {
            self.free_local(ObjectType::Buffer, buffer);
            return Err(err);
        }
        Ok(Buffer::from_id(buffer))
    }

    pub fn buffer_size(&self, buffer: Buffer) -> Option<u64> {
        Some(self.tables.get(ObjectType::Buffer, buffer.id())?.buffer()?.size)
    }

    /// Requests a mapping of `[offset, offset + size)`.
    ///
    /// Requests the client can already see are invalid (buffer mapped or
    /// pending, no transfer handle for `mode`, range past the end) resolve
    /// with `Error` at once and send nothing.
    pub fn buffer_map_async(
        &mut self,
        buffer: Buffer,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: impl FnOnce(MapResponse) + Send + 'static,
    ) -> Result<FutureId, ClientError> {
        let device = self.owner(buffer)?.unwrap_or_default();
        let buffer = buffer.id();
        let request_id = self.next_request_id();
        if self.disconnected {
            callback(MapResponse::new(MapAsyncStatus::Disconnected, "the wire is disconnected"));
            return Ok(FutureId(request_id));
        }
        if self.device_is_lost(device) {
            callback(MapResponse::new(MapAsyncStatus::DeviceLost, "device is lost"));
            return Ok(FutureId(request_id));
        }

        let Some(state) = self.tables.buffer_mut(buffer) else {
            return Err(ClientError::UnknownObject {
                object_type: ObjectType::Buffer,
                id: buffer,
            });
        };
        let refusal = if state.map != MapState::Unmapped {
            Some("buffer is already mapped or has a map pending")
        } else if mode != MapMode::READ && mode != MapMode::WRITE {
            Some("map mode must be exactly one of READ or WRITE")
        } else if (mode == MapMode::READ && state.read.is_none()) || (mode == MapMode::WRITE && state.write.is_none()) {
            Some("buffer usage does not allow this map mode")
        } else if offset.checked_add(size).map_or(true, |end| end > state.size) {
            Some("map range is outside the buffer")
        } else {
            None
        };
        if let Some(reason) = refusal {
            debug!(%buffer, reason, "map request refused locally");
            callback(MapResponse::new(MapAsyncStatus::Error, reason));
            return Ok(FutureId(request_id));
        }

        state.map = MapState::Pending {
            request_id,
            mode,
            offset,
            size,
        };
        self.submit_request(
            request_id,
            BufferMapAsync {
                buffer,
                request_id,
                mode,
                offset,
                size,
            },
            PendingRequest::Map {
                device,
                buffer,
                callback: Box::new(callback),
            },
        )
    }

    /// Copies read-mapped contents starting at `offset` into `out`.
    pub fn buffer_read_mapped(&self, buffer: Buffer, offset: u64, out: &mut [u8]) -> Result<(), ClientError> {
        let id = self.check(buffer)?;
        let state = self
            .tables
            .get(ObjectType::Buffer, id)
            .and_then(ClientObject::buffer)
            .ok_or(ClientError::UnknownObject {
                object_type: ObjectType::Buffer,
                id,
            })?;
        map_check(&state.map, id, MapMode::READ, offset, out.len() as u64)?;
        let read = state.read.as_ref().ok_or(ClientError::InvalidMapState {
            buffer: id,
            reason: "buffer has no read handle",
        })?;
        read.read(offset, out);
        Ok(())
    }

    /// Writes into write-mapped memory. The bytes reach the server on unmap.
    pub fn buffer_write_mapped(&mut self, buffer: Buffer, offset: u64, data: &[u8]) -> Result<(), ClientError> {
        let id = self.check(buffer)?;
        let state = self.tables.buffer_mut(id).ok_or(ClientError::UnknownObject {
            object_type: ObjectType::Buffer,
            id,
        })?;
        let len = data.len() as u64;
        map_check(&state.map, id, MapMode::WRITE, offset, len)?;
        let write = state.write.as_mut().ok_or(ClientError::InvalidMapState {
            buffer: id,
            reason: "buffer has no write handle",
        })?;
        write.write(offset, data);

        if let MapState::Mapped { dirty, .. } = &mut state.map {
            if len > 0 {
                let end = offset + len;
                *dirty = Some(match *dirty {
                    Some((start, stop)) => (start.min(offset), stop.max(end)),
                    None => (offset, end),
                });
            }
        }
        Ok(())
    }

    /// Ends a mapping. A pending map resolves as `Aborted`; a write map
    /// first flushes its dirty range to the server.
    pub fn buffer_unmap(&mut self, buffer: Buffer) -> Result<(), ClientError> {
        let id = self.check(buffer)?;
        self.end_mapping(id)?;
        self.serialize(BufferUnmap { buffer: id })
    }

    pub fn buffer_destroy(&mut self, buffer: Buffer) -> Result<(), ClientError> {
        let id = self.check(buffer)?;
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }
        if let Some(state) = self.tables.buffer_mut(id) {
            if let MapState::Pending { request_id, .. } = state.map {
                state.map = MapState::Unmapped;
                self.abort_map(request_id, "buffer was destroyed before the mapping resolved");
            } else {
                state.map = MapState::Unmapped;
            }
        }
        self.serialize(BufferDestroy { buffer: id })
    }

    fn end_mapping(&mut self, id: ObjectId) -> Result<(), ClientError> {
        if self.disconnected {
            return Err(ClientError::Disconnected);
        }
        let Some(state) = self.tables.buffer_mut(id) else {
            return Ok(());
        };
        let map = state.map;
        match map {
            MapState::Unmapped => Ok(()),
            MapState::Pending { request_id, .. } => {
                state.map = MapState::Unmapped;
                self.abort_map(request_id, "buffer was unmapped before the mapping resolved");
                Ok(())
            }
            MapState::Mapped { mode, dirty, .. } => {
                state.map = MapState::Unmapped;
                let flush = match (dirty, &state.write) {
                    (Some((start, end)), Some(write)) if mode.contains(MapMode::WRITE) => {
                        let size = end - start;
                        let mut data = vec![0; write.serialize_flush_size(start, size)];
                        write.serialize_flush(start, size, &mut data);
                        Some(BufferUpdateMappedData {
                            buffer: id,
                            offset: start,
                            size,
                            data,
                        })
                    }
                    _ => None,
                };
                match flush {
                    Some(cmd) => self.serialize(cmd),
                    None => Ok(()),
                }
            }
        }
    }

    pub(super) fn abort_map(&mut self, request_id: u64, message: &str) {
        if let Some(PendingRequest::Map { callback, .. }) = self.pending.remove(&request_id) {
            callback(MapResponse::new(MapAsyncStatus::Aborted, message));
        }
    }
}

fn map_check(
    map: &MapState,
    buffer: ObjectId,
    want: MapMode,
    offset: u64,
    len: u64,
) -> Result<(), ClientError> {
    match map.mapped_range(want, offset, len) {
        Ok(()) => Ok(()),
        Err(reason) if matches!(map, MapState::Mapped { mode, .. } if mode.contains(want)) => {
            debug!(%buffer, reason, "mapped access out of range");
            Err(ClientError::OutOfMappedRange { offset, size: len })
        }
        Err(reason) => Err(ClientError::InvalidMapState { buffer, reason }),
    }
}
