//! Zero-copy transfer through memory both endpoints can address.
//!
//! The client allocates a region in a [`SharedMemoryPool`] and sends only the
//! region's handle. Data updates are empty: the server copies the native
//! mapping into the region when a read map completes, and copies the region
//! into the native mapping when a write map is flushed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::*;

const CREATE_INFO_SIZE: usize = 16;

type Region = Arc<Mutex<Vec<u8>>>;

/// Regions shared by the two endpoints of an in-process connection.
#[derive(Clone, Default)]
pub struct SharedMemoryPool {
    inner: Arc<Mutex<PoolInner>>,
}

#[derive(Default)]
struct PoolInner {
    next_handle: u64,
    regions: HashMap<u64, Region>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SharedMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, size: u64) -> (u64, Region) {
        let mut inner = lock(&self.inner);
        inner.next_handle += 1;
        let handle = inner.next_handle;
        let region = Arc::new(Mutex::new(vec![0u8; size as usize]));
        inner.regions.insert(handle, Arc::clone(&region));
        (handle, region)
    }

    /// Hands a region to the server. Each region can be attached once.
    fn attach(&self, handle: u64) -> Option<Region> {
        lock(&self.inner).regions.remove(&handle)
    }

    /// Regions allocated but not yet attached.
    pub fn unattached(&self) -> usize {
        lock(&self.inner).regions.len()
    }
}

fn encode_create_info(handle: u64, size: u64, out: &mut [u8]) {
    out[..8].copy_from_slice(&handle.to_le_bytes());
    out[8..CREATE_INFO_SIZE].copy_from_slice(&size.to_le_bytes());
}

fn decode_create_info(kind: &'static str, info: &[u8]) -> Result<(u64, u64), MemoryTransferError> {
    let invalid = || MemoryTransferError::InvalidCreateInfo { kind, len: info.len() };
    if info.len() != CREATE_INFO_SIZE {
        return Err(invalid());
    }
    let handle = u64::from_le_bytes(info[..8].try_into().map_err(|_| invalid())?);
    let size = u64::from_le_bytes(info[8..].try_into().map_err(|_| invalid())?);
    Ok((handle, size))
}

pub struct SharedClientService {
    pool: SharedMemoryPool,
}

impl SharedClientService {
    pub fn new(pool: SharedMemoryPool) -> Self {
        Self { pool }
    }
}

impl ClientMemoryTransferService for SharedClientService {
    fn create_read_handle(&mut self, size: u64) -> Box<dyn ClientReadHandle> {
        let (handle, region) = self.pool.allocate(size);
        Box::new(SharedClientHandle { handle, size, region })
    }

    fn create_write_handle(&mut self, size: u64) -> Box<dyn ClientWriteHandle> {
        let (handle, region) = self.pool.allocate(size);
        Box::new(SharedClientHandle { handle, size, region })
    }
}

struct SharedClientHandle {
    handle: u64,
    size: u64,
    region: Region,
}

impl ClientReadHandle for SharedClientHandle {
    fn serialize_create_size(&self) -> usize {
        CREATE_INFO_SIZE
    }

    fn serialize_create(&self, out: &mut [u8]) {
        encode_create_info(self.handle, self.size, out);
    }

    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, size: u64) -> Result<(), MemoryTransferError> {
        if !data.is_empty() {
            return Err(MemoryTransferError::DataUpdateMismatch {
                offset,
                size,
                len: data.len(),
            });
        }
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) {
        copy_out(&lock(&self.region), offset, out);
    }
}

impl ClientWriteHandle for SharedClientHandle {
    fn serialize_create_size(&self) -> usize {
        CREATE_INFO_SIZE
    }

    fn serialize_create(&self, out: &mut [u8]) {
        encode_create_info(self.handle, self.size, out);
    }

    fn write(&mut self, offset: u64, data: &[u8]) {
        range_mut(&mut lock(&self.region), offset, data.len()).copy_from_slice(data);
    }

    fn serialize_flush_size(&self, _offset: u64, _size: u64) -> usize {
        0
    }

    fn serialize_flush(&self, _offset: u64, _size: u64, _out: &mut [u8]) {}
}

pub struct SharedServerService {
    pool: SharedMemoryPool,
}

impl SharedServerService {
    pub fn new(pool: SharedMemoryPool) -> Self {
        Self { pool }
    }

    fn attach(&self, kind: &'static str, info: &[u8]) -> Result<SharedServerHandle, MemoryTransferError> {
        let (handle, size) = decode_create_info(kind, info)?;
        let region = self
            .pool
            .attach(handle)
            .ok_or(MemoryTransferError::UnknownRegion { handle })?;
        if lock(&region).len() as u64 != size {
            return Err(MemoryTransferError::InvalidCreateInfo { kind, len: info.len() });
        }
        Ok(SharedServerHandle { region })
    }
}

impl ServerMemoryTransferService for SharedServerService {
    fn deserialize_read_handle(&mut self, create_info: &[u8]) -> Result<Box<dyn ServerReadHandle>, MemoryTransferError> {
        Ok(Box::new(self.attach("shared read", create_info)?))
    }

    fn deserialize_write_handle(
        &mut self,
        create_info: &[u8],
    ) -> Result<Box<dyn ServerWriteHandle>, MemoryTransferError> {
        Ok(Box::new(self.attach("shared write", create_info)?))
    }
}

struct SharedServerHandle {
    region: Region,
}

impl ServerReadHandle for SharedServerHandle {
    fn serialize_data_update(&mut self, mapped: &[u8], offset: u64) -> Vec<u8> {
        range_mut(&mut lock(&self.region), offset, mapped.len()).copy_from_slice(mapped);
        Vec::new()
    }
}

impl ServerWriteHandle for SharedServerHandle {
    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, mapped: &mut [u8]) -> Result<(), MemoryTransferError> {
        if !data.is_empty() {
            return Err(MemoryTransferError::DataUpdateMismatch {
                offset,
                size: mapped.len() as u64,
                len: data.len(),
            });
        }
        copy_out(&lock(&self.region), offset, mapped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_visible_from_both_sides() {
        let pool = SharedMemoryPool::new();
        let mut client = SharedClientService::new(pool.clone());
        let mut server = SharedServerService::new(pool.clone());

        let mut write = client.create_write_handle(32);
        let mut info = vec![0u8; write.serialize_create_size()];
        write.serialize_create(&mut info);
        assert_eq!(pool.unattached(), 1);

        let mut attached = server.deserialize_write_handle(&info).unwrap();
        assert_eq!(pool.unattached(), 0);

        write.write(4, &[7, 7]);
        assert_eq!(write.serialize_flush_size(4, 2), 0);
        let mut native = [0u8; 2];
        attached.deserialize_data_update(&[], 4, &mut native).unwrap();
        assert_eq!(native, [7, 7]);
    }

    #[test]
    fn a_region_attaches_once() {
        let pool = SharedMemoryPool::new();
        let read = SharedClientService::new(pool.clone()).create_read_handle(8);
        let mut info = vec![0u8; read.serialize_create_size()];
        read.serialize_create(&mut info);

        let mut server = SharedServerService::new(pool);
        assert!(server.deserialize_read_handle(&info).is_ok());
        assert!(matches!(
            server.deserialize_read_handle(&info),
            Err(MemoryTransferError::UnknownRegion { .. })
        ));
        assert!(matches!(
            server.deserialize_read_handle(&info[..8]),
            Err(MemoryTransferError::InvalidCreateInfo { .. })
        ));
    }

    #[test]
    fn read_completion_publishes_into_the_region() {
        let pool = SharedMemoryPool::new();
        let read = SharedClientService::new(pool.clone()).create_read_handle(8);
        let mut info = vec![0u8; CREATE_INFO_SIZE];
        read.serialize_create(&mut info);

        let mut attached = SharedServerService::new(pool).deserialize_read_handle(&info).unwrap();
        assert!(attached.serialize_data_update(&[1, 2, 3], 2).is_empty());

        let mut out = [0u8; 4];
        read.read(2, &mut out);
        assert_eq!(out, [1, 2, 3, 0]);
    }
}
