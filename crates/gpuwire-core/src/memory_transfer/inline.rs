//! Portable transfer: handles own private copies and every update carries
//! the bytes of its range.

use super::*;

#[derive(Debug, Default)]
pub struct InlineClientService;

impl ClientMemoryTransferService for InlineClientService {
    fn create_read_handle(&mut self, _size: u64) -> Box<dyn ClientReadHandle> {
        Box::new(InlineClientHandle::default())
    }

    fn create_write_handle(&mut self, _size: u64) -> Box<dyn ClientWriteHandle> {
        Box::new(InlineClientHandle::default())
    }
}

/// Client-side staging copy, grown lazily up to the mapped range.
#[derive(Debug, Default)]
struct InlineClientHandle {
    data: Vec<u8>,
}

impl ClientReadHandle for InlineClientHandle {
    fn serialize_create_size(&self) -> usize {
        0
    }

    fn serialize_create(&self, _out: &mut [u8]) {}

    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, size: u64) -> Result<(), MemoryTransferError> {
        if data.len() as u64 != size {
            return Err(MemoryTransferError::DataUpdateMismatch {
                offset,
                size,
                len: data.len(),
            });
        }
        range_mut(&mut self.data, offset, data.len()).copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) {
        copy_out(&self.data, offset, out);
    }
}

impl ClientWriteHandle for InlineClientHandle {
    fn serialize_create_size(&self) -> usize {
        0
    }

    fn serialize_create(&self, _out: &mut [u8]) {}

    fn write(&mut self, offset: u64, data: &[u8]) {
        range_mut(&mut self.data, offset, data.len()).copy_from_slice(data);
    }

    fn serialize_flush_size(&self, _offset: u64, size: u64) -> usize {
        size as usize
    }

    fn serialize_flush(&self, offset: u64, _size: u64, out: &mut [u8]) {
        copy_out(&self.data, offset, out);
    }
}

#[derive(Debug, Default)]
pub struct InlineServerService;

impl ServerMemoryTransferService for InlineServerService {
    fn deserialize_read_handle(&mut self, create_info: &[u8]) -> Result<Box<dyn ServerReadHandle>, MemoryTransferError> {
        if !create_info.is_empty() {
            return Err(MemoryTransferError::InvalidCreateInfo {
                kind: "inline read",
                len: create_info.len(),
            });
        }
        Ok(Box::new(InlineServerHandle))
    }

    fn deserialize_write_handle(
        &mut self,
        create_info: &[u8],
    ) -> Result<Box<dyn ServerWriteHandle>, MemoryTransferError> {
        if !create_info.is_empty() {
            return Err(MemoryTransferError::InvalidCreateInfo {
                kind: "inline write",
                len: create_info.len(),
            });
        }
        Ok(Box::new(InlineServerHandle))
    }
}

#[derive(Debug)]
struct InlineServerHandle;

impl ServerReadHandle for InlineServerHandle {
    fn serialize_data_update(&mut self, mapped: &[u8], _offset: u64) -> Vec<u8> {
        mapped.to_vec()
    }
}

impl ServerWriteHandle for InlineServerHandle {
    fn deserialize_data_update(&mut self, data: &[u8], offset: u64, mapped: &mut [u8]) -> Result<(), MemoryTransferError> {
        if data.len() != mapped.len() {
            return Err(MemoryTransferError::DataUpdateMismatch {
                offset,
                size: mapped.len() as u64,
                len: data.len(),
            });
        }
        mapped.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_flush_reaches_the_server_range() {
        let mut client = InlineClientService.create_write_handle(64);
        assert_eq!(client.serialize_create_size(), 0);
        client.write(8, &[1, 2, 3, 4]);

        let mut flush = vec![0u8; client.serialize_flush_size(8, 4)];
        client.serialize_flush(8, 4, &mut flush);
        assert_eq!(flush, [1, 2, 3, 4]);

        let mut server = InlineServerService.deserialize_write_handle(&[]).unwrap();
        let mut native = [0u8; 4];
        server.deserialize_data_update(&flush, 8, &mut native).unwrap();
        assert_eq!(native, [1, 2, 3, 4]);

        assert!(server.deserialize_data_update(&flush[..3], 8, &mut native).is_err());
    }

    #[test]
    fn read_update_must_cover_the_range() {
        let mut client = InlineClientService.create_read_handle(16);
        assert!(client.deserialize_data_update(&[9; 3], 4, 4).is_err());
        client.deserialize_data_update(&[9; 4], 4, 4).unwrap();

        let mut out = [0xFFu8; 6];
        client.read(2, &mut out);
        assert_eq!(out, [0, 0, 9, 9, 9, 9]);
    }

    #[test]
    fn server_rejects_unexpected_create_info() {
        assert!(InlineServerService.deserialize_read_handle(&[0]).is_err());
    }
}
