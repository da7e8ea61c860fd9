//! Field codec shared by every wire record.
//!
//! Records are written into caller-reserved space (see
//! [`WireMessage::required_size`]) and read back through a bounds-checked
//! [`Reader`]. Nothing here knows about object tables: ids are plain
//! `(index, generation)` pairs at this layer.

use crate::error::DecodeError;

/// Size of [`CmdHeader`] on the wire.
pub const CMD_HEADER_SIZE: usize = 8;

/// Every record is padded to a multiple of this many bytes.
pub const CMD_ALIGN: usize = 4;

/// Largest record the `u32` size field can describe.
pub const MAX_RECORD_SIZE: usize = (u32::MAX as usize) & !(CMD_ALIGN - 1);

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

/// Fixed prefix of every record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmdHeader {
    pub opcode: u32,
    /// Total record size including this header and trailing padding.
    pub size_bytes: u32,
}

impl CmdHeader {
    /// Reads the header at the start of `src` without consuming anything.
    pub fn peek(src: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(src);
        let opcode = r.read_u32()?;
        let size_bytes = r.read_u32()?;
        Ok(Self { opcode, size_bytes })
    }
}

/// Cursor over caller-reserved output space.
///
/// Writing past the end of the reserved region panics: the reservation is
/// computed from the same values being written, so an overrun is an encoder
/// bug rather than bad input.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put_bytes(&[v]);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put_bytes(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.put_u32(v.to_bits());
    }

    fn zero_fill_to(&mut self, end: usize) {
        self.buf[self.pos..end].fill(0);
        self.pos = end;
    }
}

/// Bounds-checked little-endian reader over untrusted bytes.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: self.pos.saturating_add(len),
                available: self.bytes.len(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads a `u64` element count and checks that `count` elements of at
    /// least `stride` bytes each can still be present.
    ///
    /// This runs before any allocation so a hostile count cannot make the
    /// decoder reserve memory it will never fill.
    pub fn read_count(&mut self, stride: usize) -> Result<usize, DecodeError> {
        let count = self.read_u64()?;
        let stride = stride.max(1);
        let remaining = self.remaining();
        let fits = count
            .checked_mul(stride as u64)
            .is_some_and(|needed| needed <= remaining as u64);
        if !fits {
            return Err(DecodeError::LengthOverflow {
                count,
                stride,
                remaining,
            });
        }
        Ok(count as usize)
    }
}

/// A value with a deterministic wire encoding.
pub trait WireEncode {
    /// Exact number of bytes [`WireEncode::encode`] writes.
    fn wire_size(&self) -> usize;

    fn encode(&self, w: &mut Writer<'_>);

    fn slice_wire_size(items: &[Self]) -> usize
    where
        Self: Sized,
    {
        items.iter().map(WireEncode::wire_size).sum()
    }

    fn encode_slice(items: &[Self], w: &mut Writer<'_>)
    where
        Self: Sized,
    {
        for item in items {
            item.encode(w);
        }
    }
}

pub trait WireDecode: Sized {
    /// Smallest possible encoding; used to bound declared element counts.
    const MIN_WIRE_SIZE: usize;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    fn decode_many(r: &mut Reader<'_>, count: usize) -> Result<Vec<Self>, DecodeError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Self::decode(r)?);
        }
        Ok(out)
    }
}

macro_rules! scalar_codec {
    ($ty:ty, $size:expr, $put:ident, $read:ident) => {
        impl WireEncode for $ty {
            fn wire_size(&self) -> usize {
                $size
            }

            fn encode(&self, w: &mut Writer<'_>) {
                w.$put(*self);
            }
        }

        impl WireDecode for $ty {
            const MIN_WIRE_SIZE: usize = $size;

            fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                r.$read()
            }
        }
    };
}

scalar_codec!(u16, 2, put_u16, read_u16);
scalar_codec!(u32, 4, put_u32, read_u32);
scalar_codec!(u64, 8, put_u64, read_u64);
scalar_codec!(i32, 4, put_i32, read_i32);
scalar_codec!(f32, 4, put_f32, read_f32);

impl WireEncode for u8 {
    fn wire_size(&self) -> usize {
        1
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.put_u8(*self);
    }

    fn slice_wire_size(items: &[Self]) -> usize {
        items.len()
    }

    fn encode_slice(items: &[Self], w: &mut Writer<'_>) {
        w.put_bytes(items);
    }
}

impl WireDecode for u8 {
    const MIN_WIRE_SIZE: usize = 1;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.read_u8()
    }

    fn decode_many(r: &mut Reader<'_>, count: usize) -> Result<Vec<Self>, DecodeError> {
        Ok(r.read_bytes(count)?.to_vec())
    }
}

impl WireEncode for bool {
    fn wire_size(&self) -> usize {
        1
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.put_u8(u8::from(*self));
    }
}

impl WireDecode for bool {
    const MIN_WIRE_SIZE: usize = 1;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::InvalidBool(other)),
        }
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn wire_size(&self) -> usize {
        1 + self.as_ref().map_or(0, WireEncode::wire_size)
    }

    fn encode(&self, w: &mut Writer<'_>) {
        match self {
            Some(v) => {
                w.put_u8(1);
                v.encode(w);
            }
            None => w.put_u8(0),
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    const MIN_WIRE_SIZE: usize = 1;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            other => Err(DecodeError::InvalidOptionTag(other)),
        }
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn wire_size(&self) -> usize {
        8 + T::slice_wire_size(self)
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.put_u64(self.len() as u64);
        T::encode_slice(self, w);
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    const MIN_WIRE_SIZE: usize = 8;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.read_count(T::MIN_WIRE_SIZE)?;
        T::decode_many(r, count)
    }
}

impl WireEncode for String {
    fn wire_size(&self) -> usize {
        8 + self.len()
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.put_u64(self.len() as u64);
        w.put_bytes(self.as_bytes());
    }
}

impl WireDecode for String {
    const MIN_WIRE_SIZE: usize = 8;

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let len = r.read_count(1)?;
        let bytes = r.read_bytes(len)?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

/// A closed family of records sharing one opcode space.
///
/// Implemented by the generated `Command` and `Return` enums.
pub trait WireMessage: Sized {
    fn opcode_u32(&self) -> u32;
    fn body_size(&self) -> usize;
    fn encode_body(&self, w: &mut Writer<'_>);
    fn decode_body(opcode: u32, r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Exact number of bytes [`WireMessage::serialize`] writes.
    ///
    /// Pure function of the record; calling it has no side effects.
    fn required_size(&self) -> usize {
        align_up(CMD_HEADER_SIZE + self.body_size(), CMD_ALIGN)
    }

    /// Writes the record into the first [`WireMessage::required_size`] bytes of
    /// `dst` and returns the number of bytes written.
    ///
    /// # Panics
    ///
    /// Panics if `dst` is smaller than the required size or the record does
    /// not fit a `u32` size field.
    fn serialize(&self, dst: &mut [u8]) -> usize {
        let size = self.required_size();
        let size_bytes = u32::try_from(size).expect("record too large for u32 size_bytes");
        let mut w = Writer::new(&mut dst[..size]);
        w.put_u32(self.opcode_u32());
        w.put_u32(size_bytes);
        self.encode_body(&mut w);
        debug_assert_eq!(
            align_up(w.position(), CMD_ALIGN),
            size,
            "body_size disagrees with encode_body"
        );
        w.zero_fill_to(size);
        size
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.required_size()];
        self.serialize(&mut out);
        out
    }

    /// Decodes one record from the start of `src`.
    ///
    /// Returns the record and the number of bytes it occupied. Never reads
    /// past `src`, and never past the record's declared `size_bytes`.
    fn deserialize(src: &[u8]) -> Result<(Self, usize), DecodeError> {
        let header = CmdHeader::peek(src)?;
        let size = header.size_bytes as usize;
        if size < CMD_HEADER_SIZE {
            return Err(DecodeError::InvalidCommandSize {
                size_bytes: header.size_bytes,
            });
        }
        if size % CMD_ALIGN != 0 {
            return Err(DecodeError::MisalignedCommandSize {
                size_bytes: header.size_bytes,
            });
        }
        if size > src.len() {
            return Err(DecodeError::Truncated {
                needed: size,
                available: src.len(),
            });
        }

        let mut r = Reader::new(&src[CMD_HEADER_SIZE..size]);
        let msg = Self::decode_body(header.opcode, &mut r)?;

        let rest = r.rest();
        if rest.len() >= CMD_ALIGN {
            return Err(DecodeError::TrailingBytes {
                trailing: rest.len(),
            });
        }
        if rest.iter().any(|b| *b != 0) {
            return Err(DecodeError::NonZeroPadding);
        }
        Ok((msg, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_count_rejects_overflowing_lengths_without_allocating() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        let mut r = Reader::new(&bytes);
        let err = r.read_count(4).unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthOverflow {
                count: u64::MAX,
                stride: 4,
                remaining: 8,
            }
        );
    }

    #[test]
    fn read_bytes_reports_truncation() {
        let bytes = [1u8, 2, 3];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        let err = r.read_u32().unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn option_and_bool_reject_unknown_tags() {
        let mut r = Reader::new(&[2u8]);
        assert_eq!(
            <Option<u32>>::decode(&mut r).unwrap_err(),
            DecodeError::InvalidOptionTag(2)
        );

        let mut r = Reader::new(&[7u8]);
        assert_eq!(bool::decode(&mut r).unwrap_err(), DecodeError::InvalidBool(7));
    }

    #[test]
    fn byte_vectors_encode_in_bulk() {
        let data = vec![9u8, 8, 7];
        assert_eq!(data.wire_size(), 8 + 3);

        let mut out = vec![0u8; data.wire_size()];
        data.encode(&mut Writer::new(&mut out));
        assert_eq!(&out[..8], &3u64.to_le_bytes());
        assert_eq!(&out[8..], &[9, 8, 7]);

        let decoded = <Vec<u8>>::decode(&mut Reader::new(&out)).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn strings_must_be_utf8() {
        let mut bytes = 2u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xC3, 0x28]);
        assert_eq!(
            String::decode(&mut Reader::new(&bytes)).unwrap_err(),
            DecodeError::InvalidUtf8
        );
    }
}
