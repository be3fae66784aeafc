//! Bounds-checked cursor over a flatbuffer-style byte buffer
//!
//! Every read is checked against the buffer length and returns a
//! `DecodeResult` instead of indexing out of range. Table traversal
//! (vtable lookup, indirect offsets, vectors of tables) is layered on top
//! so the decoder walks the buffer as a sequence of checked reads.

/// Decoder failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Buffer cannot hold the root offset
    #[error("buffer too short: {len} bytes")]
    TooShort { len: usize },

    /// Root offset points at byte 0
    #[error("root table offset is zero")]
    ZeroRootOffset,

    /// Read past the end of the buffer
    #[error("read of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// Offset arithmetic left the addressable range
    #[error("offset overflow at {0}")]
    Overflow(usize),
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Little-endian reader addressed by absolute offset
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn read_array<const N: usize>(&self, offset: usize) -> DecodeResult<[u8; N]> {
        let out_of_bounds = DecodeError::OutOfBounds {
            offset,
            width: N,
            len: self.buf.len(),
        };
        let end = offset.checked_add(N).ok_or(out_of_bounds.clone())?;
        let slice = self.buf.get(offset..end).ok_or(out_of_bounds)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub fn read_u8(&self, offset: usize) -> DecodeResult<u8> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub fn read_u16(&self, offset: usize) -> DecodeResult<u16> {
        Ok(u16::from_le_bytes(self.read_array(offset)?))
    }

    pub fn read_u32(&self, offset: usize) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.read_array(offset)?))
    }

    pub fn read_i32(&self, offset: usize) -> DecodeResult<i32> {
        Ok(i32::from_le_bytes(self.read_array(offset)?))
    }

    pub fn read_f32(&self, offset: usize) -> DecodeResult<f32> {
        Ok(f32::from_le_bytes(self.read_array(offset)?))
    }

    /// Follow an unsigned forward offset stored at `offset`
    pub fn indirect(&self, offset: usize) -> DecodeResult<usize> {
        let rel = self.read_u32(offset)? as usize;
        offset
            .checked_add(rel)
            .ok_or(DecodeError::Overflow(offset))
    }
}

/// A table located at `pos`, described by the vtable its soffset points to
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    cursor: ByteCursor<'a>,
    pos: usize,
}

impl<'a> Table<'a> {
    pub fn at(cursor: ByteCursor<'a>, pos: usize) -> Self {
        Self { cursor, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Absolute position of the field in vtable slot `slot`, `None` when absent
    pub fn field(&self, slot: u16) -> DecodeResult<Option<usize>> {
        let soffset = i64::from(self.cursor.read_i32(self.pos)?);
        let vtable = i64::try_from(self.pos)
            .ok()
            .and_then(|pos| pos.checked_sub(soffset))
            .and_then(|vt| usize::try_from(vt).ok())
            .ok_or(DecodeError::Overflow(self.pos))?;

        let vtable_len = self.cursor.read_u16(vtable)?;
        if slot >= vtable_len {
            return Ok(None);
        }

        let entry = vtable
            .checked_add(usize::from(slot))
            .ok_or(DecodeError::Overflow(vtable))?;
        match self.cursor.read_u16(entry)? {
            0 => Ok(None),
            rel => self
                .pos
                .checked_add(usize::from(rel))
                .map(Some)
                .ok_or(DecodeError::Overflow(self.pos)),
        }
    }

    pub fn u8_or(&self, slot: u16, default: u8) -> DecodeResult<u8> {
        match self.field(slot)? {
            Some(at) => self.cursor.read_u8(at),
            None => Ok(default),
        }
    }

    pub fn u32_or(&self, slot: u16, default: u32) -> DecodeResult<u32> {
        match self.field(slot)? {
            Some(at) => self.cursor.read_u32(at),
            None => Ok(default),
        }
    }

    pub fn i32_or(&self, slot: u16, default: i32) -> DecodeResult<i32> {
        match self.field(slot)? {
            Some(at) => self.cursor.read_i32(at),
            None => Ok(default),
        }
    }

    pub fn f32_or(&self, slot: u16, default: f32) -> DecodeResult<f32> {
        match self.field(slot)? {
            Some(at) => self.cursor.read_f32(at),
            None => Ok(default),
        }
    }

    /// Nested table referenced from `slot`
    pub fn table(&self, slot: u16) -> DecodeResult<Option<Table<'a>>> {
        match self.field(slot)? {
            Some(at) => Ok(Some(Table::at(self.cursor, self.cursor.indirect(at)?))),
            None => Ok(None),
        }
    }

    /// Vector of tables referenced from `slot`
    pub fn table_vector(&self, slot: u16) -> DecodeResult<Option<TableVector<'a>>> {
        let Some(at) = self.field(slot)? else {
            return Ok(None);
        };
        let header = self.cursor.indirect(at)?;
        let len = self.cursor.read_u32(header)? as usize;
        let start = header.checked_add(4).ok_or(DecodeError::Overflow(header))?;
        Ok(Some(TableVector {
            cursor: self.cursor,
            start,
            len,
        }))
    }
}

/// Vector whose elements are offsets to tables
#[derive(Debug, Clone, Copy)]
pub struct TableVector<'a> {
    cursor: ByteCursor<'a>,
    start: usize,
    len: usize,
}

impl<'a> TableVector<'a> {
    /// Declared element count
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of leading elements whose offset slot lies inside the buffer
    pub fn addressable_len(&self) -> usize {
        let room = self.cursor.len().saturating_sub(self.start) / 4;
        self.len.min(room)
    }

    pub fn table_at(&self, index: usize) -> DecodeResult<Table<'a>> {
        let slot = index
            .checked_mul(4)
            .and_then(|rel| self.start.checked_add(rel))
            .ok_or(DecodeError::Overflow(self.start))?;
        Ok(Table::at(self.cursor, self.cursor.indirect(slot)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_little_endian() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x80, 0x3f];
        let cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.read_u8(0).unwrap(), 0x01);
        assert_eq!(cursor.read_u16(0).unwrap(), 0x0201);
        assert_eq!(cursor.read_u32(0).unwrap(), 0x0403_0201);
        assert_eq!(cursor.read_f32(4).unwrap(), 1.0);
    }

    #[test]
    fn test_read_past_end_is_error() {
        let buf = [0u8; 6];
        let cursor = ByteCursor::new(&buf);
        assert_eq!(
            cursor.read_u32(4),
            Err(DecodeError::OutOfBounds {
                offset: 4,
                width: 4,
                len: 6
            })
        );
        assert!(cursor.read_u8(6).is_err());
        assert!(cursor.read_u32(usize::MAX - 1).is_err());
    }

    #[test]
    fn test_indirect_adds_forward_offset() {
        let buf = [8u8, 0, 0, 0, 0, 0, 0, 0, 0xAA];
        let cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.indirect(0).unwrap(), 8);
    }

    #[test]
    fn test_field_beyond_vtable_is_absent() {
        // vtable: len=6, table_len=8, slot4 -> 4
        // table at 8: soffset=8 (vtable at 0), u32 field = 7
        let buf = [
            6, 0, 8, 0, 4, 0, 0, 0, // vtable + pad
            8, 0, 0, 0, 7, 0, 0, 0, // table
        ];
        let table = Table::at(ByteCursor::new(&buf), 8);
        assert_eq!(table.u32_or(4, 0).unwrap(), 7);
        assert_eq!(table.u32_or(6, 99).unwrap(), 99);
    }
}
