//! Binary reader.

use crate::binary_writer::MAX_VAR_BYTES;
use crate::error::{IoError, IoResult};

/// Deserializes values from a little-endian byte slice.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    /// Creates a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Returns the current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// True when all input has been consumed.
    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }

    fn take(&mut self, count: usize) -> IoResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(IoError::EndOfStream {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> IoResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a bool from one byte.
    pub fn read_bool(&mut self) -> IoResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a little-endian u16.
    pub fn read_u16(&mut self) -> IoResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a little-endian u32.
    pub fn read_u32(&mut self) -> IoResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> IoResult<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&mut self) -> IoResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a little-endian IEEE-754 f64.
    pub fn read_f64(&mut self) -> IoResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> IoResult<&'a [u8]> {
        self.take(count)
    }

    /// Reads a compact var-int (see
    /// [`BinaryWriter::write_var_int`](crate::BinaryWriter::write_var_int)).
    pub fn read_var_int(&mut self) -> IoResult<u64> {
        let first = self.read_u8()?;
        match first {
            0xFD => Ok(self.read_u16()? as u64),
            0xFE => Ok(self.read_u32()? as u64),
            0xFF => self.read_u64(),
            byte => Ok(byte as u64),
        }
    }

    /// Reads a var-int length prefix and the following bytes, bounded by
    /// `MAX_VAR_BYTES`.
    pub fn read_var_bytes(&mut self) -> IoResult<&'a [u8]> {
        let length = self.read_var_int()?;
        if length > MAX_VAR_BYTES {
            return Err(IoError::LengthTooLong {
                length,
                max: MAX_VAR_BYTES,
            });
        }
        self.take(length as usize)
    }

    /// Reads a var-int-prefixed UTF-8 string.
    pub fn read_var_string(&mut self) -> IoResult<String> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| IoError::InvalidUtf8)
    }
}
