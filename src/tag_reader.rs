use anyhow::{anyhow, ensure, Result};

use crate::bits;

/// Positioned cursor over an immutable byte image.
///
/// Framing words are big-endian, values inside the DATA image are
/// little-endian, so both families of reads are provided. Plain reads are
/// bounds-checked and advance the cursor by exactly the bytes consumed;
/// [TagReader::peek_u64_be] is the one deliberate exception to strict
/// bounds, see its docs.
#[derive(Clone, Debug)]
pub struct TagReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TagReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn eof(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn tell(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    pub fn seek(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub fn skip(&mut self, count: usize) {
        self.offset += count;
    }

    /// Round the cursor up to the next multiple of `align` (a power of two).
    pub fn align_to(&mut self, align: usize) {
        self.offset = (self.offset + align - 1) & !(align - 1);
    }

    /// Clone of this reader positioned at `offset`.
    pub fn clone_at(&self, offset: usize) -> Self {
        Self {
            data: self.data,
            offset,
        }
    }

    /// Split off a child reader over the next `len` bytes and skip them.
    pub fn sub_reader(&mut self, len: usize) -> Result<Self> {
        let data = self
            .data
            .get(self.offset..self.offset + len)
            .ok_or_else(|| {
                anyhow!(
                    "truncated input: {len} bytes requested at offset {}, {} available",
                    self.offset,
                    self.remaining()
                )
            })?;
        self.offset += len;
        Ok(Self { data, offset: 0 })
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self
            .data
            .get(self.offset..self.offset + count)
            .ok_or_else(|| {
                anyhow!(
                    "truncated input: {count} bytes requested at offset {}, {} available",
                    self.offset,
                    self.remaining()
                )
            })?;
        self.offset += count;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    /// Big-endian u64 at `tell() + offset`, without moving the cursor.
    ///
    /// Bytes past end-of-buffer read as zero: the varint decoder always
    /// peeks an 8-byte window but may legally consume as little as one
    /// byte near end-of-section.
    pub fn peek_u64_be(&self, offset: usize) -> u64 {
        let start = self.offset + offset;
        let mut window = [0u8; 8];
        if start < self.data.len() {
            let avail = &self.data[start..self.data.len().min(start + 8)];
            window[..avail.len()].copy_from_slice(avail);
        }
        u64::from_be_bytes(window)
    }

    /// NUL-terminated byte string at the cursor; the terminator is consumed
    /// but not returned.
    pub fn read_nul_str(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.offset.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| anyhow!("unterminated string at offset {}", self.offset))?;
        let bytes = &rest[..len];
        self.offset += len + 1;
        Ok(bytes)
    }

    /// Decode the varint at the cursor, returning `(size, value)` without
    /// consuming it.
    ///
    /// The leading byte selects one of nine width/placement modes; all
    /// value bit ranges are in MSB-first numbering over the same 8-byte
    /// window.
    pub fn decode_varint(&self) -> Result<(usize, u64)> {
        let window = self.peek_u64_be(0);
        let msb = bits::reverse_extract64(window, 0, 7);
        let mode = msb >> 3;
        match mode {
            0..=15 => Ok((1, msb)),
            16..=23 => Ok((2, bits::reverse_extract64(window, 2, 15))),
            24..=27 => Ok((3, bits::reverse_extract64(window, 3, 23))),
            28 => Ok((4, bits::reverse_extract64(window, 5, 31))),
            29 => Ok((5, bits::reverse_extract64(window, 5, 39))),
            30 => Ok((8, bits::reverse_extract64(window, 5, 63))),
            31 if msb & 7 == 0 => Ok((6, bits::reverse_extract64(window, 8, 47))),
            31 if msb & 7 == 1 => Ok((9, self.peek_u64_be(1))),
            _ => Err(anyhow!("bad varint encoding mode {msb:#04X}")),
        }
    }

    /// Read the varint at the cursor. With `max_bits`, values with set bits
    /// beyond the limit are rejected.
    pub fn read_varint(&mut self, max_bits: Option<u32>) -> Result<u64> {
        let (size, value) = self.decode_varint()?;
        ensure!(
            self.offset + size <= self.data.len(),
            "truncated varint at offset {}: {size} bytes long, {} available",
            self.offset,
            self.remaining()
        );
        self.offset += size;
        if let Some(max_bits) = max_bits {
            ensure!(
                max_bits >= 64 || value >> max_bits == 0,
                "varint is too large: {value:#X}, bits {max_bits}"
            );
        }
        Ok(value)
    }

    pub fn read_varint_u16(&mut self) -> Result<u16> {
        Ok(self.read_varint(Some(16))? as u16)
    }

    pub fn read_varint_s32(&mut self) -> Result<i32> {
        Ok(self.read_varint(Some(31))? as i32)
    }

    pub fn read_varint_u32(&mut self) -> Result<u32> {
        Ok(self.read_varint(Some(32))? as u32)
    }
}
