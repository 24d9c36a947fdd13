//! Bounds-checked reads from untrusted byte buffers.
//!
//! Every accessor returns `None` instead of panicking when the requested
//! range falls outside the buffer. Scanners treat a `None` as a structural
//! stop, never as a crash.

#[inline]
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    data.get(offset..end)
}

#[inline]
pub fn read_array<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    let bytes = read_bytes(data, offset, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Some(out)
}

#[inline]
pub fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    read_array::<2>(data, offset).map(u16::from_be_bytes)
}

#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    read_array::<2>(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn read_u32_be(data: &[u8], offset: usize) -> Option<u32> {
    read_array::<4>(data, offset).map(u32::from_be_bytes)
}

#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    read_array::<4>(data, offset).map(u32::from_le_bytes)
}

#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> Option<i32> {
    read_array::<4>(data, offset).map(i32::from_le_bytes)
}

/// Byte order selector for formats that declare their own endianness
/// (TIFF and the TIFF stream embedded in JPEG APP1/Exif).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[inline]
    pub fn read_u16(self, data: &[u8], offset: usize) -> Option<u16> {
        match self {
            Endian::Little => read_u16_le(data, offset),
            Endian::Big => read_u16_be(data, offset),
        }
    }

    #[inline]
    pub fn read_u32(self, data: &[u8], offset: usize) -> Option<u32> {
        match self {
            Endian::Little => read_u32_le(data, offset),
            Endian::Big => read_u32_be(data, offset),
        }
    }
}
