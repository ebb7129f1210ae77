//! NDBN container layout.
//!
//! Everything is little endian. A file is a 32-byte [`Header`], a table of
//! 64-byte [`TensorEntry`] records at `tensor_table_offset`, tensor payloads
//! anywhere after that, and an optional vocabulary segment running from
//! `string_table_offset` to end of file.
//!
//! Nothing here overlays a struct on the mapped bytes. Every field is read
//! at its documented offset through [`ByteReader`], which checks the read
//! against the slice before touching it.

use crate::error::{FormatError, Result};
use serde::{Deserialize, Serialize};

/// "NDBN" as a little-endian u32.
pub const NDBN_MAGIC: u32 = 0x4E42444E;
pub const NDBN_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 32;
pub const ENTRY_SIZE: usize = 64;
pub const MAX_RANK: usize = 4;
/// Payload alignment used by [`crate::writer::NdbnWriter`].
pub const DATA_ALIGNMENT: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DType {
    F32 = 0,
    F16 = 1,
    BF16 = 2,
    I8 = 3,
    /// 4-bit normal float, two codes per byte, low nibble first.
    NF4 = 4,
}

impl DType {
    pub fn from_code(code: u8) -> Option<DType> {
        match code {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::BF16),
            3 => Some(DType::I8),
            4 => Some(DType::NF4),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Bytes needed to store `elements` values of this type, `None` on
    /// overflow.
    pub fn storage_size(self, elements: u64) -> Option<u64> {
        match self {
            DType::F32 => elements.checked_mul(4),
            DType::F16 | DType::BF16 => elements.checked_mul(2),
            DType::I8 => Some(elements),
            DType::NF4 => Some(elements.div_ceil(2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub num_tensors: u32,
    pub tensor_table_offset: u32,
    pub string_table_offset: u64,
    pub reserved: u64,
}

impl Header {
    /// Decode and check magic + version. Offsets are validated by the loader,
    /// which knows the file size and table capacity.
    pub fn decode(data: &[u8]) -> Result<Header> {
        let file_size = data.len() as u64;
        let mut r = ByteReader::new(data);

        let magic = r.read_u32()?;
        if magic != NDBN_MAGIC {
            return Err(FormatError::BadMagic {
                expected: NDBN_MAGIC,
                got: magic,
            }
            .into());
        }
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE as u64,
                file_size,
            }
            .into());
        }

        let version = r.read_u16()?;
        if version != NDBN_VERSION {
            return Err(FormatError::UnsupportedVersion(version).into());
        }

        Ok(Header {
            magic,
            version,
            flags: r.read_u16()?,
            num_tensors: r.read_u32()?,
            tensor_table_offset: r.read_u32()?,
            string_table_offset: r.read_u64()?,
            reserved: r.read_u64()?,
        })
    }

    pub fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_tensors.to_le_bytes());
        out[12..16].copy_from_slice(&self.tensor_table_offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.string_table_offset.to_le_bytes());
        out[24..32].copy_from_slice(&self.reserved.to_le_bytes());
    }

    pub fn has_vocab(&self) -> bool {
        self.string_table_offset != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name_offset: u32,
    pub dtype: DType,
    pub rank: u8,
    pub layout: u8,
    pub has_aux: bool,
    pub shape: [u32; MAX_RANK],
    pub data_offset: u64,
    pub data_size: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}

impl TensorEntry {
    /// Decode entry `index` from a 64-byte record.
    pub fn decode(record: &[u8], index: u32) -> Result<TensorEntry> {
        let mut r = ByteReader::new(record);
        let name_offset = r.read_u32()?;
        let code = r.read_u8()?;
        let dtype = DType::from_code(code).ok_or(FormatError::InvalidDType { index, code })?;
        let rank = r.read_u8()?;
        if rank as usize > MAX_RANK {
            return Err(FormatError::InvalidRank { index, rank }.into());
        }
        let layout = r.read_u8()?;
        let has_aux = r.read_u8()? != 0;
        let mut shape = [0u32; MAX_RANK];
        for dim in shape.iter_mut() {
            *dim = r.read_u32()?;
        }

        Ok(TensorEntry {
            name_offset,
            dtype,
            rank,
            layout,
            has_aux,
            shape,
            data_offset: r.read_u64()?,
            data_size: r.read_u64()?,
            aux_offset: r.read_u64()?,
            aux_size: r.read_u64()?,
        })
    }

    pub fn encode(&self, out: &mut [u8; ENTRY_SIZE]) {
        out.fill(0);
        out[0..4].copy_from_slice(&self.name_offset.to_le_bytes());
        out[4] = self.dtype.code();
        out[5] = self.rank;
        out[6] = self.layout;
        out[7] = self.has_aux as u8;
        for (i, dim) in self.shape.iter().enumerate() {
            out[8 + i * 4..12 + i * 4].copy_from_slice(&dim.to_le_bytes());
        }
        out[24..32].copy_from_slice(&self.data_offset.to_le_bytes());
        out[32..40].copy_from_slice(&self.data_size.to_le_bytes());
        out[40..48].copy_from_slice(&self.aux_offset.to_le_bytes());
        out[48..56].copy_from_slice(&self.aux_size.to_le_bytes());
    }

    pub fn dims(&self) -> &[u32] {
        &self.shape[..self.rank as usize]
    }

    pub fn num_elements(&self) -> Option<u64> {
        element_count(self.dims())
    }
}

/// Product of `dims`, `None` when it does not fit in a u64.
pub fn element_count(dims: &[u32]) -> Option<u64> {
    dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
}

/// Bounds-checked little-endian reader over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(FormatError::Truncated {
                needed: (self.pos + N) as u64,
                file_size: self.data.len() as u64,
            }
            .into());
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodalError;

    fn header_bytes(magic: u32, version: u16) -> Vec<u8> {
        let header = Header {
            magic,
            version,
            flags: 0,
            num_tensors: 3,
            tensor_table_offset: 32,
            string_table_offset: 0,
            reserved: 0,
        };
        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_header_fields_at_documented_offsets() {
        let data = header_bytes(NDBN_MAGIC, NDBN_VERSION);
        assert_eq!(&data[0..4], b"NDBN");
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 32);

        let header = Header::decode(&data).unwrap();
        assert_eq!(header.num_tensors, 3);
        assert_eq!(header.tensor_table_offset, 32);
        assert!(!header.has_vocab());
    }

    #[test]
    fn test_bad_magic() {
        let data = header_bytes(0xDEADBEEF, NDBN_VERSION);
        match Header::decode(&data) {
            Err(NodalError::Format(FormatError::BadMagic { got, .. })) => {
                assert_eq!(got, 0xDEADBEEF)
            }
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_version() {
        let data = header_bytes(NDBN_MAGIC, 9);
        assert!(matches!(
            Header::decode(&data),
            Err(NodalError::Format(FormatError::UnsupportedVersion(9)))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let data = header_bytes(NDBN_MAGIC, NDBN_VERSION);
        assert!(matches!(
            Header::decode(&data[..20]),
            Err(NodalError::Format(FormatError::Truncated { .. }))
        ));
        assert!(Header::decode(&data[..2]).is_err());
    }

    #[test]
    fn test_entry_layout() {
        let entry = TensorEntry {
            name_offset: 7,
            dtype: DType::NF4,
            rank: 2,
            layout: 0,
            has_aux: true,
            shape: [4, 8, 0, 0],
            data_offset: 128,
            data_size: 16,
            aux_offset: 192,
            aux_size: 8,
        };
        let mut buf = [0u8; ENTRY_SIZE];
        entry.encode(&mut buf);
        assert_eq!(buf[4], 4);
        assert_eq!(u64::from_le_bytes(buf[24..32].try_into().unwrap()), 128);
        assert_eq!(u64::from_le_bytes(buf[32..40].try_into().unwrap()), 16);

        let decoded = TensorEntry::decode(&buf, 0).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.dims(), &[4, 8]);
        assert_eq!(decoded.num_elements(), Some(32));
    }

    #[test]
    fn test_entry_rejects_unknown_dtype_and_rank() {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[4] = 9;
        assert!(matches!(
            TensorEntry::decode(&buf, 2),
            Err(NodalError::Format(FormatError::InvalidDType { index: 2, code: 9 }))
        ));

        buf[4] = 0;
        buf[5] = 5;
        assert!(matches!(
            TensorEntry::decode(&buf, 0),
            Err(NodalError::Format(FormatError::InvalidRank { rank: 5, .. }))
        ));
    }

    #[test]
    fn test_storage_size() {
        assert_eq!(DType::F32.storage_size(3), Some(12));
        assert_eq!(DType::BF16.storage_size(3), Some(6));
        assert_eq!(DType::NF4.storage_size(3), Some(2));
        assert_eq!(DType::NF4.storage_size(4), Some(2));
        assert_eq!(DType::F32.storage_size(u64::MAX / 2), None);
        assert_eq!(element_count(&[u32::MAX; 4]), None);
        assert_eq!(element_count(&[3, 5]), Some(15));
        assert_eq!(element_count(&[]), Some(1));
    }
}
