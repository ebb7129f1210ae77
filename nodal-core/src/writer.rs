//! NDBN image builder.
//!
//! Layout: header, tensor table directly after it, then each tensor's data
//! at the next 64-byte boundary, then the optional merge-table segment
//! (also 64-byte aligned) running to end of file.

use std::path::Path;

use crate::bpe::{MergeRule, MergeTable};
use crate::error::{FormatError, Result};
use crate::format::{
    DATA_ALIGNMENT, DType, ENTRY_SIZE, HEADER_SIZE, Header, MAX_RANK, NDBN_MAGIC, NDBN_VERSION,
    TensorEntry, element_count,
};
use crate::quant;
use crate::table::TensorId;

struct Pending {
    dtype: DType,
    shape: [u32; MAX_RANK],
    rank: u8,
    data: Vec<u8>,
    /// Tensor whose data doubles as this tensor's aux range.
    aux: Option<usize>,
}

#[derive(Default)]
pub struct NdbnWriter {
    tensors: Vec<Pending>,
    vocab: Option<Vec<u8>>,
}

impl NdbnWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Add a tensor with pre-encoded `data`. The byte length must match the
    /// shape's storage size for `dtype`.
    pub fn add_raw(&mut self, dtype: DType, dims: &[u32], data: Vec<u8>) -> Result<TensorId> {
        let index = self.tensors.len() as u32;
        if dims.len() > MAX_RANK {
            return Err(FormatError::InvalidRank {
                index,
                rank: dims.len() as u8,
            }
            .into());
        }
        let expected = element_count(dims)
            .and_then(|n| dtype.storage_size(n))
            .ok_or(FormatError::ShapeOverflow { index })?;
        if expected != data.len() as u64 {
            return Err(FormatError::ShapeMismatch {
                index,
                expected,
                got: data.len() as u64,
            }
            .into());
        }

        let mut shape = [0u32; MAX_RANK];
        shape[..dims.len()].copy_from_slice(dims);
        self.tensors.push(Pending {
            dtype,
            shape,
            rank: dims.len() as u8,
            data,
            aux: None,
        });
        Ok(index)
    }

    pub fn add_f32(&mut self, dims: &[u32], values: &[f32]) -> Result<TensorId> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add_raw(DType::F32, dims, data)
    }

    /// Quantize `values` (shape `[n, k]`, row-major) to NF4. Returns the
    /// weight id and the id of its F32 scale tensor, which is also recorded
    /// as the weight's aux range.
    pub fn add_nf4(
        &mut self,
        n: u32,
        k: u32,
        values: &[f32],
        block_size: u32,
    ) -> Result<(TensorId, TensorId)> {
        let (packed, scales) = quant::quantize(values, block_size as usize)?;
        let weight = self.add_raw(DType::NF4, &[n, k], packed)?;
        let scale_id = self.add_f32(&[scales.len() as u32], &scales)?;
        self.tensors[weight as usize].aux = Some(scale_id as usize);
        Ok((weight, scale_id))
    }

    pub fn set_merge_rules(&mut self, rules: &[MergeRule]) {
        self.vocab = Some(MergeTable::encode(rules));
    }

    /// Raw vocabulary segment. An empty segment is dropped since a zero
    /// offset means "no vocabulary".
    pub fn set_vocab_bytes(&mut self, bytes: Vec<u8>) {
        self.vocab = (!bytes.is_empty()).then_some(bytes);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let table_end = HEADER_SIZE + self.tensors.len() * ENTRY_SIZE;

        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = align(table_end as u64);
        for t in &self.tensors {
            offsets.push(cursor);
            cursor = align(cursor + t.data.len() as u64);
        }
        let vocab_offset = self.vocab.as_ref().map(|_| cursor);
        let total = cursor + self.vocab.as_ref().map_or(0, |v| v.len() as u64);

        let mut out = vec![0u8; total as usize];
        let header = Header {
            magic: NDBN_MAGIC,
            version: NDBN_VERSION,
            flags: 0,
            num_tensors: self.tensors.len() as u32,
            tensor_table_offset: HEADER_SIZE as u32,
            string_table_offset: vocab_offset.unwrap_or(0),
            reserved: 0,
        };
        let mut header_bytes = [0u8; HEADER_SIZE];
        header.encode(&mut header_bytes);
        out[..HEADER_SIZE].copy_from_slice(&header_bytes);

        for (i, t) in self.tensors.iter().enumerate() {
            let (aux_offset, aux_size) = match t.aux {
                Some(a) => (offsets[a], self.tensors[a].data.len() as u64),
                None => (0, 0),
            };
            let entry = TensorEntry {
                name_offset: 0,
                dtype: t.dtype,
                rank: t.rank,
                layout: 0,
                has_aux: t.aux.is_some(),
                shape: t.shape,
                data_offset: offsets[i],
                data_size: t.data.len() as u64,
                aux_offset,
                aux_size,
            };
            let mut record = [0u8; ENTRY_SIZE];
            entry.encode(&mut record);
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            out[at..at + ENTRY_SIZE].copy_from_slice(&record);

            let start = offsets[i] as usize;
            out[start..start + t.data.len()].copy_from_slice(&t.data);
        }

        if let (Some(offset), Some(vocab)) = (vocab_offset, &self.vocab) {
            out[offset as usize..].copy_from_slice(vocab);
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes();
        std::fs::write(path, &bytes)?;
        tracing::debug!(
            "wrote {}: {} tensors, {} bytes",
            path.display(),
            self.tensors.len(),
            bytes.len()
        );
        Ok(())
    }
}

fn align(offset: u64) -> u64 {
    offset.div_ceil(DATA_ALIGNMENT) * DATA_ALIGNMENT
}
