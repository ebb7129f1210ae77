//! Caller-owned writable buffers that tape outputs land in.
//!
//! Workspace buffers share the TensorID space with the runtime table:
//! buffer `i` is addressed as `base + i`, where `base` is the table
//! capacity. Storage is word-backed so every buffer is 4-byte aligned.

use crate::error::{FormatError, Result};
use crate::table::{TensorId, TensorTable};

#[derive(Debug, Clone)]
struct Slot {
    words: Box<[u32]>,
    len: usize,
}

impl Slot {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.len]
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    base: TensorId,
    slots: Vec<Slot>,
}

impl Workspace {
    pub fn new(base: TensorId) -> Self {
        Self {
            base,
            slots: Vec::new(),
        }
    }

    /// Workspace whose ids start right after `table`'s slots.
    pub fn for_table(table: &TensorTable) -> Self {
        Self::new(table.capacity() as TensorId)
    }

    pub fn base(&self) -> TensorId {
        self.base
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allocate a zeroed buffer of `bytes` bytes.
    pub fn alloc(&mut self, bytes: usize) -> TensorId {
        let id = self.base + self.slots.len() as TensorId;
        self.slots.push(Slot {
            words: vec![0u32; bytes.div_ceil(4)].into_boxed_slice(),
            len: bytes,
        });
        id
    }

    pub fn alloc_bytes(&mut self, data: &[u8]) -> TensorId {
        let id = self.base + self.slots.len() as TensorId;
        let mut slot = Slot {
            words: vec![0u32; data.len().div_ceil(4)].into_boxed_slice(),
            len: data.len(),
        };
        slot.bytes_mut().copy_from_slice(data);
        self.slots.push(slot);
        id
    }

    pub fn alloc_f32(&mut self, data: &[f32]) -> TensorId {
        self.alloc_bytes(bytemuck::cast_slice(data))
    }

    pub fn alloc_u32(&mut self, data: &[u32]) -> TensorId {
        self.alloc_bytes(bytemuck::cast_slice(data))
    }

    /// Index into the slot list when `id` belongs to this workspace.
    pub fn local_index(&self, id: TensorId) -> Option<usize> {
        let idx = id.checked_sub(self.base)? as usize;
        (idx < self.slots.len()).then_some(idx)
    }

    pub fn contains(&self, id: TensorId) -> bool {
        self.local_index(id).is_some()
    }

    fn slot(&self, id: TensorId) -> Result<&Slot> {
        self.local_index(id)
            .map(|i| &self.slots[i])
            .ok_or_else(|| self.invalid(id))
    }

    fn invalid(&self, id: TensorId) -> crate::error::NodalError {
        FormatError::InvalidTensorId {
            id,
            limit: self.base + self.slots.len() as TensorId,
        }
        .into()
    }

    pub fn bytes(&self, id: TensorId) -> Result<&[u8]> {
        Ok(self.slot(id)?.bytes())
    }

    pub fn bytes_mut(&mut self, id: TensorId) -> Result<&mut [u8]> {
        let idx = self.local_index(id).ok_or_else(|| self.invalid(id))?;
        Ok(self.slots[idx].bytes_mut())
    }

    pub fn f32s(&self, id: TensorId) -> Result<&[f32]> {
        let slot = self.slot(id)?;
        Ok(&bytemuck::cast_slice::<u32, f32>(&slot.words)[..slot.len / 4])
    }

    pub fn u32s(&self, id: TensorId) -> Result<&[u32]> {
        let slot = self.slot(id)?;
        Ok(&slot.words[..slot.len / 4])
    }

    /// Borrow the buffers one operation needs: shared views for `reads`,
    /// exclusive views for `writes`. Callers guarantee the two sets are
    /// disjoint; a local index in both is treated as a write.
    pub(crate) fn split(
        &mut self,
        reads: &[usize],
        writes: &[usize],
    ) -> (Vec<(usize, &[u8])>, Vec<(usize, &mut [u8])>) {
        let mut shared = Vec::with_capacity(reads.len());
        let mut exclusive = Vec::with_capacity(writes.len());
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if writes.contains(&i) {
                exclusive.push((i, slot.bytes_mut()));
            } else if reads.contains(&i) {
                shared.push((i, &*slot.bytes_mut()));
            }
        }
        (shared, exclusive)
    }
}
