//! Tensor runtime table: TensorID -> validated view into the model mapping.
//!
//! The table is populated once by the loader and is read-only afterwards.
//! It stores byte ranges rather than borrowed slices so the caller can own
//! it independently of the mapping; every range was checked against the
//! mapping's length at load time and is re-checked when sliced.
//!
//! When the file carries a vocabulary segment it occupies the last slot
//! (`capacity - 1`), so at most `capacity - 1` tensors fit.

use crate::error::{FormatError, Result};
use crate::format::TensorEntry;

pub type TensorId = u32;

/// A window `[offset, offset + len)` into the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    /// Validate `[offset, offset + size)` against `file_size`. Overflow of the
    /// end offset counts as out of range.
    pub fn checked(what: &str, offset: u64, size: u64, file_size: u64) -> Result<ByteRange> {
        match offset.checked_add(size) {
            Some(end) if end <= file_size => Ok(ByteRange { offset, len: size }),
            _ => Err(FormatError::OffsetOutOfRange {
                what: what.to_string(),
                offset,
                size,
                file_size,
            }
            .into()),
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// Slice this range out of `bytes`, refusing ranges that don't fit.
    pub fn slice<'m>(&self, bytes: &'m [u8]) -> Result<&'m [u8]> {
        let err = || FormatError::OffsetOutOfRange {
            what: "view".into(),
            offset: self.offset,
            size: self.len,
            file_size: bytes.len() as u64,
        };
        let start = usize::try_from(self.offset).map_err(|_| err())?;
        let end = usize::try_from(self.end()).map_err(|_| err())?;
        Ok(bytes.get(start..end).ok_or_else(err)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorSlot {
    /// `None` for the vocabulary segment.
    pub entry: Option<TensorEntry>,
    pub data: ByteRange,
    pub aux: Option<ByteRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorTable {
    slots: Vec<Option<TensorSlot>>,
    tensor_count: usize,
    has_vocab: bool,
}

impl TensorTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            tensor_count: 0,
            has_vocab: false,
        }
    }

    pub(crate) fn push_tensor(&mut self, slot: TensorSlot) {
        debug_assert!(self.tensor_count < self.usable_capacity());
        self.slots[self.tensor_count] = Some(slot);
        self.tensor_count += 1;
    }

    pub(crate) fn set_vocab(&mut self, data: ByteRange) {
        let idx = self.slots.len() - 1;
        debug_assert!(self.tensor_count <= idx);
        self.slots[idx] = Some(TensorSlot {
            entry: None,
            data,
            aux: None,
        });
        self.has_vocab = true;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots available to tensors once the vocabulary reservation is taken.
    pub fn usable_capacity(&self) -> usize {
        if self.has_vocab {
            self.capacity() - 1
        } else {
            self.capacity()
        }
    }

    pub fn tensor_count(&self) -> usize {
        self.tensor_count
    }

    /// Slot id holding the vocabulary segment, if the file has one.
    pub fn vocab_id(&self) -> Option<TensorId> {
        self.has_vocab.then(|| (self.capacity() - 1) as TensorId)
    }

    /// O(1) lookup. Unpopulated and out-of-range ids are `InvalidTensorId`.
    pub fn get(&self, id: TensorId) -> Result<&TensorSlot> {
        self.slots
            .get(id as usize)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| {
                FormatError::InvalidTensorId {
                    id,
                    limit: self.capacity() as u32,
                }
                .into()
            })
    }

    /// Resolve `id` to its data view inside `model`.
    pub fn view<'m>(&self, id: TensorId, model: &'m [u8]) -> Result<&'m [u8]> {
        self.get(id)?.data.slice(model)
    }

    /// Resolve `id` to its aux (scale) view, if it has one.
    pub fn aux_view<'m>(&self, id: TensorId, model: &'m [u8]) -> Result<Option<&'m [u8]>> {
        match self.get(id)?.aux {
            Some(range) => Ok(Some(range.slice(model)?)),
            None => Ok(None),
        }
    }

    /// Populated tensor slots in id order (vocabulary excluded).
    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &TensorSlot)> {
        self.slots[..self.tensor_count]
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i as TensorId, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodalError;

    fn slot(offset: u64, len: u64) -> TensorSlot {
        TensorSlot {
            entry: None,
            data: ByteRange { offset, len },
            aux: None,
        }
    }

    #[test]
    fn test_checked_range() {
        assert!(ByteRange::checked("t", 0, 10, 10).is_ok());
        assert!(ByteRange::checked("t", 10, 0, 10).is_ok());
        assert!(ByteRange::checked("t", 4, 7, 10).is_err());
        // end offset overflow
        assert!(matches!(
            ByteRange::checked("t", u64::MAX, 2, 10),
            Err(NodalError::Format(FormatError::OffsetOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_lookup_and_views() {
        let bytes: Vec<u8> = (0..16).collect();
        let mut table = TensorTable::new(4);
        table.push_tensor(slot(2, 3));
        table.push_tensor(slot(8, 4));

        assert_eq!(table.tensor_count(), 2);
        assert_eq!(table.view(0, &bytes).unwrap(), &[2, 3, 4]);
        assert_eq!(table.view(1, &bytes).unwrap(), &[8, 9, 10, 11]);
        assert_eq!(table.tensors().count(), 2);
    }

    #[test]
    fn test_unpopulated_and_out_of_range_ids() {
        let mut table = TensorTable::new(4);
        table.push_tensor(slot(0, 1));
        for id in [1, 3, 4, 1000] {
            assert!(matches!(
                table.get(id),
                Err(NodalError::Format(FormatError::InvalidTensorId { .. }))
            ));
        }
    }

    #[test]
    fn test_vocab_reserves_last_slot() {
        let mut table = TensorTable::new(3);
        assert_eq!(table.usable_capacity(), 3);
        table.set_vocab(ByteRange { offset: 4, len: 2 });
        assert_eq!(table.usable_capacity(), 2);
        assert_eq!(table.vocab_id(), Some(2));
        assert!(table.get(2).unwrap().entry.is_none());
        assert_eq!(table.tensors().count(), 0);
    }

    #[test]
    fn test_view_rechecks_against_mapping() {
        let mut table = TensorTable::new(1);
        table.push_tensor(slot(4, 8));
        let short = [0u8; 6];
        assert!(table.view(0, &short).is_err());
    }
}
