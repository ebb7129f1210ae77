use std::path::Path;

use crate::error::{FormatError, Result};
use crate::format::{ENTRY_SIZE, Header, TensorEntry};
use crate::mmap::ModelMapping;
use crate::table::{ByteRange, TensorSlot, TensorTable};

/// Map `path` and resolve its tensor table into a runtime table of at most
/// `capacity` slots. Fails closed: on any error nothing is returned and the
/// mapping is dropped.
pub fn load(path: &Path, capacity: usize) -> Result<(ModelMapping, TensorTable)> {
    let mapping = ModelMapping::open(path)?;
    match parse_table(&mapping, capacity) {
        Ok(table) => {
            tracing::info!(
                "loaded {}: {} tensors, {} bytes mapped, vocab: {}",
                path.display(),
                table.tensor_count(),
                mapping.len(),
                table.vocab_id().is_some()
            );
            Ok((mapping, table))
        }
        Err(e) => {
            tracing::warn!("rejected {}: {e}", path.display());
            Err(e)
        }
    }
}

/// Validate an NDBN image and build its runtime table. Every entry is
/// decoded and bounds-checked before the first slot is populated.
pub fn parse_table(data: &[u8], capacity: usize) -> Result<TensorTable> {
    let file_size = data.len() as u64;
    let header = Header::decode(data)?;

    let usable = if header.has_vocab() {
        capacity.saturating_sub(1)
    } else {
        capacity
    };
    let count = header.num_tensors as u64;
    if count > usable as u64 || (header.has_vocab() && capacity == 0) {
        return Err(FormatError::CapacityExceeded {
            count,
            capacity: usable as u64,
        }
        .into());
    }

    let table_offset = header.tensor_table_offset as u64;
    if table_offset >= file_size {
        return Err(FormatError::OffsetOutOfRange {
            what: "tensor table".into(),
            offset: table_offset,
            size: 0,
            file_size,
        }
        .into());
    }
    let table_range = ByteRange::checked(
        "tensor table",
        table_offset,
        count * ENTRY_SIZE as u64,
        file_size,
    )?;
    let records = table_range.slice(data)?;

    let mut slots = Vec::with_capacity(count as usize);
    for (i, record) in records.chunks_exact(ENTRY_SIZE).enumerate() {
        let index = i as u32;
        let entry = TensorEntry::decode(record, index)?;
        let data_range = ByteRange::checked(
            &format!("tensor {index} data"),
            entry.data_offset,
            entry.data_size,
            file_size,
        )?;
        let aux = if entry.has_aux {
            Some(ByteRange::checked(
                &format!("tensor {index} aux"),
                entry.aux_offset,
                entry.aux_size,
                file_size,
            )?)
        } else {
            None
        };
        slots.push(TensorSlot {
            entry: Some(entry),
            data: data_range,
            aux,
        });
    }

    let vocab = if header.has_vocab() {
        let offset = header.string_table_offset;
        if offset >= file_size {
            return Err(FormatError::OffsetOutOfRange {
                what: "vocabulary segment".into(),
                offset,
                size: 0,
                file_size,
            }
            .into());
        }
        Some(ByteRange::checked(
            "vocabulary segment",
            offset,
            file_size - offset,
            file_size,
        )?)
    } else {
        None
    };

    let mut table = TensorTable::new(capacity);
    for slot in slots {
        table.push_tensor(slot);
    }
    if let Some(range) = vocab {
        table.set_vocab(range);
    }
    Ok(table)
}
