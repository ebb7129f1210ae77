//! BPE tokenize kernel.
//!
//! Inputs: raw bytes, serialized merge table. Outputs: token ids, and an
//! optional one-word count. Scalars: `input_len`, `max_tokens`, and an
//! optional scratch capacity (defaults to [`DEFAULT_SCRATCH_CAPACITY`]).
//! Results longer than `max_tokens` are truncated; unused id slots are
//! zeroed.

use crate::abi::{KernelCall, ensure_len};
use crate::bpe::{BpeEngine, DEFAULT_SCRATCH_CAPACITY, MergeTable};
use crate::error::Result;

pub fn tokenize_bpe(call: &mut KernelCall<'_>) -> Result<()> {
    let input_len = call.u32(0)? as usize;
    let max_tokens = call.u32(1)? as usize;
    let scratch = if call.num_scalars() > 2 {
        call.u32(2)? as usize
    } else {
        DEFAULT_SCRATCH_CAPACITY
    };

    let bytes = call.input(0)?;
    ensure_len("tokenizer input", bytes.len(), input_len)?;
    let table = MergeTable::parse(call.input(1)?)?;
    let tokens = BpeEngine::with_capacity(&table, scratch).encode(&bytes[..input_len])?;

    let written = tokens.len().min(max_tokens);
    let ids = call.output_u32(0)?;
    ensure_len("token ids", ids.len(), max_tokens)?;
    ids[..written].copy_from_slice(&tokens[..written]);
    ids[written..].fill(0);

    if call.num_outputs() > 1 {
        let count = call.output_u32(1)?;
        ensure_len("token count", count.len(), 1)?;
        count[0] = written as u32;
    }
    tracing::trace!(input_len, tokens = tokens.len(), written, "bpe tokenize");
    Ok(())
}
