use crate::abi::{KernelCall, ensure_len};
use crate::error::{KernelError, Result};
use crate::kernels::elements;

/// Gather rows of a `[vocab, dim]` table by token id.
pub fn embedding_lookup(call: &mut KernelCall<'_>) -> Result<()> {
    let n_tokens = call.u32(0)? as usize;
    let dim = call.u32(1)? as usize;
    if dim == 0 {
        return Err(KernelError::InvalidParameter("embedding dim is zero".into()).into());
    }
    let ids = call.input_u32(0)?;
    let table = call.input_f32(1)?;
    ensure_len("embedding ids", ids.len(), n_tokens)?;
    let vocab = table.len() / dim;

    let rows = call.output_f32(0)?;
    ensure_len("embedding output", rows.len(), elements("embedding", n_tokens, dim)?)?;

    for (t, &id) in ids[..n_tokens].iter().enumerate() {
        let id_usize = id as usize;
        if id_usize >= vocab {
            return Err(KernelError::TokenOutOfRange { id, vocab }.into());
        }
        rows[t * dim..(t + 1) * dim].copy_from_slice(&table[id_usize * dim..(id_usize + 1) * dim]);
    }
    Ok(())
}
