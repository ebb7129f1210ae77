use crate::abi::{KernelCall, ensure_len};
use crate::error::Result;

/// Max-subtracted softmax over the first `size` elements.
pub fn softmax_f32(call: &mut KernelCall<'_>) -> Result<()> {
    let size = call.u32(0)? as usize;
    let x = call.input_f32(0)?;
    ensure_len("softmax input", x.len(), size)?;
    let y = call.output_f32(0)?;
    ensure_len("softmax output", y.len(), size)?;
    if size == 0 {
        return Ok(());
    }

    let x = &x[..size];
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for (o, &v) in y.iter_mut().zip(x) {
        *o = (v - max).exp();
        sum += *o;
    }
    let inv = 1.0 / sum;
    for o in &mut y[..size] {
        *o *= inv;
    }
    Ok(())
}
