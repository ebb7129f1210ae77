use crate::abi::{KernelCall, ensure_len};
use crate::error::Result;

/// `y = x / sqrt(mean(x^2) + eps) * weight`
pub fn rms_norm_f32(call: &mut KernelCall<'_>) -> Result<()> {
    let size = call.u32(0)? as usize;
    let eps = call.f32(1)?;
    let x = call.input_f32(0)?;
    let weight = call.input_f32(1)?;
    ensure_len("rms_norm input", x.len(), size)?;
    ensure_len("rms_norm weight", weight.len(), size)?;
    let y = call.output_f32(0)?;
    ensure_len("rms_norm output", y.len(), size)?;
    if size == 0 {
        return Ok(());
    }

    let ss: f32 = x[..size].iter().map(|v| v * v).sum();
    let inv = 1.0 / (ss / size as f32 + eps).sqrt();
    for i in 0..size {
        y[i] = x[i] * inv * weight[i];
    }
    Ok(())
}
