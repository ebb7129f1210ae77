use crate::abi::{KernelCall, ensure_len};
use crate::error::Result;
use crate::simd;

pub fn add_f32(call: &mut KernelCall<'_>) -> Result<()> {
    let size = call.u32(0)? as usize;
    let a = call.input_f32(0)?;
    let b = call.input_f32(1)?;
    ensure_len("add lhs", a.len(), size)?;
    ensure_len("add rhs", b.len(), size)?;
    let c = call.output_f32(0)?;
    ensure_len("add output", c.len(), size)?;

    for i in 0..size {
        c[i] = a[i] + b[i];
    }
    Ok(())
}

pub fn add_f32_accel(call: &mut KernelCall<'_>) -> Result<()> {
    let size = call.u32(0)? as usize;
    let a = call.input_f32(0)?;
    let b = call.input_f32(1)?;
    ensure_len("add lhs", a.len(), size)?;
    ensure_len("add rhs", b.len(), size)?;
    let c = call.output_f32(0)?;
    ensure_len("add output", c.len(), size)?;

    simd::add_f32(&a[..size], &b[..size], &mut c[..size]);
    Ok(())
}
