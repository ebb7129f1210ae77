//! Dense and NF4 matrix multiply.
//!
//! All operands are row-major. Dense: `A[M,K] x B[K,N] -> C[M,N]`.
//! NF4: `W` is stored `[N,K]`, so `C[i,j] = sum_k A[i,k] * W[j,k]` and the
//! reduction for one output column walks a contiguous weight row.

use crate::abi::{KernelCall, ensure_len};
use crate::error::Result;
use crate::kernels::elements;
use crate::{quant, simd};

struct Dims {
    m: usize,
    n: usize,
    k: usize,
}

fn dims(call: &KernelCall<'_>) -> Result<Dims> {
    Ok(Dims {
        m: call.u32(0)? as usize,
        n: call.u32(1)? as usize,
        k: call.u32(2)? as usize,
    })
}

pub fn matmul_f32(call: &mut KernelCall<'_>) -> Result<()> {
    let Dims { m, n, k } = dims(call)?;
    let a = call.input_f32(0)?;
    let b = call.input_f32(1)?;
    ensure_len("matmul A", a.len(), elements("A", m, k)?)?;
    ensure_len("matmul B", b.len(), elements("B", k, n)?)?;

    let c = call.output_f32(0)?;
    ensure_len("matmul C", c.len(), elements("C", m, n)?)?;

    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let mut acc = 0.0f32;
            for (p, &x) in row.iter().enumerate() {
                acc += x * b[p * n + j];
            }
            c[i * n + j] = acc;
        }
    }
    Ok(())
}

/// Transposes `B` once so every output is a contiguous dot product.
pub fn matmul_f32_accel(call: &mut KernelCall<'_>) -> Result<()> {
    let Dims { m, n, k } = dims(call)?;
    let a = call.input_f32(0)?;
    let b = call.input_f32(1)?;
    ensure_len("matmul A", a.len(), elements("A", m, k)?)?;
    ensure_len("matmul B", b.len(), elements("B", k, n)?)?;

    let mut bt = vec![0.0f32; k * n];
    for p in 0..k {
        for j in 0..n {
            bt[j * k + p] = b[p * n + j];
        }
    }

    let c = call.output_f32(0)?;
    ensure_len("matmul C", c.len(), elements("C", m, n)?)?;

    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            c[i * n + j] = simd::dot_f32(row, &bt[j * k..(j + 1) * k]);
        }
    }
    Ok(())
}

struct Nf4Args {
    dims: Dims,
    block_size: usize,
}

fn nf4_args(call: &KernelCall<'_>) -> Result<Nf4Args> {
    Ok(Nf4Args {
        dims: dims(call)?,
        block_size: call.u32(3)? as usize,
    })
}

pub fn matmul_nf4(call: &mut KernelCall<'_>) -> Result<()> {
    let Nf4Args { dims: Dims { m, n, k }, block_size } = nf4_args(call)?;
    let a = call.input_f32(0)?;
    let packed = call.input(1)?;
    let scales = call.input_f32(2)?;
    ensure_len("matmul A", a.len(), elements("A", m, k)?)?;
    quant::check_stream(packed, &scales, elements("W", n, k)?, block_size)?;

    let c = call.output_f32(0)?;
    ensure_len("matmul C", c.len(), elements("C", m, n)?)?;

    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let base = j * k;
            let mut acc = 0.0f32;
            for (p, &x) in row.iter().enumerate() {
                acc += x * quant::value_at(packed, &scales, block_size, base + p);
            }
            c[i * n + j] = acc;
        }
    }
    Ok(())
}

/// Dequantizes one weight row at a time and reuses it for every row of `A`.
pub fn matmul_nf4_accel(call: &mut KernelCall<'_>) -> Result<()> {
    let Nf4Args { dims: Dims { m, n, k }, block_size } = nf4_args(call)?;
    let a = call.input_f32(0)?;
    let packed = call.input(1)?;
    let scales = call.input_f32(2)?;
    ensure_len("matmul A", a.len(), elements("A", m, k)?)?;
    quant::check_stream(packed, &scales, elements("W", n, k)?, block_size)?;

    let c = call.output_f32(0)?;
    ensure_len("matmul C", c.len(), elements("C", m, n)?)?;

    let mut w_row = vec![0.0f32; k];
    for j in 0..n {
        quant::dequantize_range(packed, &scales, block_size, j * k, &mut w_row);
        for i in 0..m {
            c[i * n + j] = simd::dot_f32(&a[i * k..(i + 1) * k], &w_row);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KernelError, NodalError};
    use crate::scalar::Scalar;

    fn f32_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    fn words(len: usize) -> Vec<u32> {
        vec![0u32; len]
    }

    fn run_dense(
        kernel: fn(&mut KernelCall<'_>) -> Result<()>,
        a: &[f32],
        b: &[f32],
        m: u32,
        n: u32,
        k: u32,
    ) -> Vec<f32> {
        let a = f32_bytes(a);
        let b = f32_bytes(b);
        let mut out = words((m * n) as usize);
        let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
        let mut call = KernelCall::build(
            &[&a[..], &b[..]],
            vec![out_bytes],
            &[Scalar::U32(m), Scalar::U32(n), Scalar::U32(k)],
        )
        .unwrap();
        kernel(&mut call).unwrap();
        drop(call);
        out.iter().map(|w| f32::from_bits(*w)).collect()
    }

    #[test]
    fn test_matmul_2x2() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        assert_eq!(run_dense(matmul_f32, &a, &b, 2, 2, 2), vec![19.0, 22.0, 43.0, 50.0]);
        assert_eq!(run_dense(matmul_f32_accel, &a, &b, 2, 2, 2), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular_accel_matches() {
        let (m, n, k) = (3u32, 5u32, 19u32);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 * 0.5 - 1.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 5) as f32 * 0.25 - 0.5).collect();
        let want = run_dense(matmul_f32, &a, &b, m, n, k);
        let got = run_dense(matmul_f32_accel, &a, &b, m, n, k);
        for (w, g) in want.iter().zip(&got) {
            assert!((w - g).abs() < 1e-4, "{w} vs {g}");
        }
    }

    #[test]
    fn test_matmul_short_input() {
        let a = f32_bytes(&[1.0, 2.0]);
        let b = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let mut out = words(4);
        let mut call = KernelCall::build(
            &[&a[..], &b[..]],
            vec![bytemuck::cast_slice_mut::<u32, u8>(&mut out)],
            &[Scalar::U32(2), Scalar::U32(2), Scalar::U32(2)],
        )
        .unwrap();
        let err = matmul_f32(&mut call).unwrap_err();
        assert!(matches!(
            err,
            NodalError::Kernel(KernelError::BufferTooSmall { needed: 4, got: 2, .. })
        ));
    }

    #[test]
    fn test_matmul_wrong_scalar_tag() {
        let a = f32_bytes(&[1.0]);
        let mut out = words(1);
        let mut call = KernelCall::build(
            &[&a[..], &a[..]],
            vec![bytemuck::cast_slice_mut::<u32, u8>(&mut out)],
            &[Scalar::U32(1), Scalar::F32(1.0), Scalar::U32(1)],
        )
        .unwrap();
        assert!(matches!(
            matmul_f32(&mut call),
            Err(NodalError::Kernel(KernelError::ScalarTag { index: 1, .. }))
        ));
    }

    fn run_nf4(
        kernel: fn(&mut KernelCall<'_>) -> Result<()>,
        a: &[f32],
        packed: &[u8],
        scales: &[f32],
        dims: (u32, u32, u32, u32),
    ) -> Vec<f32> {
        let (m, n, k, bs) = dims;
        let a = f32_bytes(a);
        let scales = f32_bytes(scales);
        let mut out = words((m * n) as usize);
        let mut call = KernelCall::build(
            &[&a[..], packed, &scales[..]],
            vec![bytemuck::cast_slice_mut::<u32, u8>(&mut out)],
            &[Scalar::U32(m), Scalar::U32(n), Scalar::U32(k), Scalar::U32(bs)],
        )
        .unwrap();
        kernel(&mut call).unwrap();
        drop(call);
        out.iter().map(|w| f32::from_bits(*w)).collect()
    }

    #[test]
    fn test_nf4_matches_dense_on_dequantized_weights() {
        // block size 6 does not divide K, so blocks straddle weight rows
        let (m, n, k, bs) = (2u32, 3u32, 8u32, 6u32);
        let w: Vec<f32> = (0..n * k).map(|i| ((i * 37 % 11) as f32 - 5.0) * 0.3).collect();
        let (packed, scales) = quant::quantize(&w, bs as usize).unwrap();

        let mut w_deq = vec![0.0f32; (n * k) as usize];
        quant::dequantize(&packed, &scales, bs as usize, &mut w_deq);
        // dense B is [K,N]: transpose the [N,K] weights
        let mut b = vec![0.0f32; (k * n) as usize];
        for j in 0..n as usize {
            for p in 0..k as usize {
                b[p * n as usize + j] = w_deq[j * k as usize + p];
            }
        }

        let a: Vec<f32> = (0..m * k).map(|i| i as f32 * 0.1 - 0.7).collect();
        let dense = run_dense(matmul_f32, &a, &b, m, n, k);
        for kernel in [matmul_nf4 as fn(&mut KernelCall<'_>) -> Result<()>, matmul_nf4_accel] {
            let got = run_nf4(kernel, &a, &packed, &scales, (m, n, k, bs));
            for (d, g) in dense.iter().zip(&got) {
                assert!((d - g).abs() < 1e-4, "{d} vs {g}");
            }
        }
    }

    #[test]
    fn test_nf4_identity_codes() {
        // W = [[1, 0], [0, 1]] via codes 0xE and 0x7, scale 2
        let packed = [0x7E, 0xE7];
        let got = run_nf4(matmul_nf4, &[3.0, 4.0], &packed, &[2.0, 2.0], (1, 2, 2, 2));
        assert_eq!(got, vec![6.0, 8.0]);
    }

    #[test]
    fn test_nf4_missing_scales() {
        let a = f32_bytes(&[1.0, 1.0]);
        let packed = [0u8; 2];
        let scales = f32_bytes(&[1.0]);
        let mut out = words(2);
        let mut call = KernelCall::build(
            &[&a[..], &packed[..], &scales[..]],
            vec![bytemuck::cast_slice_mut::<u32, u8>(&mut out)],
            &[Scalar::U32(1), Scalar::U32(2), Scalar::U32(2), Scalar::U32(2)],
        )
        .unwrap();
        assert!(matches!(
            matmul_nf4(&mut call),
            Err(NodalError::Kernel(KernelError::BufferTooSmall { what: "nf4 scales", .. }))
        ));
    }
}
