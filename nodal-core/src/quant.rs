//! NF4 codec.
//!
//! Weights are packed two 4-bit codes per byte, low nibble first. A code
//! indexes [`NF4_LUT`] and the result is multiplied by the scale of the block
//! the element falls in. Blocks run over the flat element index, so element
//! `idx` uses `scales[idx / block_size]`.

use crate::error::KernelError;

/// Normal-float 4-bit codebook. Monotonically non-decreasing, code 7 is
/// exactly zero and code 14 exactly one.
pub const NF4_LUT: [f32; 16] = [
    -1.000000, -0.694417, -0.512093, -0.373103, -0.255986, -0.150166, -0.051515, 0.000000,
    0.051515, 0.150166, 0.255986, 0.373103, 0.512093, 0.694417, 1.000000, 1.250000,
];

/// Unscaled value of a 4-bit code. Only the low nibble is used.
#[inline(always)]
pub fn decode_code(code: u8) -> f32 {
    NF4_LUT[(code & 0x0F) as usize]
}

/// Code of element `idx` in a packed stream.
#[inline(always)]
pub fn code_at(packed: &[u8], idx: usize) -> u8 {
    let byte = packed[idx / 2];
    if idx % 2 == 0 { byte & 0x0F } else { byte >> 4 }
}

/// Dequantized value of element `idx`.
#[inline(always)]
pub fn value_at(packed: &[u8], scales: &[f32], block_size: usize, idx: usize) -> f32 {
    decode_code(code_at(packed, idx)) * scales[idx / block_size]
}

/// Number of scales needed to cover `elements` values.
pub fn scale_count(elements: usize, block_size: usize) -> usize {
    elements.div_ceil(block_size)
}

/// Check that a packed stream and its scales cover `elements` values.
pub fn check_stream(
    packed: &[u8],
    scales: &[f32],
    elements: usize,
    block_size: usize,
) -> Result<(), KernelError> {
    if block_size == 0 {
        return Err(KernelError::InvalidParameter("nf4 block size is zero".into()));
    }
    crate::abi::ensure_len("nf4 weights", packed.len(), elements.div_ceil(2))?;
    crate::abi::ensure_len("nf4 scales", scales.len(), scale_count(elements, block_size))
}

/// Dequantize the first `out.len()` elements of a stream.
pub fn dequantize(packed: &[u8], scales: &[f32], block_size: usize, out: &mut [f32]) {
    for (idx, v) in out.iter_mut().enumerate() {
        *v = value_at(packed, scales, block_size, idx);
    }
}

/// Dequantize `out.len()` elements starting at flat index `start`.
pub fn dequantize_range(
    packed: &[u8],
    scales: &[f32],
    block_size: usize,
    start: usize,
    out: &mut [f32],
) {
    for (i, v) in out.iter_mut().enumerate() {
        *v = value_at(packed, scales, block_size, start + i);
    }
}

/// Nearest codebook entry for a value already divided by its block scale.
pub fn nearest_code(x: f32) -> u8 {
    let mut best = 0u8;
    let mut best_err = f32::INFINITY;
    for (code, &v) in NF4_LUT.iter().enumerate() {
        let err = (v - x).abs();
        if err < best_err {
            best_err = err;
            best = code as u8;
        }
    }
    best
}

/// Quantize `values` into a packed stream plus absmax block scales.
pub fn quantize(values: &[f32], block_size: usize) -> Result<(Vec<u8>, Vec<f32>), KernelError> {
    if block_size == 0 {
        return Err(KernelError::InvalidParameter("nf4 block size is zero".into()));
    }
    let scales: Vec<f32> = values
        .chunks(block_size)
        .map(|block| {
            let absmax = block.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            if absmax == 0.0 { 1.0 } else { absmax }
        })
        .collect();

    let mut packed = vec![0u8; values.len().div_ceil(2)];
    for (idx, &v) in values.iter().enumerate() {
        let code = nearest_code(v / scales[idx / block_size]);
        if idx % 2 == 0 {
            packed[idx / 2] |= code;
        } else {
            packed[idx / 2] |= code << 4;
        }
    }
    Ok((packed, scales))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_shape() {
        assert_eq!(NF4_LUT[0], -1.0);
        assert_eq!(NF4_LUT[15], 1.25);
        for pair in NF4_LUT.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_reference_codes() {
        assert_eq!(decode_code(0x7), 0.0);
        assert_eq!(decode_code(0xE), 1.0);

        // 0xE7: low nibble 7, high nibble 14
        let packed = [0xE7u8];
        let scales = [2.0f32];
        assert!((value_at(&packed, &scales, 32, 0) - 0.0).abs() < 1e-6);
        assert!((value_at(&packed, &scales, 32, 1) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_follows_block() {
        // four elements, block size 2: elements 2,3 use the second scale
        let packed = [0xEE, 0xEE];
        let scales = [1.0, 3.0];
        let mut out = [0.0f32; 4];
        dequantize(&packed, &scales, 2, &mut out);
        assert_eq!(out, [1.0, 1.0, 3.0, 3.0]);

        let mut tail = [0.0f32; 2];
        dequantize_range(&packed, &scales, 2, 1, &mut tail);
        assert_eq!(tail, [1.0, 3.0]);
    }

    #[test]
    fn test_quantize_exact_codebook_values() {
        let values = [0.0, 1.0, -1.0, 1.024186, 2.0, 0.0];
        let (packed, scales) = quantize(&values, 3).unwrap();
        assert_eq!(scales, vec![1.0, 2.0]);
        let mut out = [0.0f32; 6];
        dequantize(&packed, &scales, 3, &mut out);
        for (a, b) in out.iter().zip(values.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_quantize_zero_block_size() {
        assert!(quantize(&[1.0], 0).is_err());
    }

    #[test]
    fn test_check_stream() {
        assert!(check_stream(&[0; 2], &[1.0], 4, 4).is_ok());
        assert!(check_stream(&[0; 1], &[1.0], 4, 4).is_err());
        assert!(check_stream(&[0; 2], &[1.0], 4, 2).is_err());
        assert!(check_stream(&[0; 2], &[1.0], 4, 0).is_err());
    }
}
