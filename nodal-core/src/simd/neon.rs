use core::arch::aarch64::*;

/// # Safety
/// Caller must verify NEON support. `a` and `b` must be the same length.
#[target_feature(enable = "neon")]
pub unsafe fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    unsafe {
        let n = a.len();
        let chunks = n / 4;
        let mut acc = vdupq_n_f32(0.0);
        for c in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(c * 4));
            let vb = vld1q_f32(b.as_ptr().add(c * 4));
            acc = vfmaq_f32(acc, va, vb);
        }
        let mut sum = vaddvq_f32(acc);
        for i in chunks * 4..n {
            sum += a[i] * b[i];
        }
        sum
    }
}

/// # Safety
/// Caller must verify NEON support. All three slices must be the same length.
#[target_feature(enable = "neon")]
pub unsafe fn add_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert!(a.len() == b.len() && b.len() == out.len());
    unsafe {
        let n = out.len();
        let chunks = n / 4;
        for c in 0..chunks {
            let va = vld1q_f32(a.as_ptr().add(c * 4));
            let vb = vld1q_f32(b.as_ptr().add(c * 4));
            vst1q_f32(out.as_mut_ptr().add(c * 4), vaddq_f32(va, vb));
        }
        for i in chunks * 4..n {
            out[i] = a[i] + b[i];
        }
    }
}
