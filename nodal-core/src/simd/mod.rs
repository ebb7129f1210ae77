pub mod scalar;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod avx2;

#[cfg(target_arch = "aarch64")]
pub mod neon;

use std::sync::atomic::{AtomicU8, Ordering::Relaxed};

static LEVEL: AtomicU8 = AtomicU8::new(0);

const SCALAR: u8 = 1;
const AVX2: u8 = 2;
const NEON: u8 = 3;

fn dispatch_level() -> u8 {
    let l = LEVEL.load(Relaxed);
    if l != 0 {
        return l;
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    let detected = if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        AVX2
    } else {
        SCALAR
    };

    #[cfg(target_arch = "aarch64")]
    let detected = if std::arch::is_aarch64_feature_detected!("neon") {
        NEON
    } else {
        SCALAR
    };

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    let detected = SCALAR;

    LEVEL.store(detected, Relaxed);
    detected
}

/// Name of the active instruction set, for logs and `--audit`.
pub fn level_name() -> &'static str {
    match dispatch_level() {
        AVX2 => "avx2+fma",
        NEON => "neon",
        _ => "scalar",
    }
}

/// Dot product over the common prefix of `a` and `b`.
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    if dispatch_level() == AVX2 {
        return unsafe { avx2::dot_f32(a, b) };
    }

    #[cfg(target_arch = "aarch64")]
    if dispatch_level() == NEON {
        return unsafe { neon::dot_f32(a, b) };
    }

    scalar::dot_f32(a, b)
}

/// `out[i] = a[i] + b[i]` over the shortest of the three.
pub fn add_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    let n = a.len().min(b.len()).min(out.len());
    let (a, b, out) = (&a[..n], &b[..n], &mut out[..n]);

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    if dispatch_level() == AVX2 {
        unsafe { avx2::add_f32(a, b, out) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    if dispatch_level() == NEON {
        unsafe { neon::add_f32(a, b, out) };
        return;
    }

    scalar::add_f32(a, b, out)
}
