//! Numeric and tokenizer kernels plus the registry that maps op kinds to them.

pub mod add;
pub mod embedding;
pub mod matmul;
pub mod norm;
pub mod softmax;
pub mod tokenize;

use crate::abi::KernelCall;
use crate::error::{KernelError, Result};
use crate::tape::OpKind;

/// Kernels read inputs and scalars from the call and write into its outputs.
pub type KernelFn = fn(&mut KernelCall<'_>) -> Result<()>;

/// Kind to kernel table, built once and handed to the executor.
#[derive(Clone, Copy)]
pub struct KernelRegistry {
    table: [Option<KernelFn>; OpKind::COUNT],
}

impl KernelRegistry {
    /// No kernels at all. Every op fails with `UnknownOp` until registered.
    pub fn empty() -> Self {
        Self {
            table: [None; OpKind::COUNT],
        }
    }

    /// Portable reference kernels.
    pub fn generic() -> Self {
        let mut reg = Self::empty();
        for kind in OpKind::ALL {
            reg.table[kind.index()] = Some(generic_kernel(kind));
        }
        reg
    }

    /// Generic kernels with the SIMD-dispatched matmuls swapped in.
    pub fn accelerated() -> Self {
        Self::generic()
            .with_kernel(OpKind::MatMul, matmul::matmul_f32_accel)
            .with_kernel(OpKind::MatMulNf4, matmul::matmul_nf4_accel)
            .with_kernel(OpKind::Add, add::add_f32_accel)
    }

    pub fn with_kernel(mut self, kind: OpKind, kernel: KernelFn) -> Self {
        self.table[kind.index()] = Some(kernel);
        self
    }

    pub fn get(&self, kind: OpKind) -> Option<KernelFn> {
        self.table[kind.index()]
    }

    pub fn registered(&self) -> impl Iterator<Item = OpKind> + '_ {
        OpKind::ALL
            .into_iter()
            .filter(|k| self.table[k.index()].is_some())
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::generic()
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.registered()).finish()
    }
}

// Exhaustive on purpose: a new OpKind does not compile until it has a kernel.
fn generic_kernel(kind: OpKind) -> KernelFn {
    match kind {
        OpKind::MatMul => matmul::matmul_f32,
        OpKind::MatMulNf4 => matmul::matmul_nf4,
        OpKind::Softmax => softmax::softmax_f32,
        OpKind::Add => add::add_f32,
        OpKind::TokenizeBpe => tokenize::tokenize_bpe,
        OpKind::RmsNorm => norm::rms_norm_f32,
        OpKind::EmbeddingLookup => embedding::embedding_lookup,
    }
}

/// `a * b` as an element count, rejecting shapes that overflow.
pub(crate) fn elements(what: &str, a: usize, b: usize) -> std::result::Result<usize, KernelError> {
    a.checked_mul(b)
        .ok_or_else(|| KernelError::InvalidParameter(format!("{what} shape {a}x{b} overflows")))
}

#[cfg(test)]
pub(crate) mod test_util {
    pub fn f32_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    pub fn u32_bytes(v: &[u32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    pub fn floats(words: &[u32]) -> Vec<f32> {
        words.iter().map(|w| f32::from_bits(*w)).collect()
    }
}
