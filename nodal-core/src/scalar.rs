use serde::{Deserialize, Serialize};

use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    U32,
    I32,
    F32,
}

/// Tagged operation parameter. Reads go through the checked accessors so a
/// kernel can never reinterpret one member as another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    U32(u32),
    I32(i32),
    F32(f32),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::F32(_) => ScalarKind::F32,
        }
    }

    pub fn as_u32(&self, index: usize) -> Result<u32, KernelError> {
        match *self {
            Scalar::U32(v) => Ok(v),
            other => Err(mismatch(index, ScalarKind::U32, other)),
        }
    }

    pub fn as_i32(&self, index: usize) -> Result<i32, KernelError> {
        match *self {
            Scalar::I32(v) => Ok(v),
            other => Err(mismatch(index, ScalarKind::I32, other)),
        }
    }

    pub fn as_f32(&self, index: usize) -> Result<f32, KernelError> {
        match *self {
            Scalar::F32(v) => Ok(v),
            other => Err(mismatch(index, ScalarKind::F32, other)),
        }
    }
}

fn mismatch(index: usize, expected: ScalarKind, got: Scalar) -> KernelError {
    tracing::error!("scalar {index}: read as {expected:?}, tagged {:?}", got.kind());
    KernelError::ScalarTag {
        index,
        expected,
        got: got.kind(),
    }
}
