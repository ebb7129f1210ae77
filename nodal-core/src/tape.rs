//! Tape IR: an ordered list of operations over TensorIDs.

use serde::{Deserialize, Serialize};

use crate::abi::{MAX_INPUTS, MAX_OUTPUTS, MAX_SCALARS};
use crate::error::CapacityError;
use crate::scalar::Scalar;
use crate::table::TensorId;

/// Closed set of operation kinds. Each maps to exactly one kernel slot in
/// [`crate::kernels::KernelRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    MatMul,
    MatMulNf4,
    Softmax,
    Add,
    TokenizeBpe,
    RmsNorm,
    EmbeddingLookup,
}

impl OpKind {
    pub const COUNT: usize = 7;

    pub const ALL: [OpKind; OpKind::COUNT] = [
        OpKind::MatMul,
        OpKind::MatMulNf4,
        OpKind::Softmax,
        OpKind::Add,
        OpKind::TokenizeBpe,
        OpKind::RmsNorm,
        OpKind::EmbeddingLookup,
    ];

    /// Dense index used by the kernel table.
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub inputs: heapless::Vec<TensorId, MAX_INPUTS>,
    pub outputs: heapless::Vec<TensorId, MAX_OUTPUTS>,
    #[serde(default)]
    pub scalars: heapless::Vec<Scalar, MAX_SCALARS>,
}

impl Operation {
    pub fn new(
        kind: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
        scalars: &[Scalar],
    ) -> Result<Self, CapacityError> {
        Ok(Self {
            kind,
            inputs: bounded("operation inputs", inputs)?,
            outputs: bounded("operation outputs", outputs)?,
            scalars: bounded("operation scalars", scalars)?,
        })
    }
}

fn bounded<T: Clone, const N: usize>(
    what: &'static str,
    items: &[T],
) -> Result<heapless::Vec<T, N>, CapacityError> {
    heapless::Vec::from_slice(items).map_err(|_| CapacityError {
        what,
        requested: items.len(),
        max: N,
    })
}

/// Executed strictly front to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tape {
    ops: Vec<Operation>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromIterator<Operation> for Tape {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}
