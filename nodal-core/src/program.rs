//! JSON tape files.
//!
//! A tape file declares named workspace buffers and a list of ops whose
//! operands name either a model tensor, a declared buffer, or the model's
//! vocabulary segment:
//!
//! ```json
//! {
//!   "buffers": [
//!     { "name": "prompt", "init": { "text": "hello" } },
//!     { "name": "ids", "bytes": 64, "dtype": "u32" }
//!   ],
//!   "ops": [
//!     { "kind": "tokenize_bpe",
//!       "inputs": [{ "buffer": "prompt" }, "vocab"],
//!       "outputs": [{ "buffer": "ids" }],
//!       "scalars": [{ "u32": 5 }, { "u32": 16 }] }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{ProgramError, Result};
use crate::scalar::Scalar;
use crate::table::{TensorId, TensorTable};
use crate::tape::{OpKind, Operation, Tape};
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorRef {
    Tensor(TensorId),
    Buffer(String),
    Vocab,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferInit {
    Text(String),
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl BufferInit {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            BufferInit::Text(s) => s.as_bytes().to_vec(),
            BufferInit::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            BufferInit::U32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

/// How a buffer's contents are shown by `--dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferDType {
    F32,
    U32,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDecl {
    pub name: String,
    /// Size in bytes. Defaults to the size of `init`; when both are given
    /// the larger wins and the tail is zeroed.
    #[serde(default)]
    pub bytes: Option<usize>,
    #[serde(default)]
    pub init: Option<BufferInit>,
    #[serde(default)]
    pub dtype: Option<BufferDType>,
}

impl BufferDecl {
    pub fn dtype(&self) -> BufferDType {
        match (&self.dtype, &self.init) {
            (Some(d), _) => *d,
            (None, Some(BufferInit::Text(_))) => BufferDType::Bytes,
            (None, Some(BufferInit::U32(_))) => BufferDType::U32,
            _ => BufferDType::F32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDecl {
    pub kind: OpKind,
    #[serde(default)]
    pub inputs: Vec<TensorRef>,
    #[serde(default)]
    pub outputs: Vec<TensorRef>,
    #[serde(default)]
    pub scalars: Vec<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub buffers: Vec<BufferDecl>,
    #[serde(default)]
    pub ops: Vec<OpDecl>,
}

/// A program resolved against one table: ready to hand to the executor.
pub struct Prepared {
    pub tape: Tape,
    pub workspace: Workspace,
    /// Declared buffers in declaration order.
    pub buffers: Vec<(BufferDecl, TensorId)>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Allocate the declared buffers after `table`'s slots and lower every
    /// op to TensorIDs. Ops over the ABI bounds fail here.
    pub fn prepare(&self, table: &TensorTable, config: &RuntimeConfig) -> Result<Prepared> {
        let mut workspace = Workspace::for_table(table);
        let mut names: HashMap<&str, TensorId> = HashMap::new();
        let mut buffers = Vec::with_capacity(self.buffers.len());

        for decl in &self.buffers {
            if names.contains_key(decl.name.as_str()) {
                return Err(ProgramError::DuplicateBuffer(decl.name.clone()).into());
            }
            let init = decl.init.as_ref().map(BufferInit::to_bytes).unwrap_or_default();
            let size = decl.bytes.unwrap_or(0).max(init.len());
            let id = workspace.alloc(size);
            workspace.bytes_mut(id)?[..init.len()].copy_from_slice(&init);
            names.insert(&decl.name, id);
            buffers.push((decl.clone(), id));
        }

        let mut tape = Tape::new();
        for (index, decl) in self.ops.iter().enumerate() {
            let resolve = |r: &TensorRef| -> Result<TensorId> {
                match r {
                    TensorRef::Tensor(id) => match table.get(*id) {
                        Ok(_) => Ok(*id),
                        Err(_) => Err(ProgramError::UnknownTensor { index, id: *id }.into()),
                    },
                    TensorRef::Buffer(name) => names
                        .get(name.as_str())
                        .copied()
                        .ok_or_else(|| ProgramError::UnknownBuffer(name.clone()).into()),
                    TensorRef::Vocab => table
                        .vocab_id()
                        .ok_or_else(|| ProgramError::NoVocabulary(index).into()),
                }
            };
            let inputs = decl.inputs.iter().map(&resolve).collect::<Result<Vec<_>>>()?;
            let outputs = decl.outputs.iter().map(&resolve).collect::<Result<Vec<_>>>()?;

            let mut scalars = decl.scalars.clone();
            if decl.kind == OpKind::TokenizeBpe && scalars.len() == 2 {
                let cap = u32::try_from(config.bpe_scratch_capacity).unwrap_or(u32::MAX);
                scalars.push(Scalar::U32(cap));
            }
            tape.push(Operation::new(decl.kind, &inputs, &outputs, &scalars)?);
        }

        tracing::debug!(
            "prepared tape: {} ops, {} buffers",
            tape.len(),
            workspace.len()
        );
        Ok(Prepared {
            tape,
            workspace,
            buffers,
        })
    }
}
