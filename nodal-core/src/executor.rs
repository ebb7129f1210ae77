//! Tape dispatch loop.
//!
//! Ops run strictly in tape order, one at a time. Each op resolves its ids
//! against the read-only model table and the caller's workspace, builds a
//! fresh [`KernelCall`] and hands it to the kernel registered for its kind.
//! The first failure aborts the run.

use crate::abi::{KernelCall, MAX_OUTPUTS};
use crate::error::{CapacityError, ExecError, FormatError, NodalError, Result};
use crate::kernels::KernelRegistry;
use crate::table::{TensorId, TensorTable};
use crate::tape::{Operation, Tape};
use crate::workspace::Workspace;

pub struct Executor {
    registry: KernelRegistry,
}

impl Executor {
    pub fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Run every op of `tape`. `model` is the mapped file `table` was built
    /// from; outputs land in `workspace`.
    pub fn run(
        &self,
        tape: &Tape,
        model: &[u8],
        table: &TensorTable,
        workspace: &mut Workspace,
    ) -> Result<()> {
        for (index, op) in tape.ops().iter().enumerate() {
            if let Err(e) = self.dispatch(index, op, model, table, workspace) {
                tracing::warn!("op {index} ({:?}) aborted the run: {e}", op.kind);
                return Err(e);
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        index: usize,
        op: &Operation,
        model: &[u8],
        table: &TensorTable,
        workspace: &mut Workspace,
    ) -> Result<()> {
        let kernel = self.registry.get(op.kind).ok_or(ExecError::UnknownOp {
            index,
            kind: op.kind,
        })?;

        let mut writes: heapless::Vec<usize, MAX_OUTPUTS> = heapless::Vec::new();
        for &id in &op.outputs {
            let local = output_slot(index, id, table, workspace)?;
            if writes.contains(&local) {
                return Err(ExecError::AliasedBuffer { index, id }.into());
            }
            writes.push(local).map_err(|_| CapacityError {
                what: "operation outputs",
                requested: op.outputs.len(),
                max: MAX_OUTPUTS,
            })?;
        }

        let mut locals = Vec::with_capacity(op.inputs.len());
        let mut reads = Vec::with_capacity(op.inputs.len());
        for &id in &op.inputs {
            let local = workspace.local_index(id);
            match local {
                Some(l) if writes.contains(&l) => {
                    return Err(ExecError::AliasedBuffer { index, id }.into());
                }
                Some(l) => reads.push(l),
                None => {
                    table.get(id)?;
                }
            }
            locals.push(local);
        }

        let base = workspace.base();
        let (shared, mut exclusive) = workspace.split(&reads, &writes);

        let mut call = KernelCall::new();
        for (&id, local) in op.inputs.iter().zip(&locals) {
            let view = match local {
                Some(l) => shared
                    .iter()
                    .find(|(i, _)| i == l)
                    .map(|(_, b)| *b)
                    .ok_or_else(|| missing(id, base))?,
                None => table.view(id, model)?,
            };
            call.push_input(view)?;
        }
        for (&id, local) in op.outputs.iter().zip(&writes) {
            let pos = exclusive
                .iter()
                .position(|(i, _)| i == local)
                .ok_or_else(|| missing(id, base))?;
            let (_, buf) = exclusive.swap_remove(pos);
            call.push_output(buf)?;
        }
        for &scalar in &op.scalars {
            call.push_scalar(scalar)?;
        }

        tracing::debug!(
            index,
            kind = ?op.kind,
            inputs = call.num_inputs(),
            outputs = call.num_outputs(),
            scalars = call.num_scalars(),
            "dispatch"
        );
        kernel(&mut call).map_err(|source| {
            ExecError::Kernel {
                index,
                kind: op.kind,
                source: Box::new(source),
            }
            .into()
        })
    }
}

/// Local workspace index for an output id. Model tensors are read-only.
fn output_slot(
    index: usize,
    id: TensorId,
    table: &TensorTable,
    workspace: &Workspace,
) -> Result<usize> {
    if let Some(local) = workspace.local_index(id) {
        return Ok(local);
    }
    if id < workspace.base() {
        table.get(id)?;
        return Err(ExecError::ReadOnlyOutput { index, id }.into());
    }
    Err(missing(id, workspace.base() + workspace.len() as TensorId))
}

fn missing(id: TensorId, limit: TensorId) -> NodalError {
    FormatError::InvalidTensorId { id, limit }.into()
}
