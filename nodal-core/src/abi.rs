//! Kernel call ABI: the resolved, format-agnostic bundle a kernel receives.
//!
//! A call holds at most [`MAX_INPUTS`] inputs, [`MAX_OUTPUTS`] outputs and
//! [`MAX_SCALARS`] scalars. Pushing past a bound is a [`CapacityError`] at
//! construction time; kernels never see an oversized call.

use std::borrow::Cow;

use crate::error::{CapacityError, KernelError};
use crate::scalar::Scalar;

pub const MAX_INPUTS: usize = 8;
pub const MAX_OUTPUTS: usize = 4;
pub const MAX_SCALARS: usize = 8;

/// Built fresh for every operation and dropped when the kernel returns.
#[derive(Debug, Default)]
pub struct KernelCall<'a> {
    inputs: heapless::Vec<&'a [u8], MAX_INPUTS>,
    outputs: heapless::Vec<&'a mut [u8], MAX_OUTPUTS>,
    scalars: heapless::Vec<Scalar, MAX_SCALARS>,
}

impl<'a> KernelCall<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor used by tests and direct kernel callers.
    pub fn build(
        inputs: &[&'a [u8]],
        outputs: Vec<&'a mut [u8]>,
        scalars: &[Scalar],
    ) -> Result<Self, CapacityError> {
        let mut call = Self::new();
        for &input in inputs {
            call.push_input(input)?;
        }
        for output in outputs {
            call.push_output(output)?;
        }
        for &scalar in scalars {
            call.push_scalar(scalar)?;
        }
        Ok(call)
    }

    pub fn push_input(&mut self, buf: &'a [u8]) -> Result<(), CapacityError> {
        let len = self.inputs.len();
        self.inputs.push(buf).map_err(|_| CapacityError {
            what: "kernel inputs",
            requested: len + 1,
            max: MAX_INPUTS,
        })
    }

    pub fn push_output(&mut self, buf: &'a mut [u8]) -> Result<(), CapacityError> {
        let len = self.outputs.len();
        self.outputs.push(buf).map_err(|_| CapacityError {
            what: "kernel outputs",
            requested: len + 1,
            max: MAX_OUTPUTS,
        })
    }

    pub fn push_scalar(&mut self, scalar: Scalar) -> Result<(), CapacityError> {
        let len = self.scalars.len();
        self.scalars.push(scalar).map_err(|_| CapacityError {
            what: "kernel scalars",
            requested: len + 1,
            max: MAX_SCALARS,
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_scalars(&self) -> usize {
        self.scalars.len()
    }

    pub fn input(&self, i: usize) -> Result<&'a [u8], KernelError> {
        self.inputs
            .get(i)
            .copied()
            .ok_or(KernelError::MissingInput(i))
    }

    /// Input `i` as f32. Borrowed in place when the bytes are suitably
    /// aligned, decoded into an owned copy otherwise.
    pub fn input_f32(&self, i: usize) -> Result<Cow<'a, [f32]>, KernelError> {
        let bytes = self.input(i)?;
        let bytes = &bytes[..bytes.len() - bytes.len() % 4];
        if cfg!(target_endian = "little") {
            if let Ok(view) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
                return Ok(Cow::Borrowed(view));
            }
        }
        Ok(Cow::Owned(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }

    /// Input `i` as u32, with the same borrow-or-decode behaviour.
    pub fn input_u32(&self, i: usize) -> Result<Cow<'a, [u32]>, KernelError> {
        let bytes = self.input(i)?;
        let bytes = &bytes[..bytes.len() - bytes.len() % 4];
        if cfg!(target_endian = "little") {
            if let Ok(view) = bytemuck::try_cast_slice::<u8, u32>(bytes) {
                return Ok(Cow::Borrowed(view));
            }
        }
        Ok(Cow::Owned(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }

    pub fn output(&mut self, i: usize) -> Result<&mut [u8], KernelError> {
        self.outputs
            .get_mut(i)
            .map(|b| &mut **b)
            .ok_or(KernelError::MissingOutput(i))
    }

    pub fn output_f32(&mut self, i: usize) -> Result<&mut [f32], KernelError> {
        let bytes = self.output(i)?;
        let len = bytes.len() - bytes.len() % 4;
        bytemuck::try_cast_slice_mut(&mut bytes[..len])
            .map_err(|_| KernelError::Misaligned("f32 output"))
    }

    pub fn output_u32(&mut self, i: usize) -> Result<&mut [u32], KernelError> {
        let bytes = self.output(i)?;
        let len = bytes.len() - bytes.len() % 4;
        bytemuck::try_cast_slice_mut(&mut bytes[..len])
            .map_err(|_| KernelError::Misaligned("u32 output"))
    }

    pub fn scalar(&self, i: usize) -> Result<Scalar, KernelError> {
        self.scalars
            .get(i)
            .copied()
            .ok_or(KernelError::MissingScalar(i))
    }

    pub fn u32(&self, i: usize) -> Result<u32, KernelError> {
        self.scalar(i)?.as_u32(i)
    }

    pub fn f32(&self, i: usize) -> Result<f32, KernelError> {
        self.scalar(i)?.as_f32(i)
    }
}

/// Check that a view holds at least `needed` elements.
pub fn ensure_len(what: &'static str, have: usize, needed: usize) -> Result<(), KernelError> {
    if have < needed {
        Err(KernelError::BufferTooSmall {
            what,
            needed,
            got: have,
        })
    } else {
        Ok(())
    }
}
