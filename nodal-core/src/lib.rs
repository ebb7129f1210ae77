pub mod abi;
pub mod bpe;
pub mod config;
pub mod error;
pub mod executor;
pub mod format;
pub mod kernels;
pub mod loader;
pub mod mmap;
pub mod program;
pub mod quant;
pub mod scalar;
pub mod simd;
pub mod table;
pub mod tape;
pub mod workspace;
pub mod writer;

pub use abi::KernelCall;
pub use config::RuntimeConfig;
pub use error::{NodalError, Result};
pub use executor::Executor;
pub use kernels::KernelRegistry;
pub use loader::load;
pub use mmap::ModelMapping;
pub use scalar::Scalar;
pub use table::{TensorId, TensorTable};
pub use tape::{OpKind, Operation, Tape};
pub use workspace::Workspace;
pub use writer::NdbnWriter;
