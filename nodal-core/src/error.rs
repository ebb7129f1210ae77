use crate::scalar::ScalarKind;
use crate::tape::OpKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("exec error: {0}")]
    Exec(#[from] ExecError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error("tape file error: {0}")]
    Program(#[from] ProgramError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Malformed or hostile model input. Always raised before any view is trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid magic number: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u16),

    #[error("file truncated: need {needed} bytes, have {file_size}")]
    Truncated { needed: u64, file_size: u64 },

    #[error("{what} range [{offset}, +{size}) exceeds file bounds {file_size}")]
    OffsetOutOfRange {
        what: String,
        offset: u64,
        size: u64,
        file_size: u64,
    },

    #[error("tensor count {count} exceeds table capacity {capacity}")]
    CapacityExceeded { count: u64, capacity: u64 },

    #[error("tensor id {id} is not resolvable (limit {limit})")]
    InvalidTensorId { id: u32, limit: u32 },

    #[error("tensor {index}: unknown dtype code {code}")]
    InvalidDType { index: u32, code: u8 },

    #[error("tensor {index}: rank {rank} exceeds maximum 4")]
    InvalidRank { index: u32, rank: u8 },

    #[error("tensor {index}: shape holds {expected} elements, data has {got}")]
    ShapeMismatch { index: u32, expected: u64, got: u64 },

    #[error("tensor {index}: shape size overflows")]
    ShapeOverflow { index: u32 },

    #[error("invalid merge table: {0}")]
    InvalidMergeTable(String),
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("op {index}: no kernel registered for {kind:?}")]
    UnknownOp { index: usize, kind: OpKind },

    #[error("op {index}: output tensor {id} is read-only model data")]
    ReadOnlyOutput { index: usize, id: u32 },

    #[error("op {index}: tensor {id} is both read and written")]
    AliasedBuffer { index: usize, id: u32 },

    #[error("op {index} ({kind:?}) failed: {source}")]
    Kernel {
        index: usize,
        kind: OpKind,
        #[source]
        source: Box<NodalError>,
    },
}

/// Contract violations detected by a kernel while reading its call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("missing input {0}")]
    MissingInput(usize),

    #[error("missing output {0}")]
    MissingOutput(usize),

    #[error("missing scalar {0}")]
    MissingScalar(usize),

    #[error("scalar {index} has tag {got:?}, expected {expected:?}")]
    ScalarTag {
        index: usize,
        expected: ScalarKind,
        got: ScalarKind,
    },

    #[error("{what} too small: need {needed} elements, have {got}")]
    BufferTooSmall {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{0} is not aligned for its element type")]
    Misaligned(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("token id {id} out of range for vocabulary of {vocab}")]
    TokenOutOfRange { id: u32, vocab: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} capacity exceeded: requested {requested}, max {max}")]
pub struct CapacityError {
    pub what: &'static str,
    pub requested: usize,
    pub max: usize,
}

/// Problems resolving a tape file against a loaded model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(String),

    #[error("buffer {0:?} declared twice")]
    DuplicateBuffer(String),

    #[error("op {0} references the vocabulary but the model has none")]
    NoVocabulary(usize),

    #[error("tensor {id} referenced by op {index} is not in the model")]
    UnknownTensor { index: usize, id: u32 },
}

pub type Result<T> = std::result::Result<T, NodalError>;
