use opsem_ir::IrError;
use thiserror::Error;

/// How a failure affects the run that produced it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run must stop; continuing would produce a wrong term
    Fatal,
    /// The engine recovered locally; see [`Recovery`]
    Recoverable,
}

/// A condition the engine handled locally without stopping.
///
/// These are never returned as errors. The context records them so callers can tell a
/// sound-but-incomplete run from a complete one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// An instruction of an unmodeled type was skipped
    IgnoredInstruction(String),
    /// A load or store ran without its memory region tag and was dropped
    SkippedMemoryAccess(String),
    /// A branch statically contradicted the requested edge
    InfeasibleEdge(String),
    /// A call was replaced by a fresh value
    NondetCall(String),
}

impl Recovery {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Recoverable
    }
}

#[derive(Debug, Error)]
pub enum OpSemError {
    #[error("Malformed program")]
    Ir(#[from] IrError),
    #[error("Unsupported {what} in `{inst}`")]
    Unsupported { what: &'static str, inst: String },
    #[error("Unsupported {op} with symbolic length in `{inst}`")]
    SymbolicLength { op: &'static str, inst: String },
    #[error("{op} of {len} bytes exceeds the unroll limit of {limit} bytes")]
    UnrollLimit {
        op: &'static str,
        len: u64,
        limit: u64,
    },
    #[error("A memory transfer was attempted on a scalar region in `{inst}`")]
    ScalarMemTransfer { inst: String },
    #[error("Phi `{inst}` has no incoming value for its predecessor")]
    MissingPhiIncoming { inst: String },
    #[error("No way to model call `{inst}`")]
    UnhandledCall { inst: String },
    #[error("Cannot {op} an i{from} to an i{to}")]
    CastWidth { op: &'static str, from: u32, to: u32 },
    #[error("Values of type {0} have no symbolic representation")]
    UnsupportedType(String),
    #[error("Expected a {expected} term, found a {found} term")]
    SortMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("A z3 array selection operation returned something other than a bitvector")]
    UnexpectedArraySort,
    #[error("Something tried to access 0 bytes of memory")]
    ZeroSizedAccess,
    #[error("A memory term of one representation was handed to the other")]
    MemReprMismatch,
    #[error("A parameter of the summary applied in `{inst}` has no SMT term")]
    UnsortedSummaryArgument { inst: String },
    #[error("Summary of `{inst}` takes {expected} parameters, the call supplies {found}")]
    SummaryArity {
        inst: String,
        expected: usize,
        found: usize,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Solver pop without a matching push")]
    NoScopeToPop,
    #[error("The interpreter is not positioned at an instruction")]
    NoCurrentInstruction,
}

impl OpSemError {
    /// Every error the engine returns stops the run; recoverable conditions are recorded as
    /// [`Recovery`] values instead
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }
}
