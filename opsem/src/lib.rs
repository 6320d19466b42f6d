pub mod alu;
pub mod cfg;
mod config;
pub mod context;
mod error;
pub mod memory;
pub mod semantics;
mod solver;
pub mod value;

pub use opsem_ir as ir;

pub use config::{AllocatorKind, MemReprKind, OpSemConfig, TrackLevel};
pub use context::OpSemContext;
pub use error::{ErrorKind, OpSemError, Recovery};
pub use semantics::{BvOpSem, EdgeTrace, FunctionSummary};
pub use solver::{SolverService, default_tactic};
