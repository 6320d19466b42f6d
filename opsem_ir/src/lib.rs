mod block;
pub mod builder;
pub(crate) mod display;
pub(crate) mod error;
mod function;
mod global;
mod instruction;
mod module;
mod types;
mod value;

pub use block::BasicBlock;
pub use builder::{BlockBuilder, ModuleBuilder};
pub use error::IrError;
pub use function::{Function, Param};
pub use global::GlobalVariable;
pub use instruction::*;
pub use module::{InstLoc, Module, ValueDef};
pub use types::Type;
pub use value::{BlockId, Constant, FunctionId, GlobalId, Operand, RegionId, ValueId};
