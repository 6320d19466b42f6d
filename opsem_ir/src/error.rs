use crate::value::{BlockId, FunctionId, GlobalId, ValueId};
use thiserror::Error;

/// A structural problem with a [`Module`](crate::Module)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    /// A block id was referenced that no function defines
    #[error("unknown basic block {0}")]
    UnknownBlock(BlockId),
    /// A function id was referenced that the module doesn't define
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),
    /// A global id was referenced that the module doesn't define
    #[error("unknown global {0}")]
    UnknownGlobal(GlobalId),
    /// A value id was referenced that no instruction or parameter defines
    #[error("unknown value {0}")]
    UnknownValue(ValueId),
    /// Two definitions share one value id
    #[error("value {0} is defined more than once")]
    DuplicateValue(ValueId),
    /// Two blocks share one block id
    #[error("block {0} is defined more than once")]
    DuplicateBlock(BlockId),
    /// Every block must end in exactly one terminator
    #[error("block {0} does not end in a terminator")]
    MissingTerminator(BlockId),
    /// A terminator showed up before the end of a block
    #[error("block {0} has a terminator before its last instruction")]
    EarlyTerminator(BlockId),
    /// PHI nodes must form a prefix of their block
    #[error("block {0} has a phi node after a non-phi instruction")]
    MisplacedPhi(BlockId),
    /// A function with a body must have an entry block
    #[error("function {0} has no entry block")]
    EmptyFunction(FunctionId),
    /// A function name was looked up and not found
    #[error("no function named {0}")]
    NoSuchFunction(String),
}
