use crate::block::BasicBlock;
use crate::types::Type;
use crate::value::{BlockId, FunctionId, ValueId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub id: ValueId,
    pub ty: Type,
    pub name: Option<String>,
}

/// A function definition, or a declaration when `blocks` is empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub blocks: Vec<BasicBlock>,
    /// The function's address escapes, so it needs a code address
    pub address_taken: bool,
    /// Cleared when some analysis proved the function never reaches an error state
    pub can_fail: bool,
}

impl Function {
    pub fn new<T: AsRef<str>>(id: FunctionId, name: T, ret_ty: Type) -> Self {
        Self {
            id,
            name: name.as_ref().to_string(),
            params: vec![],
            ret_ty,
            blocks: vec![],
            address_taken: false,
            can_fail: true,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_intrinsic(&self) -> bool {
        self.name.starts_with("llvm.")
    }

    pub fn is_main(&self) -> bool {
        self.name == "main"
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }
}
