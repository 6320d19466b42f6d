use crate::block::BasicBlock;
use crate::error::IrError;
use crate::function::Function;
use crate::global::GlobalVariable;
use crate::instruction::Instruction;
use crate::types::Type;
use crate::value::{BlockId, FunctionId, GlobalId, ValueId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Where a value is defined
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueDef {
    Param { function: FunctionId, index: usize },
    Inst(InstLoc),
}

/// The position of an instruction: its block and its index within the block
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstLoc {
    pub block: BlockId,
    pub index: usize,
}

#[derive(Clone, Debug, Default)]
struct ModuleIndex {
    functions: HashMap<FunctionId, usize>,
    function_names: HashMap<String, FunctionId>,
    globals: HashMap<GlobalId, usize>,
    blocks: HashMap<BlockId, (usize, usize)>,
    values: HashMap<ValueId, (ValueDef, Type)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawModule {
    functions: Vec<Function>,
    globals: Vec<GlobalVariable>,
}

/// A whole program: functions and globals, indexed for lookup by id.
///
/// Ids are unique across the module, so a [`ValueId`] or [`BlockId`] identifies its definition
/// without naming its function.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "RawModule", try_from = "RawModule")]
pub struct Module {
    functions: Vec<Function>,
    globals: Vec<GlobalVariable>,
    index: ModuleIndex,
}

impl From<Module> for RawModule {
    fn from(value: Module) -> Self {
        Self {
            functions: value.functions,
            globals: value.globals,
        }
    }
}

impl TryFrom<RawModule> for Module {
    type Error = IrError;

    fn try_from(value: RawModule) -> Result<Self, Self::Error> {
        Module::new(value.functions, value.globals)
    }
}

impl Module {
    /// Build a module, checking that ids are unique and blocks are well-formed
    pub fn new(functions: Vec<Function>, globals: Vec<GlobalVariable>) -> Result<Self, IrError> {
        let mut index = ModuleIndex::default();
        for (gi, g) in globals.iter().enumerate() {
            index.globals.insert(g.id, gi);
        }
        for (fi, f) in functions.iter().enumerate() {
            index.functions.insert(f.id, fi);
            index.function_names.insert(f.name.clone(), f.id);
            for (pi, p) in f.params.iter().enumerate() {
                let def = ValueDef::Param {
                    function: f.id,
                    index: pi,
                };
                if index.values.insert(p.id, (def, p.ty.clone())).is_some() {
                    return Err(IrError::DuplicateValue(p.id));
                }
            }
            for (bi, b) in f.blocks.iter().enumerate() {
                if index.blocks.insert(b.id, (fi, bi)).is_some() {
                    return Err(IrError::DuplicateBlock(b.id));
                }
                check_block(b)?;
                for (ii, inst) in b.instructions.iter().enumerate() {
                    if let Some(r) = inst.result {
                        let def = ValueDef::Inst(InstLoc {
                            block: b.id,
                            index: ii,
                        });
                        if index.values.insert(r, (def, inst.ty.clone())).is_some() {
                            return Err(IrError::DuplicateValue(r));
                        }
                    }
                }
            }
        }
        debug!(
            "indexed module with {} functions, {} globals, {} values",
            functions.len(),
            globals.len(),
            index.values.len()
        );
        Ok(Self {
            functions,
            globals,
            index,
        })
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    pub fn function(&self, id: FunctionId) -> Result<&Function, IrError> {
        self.index
            .functions
            .get(&id)
            .map(|i| &self.functions[*i])
            .ok_or(IrError::UnknownFunction(id))
    }

    pub fn function_by_name(&self, name: &str) -> Result<&Function, IrError> {
        self.index
            .function_names
            .get(name)
            .and_then(|id| self.function(*id).ok())
            .ok_or_else(|| IrError::NoSuchFunction(name.to_string()))
    }

    pub fn main(&self) -> Result<&Function, IrError> {
        self.function_by_name("main")
    }

    pub fn global(&self, id: GlobalId) -> Result<&GlobalVariable, IrError> {
        self.index
            .globals
            .get(&id)
            .map(|i| &self.globals[*i])
            .ok_or(IrError::UnknownGlobal(id))
    }

    pub fn block(&self, id: BlockId) -> Result<&BasicBlock, IrError> {
        self.index
            .blocks
            .get(&id)
            .map(|(f, b)| &self.functions[*f].blocks[*b])
            .ok_or(IrError::UnknownBlock(id))
    }

    /// The function a block belongs to
    pub fn block_parent(&self, id: BlockId) -> Result<&Function, IrError> {
        self.index
            .blocks
            .get(&id)
            .map(|(f, _)| &self.functions[*f])
            .ok_or(IrError::UnknownBlock(id))
    }

    pub fn is_entry_block(&self, id: BlockId) -> Result<bool, IrError> {
        Ok(self.index.blocks.get(&id).ok_or(IrError::UnknownBlock(id))?.1 == 0)
    }

    pub fn instruction(&self, loc: InstLoc) -> Result<&Instruction, IrError> {
        self.block(loc.block)?
            .instructions
            .get(loc.index)
            .ok_or(IrError::UnknownBlock(loc.block))
    }

    pub fn value_type(&self, id: ValueId) -> Result<&Type, IrError> {
        self.index
            .values
            .get(&id)
            .map(|(_, t)| t)
            .ok_or(IrError::UnknownValue(id))
    }

    pub fn value_def(&self, id: ValueId) -> Result<ValueDef, IrError> {
        self.index
            .values
            .get(&id)
            .map(|(d, _)| *d)
            .ok_or(IrError::UnknownValue(id))
    }

    /// The source-level name of a value, if it has one
    pub fn value_name(&self, id: ValueId) -> Option<&str> {
        match self.value_def(id).ok()? {
            ValueDef::Param { function, index } => self
                .function(function)
                .ok()?
                .params
                .get(index)?
                .name
                .as_deref(),
            ValueDef::Inst(loc) => self.instruction(loc).ok()?.name.as_deref(),
        }
    }
}

fn check_block(b: &BasicBlock) -> Result<(), IrError> {
    match b.instructions.last() {
        Some(t) if t.is_terminator() => {}
        _ => return Err(IrError::MissingTerminator(b.id)),
    }
    let body = &b.instructions[..b.instructions.len() - 1];
    if body.iter().any(|i| i.is_terminator()) {
        return Err(IrError::EarlyTerminator(b.id));
    }
    if b.instructions[b.first_non_phi()..]
        .iter()
        .any(|i| i.kind.is_phi())
    {
        return Err(IrError::MisplacedPhi(b.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::InstKind;
    use crate::value::Operand;

    fn ret_block(id: u32) -> BasicBlock {
        BasicBlock {
            id: BlockId(id),
            name: None,
            instructions: vec![Instruction::new(InstKind::Ret { value: None })],
        }
    }

    #[test]
    fn rejects_block_without_terminator() {
        let mut f = Function::new(FunctionId(0), "main", Type::Void);
        let mut b = BasicBlock::new(BlockId(0));
        b.instructions.push(Instruction::with_result(
            ValueId(0),
            Type::Int(8),
            InstKind::Binary {
                op: crate::BinOp::Add,
                lhs: Operand::int(8, 1),
                rhs: Operand::int(8, 2),
            },
        ));
        f.blocks.push(b);
        let err = Module::new(vec![f], vec![]).unwrap_err();
        assert_eq!(err, IrError::MissingTerminator(BlockId(0)));
    }

    #[test]
    fn rejects_duplicate_blocks() {
        let mut f = Function::new(FunctionId(0), "main", Type::Void);
        f.blocks.push(ret_block(4));
        f.blocks.push(ret_block(4));
        let err = Module::new(vec![f], vec![]).unwrap_err();
        assert_eq!(err, IrError::DuplicateBlock(BlockId(4)));
    }

    #[test]
    fn indexes_blocks_and_entry() {
        let mut f = Function::new(FunctionId(3), "main", Type::Void);
        f.blocks.push(ret_block(1));
        f.blocks.push(ret_block(2));
        let m = Module::new(vec![f], vec![]).unwrap();
        assert_eq!(m.block_parent(BlockId(2)).unwrap().id, FunctionId(3));
        assert!(m.is_entry_block(BlockId(1)).unwrap());
        assert!(!m.is_entry_block(BlockId(2)).unwrap());
        assert_eq!(m.main().unwrap().id, FunctionId(3));
        assert!(m.block(BlockId(9)).is_err());
    }
}
