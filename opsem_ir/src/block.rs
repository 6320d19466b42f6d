use crate::instruction::{InstKind, Instruction};
use crate::value::BlockId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: Option<String>,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            name: None,
            instructions: vec![],
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator()
            .map(|t| t.kind.successors())
            .unwrap_or_default()
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().take_while(|i| i.kind.is_phi())
    }

    /// Index of the first instruction that is not a PHI
    pub fn first_non_phi(&self) -> usize {
        self.phis().count()
    }

    pub fn ends_in_unreachable(&self) -> bool {
        matches!(
            self.terminator().map(|t| &t.kind),
            Some(InstKind::Unreachable)
        )
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}
