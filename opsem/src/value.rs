use crate::error::OpSemError;
use crate::memory::MemValue;
use z3::Sort;
use z3::ast::{Ast, BV, Bool};

/// The logical sort a register holds
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegSort {
    Bool,
    Bv(u32),
    /// A whole memory region, in whichever representation the engine was built with
    Memory,
}

/// The symbolic content of one register
#[derive(Clone, Debug)]
pub enum SymValue {
    Bool(Bool),
    Bv(BV),
    Mem(MemValue),
}

impl SymValue {
    pub fn sort_name(&self) -> &'static str {
        match self {
            SymValue::Bool(_) => "boolean",
            SymValue::Bv(_) => "bitvector",
            SymValue::Mem(_) => "memory",
        }
    }

    pub fn reg_sort(&self) -> RegSort {
        match self {
            SymValue::Bool(_) => RegSort::Bool,
            SymValue::Bv(b) => RegSort::Bv(b.get_size()),
            SymValue::Mem(_) => RegSort::Memory,
        }
    }

    pub fn as_bool(&self) -> Result<&Bool, OpSemError> {
        match self {
            SymValue::Bool(b) => Ok(b),
            other => Err(OpSemError::SortMismatch {
                expected: "boolean",
                found: other.sort_name(),
            }),
        }
    }

    pub fn as_bv(&self) -> Result<&BV, OpSemError> {
        match self {
            SymValue::Bv(b) => Ok(b),
            other => Err(OpSemError::SortMismatch {
                expected: "bitvector",
                found: other.sort_name(),
            }),
        }
    }

    pub fn as_mem(&self) -> Result<&MemValue, OpSemError> {
        match self {
            SymValue::Mem(m) => Ok(m),
            other => Err(OpSemError::SortMismatch {
                expected: "memory",
                found: other.sort_name(),
            }),
        }
    }

    /// True only for the literal `true`
    pub fn is_true(&self) -> bool {
        matches!(self, SymValue::Bool(b) if b.as_bool() == Some(true))
    }

    /// The SMT sort of this value. Function-backed memory has the sort of its array term.
    pub fn sort(&self) -> Option<Sort> {
        match self {
            SymValue::Bool(_) => Some(Sort::bool()),
            SymValue::Bv(b) => Some(Sort::bitvector(b.get_size())),
            SymValue::Mem(MemValue::Array(a)) => Some(a.get_sort()),
            SymValue::Mem(MemValue::Function(f)) => f.as_array().ok().map(|a| a.get_sort()),
        }
    }

    /// This value as a single SMT term
    pub fn as_ast(&self) -> Option<&dyn Ast> {
        match self {
            SymValue::Bool(b) => Some(b),
            SymValue::Bv(b) => Some(b),
            SymValue::Mem(MemValue::Array(a)) => Some(a),
            SymValue::Mem(MemValue::Function(f)) => f.as_array().ok().map(|a| a as &dyn Ast),
        }
    }

    pub fn simplify(&self) -> Self {
        match self {
            SymValue::Bool(b) => SymValue::Bool(b.simplify()),
            SymValue::Bv(b) => SymValue::Bv(b.simplify()),
            SymValue::Mem(m) => SymValue::Mem(m.simplify()),
        }
    }
}

impl From<Bool> for SymValue {
    fn from(value: Bool) -> Self {
        SymValue::Bool(value)
    }
}

impl From<BV> for SymValue {
    fn from(value: BV) -> Self {
        SymValue::Bv(value)
    }
}

impl From<MemValue> for SymValue {
    fn from(value: MemValue) -> Self {
        SymValue::Mem(value)
    }
}
