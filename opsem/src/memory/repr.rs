use crate::config::MemReprKind;
use crate::error::OpSemError;
use crate::memory::function::FunctionMemory;
use std::fmt::Debug;
use z3::ast::{Array, Ast, BV};

/// The content of one memory region at one program point
#[derive(Clone, Debug)]
pub enum MemValue {
    Array(Array),
    Function(FunctionMemory),
}

impl MemValue {
    pub fn kind(&self) -> MemReprKind {
        match self {
            MemValue::Array(_) => MemReprKind::Array,
            MemValue::Function(_) => MemReprKind::Function,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            MemValue::Array(a) => Some(a),
            MemValue::Function(_) => None,
        }
    }

    pub fn simplify(&self) -> Self {
        match self {
            MemValue::Array(a) => MemValue::Array(a.simplify()),
            MemValue::Function(f) => MemValue::Function(f.clone()),
        }
    }
}

/// A word-addressed memory encoding.
///
/// Pointers handed to the word-level operations are byte addresses that are already aligned to
/// the word size, and lengths are whole numbers of words. Byte-granular access is composed on
/// top of these by [`MemManager`](crate::memory::MemManager).
pub trait MemRepr: Debug {
    fn kind(&self) -> MemReprKind;

    /// The initial content of the region register called `name`
    fn named_memory(&self, name: &str) -> MemValue;

    /// A fresh, unconstrained region
    fn fresh_memory(&self, prefix: &str) -> MemValue;

    /// A region holding `word` at every address
    fn constant_memory(&self, word: &BV) -> MemValue;

    /// Bring a region produced elsewhere into this representation
    fn coerce(&self, mem: MemValue) -> Result<MemValue, OpSemError>;

    fn load_aligned_word(&self, mem: &MemValue, ptr: &BV) -> Result<BV, OpSemError>;

    fn store_aligned_word(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
    ) -> Result<MemValue, OpSemError>;

    /// Write `word` to every word in `[ptr, ptr + len)`
    fn mem_set(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError>;

    /// Copy the words of `[src, src + len)` in `src_mem` over `[dst, dst + len)` in `dst_mem`
    fn mem_cpy(
        &self,
        dst_mem: &MemValue,
        src_mem: &MemValue,
        dst: &BV,
        src: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError>;

    /// Write consecutive `words` starting at `ptr`
    fn mem_fill(&self, mem: &MemValue, ptr: &BV, words: &[BV]) -> Result<MemValue, OpSemError>;
}
