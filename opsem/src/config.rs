use crate::error::OpSemError;
use serde::{Deserialize, Serialize};

/// Which encoding memory registers use
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemReprKind {
    /// Memory is an SMT array from pointer to word
    #[default]
    Array,
    /// Memory is a function term from pointer to word
    Function,
}

/// Which address layout the allocator uses
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocatorKind {
    /// The stack is reset on every function entry
    #[default]
    Normal,
    /// Every allocation site keeps one address for the whole run
    Static,
}

/// How much of the program state gets a symbolic representation
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackLevel {
    /// Integers only
    Registers,
    /// Integers and pointers
    Pointers,
    /// Integers, pointers and memory contents
    #[default]
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpSemConfig {
    pub ptr_size_bytes: u32,
    pub word_size_bytes: u32,
    pub memory_repr: MemReprKind,
    pub allocator: AllocatorKind,
    pub track: TrackLevel,
    /// Treat singleton, never-aliased regions as plain scalar registers
    pub unique_scalars: bool,
    pub infer_mem_safety: bool,
    /// Treat `calloc` as `malloc`: no zero fill
    pub ignore_calloc: bool,
    /// Model external calls as uninterpreted functions instead of fresh values
    pub model_external_calls: bool,
    pub ignored_external_functions: Vec<String>,
    pub simplify_on_write: bool,
    /// Longest memset or memcpy, in bytes, that gets expanded into word and byte updates
    pub max_unroll_bytes: u64,
}

impl Default for OpSemConfig {
    fn default() -> Self {
        Self {
            ptr_size_bytes: 4,
            word_size_bytes: 4,
            memory_repr: MemReprKind::Array,
            allocator: AllocatorKind::Normal,
            track: TrackLevel::Memory,
            unique_scalars: true,
            infer_mem_safety: true,
            ignore_calloc: false,
            model_external_calls: false,
            ignored_external_functions: vec![],
            simplify_on_write: false,
            max_unroll_bytes: 1 << 16,
        }
    }
}

impl OpSemConfig {
    pub fn validate(&self) -> Result<(), OpSemError> {
        if !matches!(self.ptr_size_bytes, 4 | 8) {
            return Err(OpSemError::InvalidConfig(format!(
                "pointer size must be 4 or 8 bytes, got {}",
                self.ptr_size_bytes
            )));
        }
        if !matches!(self.word_size_bytes, 1 | 4 | 8) {
            return Err(OpSemError::InvalidConfig(format!(
                "word size must be 1, 4 or 8 bytes, got {}",
                self.word_size_bytes
            )));
        }
        Ok(())
    }

    pub fn ptr_bits(&self) -> u32 {
        self.ptr_size_bytes * 8
    }

    pub fn word_bits(&self) -> u32 {
        self.word_size_bytes * 8
    }

    pub fn is_external_ignored(&self, name: &str) -> bool {
        self.ignored_external_functions.iter().any(|n| n == name)
    }
}
