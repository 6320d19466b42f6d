use crate::memory::MemRepr;
use crate::value::{RegSort, SymValue};
use opsem_ir::{FunctionId, ValueId};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use z3::ast::{BV, Bool};

/// What a symbolic register stands for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterKey {
    /// An instruction result, a parameter or a memory region
    Value(ValueId),
    /// Whether the function has reached an error state
    ErrorFlag(FunctionId),
    /// The stack pointer of the current activation of a function
    StackPointer(FunctionId),
}

impl Display for RegisterKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterKey::Value(v) => write!(f, "{}", v),
            RegisterKey::ErrorFlag(func) => write!(f, "error.flag.{}", func),
            RegisterKey::StackPointer(func) => write!(f, "sp.{}", func),
        }
    }
}

/// A logical variable standing for one program value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    pub key: RegisterKey,
    pub name: String,
    pub sort: RegSort,
}

impl Register {
    pub fn new<T: AsRef<str>>(key: RegisterKey, name: T, sort: RegSort) -> Self {
        Self {
            key,
            name: name.as_ref().to_string(),
            sort,
        }
    }

    /// The constant naming this register's value before any write
    pub fn initial_value(&self, repr: &dyn MemRepr) -> SymValue {
        match self.sort {
            RegSort::Bool => Bool::new_const(self.name.as_str()).into(),
            RegSort::Bv(w) => BV::new_const(self.name.as_str(), w).into(),
            RegSort::Memory => repr.named_memory(&self.name).into(),
        }
    }

    /// A value nothing is known about
    pub fn fresh_value(&self, repr: &dyn MemRepr) -> SymValue {
        match self.sort {
            RegSort::Bool => Bool::fresh_const(&self.name).into(),
            RegSort::Bv(w) => BV::fresh_const(&self.name, w).into(),
            RegSort::Memory => repr.fresh_memory(&self.name).into(),
        }
    }
}

/// Registers declared in one context, layered over those its ancestors declared.
///
/// Forking freezes the current layer behind an [`Rc`]: parent and child both read through it
/// and neither can change it afterwards. A lookup walks the chain from the newest layer.
#[derive(Clone, Debug, Default)]
pub struct RegisterTable {
    local: HashMap<RegisterKey, Register>,
    parent: Option<Rc<RegisterTable>>,
}

impl RegisterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RegisterKey) -> Option<&Register> {
        let mut table = self;
        loop {
            if let Some(r) = table.local.get(key) {
                return Some(r);
            }
            table = table.parent.as_deref()?;
        }
    }

    pub fn contains(&self, key: &RegisterKey) -> bool {
        self.get(key).is_some()
    }

    /// Declares `reg` unless a register already exists for its key; returns the registered one
    pub fn insert(&mut self, reg: Register) -> Register {
        if let Some(existing) = self.get(&reg.key) {
            return existing.clone();
        }
        self.local.insert(reg.key, reg.clone());
        reg
    }

    /// Splits off a child table sharing everything declared so far
    pub fn fork(&mut self) -> RegisterTable {
        let frozen = Rc::new(std::mem::take(self));
        self.parent = Some(frozen.clone());
        RegisterTable {
            local: HashMap::new(),
            parent: Some(frozen),
        }
    }

    /// Number of layers, this one included
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map(|p| p.depth()).unwrap_or(0)
    }

    /// Every visible register, newest layer first
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        let mut layers = vec![];
        let mut table = Some(self);
        while let Some(t) = table {
            layers.push(t);
            table = t.parent.as_deref();
        }
        layers.into_iter().flat_map(|t| t.local.values())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
