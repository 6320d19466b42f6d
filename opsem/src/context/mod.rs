//! Mutable interpreter state: position, registers, values and side-conditions.

mod register;
mod store;

pub use register::{Register, RegisterKey, RegisterTable};
pub use store::SymStore;

use crate::alu::{Alu, BvAlu};
use crate::config::OpSemConfig;
use crate::error::{OpSemError, Recovery};
use crate::memory::MemManager;
use crate::value::{RegSort, SymValue};
use opsem_ir::{BlockId, FunctionId, InstLoc, Instruction, Module, Type, ValueId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace, warn};
use z3::ast::{Ast, Bool};

/// Summary parameters every call starts with: path condition, error in, error out
const RESERVED_PARAMS: usize = 3;

/// The state of one symbolic execution.
///
/// A context owns its register values and side-conditions. The ALU, memory manager and
/// module are shared with every context forked from it. A fork starts as a copy of its
/// parent's values and position and then evolves independently; it reads the registers its
/// ancestors declared but never changes them.
#[derive(Debug)]
pub struct OpSemContext {
    module: Rc<Module>,
    config: Rc<OpSemConfig>,
    alu: Rc<dyn Alu>,
    mem: Rc<RefCell<MemManager>>,

    registers: RegisterTable,
    store: SymStore,
    side: Vec<Bool>,
    path_cond: Bool,

    func: Option<FunctionId>,
    block: Option<BlockId>,
    inst: usize,
    prev: Option<BlockId>,

    read_reg: Option<Register>,
    write_reg: Option<Register>,
    transfer_reg: Option<Register>,
    scalar: bool,

    params: Vec<SymValue>,
    ignored: HashSet<InstLoc>,
    recoveries: Vec<Recovery>,
}

impl OpSemContext {
    pub fn new(module: Rc<Module>, config: OpSemConfig) -> Result<Self, OpSemError> {
        let mem = MemManager::new(&config)?;
        Ok(Self::with_parts(module, config, Rc::new(BvAlu), mem))
    }

    pub fn with_parts(
        module: Rc<Module>,
        config: OpSemConfig,
        alu: Rc<dyn Alu>,
        mem: MemManager,
    ) -> Self {
        Self {
            module,
            config: Rc::new(config),
            alu,
            mem: Rc::new(RefCell::new(mem)),
            registers: RegisterTable::new(),
            store: SymStore::new(),
            side: vec![],
            path_cond: Bool::from_bool(true),
            func: None,
            block: None,
            inst: 0,
            prev: None,
            read_reg: None,
            write_reg: None,
            transfer_reg: None,
            scalar: false,
            params: Self::initial_params(),
            ignored: HashSet::new(),
            recoveries: vec![],
        }
    }

    fn initial_params() -> Vec<SymValue> {
        (0..RESERVED_PARAMS)
            .map(|_| SymValue::Bool(Bool::from_bool(false)))
            .collect()
    }

    /// A child context with a copy of this context's values and an empty side-condition list
    pub fn fork(&mut self) -> Self {
        Self {
            module: self.module.clone(),
            config: self.config.clone(),
            alu: self.alu.clone(),
            mem: self.mem.clone(),
            registers: self.registers.fork(),
            store: self.store.clone(),
            side: vec![],
            path_cond: self.path_cond.clone(),
            func: self.func,
            block: self.block,
            inst: self.inst,
            prev: self.prev,
            read_reg: self.read_reg.clone(),
            write_reg: self.write_reg.clone(),
            transfer_reg: self.transfer_reg.clone(),
            scalar: self.scalar,
            params: self.params.clone(),
            ignored: self.ignored.clone(),
            recoveries: vec![],
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_rc(&self) -> Rc<Module> {
        self.module.clone()
    }

    pub fn config(&self) -> &OpSemConfig {
        &self.config
    }

    pub fn alu(&self) -> &dyn Alu {
        self.alu.as_ref()
    }

    pub fn mem(&self) -> Ref<'_, MemManager> {
        self.mem.borrow()
    }

    pub fn mem_mut(&self) -> RefMut<'_, MemManager> {
        self.mem.borrow_mut()
    }

    // ---- position ----

    pub fn function(&self) -> Option<FunctionId> {
        self.func
    }

    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    pub fn prev_block(&self) -> Option<BlockId> {
        self.prev
    }

    pub fn inst_index(&self) -> usize {
        self.inst
    }

    /// Moves to the start of `bb`, remembering the block we came from
    pub fn on_basic_block_entry(&mut self, bb: BlockId) -> Result<(), OpSemError> {
        let parent = self.module.block_parent(bb)?.id;
        self.prev = self.block;
        self.block = Some(bb);
        self.func = Some(parent);
        self.inst = 0;
        Ok(())
    }

    /// Moves to `loc` without touching the previous block
    pub fn goto(&mut self, loc: InstLoc) -> Result<(), OpSemError> {
        self.func = Some(self.module.block_parent(loc.block)?.id);
        self.block = Some(loc.block);
        self.inst = loc.index;
        Ok(())
    }

    pub fn set_prev_block(&mut self, prev: Option<BlockId>) {
        self.prev = prev;
    }

    pub fn set_instruction(&mut self, index: usize) {
        self.inst = index;
    }

    pub fn advance(&mut self) {
        self.inst += 1;
    }

    pub fn current_loc(&self) -> Option<InstLoc> {
        self.block.map(|block| InstLoc {
            block,
            index: self.inst,
        })
    }

    pub fn is_at_block_end(&self) -> Result<bool, OpSemError> {
        match self.block {
            Some(b) => Ok(self.inst >= self.module.block(b)?.len()),
            None => Ok(true),
        }
    }

    pub fn current_inst(&self) -> Result<&Instruction, OpSemError> {
        let loc = self.current_loc().ok_or(OpSemError::NoCurrentInstruction)?;
        let block = self.module.block(loc.block)?;
        block
            .instructions
            .get(loc.index)
            .ok_or(OpSemError::NoCurrentInstruction)
    }

    // ---- registers ----

    pub fn registers(&self) -> &RegisterTable {
        &self.registers
    }

    pub fn register(&self, key: &RegisterKey) -> Option<&Register> {
        self.registers.get(key)
    }

    pub fn mk_register<T: AsRef<str>>(
        &mut self,
        key: RegisterKey,
        name: T,
        sort: RegSort,
    ) -> Register {
        self.registers.insert(Register::new(key, name, sort))
    }

    /// The sort a value of type `ty` is tracked with, if it has one
    pub fn sort_of(&self, ty: &Type) -> Option<RegSort> {
        match ty {
            Type::Int(w) => Some(self.alu.int_sort(*w)),
            Type::Ptr => Some(RegSort::Bv(self.config.ptr_bits())),
            Type::Memory { scalar: Some(bits) } if self.config.unique_scalars => {
                Some(RegSort::Bv(*bits))
            }
            Type::Memory { .. } => Some(RegSort::Memory),
            _ => None,
        }
    }

    /// The register of program value `v`, declared on first use. `None` for untracked types.
    pub fn mk_value_register(&mut self, v: ValueId) -> Result<Option<Register>, OpSemError> {
        let key = RegisterKey::Value(v);
        if let Some(r) = self.registers.get(&key) {
            return Ok(Some(r.clone()));
        }
        let ty = self.module.value_type(v)?;
        let Some(sort) = self.sort_of(ty) else {
            return Ok(None);
        };
        let name = match self.module.value_name(v) {
            Some(n) => format!("{}{}", n, v),
            None => v.to_string(),
        };
        Ok(Some(self.mk_register(key, name, sort)))
    }

    pub fn error_flag_register(&mut self, f: FunctionId) -> Register {
        self.mk_register(
            RegisterKey::ErrorFlag(f),
            RegisterKey::ErrorFlag(f).to_string(),
            RegSort::Bool,
        )
    }

    pub fn stack_ptr_register(&mut self, f: FunctionId) -> Register {
        let sort = RegSort::Bv(self.config.ptr_bits());
        self.mk_register(
            RegisterKey::StackPointer(f),
            RegisterKey::StackPointer(f).to_string(),
            sort,
        )
    }

    // ---- values ----

    pub fn store(&self) -> &SymStore {
        &self.store
    }

    /// The current value of `reg`; unwritten registers read as their named initial constant
    pub fn read(&mut self, reg: &Register) -> SymValue {
        if let Some(v) = self.store.get(&reg.key) {
            return v.clone();
        }
        let init = reg.initial_value(self.mem.borrow().repr());
        self.store.insert(reg.key, init.clone());
        init
    }

    /// The current value of `key` without materializing it
    pub fn peek(&self, key: &RegisterKey) -> Option<&SymValue> {
        self.store.get(key)
    }

    pub fn write(&mut self, reg: &Register, value: SymValue) -> Result<(), OpSemError> {
        let value = match (reg.sort, value) {
            (RegSort::Memory, SymValue::Mem(m)) => SymValue::Mem(self.mem.borrow().repr().coerce(m)?),
            (sort, value) if sort == value.reg_sort() => value,
            (_, value) => {
                return Err(OpSemError::SortMismatch {
                    expected: match reg.sort {
                        RegSort::Bool => "boolean",
                        RegSort::Bv(_) => "bitvector",
                        RegSort::Memory => "memory",
                    },
                    found: value.sort_name(),
                });
            }
        };
        let value = if self.config.simplify_on_write {
            value.simplify()
        } else {
            value
        };
        trace!("{} := {:?}", reg.name, value);
        self.store.insert(reg.key, value);
        Ok(())
    }

    /// Gives `reg` a fresh unconstrained value and returns it
    pub fn havoc(&mut self, reg: &Register) -> SymValue {
        let fresh = reg.fresh_value(self.mem.borrow().repr());
        self.store.insert(reg.key, fresh.clone());
        fresh
    }

    // ---- side conditions ----

    pub fn side(&self) -> &[Bool] {
        &self.side
    }

    pub fn add_side(&mut self, cond: Bool) {
        if cond.as_bool() == Some(true) {
            return;
        }
        debug!("side: {}", cond);
        self.side.push(cond);
    }

    /// Adds `path_cond => cond`
    pub fn add_scoped_side(&mut self, cond: Bool) {
        if self.path_cond.as_bool() == Some(true) {
            self.add_side(cond);
        } else {
            let scoped = self.path_cond.implies(&cond);
            self.add_side(scoped);
        }
    }

    /// Drops every side-condition, returning them
    pub fn reset_side(&mut self) -> Vec<Bool> {
        std::mem::take(&mut self.side)
    }

    pub fn path_cond(&self) -> &Bool {
        &self.path_cond
    }

    pub fn set_path_cond(&mut self, cond: Bool) {
        self.path_cond = cond;
    }

    // ---- call parameters ----

    pub fn params(&self) -> &[SymValue] {
        &self.params
    }

    pub fn set_param(&mut self, index: usize, value: SymValue) {
        if index < self.params.len() {
            self.params[index] = value;
        } else {
            self.params.push(value);
        }
    }

    pub fn push_param(&mut self, value: SymValue) {
        self.params.push(value);
    }

    pub fn reset_params(&mut self) {
        self.params = Self::initial_params();
    }

    // ---- memory region tags ----

    pub fn mem_read_register(&self) -> Option<&Register> {
        self.read_reg.as_ref()
    }

    pub fn set_mem_read_register(&mut self, reg: Option<Register>) {
        self.read_reg = reg;
    }

    pub fn mem_write_register(&self) -> Option<&Register> {
        self.write_reg.as_ref()
    }

    pub fn set_mem_write_register(&mut self, reg: Option<Register>) {
        self.write_reg = reg;
    }

    pub fn mem_transfer_register(&self) -> Option<&Register> {
        self.transfer_reg.as_ref()
    }

    pub fn set_mem_transfer_register(&mut self, reg: Option<Register>) {
        self.transfer_reg = reg;
    }

    pub fn is_mem_scalar(&self) -> bool {
        self.scalar
    }

    pub fn set_mem_scalar(&mut self, scalar: bool) {
        self.scalar = scalar;
    }

    /// Forgets every region tag, as after the access they were set up for
    pub fn clear_mem_registers(&mut self) {
        self.read_reg = None;
        self.write_reg = None;
        self.transfer_reg = None;
        self.scalar = false;
    }

    // ---- diagnostics ----

    /// Marks `loc` ignored; true the first time
    pub fn ignore(&mut self, loc: InstLoc) -> bool {
        self.ignored.insert(loc)
    }

    pub fn is_ignored(&self, loc: &InstLoc) -> bool {
        self.ignored.contains(loc)
    }

    pub fn record(&mut self, recovery: Recovery) {
        warn!("{:?}", recovery);
        self.recoveries.push(recovery);
    }

    pub fn recoveries(&self) -> &[Recovery] {
        &self.recoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemReprKind;
    use opsem_ir::{ModuleBuilder, Operand};
    use z3::ast::BV;

    fn module() -> (Rc<Module>, ValueId, BlockId) {
        let mut mb = ModuleBuilder::new();
        let main = mb.function("main", &[Type::Int(32)], Type::Void);
        let x = mb.params(main)[0];
        let entry = mb.block(main, "entry");
        let mut b = mb.at(entry);
        b.binary(opsem_ir::BinOp::Add, 32, x, Operand::int(32, 1));
        b.ret(None);
        (Rc::new(mb.build().unwrap()), x, entry)
    }

    #[test]
    fn read_materializes_the_initial_constant() {
        let (m, x, _) = module();
        let mut ctx = OpSemContext::new(m, OpSemConfig::default()).unwrap();
        let reg = ctx.mk_value_register(x).unwrap().unwrap();
        assert_eq!(reg.sort, RegSort::Bv(32));
        assert!(ctx.peek(&reg.key).is_none());
        let v = ctx.read(&reg);
        assert_eq!(v.as_bv().unwrap().get_size(), 32);
        assert!(ctx.peek(&reg.key).is_some());
    }

    #[test]
    fn write_checks_sorts() {
        let (m, x, _) = module();
        let mut ctx = OpSemContext::new(m, OpSemConfig::default()).unwrap();
        let reg = ctx.mk_value_register(x).unwrap().unwrap();
        assert!(ctx.write(&reg, BV::from_u64(3, 32).into()).is_ok());
        let err = ctx.write(&reg, Bool::from_bool(true).into());
        assert!(matches!(err, Err(OpSemError::SortMismatch { .. })));
    }

    #[test]
    fn forks_are_isolated() {
        let (m, x, entry) = module();
        let mut parent = OpSemContext::new(m, OpSemConfig::default()).unwrap();
        parent.on_basic_block_entry(entry).unwrap();
        let reg = parent.mk_value_register(x).unwrap().unwrap();
        parent.write(&reg, BV::from_u64(1, 32).into()).unwrap();
        parent.add_side(Bool::new_const("p"));

        let mut child = parent.fork();
        assert!(child.side().is_empty());
        assert_eq!(child.block(), Some(entry));
        child.write(&reg, BV::from_u64(2, 32).into()).unwrap();
        child.add_side(Bool::new_const("q"));

        let seen = parent.read(&reg);
        assert_eq!(seen.as_bv().unwrap().as_u64(), Some(1));
        assert_eq!(parent.side().len(), 1);
        assert!(child.register(&reg.key).is_some());
    }

    #[test]
    fn scoped_sides_are_guarded_by_the_path() {
        let (m, _, _) = module();
        let mut ctx = OpSemContext::new(m, OpSemConfig::default()).unwrap();
        ctx.add_scoped_side(Bool::from_bool(true));
        assert!(ctx.side().is_empty());
        ctx.set_path_cond(Bool::new_const("pc"));
        ctx.add_scoped_side(Bool::new_const("c"));
        assert_eq!(ctx.side().len(), 1);
        assert_eq!(ctx.reset_side().len(), 1);
        assert!(ctx.side().is_empty());
    }

    #[test]
    fn scalar_regions_become_bitvectors() {
        let (m, _, _) = module();
        let ctx = OpSemContext::new(
            m.clone(),
            OpSemConfig {
                memory_repr: MemReprKind::Function,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ctx.sort_of(&Type::scalar_memory(8)), Some(RegSort::Bv(8)));
        assert_eq!(ctx.sort_of(&Type::memory()), Some(RegSort::Memory));
        assert_eq!(ctx.sort_of(&Type::Float), None);

        let plain = OpSemContext::new(
            m,
            OpSemConfig {
                unique_scalars: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plain.sort_of(&Type::scalar_memory(8)), Some(RegSort::Memory));
    }

    #[test]
    fn params_start_with_reserved_slots() {
        let (m, _, _) = module();
        let mut ctx = OpSemContext::new(m, OpSemConfig::default()).unwrap();
        assert_eq!(ctx.params().len(), 3);
        ctx.set_param(0, Bool::new_const("pc").into());
        ctx.push_param(BV::from_u64(1, 8).into());
        assert_eq!(ctx.params().len(), 4);
        ctx.reset_params();
        assert_eq!(ctx.params().len(), 3);
        assert!(ctx.params()[0].as_bool().unwrap().as_bool() == Some(false));
    }
}
