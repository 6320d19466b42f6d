//! The instruction interpreter.
//!
//! [`BvOpSem`] steps an [`OpSemContext`] through a function: PHI resolution on block entry, one
//! instruction per step, and CFG edges whose feasibility becomes side-conditions.

mod call;
mod visit;

#[cfg(test)]
mod tests;

use crate::cfg::FunctionCfg;
use crate::config::TrackLevel;
use crate::context::{OpSemContext, SymStore};
use crate::error::{OpSemError, Recovery};
use crate::value::SymValue;
use opsem_ir::{
    BlockId, Constant, FunctionId, GlobalId, InstKind, InstLoc, Instruction, Operand, Type,
    ValueId,
};
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use tracing::{debug, instrument};
use z3::FuncDecl;
use z3::ast::{BV, Bool};

/// The behavior of a function, as a relation over its inputs and outputs.
///
/// A call to a summarized function asserts `relation(pc, err_in, err_out, regions.., args..,
/// globals.., ret)` where regions are whatever the region argument markers pushed before the
/// call.
#[derive(Clone, Debug)]
pub struct FunctionSummary {
    pub relation: FuncDecl,
    /// Indices of the call arguments the relation takes, in order
    pub args: Vec<usize>,
    pub globals: Vec<GlobalId>,
    pub has_ret: bool,
}

/// The result of executing one CFG edge in isolation
#[derive(Clone, Debug)]
pub struct EdgeTrace {
    pub src: BlockId,
    pub dst: BlockId,
    pub side: Vec<Bool>,
    pub store: SymStore,
    pub recoveries: Vec<Recovery>,
}

impl EdgeTrace {
    /// Whether the edge was found statically infeasible
    pub fn is_infeasible(&self) -> bool {
        self.recoveries
            .iter()
            .any(|r| matches!(r, Recovery::InfeasibleEdge(_)))
    }
}

impl Display for EdgeTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}: [{}]", self.src, self.dst, self.side.iter().join(", "))
    }
}

/// Bit-precise operational semantics over bitvectors
#[derive(Clone, Debug, Default)]
pub struct BvOpSem {
    summaries: HashMap<FunctionId, FunctionSummary>,
}

impl BvOpSem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_summary(&mut self, f: FunctionId, summary: FunctionSummary) {
        self.summaries.insert(f, summary);
    }

    pub fn summary(&self, f: FunctionId) -> Option<&FunctionSummary> {
        self.summaries.get(&f)
    }

    // ---- blocks and edges ----

    /// Runs `bb` from its first non-PHI instruction up to its terminator
    #[instrument(skip_all, fields(%bb))]
    pub fn exec(&self, ctx: &mut OpSemContext, bb: BlockId) -> Result<(), OpSemError> {
        self.enter_block(ctx, bb)?;
        let first = ctx.module().block(bb)?.first_non_phi();
        ctx.set_instruction(first);
        self.exec_range(ctx)
    }

    /// Runs every remaining instruction of the current block, stopping at its terminator
    pub fn exec_range(&self, ctx: &mut OpSemContext) -> Result<(), OpSemError> {
        while self.intra_step(ctx)? {}
        Ok(())
    }

    /// Resolves the PHIs of `bb` for control arriving from `from`
    pub fn exec_phi(
        &self,
        ctx: &mut OpSemContext,
        bb: BlockId,
        from: BlockId,
    ) -> Result<(), OpSemError> {
        ctx.goto(InstLoc {
            block: bb,
            index: 0,
        })?;
        ctx.set_prev_block(Some(from));
        self.intra_phi(ctx)
    }

    /// Evaluates the branch at the end of `src` toward `dst`. Returns false when the edge is
    /// statically infeasible.
    pub fn exec_br(
        &self,
        ctx: &mut OpSemContext,
        src: BlockId,
        dst: BlockId,
    ) -> Result<bool, OpSemError> {
        let last = ctx.module().block(src)?.len().saturating_sub(1);
        ctx.goto(InstLoc {
            block: src,
            index: last,
        })?;
        self.intra_br(ctx, dst)
    }

    /// Executes the edge `src -> dst`: the body of `src`, its branch toward `dst` and the PHIs
    /// of `dst`. A `dst` ending in `unreachable` runs in full as part of the edge.
    ///
    /// The edge runs under the path condition `true`, whatever the context held before.
    #[instrument(skip_all, fields(%src, %dst))]
    pub fn exec_edge(
        &self,
        ctx: &mut OpSemContext,
        src: BlockId,
        dst: BlockId,
    ) -> Result<(), OpSemError> {
        ctx.set_path_cond(Bool::from_bool(true));
        self.exec(ctx, src)?;
        if !self.exec_br(ctx, src, dst)? {
            return Ok(());
        }
        self.exec_phi(ctx, dst, src)?;
        if ctx.module().block(dst)?.ends_in_unreachable() {
            self.exec(ctx, dst)?;
        }
        Ok(())
    }

    /// Executes the blocks of `path` in order. Returns false as soon as an edge on it is
    /// infeasible.
    pub fn exec_path(&self, ctx: &mut OpSemContext, path: &[BlockId]) -> Result<bool, OpSemError> {
        let Some(first) = path.first() else {
            return Ok(true);
        };
        self.exec(ctx, *first)?;
        for w in path.windows(2) {
            if !self.exec_br(ctx, w[0], w[1])? {
                return Ok(false);
            }
            self.exec_phi(ctx, w[1], w[0])?;
            self.exec_range(ctx)?;
        }
        Ok(true)
    }

    /// Executes every edge of `f`, each in its own fork of `ctx`
    pub fn explore_edges(
        &self,
        ctx: &mut OpSemContext,
        f: FunctionId,
    ) -> Result<Vec<EdgeTrace>, OpSemError> {
        let module = ctx.module_rc();
        let cfg = FunctionCfg::new(module.function(f)?);
        let mut traces = vec![];
        for (src, dst) in cfg.edges() {
            let mut child = ctx.fork();
            self.exec_edge(&mut child, src, dst)?;
            debug!("edge {} -> {}: {} side-conditions", src, dst, child.side().len());
            traces.push(EdgeTrace {
                src,
                dst,
                side: child.side().to_vec(),
                store: child.store().clone(),
                recoveries: child.recoveries().to_vec(),
            });
        }
        Ok(traces)
    }

    // ---- single steps ----

    /// Executes the current instruction and advances. Returns false at a terminator or at the
    /// end of the block.
    pub fn intra_step(&self, ctx: &mut OpSemContext) -> Result<bool, OpSemError> {
        if ctx.is_at_block_end()? {
            return Ok(false);
        }
        let module = ctx.module_rc();
        let loc = ctx.current_loc().ok_or(OpSemError::NoCurrentInstruction)?;
        let inst = module.instruction(loc)?;
        if inst.is_terminator() {
            return Ok(false);
        }
        self.check_supported(inst)?;
        if self.is_skipped(ctx, inst)? {
            self.skip_inst(ctx, loc, inst)?;
        } else {
            self.visit(ctx, loc, inst)?;
        }
        ctx.advance();
        Ok(true)
    }

    /// Assigns every PHI of the current block at once, from the previous block's values
    pub fn intra_phi(&self, ctx: &mut OpSemContext) -> Result<(), OpSemError> {
        let module = ctx.module_rc();
        let bb = ctx.block().ok_or(OpSemError::NoCurrentInstruction)?;
        let block = module.block(bb)?;
        let mut values: Vec<(ValueId, Option<SymValue>)> = vec![];
        for phi in block.phis() {
            if self.is_skipped(ctx, phi)? {
                continue;
            }
            let InstKind::Phi { incoming } = &phi.kind else {
                continue;
            };
            let Some(result) = phi.result else {
                continue;
            };
            let prev = ctx.prev_block();
            let op = incoming
                .iter()
                .find(|(b, _)| Some(*b) == prev)
                .map(|(_, op)| op)
                .ok_or_else(|| OpSemError::MissingPhiIncoming {
                    inst: phi.to_string(),
                })?;
            values.push((result, self.lookup(ctx, op)?));
        }
        for (result, value) in values {
            self.set_value(ctx, result, value)?;
        }
        ctx.set_instruction(block.first_non_phi());
        Ok(())
    }

    /// Evaluates the current branch toward `dst`, entering `dst` when it may be taken
    pub fn intra_br(&self, ctx: &mut OpSemContext, dst: BlockId) -> Result<bool, OpSemError> {
        let module = ctx.module_rc();
        let inst = ctx.current_inst()?.clone();
        let src = ctx.block().ok_or(OpSemError::NoCurrentInstruction)?;
        let func = module.block_parent(src)?.id;
        let taken = match &inst.kind {
            InstKind::Br { target } => {
                ctx.advance();
                *target == dst
            }
            InstKind::CondBr {
                cond,
                on_true,
                on_false,
            } => {
                ctx.advance();
                if let Operand::Const(c) = cond {
                    let value = c.as_int().unwrap_or(0) != 0;
                    (if value { *on_true } else { *on_false }) == dst
                } else if *on_true != dst && *on_false != dst {
                    false
                } else {
                    if *on_true != *on_false {
                        if let Some(c) = self.lookup(ctx, cond)? {
                            let c = c.as_bool()?;
                            let c = if *on_true == dst { c.clone() } else { c.not() };
                            let err = self.error_flag(ctx, func)?;
                            ctx.add_scoped_side(Bool::or(&[err, c]));
                        }
                    }
                    true
                }
            }
            InstKind::Switch { .. } => return Err(self.unsupported("switch", &inst)),
            InstKind::IndirectBr { .. } => return Err(self.unsupported("indirect branch", &inst)),
            InstKind::Invoke { .. } => return Err(self.unsupported("invoke", &inst)),
            _ => false,
        };
        if taken {
            ctx.on_basic_block_entry(dst)?;
        } else {
            ctx.reset_side();
            let err = self.error_flag(ctx, func)?;
            ctx.add_scoped_side(err);
            ctx.record(Recovery::InfeasibleEdge(format!("{} -> {}", src, dst)));
        }
        Ok(taken)
    }

    // ---- entry hooks ----

    fn enter_block(&self, ctx: &mut OpSemContext, bb: BlockId) -> Result<(), OpSemError> {
        ctx.on_basic_block_entry(bb)?;
        let module = ctx.module_rc();
        let f = module.block_parent(bb)?;
        if module.is_entry_block(bb)? {
            if f.is_main() {
                self.enter_module(ctx)?;
            }
            self.enter_function(ctx, f.id)?;
        }
        self.error_flag(ctx, f.id)?;
        Ok(())
    }

    /// Lays out code and globals for the whole module
    pub fn enter_module(&self, ctx: &mut OpSemContext) -> Result<(), OpSemError> {
        let module = ctx.module_rc();
        debug!(
            "entering module: {} functions, {} globals",
            module.functions().len(),
            module.globals().len()
        );
        ctx.mem_mut().on_module_entry(&module);
        Ok(())
    }

    /// Starts a fresh activation of `f`: new stack pointer, no pending call parameters, and a
    /// cleared error flag
    pub fn enter_function(&self, ctx: &mut OpSemContext, f: FunctionId) -> Result<(), OpSemError> {
        let module = ctx.module_rc();
        let func = module.function(f)?;
        let sp = ctx.mem_mut().on_function_entry(func);
        let sp_reg = ctx.stack_ptr_register(f);
        ctx.write(&sp_reg, sp.into())?;
        ctx.reset_params();
        if func.can_fail {
            let reg = ctx.error_flag_register(f);
            ctx.write(&reg, Bool::from_bool(false).into())?;
        }
        Ok(())
    }

    /// The current error flag of `f`; constant false for functions that cannot fail
    pub fn error_flag(&self, ctx: &mut OpSemContext, f: FunctionId) -> Result<Bool, OpSemError> {
        if !ctx.module().function(f)?.can_fail {
            return Ok(Bool::from_bool(false));
        }
        let reg = ctx.error_flag_register(f);
        Ok(ctx.read(&reg).as_bool()?.clone())
    }

    // ---- values ----

    /// Whether values of type `ty` are left untracked at the configured level
    pub fn is_type_skipped(&self, ctx: &OpSemContext, ty: &Type) -> bool {
        let track = ctx.config().track;
        match ty {
            Type::Ptr => track < TrackLevel::Pointers,
            Type::Memory { scalar } => {
                let scalar = scalar.is_some() && ctx.config().unique_scalars;
                !scalar && track < TrackLevel::Memory
            }
            Type::Struct(_) | Type::Array { .. } => true,
            _ => false,
        }
    }

    /// Whether `inst` is left out of the model
    pub fn is_skipped(&self, ctx: &OpSemContext, inst: &Instruction) -> Result<bool, OpSemError> {
        if let InstKind::Region(op) = &inst.kind {
            if inst.result.is_none() {
                if let Some(Operand::Value(m)) = op.mem() {
                    let ty = ctx.module().value_type(*m)?;
                    return Ok(self.is_type_skipped(ctx, ty));
                }
            }
        }
        Ok(self.is_type_skipped(ctx, &inst.ty))
    }

    fn skip_inst(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
    ) -> Result<(), OpSemError> {
        if let InstKind::Region(_) = inst.kind {
            return Ok(());
        }
        if let Some(result) = inst.result {
            self.set_value(ctx, result, None)?;
        }
        if ctx.ignore(loc) {
            ctx.record(Recovery::IgnoredInstruction(inst.to_string()));
        }
        Ok(())
    }

    /// The symbolic value of an operand, or `None` when it is untracked
    pub fn lookup(
        &self,
        ctx: &mut OpSemContext,
        op: &Operand,
    ) -> Result<Option<SymValue>, OpSemError> {
        match op {
            Operand::Value(v) => {
                let ty = ctx.module().value_type(*v)?.clone();
                if self.is_type_skipped(ctx, &ty) {
                    return Ok(None);
                }
                Ok(ctx.mk_value_register(*v)?.map(|r| ctx.read(&r)))
            }
            Operand::Const(c) => Ok(self.constant_value(ctx, c)),
            Operand::Global(g) => {
                if ctx.config().track < TrackLevel::Pointers {
                    return Ok(None);
                }
                let module = ctx.module_rc();
                let gv = module.global(*g)?;
                Ok(Some(ctx.mem_mut().galloc(gv).into()))
            }
            Operand::Function(f) => {
                if ctx.config().track < TrackLevel::Pointers {
                    return Ok(None);
                }
                let module = ctx.module_rc();
                let func = module.function(*f)?;
                Ok(Some(ctx.mem_mut().falloc(func).into()))
            }
        }
    }

    /// The term for a constant. Undefined integers and pointers read as zero.
    pub fn constant_value(&self, ctx: &OpSemContext, c: &Constant) -> Option<SymValue> {
        match c {
            Constant::Int { width: 1, value } => Some(Bool::from_bool(*value & 1 != 0).into()),
            Constant::Int { width, value } => Some(BV::from_u64(*value, *width).into()),
            Constant::Null => Some(ctx.mem().null_ptr().into()),
            Constant::Undef(Type::Int(1)) => Some(Bool::from_bool(false).into()),
            Constant::Undef(Type::Int(w)) => Some(BV::from_u64(0, *w).into()),
            Constant::Undef(Type::Ptr) => Some(ctx.mem().null_ptr().into()),
            Constant::Undef(_) | Constant::Float { .. } | Constant::Aggregate(_) => None,
        }
    }

    /// Writes `value` to the register of `result`, or a fresh value when there is none
    pub fn set_value(
        &self,
        ctx: &mut OpSemContext,
        result: ValueId,
        value: Option<SymValue>,
    ) -> Result<(), OpSemError> {
        let Some(reg) = ctx.mk_value_register(result)? else {
            return Ok(());
        };
        match value {
            Some(v) => ctx.write(&reg, v),
            None => {
                ctx.havoc(&reg);
                Ok(())
            }
        }
    }

    /// The static type of an operand
    pub fn operand_type(&self, ctx: &OpSemContext, op: &Operand) -> Result<Type, OpSemError> {
        Ok(match op {
            Operand::Value(v) => ctx.module().value_type(*v)?.clone(),
            Operand::Const(Constant::Int { width, .. }) => Type::Int(*width),
            Operand::Const(Constant::Undef(ty) | Constant::Float { ty, .. }) => ty.clone(),
            Operand::Const(Constant::Aggregate(ty)) => ty.clone(),
            Operand::Const(Constant::Null) | Operand::Global(_) | Operand::Function(_) => Type::Ptr,
        })
    }

    fn unsupported(&self, what: &'static str, inst: &Instruction) -> OpSemError {
        OpSemError::Unsupported {
            what,
            inst: inst.to_string(),
        }
    }
}
