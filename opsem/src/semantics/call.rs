//! Calls, memory-region markers and memory access.

use super::{BvOpSem, FunctionSummary};
use crate::context::{OpSemContext, Register};
use crate::error::{OpSemError, Recovery};
use crate::value::{RegSort, SymValue};
use opsem_ir::{
    Function, FunctionId, InstLoc, Instruction, Operand, RegionOp, Type,
};
use tracing::{debug, warn};
use z3::ast::{Ast, BV, Bool};
use z3::{FuncDecl, Sort};

/// Declarations that stand for an arbitrary value of their return type
fn is_nondet_name(name: &str) -> bool {
    name.starts_with("nd")
        || name.starts_with("nondet.")
        || name.starts_with("verifier.nondet")
        || name.starts_with("__VERIFIER_nondet")
}

fn is_assume_name(name: &str) -> bool {
    name.starts_with("verifier.assume") || name == "__VERIFIER_assume" || name == "llvm.assume"
}

fn is_error_name(name: &str) -> bool {
    matches!(name, "verifier.error" | "__VERIFIER_error" | "seahorn.fail")
}

/// Intrinsics with no effect on the modeled state
fn is_marker_intrinsic(name: &str) -> bool {
    ["llvm.dbg.", "llvm.lifetime.", "llvm.invariant.", "llvm.stacksave", "llvm.stackrestore"]
        .iter()
        .any(|p| name.starts_with(p))
}

fn smt_sort(sort: RegSort) -> Option<Sort> {
    match sort {
        RegSort::Bool => Some(Sort::bool()),
        RegSort::Bv(w) => Some(Sort::bitvector(w)),
        RegSort::Memory => None,
    }
}

impl BvOpSem {
    pub(super) fn visit_call(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        callee: &Operand,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        let module = ctx.module_rc();
        let Operand::Function(fid) = callee else {
            return self.nondet_call(ctx, loc, inst);
        };
        let f = module.function(*fid)?;
        let name = f.name.as_str();
        if is_assume_name(name) {
            self.visit_assume(ctx, args, name.ends_with(".not"))
        } else if is_error_name(name) {
            self.visit_error(ctx)
        } else if name == "calloc" {
            self.visit_calloc(ctx, loc, inst, args)
        } else if name == "malloc" {
            self.visit_malloc(ctx, inst, args)
        } else if name == "free" {
            Ok(())
        } else if f.is_intrinsic() {
            self.visit_intrinsic(ctx, loc, inst, name, args)
        } else if let Some(summary) = self.summaries.get(fid) {
            self.visit_known_call(ctx, inst, f, summary, args)
        } else if f.is_declaration() {
            if args.is_empty() && is_nondet_name(name) {
                self.set_result(ctx, inst, None)
            } else {
                self.visit_external_call(ctx, loc, inst, f, args)
            }
        } else {
            Err(OpSemError::UnhandledCall {
                inst: inst.to_string(),
            })
        }
    }

    fn current_function(&self, ctx: &OpSemContext) -> Result<FunctionId, OpSemError> {
        ctx.function().ok_or(OpSemError::NoCurrentInstruction)
    }

    fn nondet_call(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
    ) -> Result<(), OpSemError> {
        if inst.result.is_some() && ctx.ignore(loc) {
            ctx.record(Recovery::NondetCall(inst.to_string()));
        }
        self.set_result(ctx, inst, None)
    }

    fn visit_assume(
        &self,
        ctx: &mut OpSemContext,
        args: &[Operand],
        negate: bool,
    ) -> Result<(), OpSemError> {
        let Some(arg) = args.first() else {
            return Ok(());
        };
        let Some(cond) = self.lookup(ctx, arg)? else {
            return Ok(());
        };
        let cond = match cond {
            SymValue::Bool(b) => b,
            other => ctx.alu().bv1_to_bool(other.as_bv()?),
        };
        let cond = if negate { cond.not() } else { cond };
        if cond.as_bool() == Some(true) {
            return Ok(());
        }
        let err = self.error_flag(ctx, self.current_function(ctx)?)?;
        ctx.add_scoped_side(Bool::or(&[err, cond]));
        Ok(())
    }

    fn visit_error(&self, ctx: &mut OpSemContext) -> Result<(), OpSemError> {
        let fid = self.current_function(ctx)?;
        if !ctx.module().function(fid)?.can_fail {
            return Ok(());
        }
        let reg = ctx.error_flag_register(fid);
        ctx.write(&reg, Bool::from_bool(true).into())
    }

    /// A heap block of `args[0] * args[1]` bytes whose region is zero, or left as it was when
    /// calloc is treated as malloc
    fn visit_calloc(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        let size = match args {
            [Operand::Const(n), Operand::Const(s)] => n
                .as_int()
                .zip(s.as_int())
                .map(|(n, s)| n.saturating_mul(s)),
            _ => None,
        };
        let ptr = match size {
            Some(bytes) => ctx.mem_mut().halloc(bytes, 0),
            None => ctx.mem().fresh_ptr(0),
        };
        match ctx.mem_write_register().cloned() {
            None => {
                warn!("calloc without a region tag: {}", inst);
                if ctx.ignore(loc) {
                    ctx.record(Recovery::SkippedMemoryAccess(inst.to_string()));
                }
            }
            Some(_) if ctx.is_mem_scalar() => {
                return Err(OpSemError::ScalarMemTransfer {
                    inst: inst.to_string(),
                });
            }
            Some(write) => {
                let content = if ctx.config().ignore_calloc {
                    match ctx.mem_read_register().cloned() {
                        Some(read) => ctx.read(&read),
                        None => write.fresh_value(ctx.mem().repr()),
                    }
                } else {
                    ctx.mem().zero_memory().into()
                };
                ctx.write(&write, content)?;
            }
        }
        ctx.clear_mem_registers();
        self.set_result(ctx, inst, Some(ptr.into()))
    }

    fn visit_malloc(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        let ptr = match args.first() {
            Some(Operand::Const(c)) => {
                let bytes = c.as_int().unwrap_or(0);
                ctx.mem_mut().halloc(bytes, 0)
            }
            Some(op) => match self.lookup_bv(ctx, op)? {
                Some(bytes) => ctx.mem_mut().halloc_symbolic(&bytes, 0),
                None => ctx.mem().fresh_ptr(0),
            },
            None => ctx.mem().fresh_ptr(0),
        };
        self.set_result(ctx, inst, Some(ptr.into()))
    }

    fn visit_intrinsic(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        name: &str,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        if name.starts_with("llvm.bswap.") {
            let value = match args.first() {
                Some(op) => self.lookup_bv(ctx, op)?.map(|v| byte_swap(&v)),
                None => None,
            };
            return self.set_result(ctx, inst, value.map(SymValue::from));
        }
        if is_marker_intrinsic(name) || inst.ty.is_void() {
            return Ok(());
        }
        self.nondet_call(ctx, loc, inst)
    }

    /// A call to a function without a body: a fresh value, or an uninterpreted function of the
    /// arguments when external calls are modeled
    fn visit_external_call(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        f: &Function,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        if inst.ty.is_void() {
            return Ok(());
        }
        if !ctx.config().model_external_calls || ctx.config().is_external_ignored(&f.name) {
            return self.nondet_call(ctx, loc, inst);
        }
        let Some(range) = ctx.sort_of(&inst.ty).and_then(smt_sort) else {
            return self.nondet_call(ctx, loc, inst);
        };
        let mut values = vec![];
        for arg in args {
            if let Some(v) = self.lookup(ctx, arg)? {
                if v.sort().is_none() {
                    debug!("argument of {} has no sort, falling back to a fresh value", f.name);
                    return self.nondet_call(ctx, loc, inst);
                }
                values.push(v);
            }
        }
        let domain: Vec<Sort> = values.iter().filter_map(|v| v.sort()).collect();
        let domain_refs: Vec<&Sort> = domain.iter().collect();
        let decl = FuncDecl::new(f.name.as_str(), &domain_refs, &range);
        let asts: Vec<&dyn Ast> = values.iter().filter_map(|v| v.as_ast()).collect();
        let app = decl.apply(&asts);
        let value: SymValue = match app.as_bool() {
            Some(b) => b.into(),
            None => app.as_bv().ok_or(OpSemError::SortMismatch {
                expected: "bitvector",
                found: "uninterpreted",
            })?.into(),
        };
        self.set_result(ctx, inst, Some(value))
    }

    /// Asserts the summary relation over the parameter stack, then empties the stack
    fn visit_known_call(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        f: &Function,
        summary: &FunctionSummary,
        args: &[Operand],
    ) -> Result<(), OpSemError> {
        let caller = self.current_function(ctx)?;
        let pc = ctx.path_cond().clone();
        ctx.set_param(0, pc.into());
        if ctx.module().function(caller)?.can_fail {
            let reg = ctx.error_flag_register(caller);
            let err_in = ctx.read(&reg);
            ctx.set_param(1, err_in);
            let err_out = ctx.havoc(&reg);
            ctx.set_param(2, err_out);
        } else {
            ctx.set_param(1, Bool::from_bool(false).into());
            ctx.set_param(2, Bool::from_bool(false).into());
        }
        for index in &summary.args {
            if let Some(v) = args.get(*index) {
                if let Some(v) = self.lookup(ctx, v)? {
                    ctx.push_param(v);
                }
            }
        }
        let module = ctx.module_rc();
        for g in &summary.globals {
            let ptr = ctx.mem_mut().galloc(module.global(*g)?);
            ctx.push_param(ptr.into());
        }
        if summary.has_ret {
            if let Some(result) = inst.result {
                if let Some(reg) = ctx.mk_value_register(result)? {
                    let ret = ctx.havoc(&reg);
                    ctx.push_param(ret);
                }
            }
        }
        let params = ctx.params().to_vec();
        let asts = params
            .iter()
            .map(|p| {
                p.as_ast().ok_or_else(|| OpSemError::UnsortedSummaryArgument {
                    inst: inst.to_string(),
                })
            })
            .collect::<Result<Vec<&dyn Ast>, _>>()?;
        let arity = summary.relation.arity();
        if arity != asts.len() {
            return Err(OpSemError::SummaryArity {
                inst: inst.to_string(),
                expected: arity,
                found: asts.len(),
            });
        }
        let app = summary.relation.apply(&asts);
        let app = app.as_bool().ok_or(OpSemError::SortMismatch {
            expected: "boolean",
            found: "summary application",
        })?;
        debug!("call to {} summarized with {} parameters", f.name, arity);
        ctx.add_side(app);
        ctx.reset_params();
        Ok(())
    }

    // ---- memory regions ----

    /// The register of a region operand; region markers only ever name values
    fn region_register(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        mem: &Operand,
    ) -> Result<Register, OpSemError> {
        let reg = match mem {
            Operand::Value(v) => ctx.mk_value_register(*v)?,
            _ => None,
        };
        reg.ok_or_else(|| OpSemError::UnsupportedType(format!("region operand of `{}`", inst)))
    }

    fn result_register(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
    ) -> Result<Option<Register>, OpSemError> {
        match inst.result {
            Some(r) => ctx.mk_value_register(r),
            None => Ok(None),
        }
    }

    fn in_main(&self, ctx: &OpSemContext) -> Result<bool, OpSemError> {
        let fid = self.current_function(ctx)?;
        Ok(ctx.module().function(fid)?.is_main())
    }

    pub(super) fn visit_region(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        op: &RegionOp,
    ) -> Result<(), OpSemError> {
        match op {
            RegionOp::Init { .. } => self.set_result(ctx, inst, None),
            RegionOp::Load { mem } => {
                let reg = self.region_register(ctx, inst, mem)?;
                ctx.set_mem_scalar(reg.sort != RegSort::Memory);
                ctx.set_mem_read_register(Some(reg));
                Ok(())
            }
            RegionOp::TransferLoad { mem } => {
                let reg = self.region_register(ctx, inst, mem)?;
                if reg.sort != RegSort::Memory {
                    return Err(OpSemError::ScalarMemTransfer {
                        inst: inst.to_string(),
                    });
                }
                ctx.set_mem_transfer_register(Some(reg));
                Ok(())
            }
            RegionOp::Store { mem } => {
                let input = self.region_register(ctx, inst, mem)?;
                let Some(output) = self.result_register(ctx, inst)? else {
                    return Ok(());
                };
                ctx.read(&input);
                ctx.havoc(&output);
                ctx.set_mem_scalar(input.sort != RegSort::Memory);
                ctx.set_mem_read_register(Some(input));
                ctx.set_mem_write_register(Some(output));
                Ok(())
            }
            RegionOp::ArgRef { mem } => {
                if let Some(v) = self.lookup(ctx, mem)? {
                    ctx.push_param(v);
                }
                Ok(())
            }
            RegionOp::ArgMod { mem } => {
                if let Some(v) = self.lookup(ctx, mem)? {
                    ctx.push_param(v);
                }
                if let Some(out) = self.result_register(ctx, inst)? {
                    let fresh = ctx.havoc(&out);
                    ctx.push_param(fresh);
                }
                Ok(())
            }
            RegionOp::ArgNew => {
                if let Some(out) = self.result_register(ctx, inst)? {
                    let fresh = ctx.havoc(&out);
                    ctx.push_param(fresh);
                }
                Ok(())
            }
            RegionOp::In { mem } | RegionOp::Out { mem } => {
                let reg = self.region_register(ctx, inst, mem)?;
                if self.in_main(ctx)? {
                    ctx.havoc(&reg);
                } else {
                    ctx.read(&reg);
                }
                Ok(())
            }
            RegionOp::ArgInit => {
                if self.in_main(ctx)? {
                    self.set_result(ctx, inst, None)?;
                }
                Ok(())
            }
            RegionOp::GlobalInit { mem, global } => {
                let input = self.region_register(ctx, inst, mem)?;
                let Some(output) = self.result_register(ctx, inst)? else {
                    return Ok(());
                };
                let content = ctx.read(&input);
                ctx.write(&output, content.clone())?;
                let module = ctx.module_rc();
                let gv = module.global(*global)?;
                let image = ctx.mem().global_init_value(gv);
                if let (Some(image), SymValue::Mem(m)) = (image, &content) {
                    let ptr = ctx.mem_mut().galloc(gv);
                    let filled = ctx.mem().mem_fill(m, &ptr, &image, gv.align)?;
                    ctx.write(&output, filled.into())?;
                }
                ctx.clear_mem_registers();
                Ok(())
            }
        }
    }

    // ---- memory access ----

    fn skip_access(&self, ctx: &mut OpSemContext, loc: InstLoc, inst: &Instruction) {
        if ctx.ignore(loc) {
            ctx.record(Recovery::SkippedMemoryAccess(inst.to_string()));
        }
    }

    pub(super) fn visit_load(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        ptr: &Operand,
        align: u32,
    ) -> Result<(), OpSemError> {
        let Some(read) = ctx.mem_read_register().cloned() else {
            self.skip_access(ctx, loc, inst);
            ctx.clear_mem_registers();
            return self.set_result(ctx, inst, None);
        };
        let value = if ctx.is_mem_scalar() {
            let v = ctx.read(&read);
            match (&inst.ty, v) {
                (Type::Int(1), SymValue::Bv(b)) => Some(ctx.alu().bv1_to_bool(&b).into()),
                (_, v) => Some(v),
            }
        } else {
            match self.lookup_bv(ctx, ptr)? {
                Some(p) => {
                    let mem = ctx.read(&read);
                    let loaded = ctx
                        .mem()
                        .load_value_from_mem(mem.as_mem()?, &p, &inst.ty, align)?;
                    Some(loaded)
                }
                None => None,
            }
        };
        ctx.set_mem_read_register(None);
        self.set_result(ctx, inst, value)
    }

    pub(super) fn visit_store(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        value: &Operand,
        ptr: &Operand,
        align: u32,
    ) -> Result<(), OpSemError> {
        let regs = ctx
            .mem_read_register()
            .cloned()
            .zip(ctx.mem_write_register().cloned());
        let stored = self.lookup(ctx, value)?;
        let (Some((read, write)), Some(stored)) = (regs, stored) else {
            self.skip_access(ctx, loc, inst);
            ctx.clear_mem_registers();
            return Ok(());
        };
        if ctx.is_mem_scalar() {
            let v = match stored {
                SymValue::Bool(b) => ctx.alu().bool_to_bv1(&b).into(),
                v => v,
            };
            ctx.write(&write, v)?;
        } else {
            match self.lookup_bv(ctx, ptr)? {
                Some(p) => {
                    let ty = self.operand_type(ctx, value)?;
                    let mem = ctx.read(&read);
                    let updated =
                        ctx.mem()
                            .store_value_to_mem(mem.as_mem()?, &p, &stored, &ty, align)?;
                    ctx.write(&write, updated.into())?;
                }
                None => {
                    ctx.havoc(&write);
                }
            }
        }
        ctx.clear_mem_registers();
        Ok(())
    }

    fn const_len(&self, op: &'static str, inst: &Instruction, len: &Operand) -> Result<u64, OpSemError> {
        match len {
            Operand::Const(c) => c.as_int().ok_or_else(|| OpSemError::SymbolicLength {
                op,
                inst: inst.to_string(),
            }),
            _ => Err(OpSemError::SymbolicLength {
                op,
                inst: inst.to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn visit_memset(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        dst: &Operand,
        value: &Operand,
        len: &Operand,
        align: u32,
    ) -> Result<(), OpSemError> {
        let len = self.const_len("memset", inst, len)?;
        let regs = ctx
            .mem_read_register()
            .cloned()
            .zip(ctx.mem_write_register().cloned());
        let Some((read, write)) = regs else {
            self.skip_access(ctx, loc, inst);
            ctx.clear_mem_registers();
            return Ok(());
        };
        if ctx.is_mem_scalar() {
            return Err(OpSemError::ScalarMemTransfer {
                inst: inst.to_string(),
            });
        }
        match (self.lookup_bv(ctx, dst)?, self.lookup_bv(ctx, value)?) {
            (Some(p), Some(byte)) => {
                let mem = ctx.read(&read);
                let updated = ctx.mem().mem_set(mem.as_mem()?, &p, &byte, len, align)?;
                ctx.write(&write, updated.into())?;
            }
            _ => {
                ctx.havoc(&write);
            }
        }
        ctx.clear_mem_registers();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn visit_memcpy(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
        dst: &Operand,
        src: &Operand,
        len: &Operand,
        align: u32,
    ) -> Result<(), OpSemError> {
        let len = self.const_len("memcpy", inst, len)?;
        let regs = match (
            ctx.mem_read_register().cloned(),
            ctx.mem_write_register().cloned(),
            ctx.mem_transfer_register().cloned(),
        ) {
            (Some(r), Some(w), Some(t)) => Some((r, w, t)),
            _ => None,
        };
        let Some((read, write, transfer)) = regs else {
            self.skip_access(ctx, loc, inst);
            ctx.clear_mem_registers();
            return Ok(());
        };
        if ctx.is_mem_scalar() {
            return Err(OpSemError::ScalarMemTransfer {
                inst: inst.to_string(),
            });
        }
        match (self.lookup_bv(ctx, dst)?, self.lookup_bv(ctx, src)?) {
            (Some(d), Some(s)) => {
                let dst_mem = ctx.read(&read);
                let src_mem = ctx.read(&transfer);
                let updated =
                    ctx.mem()
                        .mem_cpy(dst_mem.as_mem()?, src_mem.as_mem()?, &d, &s, len, align)?;
                ctx.write(&write, updated.into())?;
            }
            _ => {
                ctx.havoc(&write);
            }
        }
        ctx.clear_mem_registers();
        Ok(())
    }
}

/// Reverses the byte order of `v`, whose width is a whole number of bytes
fn byte_swap(v: &BV) -> BV {
    let bytes = v.get_size() / 8;
    (1..bytes).fold(v.extract(7, 0), |acc, i| {
        acc.concat(&v.extract(i * 8 + 7, i * 8))
    })
}
