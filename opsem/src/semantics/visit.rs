use super::BvOpSem;
use crate::context::OpSemContext;
use crate::error::{OpSemError, Recovery};
use crate::value::SymValue;
use opsem_ir::{
    CastOp, GepStep, ICmpPredicate, InstKind, InstLoc, Instruction, Operand, Type,
};
use tracing::instrument;
use z3::ast::{BV, Bool};

impl BvOpSem {
    /// Rejects instructions whose semantics cannot be expressed over bitvectors
    pub(super) fn check_supported(&self, inst: &Instruction) -> Result<(), OpSemError> {
        let what = match &inst.kind {
            InstKind::FloatBinary { .. } | InstKind::FCmp { .. } => Some("floating point"),
            InstKind::Cast { op, .. } if op.is_floating() => Some("floating point"),
            InstKind::Vector { .. } => Some("vector operation"),
            InstKind::VaArg { .. } => Some("va_arg"),
            InstKind::Invoke { .. } => Some("invoke"),
            _ if inst.ty.is_floating() => Some("floating point"),
            _ if inst.ty.is_vector() => Some("vector value"),
            _ => None,
        };
        match what {
            Some(what) => Err(self.unsupported(what, inst)),
            None => Ok(()),
        }
    }

    /// Executes one non-terminator instruction
    #[instrument(skip_all, fields(%inst))]
    pub(super) fn visit(
        &self,
        ctx: &mut OpSemContext,
        loc: InstLoc,
        inst: &Instruction,
    ) -> Result<(), OpSemError> {
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let width = self.int_width(inst)?;
                let value = match (self.lookup(ctx, lhs)?, self.lookup(ctx, rhs)?) {
                    (Some(a), Some(b)) => Some(ctx.alu().binary(*op, &a, &b, width)?),
                    _ => None,
                };
                self.set_result(ctx, inst, value)
            }
            InstKind::ICmp { pred, lhs, rhs } => self.visit_icmp(ctx, inst, *pred, lhs, rhs),
            InstKind::Alloca {
                elem_size,
                count,
                align,
            } => self.visit_alloca(ctx, inst, *elem_size, count, *align),
            InstKind::Gep { base, steps } => self.visit_gep(ctx, inst, base, steps),
            InstKind::Cast { op, operand } => self.visit_cast(ctx, inst, *op, operand),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let value = match (
                    self.lookup(ctx, cond)?,
                    self.lookup(ctx, on_true)?,
                    self.lookup(ctx, on_false)?,
                ) {
                    (Some(c), Some(t), Some(f)) => {
                        let c = c.as_bool()?;
                        Some(match (t, f) {
                            (SymValue::Bool(t), SymValue::Bool(f)) => c.ite(&t, &f).into(),
                            (SymValue::Bv(t), SymValue::Bv(f)) => c.ite(&t, &f).into(),
                            _ => return Err(OpSemError::UnsupportedType(format!("{:?}", inst.ty))),
                        })
                    }
                    _ => None,
                };
                self.set_result(ctx, inst, value)
            }
            InstKind::Load { ptr, align } => self.visit_load(ctx, loc, inst, ptr, *align),
            InstKind::Store { value, ptr, align } => {
                self.visit_store(ctx, loc, inst, value, ptr, *align)
            }
            InstKind::Call { callee, args } => self.visit_call(ctx, loc, inst, callee, args),
            InstKind::MemSet {
                dst,
                value,
                len,
                align,
            } => self.visit_memset(ctx, loc, inst, dst, value, len, *align),
            InstKind::MemCpy {
                dst,
                src,
                len,
                align,
            } => self.visit_memcpy(ctx, loc, inst, dst, src, len, *align),
            InstKind::MemMove { .. } => {
                ctx.clear_mem_registers();
                if ctx.ignore(loc) {
                    ctx.record(Recovery::IgnoredInstruction(inst.to_string()));
                }
                Ok(())
            }
            InstKind::Region(op) => self.visit_region(ctx, inst, op),
            InstKind::ExtractValue { .. } | InstKind::InsertValue { .. } => {
                if ctx.ignore(loc) {
                    ctx.record(Recovery::IgnoredInstruction(inst.to_string()));
                }
                self.set_result(ctx, inst, None)
            }
            // resolved on block entry
            InstKind::Phi { .. } => Ok(()),
            InstKind::FloatBinary { .. }
            | InstKind::FCmp { .. }
            | InstKind::Vector { .. }
            | InstKind::VaArg { .. }
            | InstKind::Invoke { .. } => Err(self.unsupported(inst.kind.opcode(), inst)),
            InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Switch { .. }
            | InstKind::IndirectBr { .. }
            | InstKind::Ret { .. }
            | InstKind::Unreachable => Ok(()),
        }
    }

    pub(super) fn set_result(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        value: Option<SymValue>,
    ) -> Result<(), OpSemError> {
        match inst.result {
            Some(result) => self.set_value(ctx, result, value),
            None => Ok(()),
        }
    }

    fn int_width(&self, inst: &Instruction) -> Result<u32, OpSemError> {
        inst.ty
            .int_width()
            .ok_or_else(|| OpSemError::UnsupportedType(format!("{:?}", inst.ty)))
    }

    /// The operand as a bitvector; booleans widen to one bit
    pub(super) fn lookup_bv(
        &self,
        ctx: &mut OpSemContext,
        op: &Operand,
    ) -> Result<Option<BV>, OpSemError> {
        Ok(match self.lookup(ctx, op)? {
            Some(SymValue::Bool(b)) => Some(ctx.alu().bool_to_bv1(&b)),
            Some(v) => Some(v.as_bv()?.clone()),
            None => None,
        })
    }

    fn visit_icmp(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        pred: ICmpPredicate,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), OpSemError> {
        let ty = self.operand_type(ctx, lhs)?;
        let (Some(a), Some(b)) = (self.lookup(ctx, lhs)?, self.lookup(ctx, rhs)?) else {
            return self.set_result(ctx, inst, None);
        };
        let cmp: Bool = match ty {
            Type::Ptr => ctx.mem().ptr_compare(pred, a.as_bv()?, b.as_bv()?),
            Type::Int(w) => ctx.alu().compare(pred, &a, &b, w)?,
            other => return Err(OpSemError::UnsupportedType(format!("{:?}", other))),
        };
        let value = match inst.ty {
            Type::Int(1) => SymValue::Bool(cmp),
            _ => return Err(OpSemError::UnsupportedType(format!("{:?}", inst.ty))),
        };
        self.set_result(ctx, inst, Some(value))
    }

    fn visit_alloca(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        elem_size: u64,
        count: &Operand,
        align: u32,
    ) -> Result<(), OpSemError> {
        let ptr = match count {
            Operand::Const(c) => {
                let bytes = elem_size.saturating_mul(c.as_int().unwrap_or(0));
                ctx.mem_mut().salloc(inst.result, bytes, align)
            }
            _ => match self.lookup_bv(ctx, count)? {
                Some(n) => {
                    let bits = ctx.mem().ptr_bits();
                    let n = ctx.mem().ptrtoint(&n, bits);
                    let bytes = n.bvmul(&BV::from_u64(elem_size, bits));
                    ctx.mem_mut().salloc_symbolic(inst.result, &bytes, align)
                }
                None => ctx.mem().fresh_ptr(align),
            },
        };
        self.set_result(ctx, inst, Some(ptr.into()))
    }

    fn visit_gep(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        base: &Operand,
        steps: &[GepStep],
    ) -> Result<(), OpSemError> {
        let Some(base) = self.lookup_bv(ctx, base)? else {
            return self.set_result(ctx, inst, None);
        };
        let mut offset = 0i64;
        let mut indices = vec![];
        for step in steps {
            match step {
                GepStep::Offset(o) => offset = offset.wrapping_add(*o),
                GepStep::Index { index, stride } => match self.lookup_bv(ctx, index)? {
                    Some(i) => indices.push((i, *stride)),
                    None => return self.set_result(ctx, inst, None),
                },
            }
        }
        let ptr = ctx.mem().gep(&base, offset, &indices);
        self.set_result(ctx, inst, Some(ptr.into()))
    }

    fn visit_cast(
        &self,
        ctx: &mut OpSemContext,
        inst: &Instruction,
        op: CastOp,
        operand: &Operand,
    ) -> Result<(), OpSemError> {
        let from = self.operand_type(ctx, operand)?;
        let Some(v) = self.lookup(ctx, operand)? else {
            return self.set_result(ctx, inst, None);
        };
        let value = match (op, &from, &inst.ty) {
            (CastOp::Trunc, Type::Int(_), Type::Int(to)) => ctx.alu().do_trunc(&v, *to)?,
            (CastOp::ZExt, Type::Int(f), Type::Int(to)) => ctx.alu().do_zext(&v, *f, *to)?,
            (CastOp::SExt, Type::Int(f), Type::Int(to)) => ctx.alu().do_sext(&v, *f, *to)?,
            (CastOp::PtrToInt, Type::Ptr, Type::Int(to)) => {
                let int = ctx.mem().ptrtoint(v.as_bv()?, *to);
                if *to == 1 {
                    ctx.alu().bv1_to_bool(&int).into()
                } else {
                    int.into()
                }
            }
            (CastOp::IntToPtr, Type::Int(_), Type::Ptr) => {
                let int = match &v {
                    SymValue::Bool(b) => ctx.alu().bool_to_bv1(b),
                    other => other.as_bv()?.clone(),
                };
                ctx.mem().inttoptr(&int).into()
            }
            (CastOp::BitCast, f, t) if f == t => v,
            _ => return Err(self.unsupported(inst.kind.opcode(), inst)),
        };
        self.set_result(ctx, inst, Some(value))
    }
}
