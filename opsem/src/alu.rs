use crate::error::OpSemError;
use crate::value::{RegSort, SymValue};
use opsem_ir::{BinOp, ICmpPredicate};
use std::fmt::Debug;
use z3::ast::{Ast, BV, Bool};

/// Translates scalar integer operations into logical terms.
///
/// Every operation takes the bit width of its operands. Width 1 values are booleans; all other
/// widths are bitvectors. Implementations must be total: division and remainder by zero yield
/// whatever term the encoding produces, and callers must not rely on its value.
pub trait Alu: Debug {
    fn bool_to_bv1(&self, e: &Bool) -> BV;
    fn bv1_to_bool(&self, e: &BV) -> Bool;
    fn int_sort(&self, width: u32) -> RegSort;
    fn bool_sort(&self) -> RegSort;
    fn is_num(&self, v: &SymValue) -> bool;
    fn to_num(&self, v: &SymValue) -> Option<u64>;
    fn si(&self, k: i64, width: u32) -> SymValue;
    fn ui(&self, k: u64, width: u32) -> SymValue;

    fn do_add(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_sub(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_mul(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_udiv(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_sdiv(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_urem(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_srem(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_and(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_or(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_xor(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_shl(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_lshr(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;
    fn do_ashr(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError>;

    fn do_eq(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_ne(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_ult(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_slt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_ugt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_sgt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_ule(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_sle(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_uge(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;
    fn do_sge(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError>;

    fn do_trunc(&self, v: &SymValue, to: u32) -> Result<SymValue, OpSemError>;
    fn do_zext(&self, v: &SymValue, from: u32, to: u32) -> Result<SymValue, OpSemError>;
    fn do_sext(&self, v: &SymValue, from: u32, to: u32) -> Result<SymValue, OpSemError>;

    fn binary(
        &self,
        op: BinOp,
        a: &SymValue,
        b: &SymValue,
        width: u32,
    ) -> Result<SymValue, OpSemError> {
        match op {
            BinOp::Add => self.do_add(a, b, width),
            BinOp::Sub => self.do_sub(a, b, width),
            BinOp::Mul => self.do_mul(a, b, width),
            BinOp::UDiv => self.do_udiv(a, b, width),
            BinOp::SDiv => self.do_sdiv(a, b, width),
            BinOp::URem => self.do_urem(a, b, width),
            BinOp::SRem => self.do_srem(a, b, width),
            BinOp::And => self.do_and(a, b, width),
            BinOp::Or => self.do_or(a, b, width),
            BinOp::Xor => self.do_xor(a, b, width),
            BinOp::Shl => self.do_shl(a, b, width),
            BinOp::LShr => self.do_lshr(a, b, width),
            BinOp::AShr => self.do_ashr(a, b, width),
        }
    }

    fn compare(
        &self,
        pred: ICmpPredicate,
        a: &SymValue,
        b: &SymValue,
        width: u32,
    ) -> Result<Bool, OpSemError> {
        match pred {
            ICmpPredicate::Eq => self.do_eq(a, b, width),
            ICmpPredicate::Ne => self.do_ne(a, b, width),
            ICmpPredicate::Ult => self.do_ult(a, b, width),
            ICmpPredicate::Slt => self.do_slt(a, b, width),
            ICmpPredicate::Ugt => self.do_ugt(a, b, width),
            ICmpPredicate::Sgt => self.do_sgt(a, b, width),
            ICmpPredicate::Ule => self.do_ule(a, b, width),
            ICmpPredicate::Sle => self.do_sle(a, b, width),
            ICmpPredicate::Uge => self.do_uge(a, b, width),
            ICmpPredicate::Sge => self.do_sge(a, b, width),
        }
    }
}

/// An [`Alu`] over SMT bitvectors
#[derive(Debug, Default, Clone, Copy)]
pub struct BvAlu;

impl BvAlu {
    /// Both operands as bitvectors of `width` bits
    fn operands(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<(BV, BV), OpSemError> {
        Ok((self.to_bv(a, width)?, self.to_bv(b, width)?))
    }

    fn to_bv(&self, v: &SymValue, width: u32) -> Result<BV, OpSemError> {
        let bv = match v {
            SymValue::Bool(b) => self.bool_to_bv1(b),
            SymValue::Bv(b) => b.clone(),
            SymValue::Mem(_) => {
                return Err(OpSemError::SortMismatch {
                    expected: "bitvector",
                    found: "memory",
                });
            }
        };
        if bv.get_size() != width {
            return Err(OpSemError::SortMismatch {
                expected: "bitvector of the operation's width",
                found: "bitvector of another width",
            });
        }
        Ok(bv)
    }

    fn wrap(&self, r: BV, width: u32) -> SymValue {
        if width == 1 {
            SymValue::Bool(self.bv1_to_bool(&r))
        } else {
            SymValue::Bv(r)
        }
    }

    fn lift<F: Fn(&BV, &BV) -> BV>(
        &self,
        a: &SymValue,
        b: &SymValue,
        width: u32,
        f: F,
    ) -> Result<SymValue, OpSemError> {
        let (a, b) = self.operands(a, b, width)?;
        Ok(self.wrap(f(&a, &b), width))
    }

    fn cmp<F: Fn(&BV, &BV) -> Bool>(
        &self,
        a: &SymValue,
        b: &SymValue,
        width: u32,
        f: F,
    ) -> Result<Bool, OpSemError> {
        let (a, b) = self.operands(a, b, width)?;
        Ok(f(&a, &b))
    }
}

impl Alu for BvAlu {
    fn bool_to_bv1(&self, e: &Bool) -> BV {
        e.ite(&BV::from_u64(1, 1), &BV::from_u64(0, 1))
    }

    fn bv1_to_bool(&self, e: &BV) -> Bool {
        e.eq(&BV::from_u64(1, 1))
    }

    fn int_sort(&self, width: u32) -> RegSort {
        if width == 1 {
            RegSort::Bool
        } else {
            RegSort::Bv(width)
        }
    }

    fn bool_sort(&self) -> RegSort {
        RegSort::Bool
    }

    fn is_num(&self, v: &SymValue) -> bool {
        match v {
            SymValue::Bool(b) => b.simplify().as_bool().is_some(),
            SymValue::Bv(b) => b.simplify().as_u64().is_some(),
            SymValue::Mem(_) => false,
        }
    }

    fn to_num(&self, v: &SymValue) -> Option<u64> {
        match v {
            SymValue::Bool(b) => b.simplify().as_bool().map(u64::from),
            SymValue::Bv(b) => b.simplify().as_u64(),
            SymValue::Mem(_) => None,
        }
    }

    fn si(&self, k: i64, width: u32) -> SymValue {
        if width == 1 {
            SymValue::Bool(Bool::from_bool(k & 1 != 0))
        } else {
            SymValue::Bv(BV::from_i64(k, width))
        }
    }

    fn ui(&self, k: u64, width: u32) -> SymValue {
        if width == 1 {
            SymValue::Bool(Bool::from_bool(k & 1 != 0))
        } else {
            SymValue::Bv(BV::from_u64(k, width))
        }
    }

    fn do_add(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvadd(b))
    }

    fn do_sub(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvsub(b))
    }

    fn do_mul(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvmul(b))
    }

    fn do_udiv(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvudiv(b))
    }

    fn do_sdiv(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvsdiv(b))
    }

    fn do_urem(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvurem(b))
    }

    fn do_srem(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvsrem(b))
    }

    fn do_and(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvand(b))
    }

    fn do_or(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvor(b))
    }

    fn do_xor(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvxor(b))
    }

    fn do_shl(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvshl(b))
    }

    fn do_lshr(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvlshr(b))
    }

    fn do_ashr(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<SymValue, OpSemError> {
        self.lift(a, b, width, |a, b| a.bvashr(b))
    }

    fn do_eq(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.eq(b))
    }

    fn do_ne(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.eq(b).not())
    }

    fn do_ult(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvult(b))
    }

    fn do_slt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvslt(b))
    }

    fn do_ugt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvugt(b))
    }

    fn do_sgt(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvsgt(b))
    }

    fn do_ule(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvule(b))
    }

    fn do_sle(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvsle(b))
    }

    fn do_uge(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvuge(b))
    }

    fn do_sge(&self, a: &SymValue, b: &SymValue, width: u32) -> Result<Bool, OpSemError> {
        self.cmp(a, b, width, |a, b| a.bvsge(b))
    }

    fn do_trunc(&self, v: &SymValue, to: u32) -> Result<SymValue, OpSemError> {
        let bv = v.as_bv()?;
        let from = bv.get_size();
        if to == 0 || to > from {
            return Err(OpSemError::CastWidth {
                op: "trunc",
                from,
                to,
            });
        }
        if to == from {
            return Ok(self.wrap(bv.clone(), to));
        }
        Ok(self.wrap(bv.extract(to - 1, 0), to))
    }

    fn do_zext(&self, v: &SymValue, from: u32, to: u32) -> Result<SymValue, OpSemError> {
        let bv = self.to_bv(v, from)?;
        let extra = extension("zext", from, to)?;
        Ok(self.wrap(bv.zero_ext(extra), to))
    }

    fn do_sext(&self, v: &SymValue, from: u32, to: u32) -> Result<SymValue, OpSemError> {
        let bv = self.to_bv(v, from)?;
        let extra = extension("sext", from, to)?;
        Ok(self.wrap(bv.sign_ext(extra), to))
    }
}

/// Number of bits an extension from `from` to `to` adds; zero for a same-width cast
fn extension(op: &'static str, from: u32, to: u32) -> Result<u32, OpSemError> {
    to.checked_sub(from)
        .ok_or(OpSemError::CastWidth { op, from, to })
}
