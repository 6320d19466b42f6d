use crate::types::Type;
use crate::value::{BlockId, GlobalId, Operand, RegionId, ValueId};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ICmpPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
    BitCast,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
}

impl CastOp {
    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            CastOp::FpTrunc
                | CastOp::FpExt
                | CastOp::FpToUi
                | CastOp::FpToSi
                | CastOp::UiToFp
                | CastOp::SiToFp
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorOp {
    ExtractElement,
    InsertElement,
    ShuffleVector,
}

/// One step of an address computation. Struct field offsets and element strides are already
/// resolved to bytes by whoever produced the module.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GepStep {
    Offset(i64),
    Index { index: Operand, stride: u64 },
}

/// Memory-region bookkeeping inserted by the alias analysis.
///
/// Every memory access in the program is bracketed by one of these: loads name the region
/// they read, stores name the region they read and define a fresh one, and calls pass
/// regions in and out through the argument forms.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionOp {
    /// Defines the initial content of a region
    Init { region: RegionId },
    /// The next load reads from `mem`
    Load { mem: Operand },
    /// The next memcpy reads its source from `mem`
    TransferLoad { mem: Operand },
    /// The next store/memset/memcpy reads `mem` and defines this instruction's region
    Store { mem: Operand },
    /// Passes `mem` to the next call as a read-only region
    ArgRef { mem: Operand },
    /// Passes `mem` to the next call and receives its modified content
    ArgMod { mem: Operand },
    /// Receives a region freshly created by the next call
    ArgNew,
    /// Marks a region flowing into the current function
    In { mem: Operand },
    /// Marks a region flowing out of the current function
    Out { mem: Operand },
    /// Defines the content of a region received as an argument
    ArgInit,
    /// Seeds a region with the initializer of `global`
    GlobalInit { mem: Operand, global: GlobalId },
}

impl RegionOp {
    pub fn mem(&self) -> Option<&Operand> {
        match self {
            RegionOp::Load { mem }
            | RegionOp::TransferLoad { mem }
            | RegionOp::Store { mem }
            | RegionOp::ArgRef { mem }
            | RegionOp::ArgMod { mem }
            | RegionOp::In { mem }
            | RegionOp::Out { mem }
            | RegionOp::GlobalInit { mem, .. } => Some(mem),
            RegionOp::Init { .. } | RegionOp::ArgNew | RegionOp::ArgInit => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    FloatBinary {
        op: FloatBinOp,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        pred: ICmpPredicate,
        lhs: Operand,
        rhs: Operand,
    },
    FCmp {
        lhs: Operand,
        rhs: Operand,
    },
    Alloca {
        elem_size: u64,
        count: Operand,
        align: u32,
    },
    Load {
        ptr: Operand,
        align: u32,
    },
    Store {
        value: Operand,
        ptr: Operand,
        align: u32,
    },
    Gep {
        base: Operand,
        steps: Vec<GepStep>,
    },
    Phi {
        incoming: Vec<(BlockId, Operand)>,
    },
    Cast {
        op: CastOp,
        operand: Operand,
    },
    Select {
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Call {
        callee: Operand,
        args: Vec<Operand>,
    },
    MemSet {
        dst: Operand,
        value: Operand,
        len: Operand,
        align: u32,
    },
    MemCpy {
        dst: Operand,
        src: Operand,
        len: Operand,
        align: u32,
    },
    MemMove {
        dst: Operand,
        src: Operand,
        len: Operand,
        align: u32,
    },
    Region(RegionOp),
    ExtractValue {
        aggregate: Operand,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: Operand,
        value: Operand,
        indices: Vec<u32>,
    },
    Vector {
        op: VectorOp,
        operands: Vec<Operand>,
    },
    VaArg {
        list: Operand,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Switch {
        cond: Operand,
        default: BlockId,
        cases: Vec<(u64, BlockId)>,
    },
    IndirectBr {
        addr: Operand,
        targets: Vec<BlockId>,
    },
    Invoke {
        callee: Operand,
        args: Vec<Operand>,
        normal: BlockId,
        unwind: BlockId,
    },
    Ret {
        value: Option<Operand>,
    },
    Unreachable,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::IndirectBr { .. }
                | InstKind::Invoke { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, InstKind::Br { .. } | InstKind::CondBr { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// The blocks control may flow to after this instruction, in operand order
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            InstKind::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, b)| *b))
                .collect(),
            InstKind::IndirectBr { targets, .. } => targets.clone(),
            InstKind::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            _ => vec![],
        }
    }

    /// Every operand read by this instruction, in operand order
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::FloatBinary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs } => vec![lhs, rhs],
            InstKind::Alloca { count, .. } => vec![count],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Gep { base, steps } => std::iter::once(base)
                .chain(steps.iter().filter_map(|s| match s {
                    GepStep::Index { index, .. } => Some(index),
                    GepStep::Offset(_) => None,
                }))
                .collect(),
            InstKind::Phi { incoming } => incoming.iter().map(|(_, o)| o).collect(),
            InstKind::Cast { operand, .. } => vec![operand],
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            InstKind::Call { callee, args } | InstKind::Invoke { callee, args, .. } => {
                std::iter::once(callee).chain(args.iter()).collect()
            }
            InstKind::MemSet {
                dst, value, len, ..
            } => vec![dst, value, len],
            InstKind::MemCpy { dst, src, len, .. } | InstKind::MemMove { dst, src, len, .. } => {
                vec![dst, src, len]
            }
            InstKind::Region(r) => r.mem().into_iter().collect(),
            InstKind::ExtractValue { aggregate, .. } => vec![aggregate],
            InstKind::InsertValue {
                aggregate, value, ..
            } => vec![aggregate, value],
            InstKind::Vector { operands, .. } => operands.iter().collect(),
            InstKind::VaArg { list } => vec![list],
            InstKind::CondBr { cond, .. } | InstKind::Switch { cond, .. } => vec![cond],
            InstKind::IndirectBr { addr, .. } => vec![addr],
            InstKind::Ret { value } => value.iter().collect(),
            InstKind::Br { .. } | InstKind::Unreachable => vec![],
        }
    }

    pub fn opcode(&self) -> &'static str {
        match self {
            InstKind::Binary { op, .. } => match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
                BinOp::UDiv => "udiv",
                BinOp::SDiv => "sdiv",
                BinOp::URem => "urem",
                BinOp::SRem => "srem",
                BinOp::And => "and",
                BinOp::Or => "or",
                BinOp::Xor => "xor",
                BinOp::Shl => "shl",
                BinOp::LShr => "lshr",
                BinOp::AShr => "ashr",
            },
            InstKind::FloatBinary { op, .. } => match op {
                FloatBinOp::FAdd => "fadd",
                FloatBinOp::FSub => "fsub",
                FloatBinOp::FMul => "fmul",
                FloatBinOp::FDiv => "fdiv",
                FloatBinOp::FRem => "frem",
            },
            InstKind::ICmp { .. } => "icmp",
            InstKind::FCmp { .. } => "fcmp",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Gep { .. } => "getelementptr",
            InstKind::Phi { .. } => "phi",
            InstKind::Cast { op, .. } => match op {
                CastOp::Trunc => "trunc",
                CastOp::ZExt => "zext",
                CastOp::SExt => "sext",
                CastOp::PtrToInt => "ptrtoint",
                CastOp::IntToPtr => "inttoptr",
                CastOp::BitCast => "bitcast",
                CastOp::FpTrunc => "fptrunc",
                CastOp::FpExt => "fpext",
                CastOp::FpToUi => "fptoui",
                CastOp::FpToSi => "fptosi",
                CastOp::UiToFp => "uitofp",
                CastOp::SiToFp => "sitofp",
            },
            InstKind::Select { .. } => "select",
            InstKind::Call { .. } => "call",
            InstKind::MemSet { .. } => "memset",
            InstKind::MemCpy { .. } => "memcpy",
            InstKind::MemMove { .. } => "memmove",
            InstKind::Region(r) => match r {
                RegionOp::Init { .. } => "mem.init",
                RegionOp::Load { .. } => "mem.load",
                RegionOp::TransferLoad { .. } => "mem.trsfr.load",
                RegionOp::Store { .. } => "mem.store",
                RegionOp::ArgRef { .. } => "mem.arg.ref",
                RegionOp::ArgMod { .. } => "mem.arg.mod",
                RegionOp::ArgNew => "mem.arg.new",
                RegionOp::In { .. } => "mem.in",
                RegionOp::Out { .. } => "mem.out",
                RegionOp::ArgInit => "mem.arg.init",
                RegionOp::GlobalInit { .. } => "mem.global.init",
            },
            InstKind::ExtractValue { .. } => "extractvalue",
            InstKind::InsertValue { .. } => "insertvalue",
            InstKind::Vector { op, .. } => match op {
                VectorOp::ExtractElement => "extractelement",
                VectorOp::InsertElement => "insertelement",
                VectorOp::ShuffleVector => "shufflevector",
            },
            InstKind::VaArg { .. } => "va_arg",
            InstKind::Br { .. } | InstKind::CondBr { .. } => "br",
            InstKind::Switch { .. } => "switch",
            InstKind::IndirectBr { .. } => "indirectbr",
            InstKind::Invoke { .. } => "invoke",
            InstKind::Ret { .. } => "ret",
            InstKind::Unreachable => "unreachable",
        }
    }
}

/// One instruction of a basic block. `ty` is the type of `result`, or [`Type::Void`] when the
/// instruction defines nothing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub ty: Type,
    pub name: Option<String>,
    pub kind: InstKind,
}

impl Instruction {
    pub fn new(kind: InstKind) -> Self {
        Self {
            result: None,
            ty: Type::Void,
            name: None,
            kind,
        }
    }

    pub fn with_result(result: ValueId, ty: Type, kind: InstKind) -> Self {
        Self {
            result: Some(result),
            ty,
            name: None,
            kind,
        }
    }

    pub fn named<T: AsRef<str>>(mut self, name: T) -> Self {
        self.name = Some(name.as_ref().to_string());
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gep_operands_skip_constant_offsets() {
        let kind = InstKind::Gep {
            base: Operand::Value(ValueId(1)),
            steps: vec![
                GepStep::Offset(8),
                GepStep::Index {
                    index: Operand::Value(ValueId(2)),
                    stride: 4,
                },
            ],
        };
        let ops = kind.operands();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1], &Operand::Value(ValueId(2)));
    }

    #[test]
    fn conditional_branch_successor_order() {
        let kind = InstKind::CondBr {
            cond: Operand::bool(true),
            on_true: BlockId(3),
            on_false: BlockId(7),
        };
        assert!(kind.is_terminator());
        assert!(kind.is_branch());
        assert_eq!(kind.successors(), vec![BlockId(3), BlockId(7)]);
    }
}
