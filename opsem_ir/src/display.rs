use crate::instruction::{GepStep, InstKind, Instruction, RegionOp};
use crate::value::{Constant, Operand};
use std::fmt::{Display, Formatter};

impl Display for Constant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Int { width, value } => write!(f, "i{} {:#x}", width, value),
            Constant::Null => write!(f, "null"),
            Constant::Undef(_) => write!(f, "undef"),
            Constant::Float { bits, .. } => write!(f, "fp {:#x}", bits),
            Constant::Aggregate(_) => write!(f, "{{...}}"),
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Const(c) => write!(f, "{}", c),
            Operand::Global(g) => write!(f, "{}", g),
            Operand::Function(func) => write!(f, "@{}", func),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(r) = self.result {
            write!(f, "{} = ", r)?;
        }
        write!(f, "{}", self.kind.opcode())?;
        let mut args: Vec<String> = vec![];
        match &self.kind {
            InstKind::Gep { base, steps } => {
                args.push(base.to_string());
                for s in steps {
                    match s {
                        GepStep::Offset(o) => args.push(format!("+{}", o)),
                        GepStep::Index { index, stride } => {
                            args.push(format!("{} * {}", index, stride))
                        }
                    }
                }
            }
            InstKind::Phi { incoming } => {
                for (b, o) in incoming {
                    args.push(format!("[{}, {}]", o, b))
                }
            }
            InstKind::Region(RegionOp::Init { region }) => args.push(region.to_string()),
            InstKind::Region(RegionOp::GlobalInit { mem, global }) => {
                args.push(mem.to_string());
                args.push(global.to_string());
            }
            k => {
                for o in k.operands() {
                    args.push(o.to_string());
                }
                for s in k.successors() {
                    args.push(s.to_string());
                }
            }
        }
        if !args.is_empty() {
            write!(f, " {}", args.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::instruction::{BinOp, InstKind, Instruction};
    use crate::types::Type;
    use crate::value::{Operand, ValueId};

    #[test]
    fn renders_binary() {
        let i = Instruction::with_result(
            ValueId(3),
            Type::Int(8),
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Operand::Value(ValueId(1)),
                rhs: Operand::int(8, 16),
            },
        );
        assert_eq!(i.to_string(), "%3 = add %1, i8 0x10");
    }
}
