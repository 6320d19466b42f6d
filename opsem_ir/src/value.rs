use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

id_type!(ValueId, "%");
id_type!(BlockId, "bb");
id_type!(FunctionId, "fn");
id_type!(GlobalId, "@g");
id_type!(RegionId, "mem");

/// A compile-time constant operand.
///
/// Integer payloads hold the low 64 bits of the value; wider constants are zero-extended.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Int { width: u32, value: u64 },
    /// The null pointer
    Null,
    Undef(Type),
    Float { ty: Type, bits: u64 },
    /// A struct or array literal. Aggregates aren't modeled, so the contents aren't kept.
    Aggregate(Type),
}

impl Constant {
    pub fn int(width: u32, value: u64) -> Self {
        let value = if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        };
        Constant::Int { width, value }
    }

    /// A two's complement encoding of `value` at `width` bits
    pub fn signed(width: u32, value: i64) -> Self {
        Self::int(width, value as u64)
    }

    pub fn bool(b: bool) -> Self {
        Constant::Int {
            width: 1,
            value: b as u64,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            Constant::Null => Some(0),
            _ => None,
        }
    }
}

/// Anything an instruction can take as input
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// An instruction result or a function parameter
    Value(ValueId),
    Const(Constant),
    /// The address of a global variable
    Global(GlobalId),
    /// The address of a function
    Function(FunctionId),
}

impl Operand {
    pub fn int(width: u32, value: u64) -> Self {
        Operand::Const(Constant::int(width, value))
    }

    pub fn bool(b: bool) -> Self {
        Operand::Const(Constant::bool(b))
    }

    pub fn null() -> Self {
        Operand::Const(Constant::Null)
    }

    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Operand::Const(_))
    }
}

impl From<ValueId> for Operand {
    fn from(value: ValueId) -> Self {
        Operand::Value(value)
    }
}

impl From<Constant> for Operand {
    fn from(value: Constant) -> Self {
        Operand::Const(value)
    }
}

impl From<GlobalId> for Operand {
    fn from(value: GlobalId) -> Self {
        Operand::Global(value)
    }
}

impl From<FunctionId> for Operand {
    fn from(value: FunctionId) -> Self {
        Operand::Function(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Constant;

    #[test]
    fn int_constants_are_masked_to_width() {
        assert_eq!(Constant::int(8, 0x1ff).as_int(), Some(0xff));
        assert_eq!(Constant::signed(8, -1).as_int(), Some(0xff));
        assert_eq!(Constant::signed(64, -1).as_int(), Some(u64::MAX));
        assert_eq!(Constant::bool(true).as_int(), Some(1));
    }
}
