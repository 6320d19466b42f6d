use serde::{Deserialize, Serialize};

/// The static type of a program value.
///
/// Integer widths are in bits. Pointers carry no pointee type; their width is a property of the
/// target configuration rather than of the program.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Int(u32),
    Ptr,
    Float,
    Double,
    Vector { elem: Box<Type>, len: u32 },
    Struct(Vec<Type>),
    Array { elem: Box<Type>, len: u64 },
    /// The content of one memory region as partitioned by the alias analysis.
    ///
    /// `scalar` is set when the region is a single never-aliased cell of the given bit width.
    Memory { scalar: Option<u32> },
    Label,
    Metadata,
}

impl Type {
    pub fn bool() -> Self {
        Type::Int(1)
    }

    pub fn memory() -> Self {
        Type::Memory { scalar: None }
    }

    pub fn scalar_memory(bits: u32) -> Self {
        Type::Memory { scalar: Some(bits) }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Type::Ptr)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Array { .. })
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Type::Memory { .. })
    }

    /// Number of bytes a value of this type occupies in memory, given the target pointer size.
    ///
    /// Aggregates are packed; the loader is expected to have materialized any padding as
    /// explicit fields.
    pub fn store_size(&self, ptr_size_bytes: u32) -> Option<u64> {
        match self {
            Type::Int(w) => Some((*w as u64).div_ceil(8)),
            Type::Ptr => Some(ptr_size_bytes as u64),
            Type::Float => Some(4),
            Type::Double => Some(8),
            Type::Vector { elem, len } => Some(elem.store_size(ptr_size_bytes)? * *len as u64),
            Type::Struct(fields) => fields
                .iter()
                .map(|f| f.store_size(ptr_size_bytes))
                .sum::<Option<u64>>(),
            Type::Array { elem, len } => Some(elem.store_size(ptr_size_bytes)? * len),
            Type::Void | Type::Memory { .. } | Type::Label | Type::Metadata => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Type;

    #[test]
    fn int_store_sizes_round_up() {
        assert_eq!(Type::Int(1).store_size(4), Some(1));
        assert_eq!(Type::Int(17).store_size(4), Some(3));
        assert_eq!(Type::Int(64).store_size(4), Some(8));
    }

    #[test]
    fn pointer_size_follows_target() {
        assert_eq!(Type::Ptr.store_size(4), Some(4));
        assert_eq!(Type::Ptr.store_size(8), Some(8));
    }

    #[test]
    fn aggregates_are_packed() {
        let s = Type::Struct(vec![Type::Int(8), Type::Ptr, Type::Int(16)]);
        assert_eq!(s.store_size(8), Some(11));
        let a = Type::Array {
            elem: Box::new(Type::Int(32)),
            len: 10,
        };
        assert_eq!(a.store_size(4), Some(40));
        assert_eq!(Type::memory().store_size(4), None);
    }
}
