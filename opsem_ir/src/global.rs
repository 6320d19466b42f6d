use crate::types::Type;
use crate::value::GlobalId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub id: GlobalId,
    pub name: String,
    /// Type of the stored value, not of the global's address
    pub ty: Type,
    pub align: u32,
    /// Byte image of the initializer, when it is known
    pub initializer: Option<Vec<u8>>,
    pub section: Option<String>,
}

impl GlobalVariable {
    pub fn new<T: AsRef<str>>(id: GlobalId, name: T, ty: Type) -> Self {
        Self {
            id,
            name: name.as_ref().to_string(),
            ty,
            align: 0,
            initializer: None,
            section: None,
        }
    }

    /// Compiler bookkeeping that never lives in program memory
    pub fn is_metadata(&self) -> bool {
        self.section.as_deref() == Some("llvm.metadata") || self.name.starts_with("llvm.")
    }

    /// Bytes reserved for this global; at least as large as its initializer
    pub fn size(&self, ptr_size_bytes: u32) -> u64 {
        let ty_size = self.ty.store_size(ptr_size_bytes).unwrap_or(0);
        let init_size = self.initializer.as_ref().map(|i| i.len() as u64).unwrap_or(0);
        ty_size.max(init_size)
    }
}
