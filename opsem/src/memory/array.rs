use crate::config::MemReprKind;
use crate::error::OpSemError;
use crate::memory::repr::{MemRepr, MemValue};
use std::ops::Add;
use z3::Sort;
use z3::ast::{Array, BV};

/// Memory as an SMT array from pointer to word. Bulk operations unroll into word stores.
#[derive(Debug, Clone)]
pub struct ArrayRepr {
    ptr_bits: u32,
    word_bytes: u32,
}

impl ArrayRepr {
    pub fn new(ptr_bits: u32, word_bytes: u32) -> Self {
        Self {
            ptr_bits,
            word_bytes,
        }
    }

    fn domain(&self) -> Sort {
        Sort::bitvector(self.ptr_bits)
    }

    fn range(&self) -> Sort {
        Sort::bitvector(self.word_bytes * 8)
    }

    fn array<'a>(&self, mem: &'a MemValue) -> Result<&'a Array, OpSemError> {
        mem.as_array().ok_or(OpSemError::MemReprMismatch)
    }

    fn select(&self, array: &Array, ptr: &BV) -> Result<BV, OpSemError> {
        array
            .select(ptr)
            .as_bv()
            .ok_or(OpSemError::UnexpectedArraySort)
    }
}

impl MemRepr for ArrayRepr {
    fn kind(&self) -> MemReprKind {
        MemReprKind::Array
    }

    fn named_memory(&self, name: &str) -> MemValue {
        MemValue::Array(Array::new_const(name, &self.domain(), &self.range()))
    }

    fn fresh_memory(&self, prefix: &str) -> MemValue {
        MemValue::Array(Array::fresh_const(prefix, &self.domain(), &self.range()))
    }

    fn constant_memory(&self, word: &BV) -> MemValue {
        MemValue::Array(Array::const_array(&self.domain(), word))
    }

    fn coerce(&self, mem: MemValue) -> Result<MemValue, OpSemError> {
        match mem {
            MemValue::Array(_) => Ok(mem),
            MemValue::Function(_) => Err(OpSemError::MemReprMismatch),
        }
    }

    fn load_aligned_word(&self, mem: &MemValue, ptr: &BV) -> Result<BV, OpSemError> {
        self.select(self.array(mem)?, ptr)
    }

    fn store_aligned_word(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
    ) -> Result<MemValue, OpSemError> {
        Ok(MemValue::Array(self.array(mem)?.store(ptr, word)))
    }

    fn mem_set(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError> {
        let mut scratch = self.array(mem)?.clone();
        for offset in (0..len).step_by(self.word_bytes as usize) {
            scratch = scratch.store(&ptr.clone().add(offset), word);
        }
        Ok(MemValue::Array(scratch))
    }

    fn mem_cpy(
        &self,
        dst_mem: &MemValue,
        src_mem: &MemValue,
        dst: &BV,
        src: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError> {
        let source = self.array(src_mem)?;
        let mut scratch = self.array(dst_mem)?.clone();
        for offset in (0..len).step_by(self.word_bytes as usize) {
            let word = self.select(source, &src.clone().add(offset))?;
            scratch = scratch.store(&dst.clone().add(offset), &word);
        }
        Ok(MemValue::Array(scratch))
    }

    fn mem_fill(&self, mem: &MemValue, ptr: &BV, words: &[BV]) -> Result<MemValue, OpSemError> {
        let mut scratch = self.array(mem)?.clone();
        for (i, word) in words.iter().enumerate() {
            let offset = i as u64 * self.word_bytes as u64;
            scratch = scratch.store(&ptr.clone().add(offset), word);
        }
        Ok(MemValue::Array(scratch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repr() -> ArrayRepr {
        ArrayRepr::new(32, 4)
    }

    fn word_at(r: &ArrayRepr, mem: &MemValue, addr: u64) -> u64 {
        r.load_aligned_word(mem, &BV::from_u64(addr, 32))
            .unwrap()
            .simplify()
            .as_u64()
            .unwrap()
    }

    #[test]
    fn store_then_load_word() {
        let r = repr();
        let mem = r.fresh_memory("m");
        let mem = r
            .store_aligned_word(&mem, &BV::from_u64(8, 32), &BV::from_u64(0xcafe, 32))
            .unwrap();
        assert_eq!(word_at(&r, &mem, 8), 0xcafe);
    }

    #[test]
    fn constant_memory_is_uniform() {
        let r = repr();
        let mem = r.constant_memory(&BV::from_u64(0, 32));
        assert_eq!(word_at(&r, &mem, 0x1234), 0);
    }

    #[test]
    fn set_covers_only_its_range() {
        let r = repr();
        let mem = r.constant_memory(&BV::from_u64(7, 32));
        let mem = r
            .mem_set(&mem, &BV::from_u64(16, 32), &BV::from_u64(0xaaaa_aaaa, 32), 8)
            .unwrap();
        assert_eq!(word_at(&r, &mem, 12), 7);
        assert_eq!(word_at(&r, &mem, 16), 0xaaaa_aaaa);
        assert_eq!(word_at(&r, &mem, 20), 0xaaaa_aaaa);
        assert_eq!(word_at(&r, &mem, 24), 7);
    }

    #[test]
    fn copy_reads_from_source_region() {
        let r = repr();
        let src = r.constant_memory(&BV::from_u64(0x11, 32));
        let dst = r.constant_memory(&BV::from_u64(0x22, 32));
        let out = r
            .mem_cpy(&dst, &src, &BV::from_u64(0, 32), &BV::from_u64(64, 32), 4)
            .unwrap();
        assert_eq!(word_at(&r, &out, 0), 0x11);
        assert_eq!(word_at(&r, &out, 4), 0x22);
    }
}
