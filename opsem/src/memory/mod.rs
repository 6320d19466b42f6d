//! Byte-precise memory on top of a word-addressed [`MemRepr`].
//!
//! Memory is little-endian. Words live at addresses that are multiples of the word size; every
//! access that is not a whole aligned word is assembled here from the one or more words it
//! touches, so both representations share the same byte semantics.

mod allocator;
mod array;
mod function;
mod repr;

pub use allocator::{
    AddrInterval, Allocator, BRK0_ADDR, DATA_SEGMENT_START, MAX_STACK_ADDR, MIN_STACK_ADDR,
    NormalAllocator, StaticAllocator, TEXT_SEGMENT_START,
};
pub use array::ArrayRepr;
pub use function::{FunctionMemory, FunctionRepr};
pub use repr::{MemRepr, MemValue};

use crate::config::{AllocatorKind, MemReprKind, OpSemConfig};
use crate::error::OpSemError;
use opsem_ir::{Function, GlobalVariable, ICmpPredicate, Module, Type, ValueId};
use std::fmt::{Debug, Formatter};
use tracing::{debug, warn};
use z3::ast::{Ast, BV, Bool};

pub struct MemManager {
    ptr_bytes: u32,
    word_bytes: u32,
    max_unroll: u64,
    repr: Box<dyn MemRepr>,
    allocator: Box<dyn Allocator>,
}

impl Debug for MemManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemManager")
            .field("ptr_bytes", &self.ptr_bytes)
            .field("word_bytes", &self.word_bytes)
            .field("max_unroll", &self.max_unroll)
            .field("repr", &self.repr.kind())
            .finish()
    }
}

impl MemManager {
    pub fn new(config: &OpSemConfig) -> Result<Self, OpSemError> {
        config.validate()?;
        let repr: Box<dyn MemRepr> = match config.memory_repr {
            MemReprKind::Array => Box::new(ArrayRepr::new(
                config.ptr_bits(),
                config.word_size_bytes,
            )),
            MemReprKind::Function => Box::new(FunctionRepr::new(
                config.ptr_bits(),
                config.word_size_bytes,
            )),
        };
        let allocator: Box<dyn Allocator> = match config.allocator {
            AllocatorKind::Normal => Box::new(NormalAllocator::new()),
            AllocatorKind::Static => Box::new(StaticAllocator::new()),
        };
        Ok(Self::with_parts(
            config.ptr_size_bytes,
            config.word_size_bytes,
            repr,
            allocator,
        )
        .with_unroll_limit(config.max_unroll_bytes))
    }

    pub fn with_parts(
        ptr_bytes: u32,
        word_bytes: u32,
        repr: Box<dyn MemRepr>,
        allocator: Box<dyn Allocator>,
    ) -> Self {
        Self {
            ptr_bytes,
            word_bytes,
            max_unroll: OpSemConfig::default().max_unroll_bytes,
            repr,
            allocator,
        }
    }

    pub fn with_unroll_limit(mut self, bytes: u64) -> Self {
        self.max_unroll = bytes;
        self
    }

    fn check_unroll(&self, op: &'static str, len: u64) -> Result<(), OpSemError> {
        if len > self.max_unroll {
            return Err(OpSemError::UnrollLimit {
                op,
                len,
                limit: self.max_unroll,
            });
        }
        Ok(())
    }

    pub fn repr(&self) -> &dyn MemRepr {
        self.repr.as_ref()
    }

    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    pub fn ptr_size_bytes(&self) -> u32 {
        self.ptr_bytes
    }

    pub fn ptr_bits(&self) -> u32 {
        self.ptr_bytes * 8
    }

    pub fn word_size_bytes(&self) -> u32 {
        self.word_bytes
    }

    pub fn word_bits(&self) -> u32 {
        self.word_bytes * 8
    }

    // ---- pointers ----

    pub fn null_ptr(&self) -> BV {
        BV::from_u64(0, self.ptr_bits())
    }

    pub fn mk_ptr(&self, addr: u64) -> BV {
        BV::from_u64(addr, self.ptr_bits())
    }

    /// A nondeterministic pointer whose low `log2(align)` bits are zero
    pub fn fresh_ptr(&self, align: u32) -> BV {
        let ptr = BV::fresh_const("sea.ptr", self.ptr_bits());
        self.mk_aligned_ptr(&ptr, align)
    }

    /// `ptr` with its low `log2(align)` bits cleared
    pub fn mk_aligned_ptr(&self, ptr: &BV, align: u32) -> BV {
        let low_bits = align.max(1).trailing_zeros();
        if low_bits == 0 || low_bits >= self.ptr_bits() {
            return ptr.clone();
        }
        ptr.extract(self.ptr_bits() - 1, low_bits)
            .concat(&BV::from_u64(0, low_bits))
    }

    pub fn ptr_add(&self, ptr: &BV, offset: i64) -> BV {
        if offset == 0 {
            return ptr.clone();
        }
        ptr.bvadd(&BV::from_i64(offset, self.ptr_bits()))
    }

    /// Pointer plus a signed offset of any width
    pub fn ptr_add_sym(&self, ptr: &BV, offset: &BV) -> BV {
        ptr.bvadd(&self.fit_signed(offset))
    }

    /// Byte distance between two pointers
    pub fn ptr_sub(&self, lhs: &BV, rhs: &BV) -> BV {
        lhs.bvsub(rhs)
    }

    /// `base + offset + sum(index * stride)`, indices taken as signed
    pub fn gep(&self, base: &BV, offset: i64, indices: &[(BV, u64)]) -> BV {
        let mut ptr = self.ptr_add(base, offset);
        for (index, stride) in indices {
            let scaled = self
                .fit_signed(index)
                .bvmul(&BV::from_u64(*stride, self.ptr_bits()));
            ptr = ptr.bvadd(&scaled);
        }
        ptr
    }

    pub fn ptr_eq(&self, lhs: &BV, rhs: &BV) -> Bool {
        lhs.eq(rhs)
    }

    pub fn ptr_ne(&self, lhs: &BV, rhs: &BV) -> Bool {
        lhs.eq(rhs).not()
    }

    pub fn ptr_compare(&self, pred: ICmpPredicate, lhs: &BV, rhs: &BV) -> Bool {
        match pred {
            ICmpPredicate::Eq => self.ptr_eq(lhs, rhs),
            ICmpPredicate::Ne => self.ptr_ne(lhs, rhs),
            ICmpPredicate::Ugt => lhs.bvugt(rhs),
            ICmpPredicate::Uge => lhs.bvuge(rhs),
            ICmpPredicate::Ult => lhs.bvult(rhs),
            ICmpPredicate::Ule => lhs.bvule(rhs),
            ICmpPredicate::Sgt => lhs.bvsgt(rhs),
            ICmpPredicate::Sge => lhs.bvsge(rhs),
            ICmpPredicate::Slt => lhs.bvslt(rhs),
            ICmpPredicate::Sle => lhs.bvsle(rhs),
        }
    }

    pub fn inttoptr(&self, int: &BV) -> BV {
        Self::fit_unsigned(int, self.ptr_bits())
    }

    pub fn ptrtoint(&self, ptr: &BV, width: u32) -> BV {
        Self::fit_unsigned(ptr, width)
    }

    fn fit_unsigned(bv: &BV, width: u32) -> BV {
        let size = bv.get_size();
        match size.cmp(&width) {
            std::cmp::Ordering::Less => bv.zero_ext(width - size),
            std::cmp::Ordering::Greater => bv.extract(width - 1, 0),
            std::cmp::Ordering::Equal => bv.clone(),
        }
    }

    fn fit_signed(&self, bv: &BV) -> BV {
        let width = self.ptr_bits();
        let size = bv.get_size();
        match size.cmp(&width) {
            std::cmp::Ordering::Less => bv.sign_ext(width - size),
            std::cmp::Ordering::Greater => bv.extract(width - 1, 0),
            std::cmp::Ordering::Equal => bv.clone(),
        }
    }

    // ---- allocation ----

    fn interval_ptr(&self, interval: AddrInterval, align: u32, what: &str) -> BV {
        if interval.is_bad() {
            warn!("{} allocation failed, using a fresh pointer", what);
            self.fresh_ptr(align)
        } else {
            self.mk_ptr(interval.low)
        }
    }

    pub fn salloc(&mut self, site: Option<ValueId>, bytes: u64, align: u32) -> BV {
        let align = self.effective_align(align);
        let i = self.allocator.salloc(site, bytes, align);
        self.interval_ptr(i, align, "stack")
    }

    pub fn salloc_symbolic(&mut self, site: Option<ValueId>, bytes: &BV, align: u32) -> BV {
        let align = self.effective_align(align);
        let i = self.allocator.salloc_symbolic(site, bytes, align);
        self.interval_ptr(i, align, "stack")
    }

    pub fn halloc(&mut self, bytes: u64, align: u32) -> BV {
        let align = self.effective_align(align);
        let i = self.allocator.halloc(bytes, align);
        self.interval_ptr(i, align, "heap")
    }

    pub fn halloc_symbolic(&mut self, bytes: &BV, align: u32) -> BV {
        let align = self.effective_align(align);
        let i = self.allocator.halloc_symbolic(bytes, align);
        self.interval_ptr(i, align, "heap")
    }

    /// Address of a global; allocated on first request
    pub fn galloc(&mut self, gv: &GlobalVariable) -> BV {
        let align = self.effective_align(gv.align);
        let bytes = gv.size(self.ptr_bytes);
        let i = self.allocator.galloc(gv, bytes, align);
        self.interval_ptr(i, align, "global")
    }

    /// Address of a function's code; allocated on first request
    pub fn falloc(&mut self, f: &Function) -> BV {
        let align = self.effective_align(0);
        let i = self.allocator.falloc(f, align);
        self.interval_ptr(i, align, "code")
    }

    pub fn mk_stack_ptr(&self) -> BV {
        self.mk_ptr(self.allocator.stack_top())
    }

    pub fn brk0_ptr(&self) -> BV {
        self.mk_ptr(self.allocator.brk0())
    }

    pub fn stack_range(&self) -> AddrInterval {
        self.allocator.stack_range()
    }

    pub fn global_init_value(&self, gv: &GlobalVariable) -> Option<Vec<u8>> {
        self.allocator.global_init_value(gv)
    }

    /// Lays out code for every address-taken function and storage for every global
    pub fn on_module_entry(&mut self, module: &Module) {
        self.allocator.on_module_entry(module);
        for f in module.functions().iter().filter(|f| f.address_taken) {
            self.falloc(f);
        }
        for gv in module.globals().iter().filter(|g| !g.is_metadata()) {
            self.galloc(gv);
        }
        self.allocator.dump_globals_map();
    }

    /// Returns the initial stack pointer of the new activation
    pub fn on_function_entry(&mut self, f: &Function) -> BV {
        self.allocator.on_function_entry(f);
        debug!("entering {} with stack top {:#x}", f.name, self.allocator.stack_top());
        self.mk_stack_ptr()
    }

    fn effective_align(&self, align: u32) -> u32 {
        if align == 0 { self.word_bytes } else { align }
    }

    // ---- byte-level access ----

    /// Whether an access at `ptr` declared with alignment `align` hits whole words
    pub fn is_aligned(&self, ptr: &BV, align: u32) -> bool {
        if self.word_bytes == 1 || (align != 0 && align % self.word_bytes == 0) {
            return true;
        }
        ptr.simplify()
            .as_u64()
            .is_some_and(|p| p % self.word_bytes as u64 == 0)
    }

    /// Splits a byte address into its word address and the byte offset inside that word
    pub fn split_address(&self, ptr: &BV) -> (BV, BV) {
        let low_bits = self.word_bytes.trailing_zeros();
        if low_bits == 0 {
            return (ptr.clone(), BV::from_u64(0, self.word_bits()));
        }
        let word = self.mk_aligned_ptr(ptr, self.word_bytes);
        let offset = ptr.extract(low_bits - 1, 0).zero_ext(self.word_bits() - low_bits);
        (word, offset)
    }

    fn byte_shift(&self, offset: &BV) -> BV {
        offset.bvshl(&BV::from_u64(3, self.word_bits()))
    }

    /// The byte at any address
    pub fn extract_unaligned_byte(&self, mem: &MemValue, ptr: &BV) -> Result<BV, OpSemError> {
        if self.word_bytes == 1 {
            return self.repr.load_aligned_word(mem, ptr);
        }
        let (word_ptr, offset) = self.split_address(ptr);
        let word = self.repr.load_aligned_word(mem, &word_ptr)?;
        Ok(word.bvlshr(&self.byte_shift(&offset)).extract(7, 0))
    }

    /// Overwrites the byte at any address
    pub fn set_byte_of_word(
        &self,
        mem: &MemValue,
        ptr: &BV,
        byte: &BV,
    ) -> Result<MemValue, OpSemError> {
        if self.word_bytes == 1 {
            return self.repr.store_aligned_word(mem, ptr, byte);
        }
        let (word_ptr, offset) = self.split_address(ptr);
        let word = self.repr.load_aligned_word(mem, &word_ptr)?;
        let shift = self.byte_shift(&offset);
        let mask = BV::from_u64(0xff, self.word_bits()).bvshl(&shift).bvnot();
        let placed = byte.zero_ext(self.word_bits() - 8).bvshl(&shift);
        let updated = word.bvand(&mask).bvor(&placed);
        self.repr.store_aligned_word(mem, &word_ptr, &updated)
    }

    /// Loads a `bytes`-wide little-endian integer
    pub fn load_int_from_mem(
        &self,
        mem: &MemValue,
        ptr: &BV,
        bytes: u32,
        align: u32,
    ) -> Result<BV, OpSemError> {
        if bytes == 0 {
            return Err(OpSemError::ZeroSizedAccess);
        }
        if self.is_aligned(ptr, align) {
            if bytes <= self.word_bytes {
                let word = self.repr.load_aligned_word(mem, ptr)?;
                return Ok(if bytes == self.word_bytes {
                    word
                } else {
                    word.extract(bytes * 8 - 1, 0)
                });
            }
            if bytes % self.word_bytes == 0 {
                let words = (0..bytes / self.word_bytes)
                    .map(|i| {
                        let p = self.ptr_add(ptr, (i * self.word_bytes) as i64);
                        self.repr.load_aligned_word(mem, &p)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Self::concat_le(words));
            }
        }
        let bytes = (0..bytes)
            .map(|i| self.extract_unaligned_byte(mem, &self.ptr_add(ptr, i as i64)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::concat_le(bytes))
    }

    /// Stores `val`, whose width must be a whole number of bytes
    pub fn store_int_to_mem(
        &self,
        mem: &MemValue,
        ptr: &BV,
        val: &BV,
        align: u32,
    ) -> Result<MemValue, OpSemError> {
        let bytes = val.get_size() / 8;
        if bytes == 0 {
            return Err(OpSemError::ZeroSizedAccess);
        }
        if self.is_aligned(ptr, align) && bytes % self.word_bytes == 0 {
            let words: Vec<BV> = (0..bytes / self.word_bytes)
                .map(|i| val.extract((i + 1) * self.word_bits() - 1, i * self.word_bits()))
                .collect();
            return match words.as_slice() {
                [word] => self.repr.store_aligned_word(mem, ptr, word),
                _ => self.repr.mem_fill(mem, ptr, &words),
            };
        }
        let mut scratch = mem.clone();
        for i in 0..bytes {
            let byte = val.extract(i * 8 + 7, i * 8);
            scratch = self.set_byte_of_word(&scratch, &self.ptr_add(ptr, i as i64), &byte)?;
        }
        Ok(scratch)
    }

    /// Loads a value of type `ty`, producing a boolean for `i1`
    pub fn load_value_from_mem(
        &self,
        mem: &MemValue,
        ptr: &BV,
        ty: &Type,
        align: u32,
    ) -> Result<crate::value::SymValue, OpSemError> {
        match ty {
            Type::Int(1) => {
                let byte = self.load_int_from_mem(mem, ptr, 1, align)?;
                Ok(byte.extract(0, 0).eq(&BV::from_u64(1, 1)).into())
            }
            Type::Int(w) => {
                let raw = self.load_int_from_mem(mem, ptr, w.div_ceil(8), align)?;
                Ok(if w % 8 == 0 {
                    raw.into()
                } else {
                    raw.extract(w - 1, 0).into()
                })
            }
            Type::Ptr => Ok(self.load_int_from_mem(mem, ptr, self.ptr_bytes, align)?.into()),
            other => Err(OpSemError::UnsupportedType(format!("{:?}", other))),
        }
    }

    pub fn store_value_to_mem(
        &self,
        mem: &MemValue,
        ptr: &BV,
        val: &crate::value::SymValue,
        ty: &Type,
        align: u32,
    ) -> Result<MemValue, OpSemError> {
        let raw = match ty {
            Type::Int(1) => {
                let b = val.as_bool()?;
                b.ite(&BV::from_u64(1, 8), &BV::from_u64(0, 8))
            }
            Type::Int(w) => {
                let bv = val.as_bv()?;
                if w % 8 == 0 {
                    bv.clone()
                } else {
                    bv.zero_ext(w.div_ceil(8) * 8 - w)
                }
            }
            Type::Ptr => val.as_bv()?.clone(),
            other => return Err(OpSemError::UnsupportedType(format!("{:?}", other))),
        };
        self.store_int_to_mem(mem, ptr, &raw, align)
    }

    /// Sets `len` bytes at `ptr` to the 8-bit `byte`
    pub fn mem_set(
        &self,
        mem: &MemValue,
        ptr: &BV,
        byte: &BV,
        len: u64,
        align: u32,
    ) -> Result<MemValue, OpSemError> {
        if len == 0 {
            return Ok(mem.clone());
        }
        self.check_unroll("memset", len)?;
        if self.is_aligned(ptr, align) && len % self.word_bytes as u64 == 0 {
            let word = (1..self.word_bytes).fold(byte.clone(), |w, _| w.concat(byte));
            return self.repr.mem_set(mem, ptr, &word, len);
        }
        let mut scratch = mem.clone();
        for i in 0..len {
            scratch = self.set_byte_of_word(&scratch, &self.ptr_add(ptr, i as i64), byte)?;
        }
        Ok(scratch)
    }

    /// Copies `len` bytes from `src` in `src_mem` to `dst` in `dst_mem`
    pub fn mem_cpy(
        &self,
        dst_mem: &MemValue,
        src_mem: &MemValue,
        dst: &BV,
        src: &BV,
        len: u64,
        align: u32,
    ) -> Result<MemValue, OpSemError> {
        if len == 0 {
            return Ok(dst_mem.clone());
        }
        self.check_unroll("memcpy", len)?;
        if self.is_aligned(dst, align)
            && self.is_aligned(src, align)
            && len % self.word_bytes as u64 == 0
        {
            return self.repr.mem_cpy(dst_mem, src_mem, dst, src, len);
        }
        let mut scratch = dst_mem.clone();
        for i in 0..len {
            let byte = self.extract_unaligned_byte(src_mem, &self.ptr_add(src, i as i64))?;
            scratch = self.set_byte_of_word(&scratch, &self.ptr_add(dst, i as i64), &byte)?;
        }
        Ok(scratch)
    }

    /// Writes a concrete byte image at `ptr`
    pub fn mem_fill(
        &self,
        mem: &MemValue,
        ptr: &BV,
        bytes: &[u8],
        align: u32,
    ) -> Result<MemValue, OpSemError> {
        let ws = self.word_bytes as usize;
        let whole = if self.is_aligned(ptr, align) {
            bytes.len() / ws * ws
        } else {
            0
        };
        let mut scratch = mem.clone();
        if whole > 0 {
            let words: Vec<BV> = bytes[..whole]
                .chunks(ws)
                .map(|chunk| {
                    let mut le = [0u8; 8];
                    le[..ws].copy_from_slice(chunk);
                    BV::from_u64(u64::from_le_bytes(le), self.word_bits())
                })
                .collect();
            scratch = self.repr.mem_fill(&scratch, ptr, &words)?;
        }
        for (i, b) in bytes.iter().enumerate().skip(whole) {
            let byte = BV::from_u64(*b as u64, 8);
            scratch = self.set_byte_of_word(&scratch, &self.ptr_add(ptr, i as i64), &byte)?;
        }
        Ok(scratch)
    }

    /// A region that reads as zero everywhere
    pub fn zero_memory(&self) -> MemValue {
        self.repr.constant_memory(&BV::from_u64(0, self.word_bits()))
    }

    /// Little-endian concatenation: element 0 is least significant
    fn concat_le(parts: Vec<BV>) -> BV {
        let mut iter = parts.into_iter().rev();
        let first = iter.next();
        iter.fold(first.unwrap_or_else(|| BV::from_u64(0, 8)), |acc, p| {
            acc.concat(&p)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SymValue;
    use z3::{SatResult, Solver};

    fn manager(repr: MemReprKind) -> MemManager {
        MemManager::new(&OpSemConfig {
            memory_repr: repr,
            ..Default::default()
        })
        .unwrap()
    }

    fn provably_equal(a: &BV, b: &BV) -> bool {
        let s = Solver::new();
        s.assert(a.eq(b).not());
        s.check() == SatResult::Unsat
    }

    fn proves_value(a: &BV, v: u64) -> bool {
        provably_equal(a, &BV::from_u64(v, a.get_size()))
    }

    #[test]
    fn round_trip_in_both_representations() {
        for kind in [MemReprKind::Array, MemReprKind::Function] {
            let m = manager(kind);
            let mem = m.repr().fresh_memory("mem");
            let p = BV::new_const("p", 32);
            let p = m.mk_aligned_ptr(&p, 4);
            let v = BV::new_const("v", 32);
            let stored = m
                .store_value_to_mem(&mem, &p, &SymValue::Bv(v.clone()), &Type::Int(32), 4)
                .unwrap();
            let loaded = m
                .load_value_from_mem(&stored, &p, &Type::Int(32), 4)
                .unwrap();
            assert!(provably_equal(loaded.as_bv().unwrap(), &v), "{:?}", kind);
        }
    }

    #[test]
    fn unaligned_access_across_words() {
        for kind in [MemReprKind::Array, MemReprKind::Function] {
            let m = manager(kind);
            let mem = m.repr().fresh_memory("mem");
            let p = m.mk_ptr(0x1002);
            let v = BV::new_const("v", 32);
            let stored = m.store_int_to_mem(&mem, &p, &v, 1).unwrap();
            let loaded = m.load_int_from_mem(&stored, &p, 4, 1).unwrap();
            assert!(provably_equal(&loaded, &v));
            let low = m.extract_unaligned_byte(&stored, &m.mk_ptr(0x1004)).unwrap();
            assert!(provably_equal(&low, &v.extract(23, 16)));
        }
    }

    #[test]
    fn unaligned_store_preserves_neighbours() {
        let m = manager(MemReprKind::Array);
        let mem = m.zero_memory();
        let stored = m
            .store_int_to_mem(&mem, &m.mk_ptr(0x101), &BV::from_u64(0xabcd, 16), 1)
            .unwrap();
        let word = m.load_int_from_mem(&stored, &m.mk_ptr(0x100), 4, 4).unwrap();
        assert!(proves_value(&word, 0x00ab_cd00));
    }

    #[test]
    fn bool_and_odd_widths() {
        let m = manager(MemReprKind::Array);
        let mem = m.zero_memory();
        let p = m.mk_ptr(0x200);
        let stored = m
            .store_value_to_mem(&mem, &p, &SymValue::Bool(Bool::from_bool(true)), &Type::bool(), 1)
            .unwrap();
        let b = m.load_value_from_mem(&stored, &p, &Type::bool(), 1).unwrap();
        assert_eq!(b.as_bool().unwrap().simplify().as_bool(), Some(true));

        let stored = m
            .store_value_to_mem(&mem, &p, &SymValue::Bv(BV::from_u64(0x1ffff, 17)), &Type::Int(17), 4)
            .unwrap();
        let v = m.load_value_from_mem(&stored, &p, &Type::Int(17), 4).unwrap();
        assert_eq!(v.as_bv().unwrap().get_size(), 17);
        assert!(proves_value(v.as_bv().unwrap(), 0x1ffff));
    }

    #[test]
    fn fill_with_global_image() {
        for kind in [MemReprKind::Array, MemReprKind::Function] {
            let m = manager(kind);
            let mem = m.repr().fresh_memory("mem");
            let p = m.mk_ptr(0x0900_0000);
            let filled = m.mem_fill(&mem, &p, &[1, 2, 3, 4, 5, 6], 4).unwrap();
            let first = m.load_int_from_mem(&filled, &p, 4, 4).unwrap();
            assert!(proves_value(&first, 0x0403_0201));
            let tail = m.load_int_from_mem(&filled, &m.ptr_add(&p, 4), 2, 4).unwrap();
            assert!(proves_value(&tail, 0x0605));
        }
    }

    #[test]
    fn memset_and_memcpy() {
        let m = manager(MemReprKind::Function);
        let zero = m.zero_memory();
        let dst = m.mk_ptr(0x100);
        let set = m.mem_set(&zero, &dst, &BV::from_u64(0x7f, 8), 8, 4).unwrap();
        let w = m.load_int_from_mem(&set, &m.ptr_add(&dst, 4), 4, 4).unwrap();
        assert!(proves_value(&w, 0x7f7f_7f7f));

        let copied = m.mem_cpy(&zero, &set, &m.mk_ptr(0x201), &dst, 3, 1).unwrap();
        let b = m.load_int_from_mem(&copied, &m.mk_ptr(0x200), 4, 4).unwrap();
        assert!(proves_value(&b, 0x7f7f_7f00));
    }

    #[test]
    fn bulk_operations_past_the_unroll_limit_fail() {
        let m = manager(MemReprKind::Array).with_unroll_limit(64);
        let zero = m.zero_memory();
        let dst = m.mk_ptr(0x100);
        let byte = BV::from_u64(0, 8);
        assert!(m.mem_set(&zero, &dst, &byte, 64, 4).is_ok());
        assert!(matches!(
            m.mem_set(&zero, &dst, &byte, 400_000_000, 4),
            Err(OpSemError::UnrollLimit { op: "memset", limit: 64, .. })
        ));
        assert!(matches!(
            m.mem_cpy(&zero, &zero, &dst, &m.mk_ptr(0x800), 65, 1),
            Err(OpSemError::UnrollLimit { op: "memcpy", len: 65, .. })
        ));
    }

    #[test]
    fn fresh_pointers_are_aligned() {
        let m = manager(MemReprKind::Array);
        let p = m.fresh_ptr(8);
        let s = Solver::new();
        s.assert(p.extract(2, 0).eq(&BV::from_u64(0, 3)).not());
        assert_eq!(s.check(), SatResult::Unsat);
    }

    #[test]
    fn pointer_arithmetic() {
        let m = manager(MemReprKind::Array);
        let base = m.mk_ptr(0x1000);
        let idx = BV::from_i64(-2, 8);
        let p = m.gep(&base, 8, &[(idx, 4)]);
        assert_eq!(p.simplify().as_u64(), Some(0x1000));
        let d = m.ptr_sub(&m.ptr_add(&base, 12), &base);
        assert_eq!(d.simplify().as_u64(), Some(12));
        assert_eq!(m.ptrtoint(&base, 64).get_size(), 64);
        assert_eq!(m.inttoptr(&BV::from_u64(7, 64)).get_size(), 32);
        let lt = m.ptr_compare(ICmpPredicate::Ult, &base, &d);
        assert_eq!(lt.simplify().as_bool(), Some(false));
    }

    #[test]
    fn failed_allocation_yields_fresh_pointer() {
        let mut m = manager(MemReprKind::Array);
        let n = BV::new_const("n", 32);
        let p = m.salloc_symbolic(None, &n, 4);
        assert!(p.simplify().as_u64().is_none());
        let h = m.halloc(16, 4);
        assert_eq!(h.simplify().as_u64(), Some(BRK0_ADDR));
    }
}
