use crate::config::MemReprKind;
use crate::error::OpSemError;
use crate::memory::repr::{MemRepr, MemValue};
use std::cell::{Cell, OnceCell};
use std::ops::Add;
use std::rc::Rc;
use z3::ast::{Array, Ast, BV, Bool, Dynamic, lambda_const};
use z3::{FuncDecl, Sort};

#[derive(Debug)]
enum Layer {
    /// An uninterpreted function from pointer to word
    Opaque(FuncDecl),
    Constant(BV),
    /// An array brought in from outside the function representation
    Array(Array),
    Store {
        prev: FunctionMemory,
        addr: BV,
        word: BV,
    },
    /// `word` everywhere in `[start, end)`
    Fill {
        prev: FunctionMemory,
        start: BV,
        end: BV,
        word: BV,
    },
    /// `src` shifted so that `src_start` lands on `start`, within `[start, end)`
    Copy {
        prev: FunctionMemory,
        start: BV,
        end: BV,
        src: FunctionMemory,
        src_start: BV,
    },
}

#[derive(Debug)]
struct Node {
    layer: Layer,
    ptr_bits: u32,
    /// The whole function as one array-sorted lambda, built on first request
    term: OnceCell<Array>,
}

/// Memory as a total function from pointer to word.
///
/// Each update layers a guarded override over the previous function; nothing is ever modified
/// in place, so older versions stay valid and share structure with newer ones.
#[derive(Clone, Debug)]
pub struct FunctionMemory(Rc<Node>);

impl FunctionMemory {
    fn new(layer: Layer, ptr_bits: u32) -> Self {
        Self(Rc::new(Node {
            layer,
            ptr_bits,
            term: OnceCell::new(),
        }))
    }

    fn in_range(addr: &BV, start: &BV, end: &BV) -> Bool {
        Bool::and(&[addr.bvuge(start), addr.bvult(end)])
    }

    /// The word this function maps `addr` to
    pub fn apply(&self, addr: &BV) -> Result<BV, OpSemError> {
        let mut overrides = vec![];
        let mut cursor = self;
        let base = loop {
            match &cursor.0.layer {
                Layer::Opaque(decl) => {
                    break decl
                        .apply(&[addr as &dyn Ast])
                        .as_bv()
                        .ok_or(OpSemError::UnexpectedArraySort)?;
                }
                Layer::Constant(word) => break word.clone(),
                Layer::Array(array) => {
                    break array
                        .select(addr)
                        .as_bv()
                        .ok_or(OpSemError::UnexpectedArraySort)?;
                }
                Layer::Store { prev, .. } | Layer::Fill { prev, .. } | Layer::Copy { prev, .. } => {
                    overrides.push(cursor);
                    cursor = prev;
                }
            }
        };
        overrides.iter().rev().try_fold(base, |acc, layer| {
            Ok(match &layer.0.layer {
                Layer::Store { addr: a, word, .. } => addr.eq(a).ite(word, &acc),
                Layer::Fill {
                    start, end, word, ..
                } => Self::in_range(addr, start, end).ite(word, &acc),
                Layer::Copy {
                    start,
                    end,
                    src,
                    src_start,
                    ..
                } => {
                    let shifted = addr.bvsub(start).bvadd(src_start);
                    Self::in_range(addr, start, end).ite(&src.apply(&shifted)?, &acc)
                }
                _ => acc,
            })
        })
    }

    /// This function as an SMT array, `lambda a. apply(a)`.
    ///
    /// Summary relations and other consumers that need memory as a single term take this one.
    pub fn as_array(&self) -> Result<&Array, OpSemError> {
        if let Some(term) = self.0.term.get() {
            return Ok(term);
        }
        let addr = BV::fresh_const("addr", self.0.ptr_bits);
        let body = self.apply(&addr)?;
        let term = lambda_const(&[&addr as &dyn Ast], &Dynamic::from_ast(&body));
        Ok(self.0.term.get_or_init(|| term))
    }

    /// Number of override layers above the base function
    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cursor = self;
        while let Layer::Store { prev, .. } | Layer::Fill { prev, .. } | Layer::Copy { prev, .. } =
            &cursor.0.layer
        {
            n += 1;
            cursor = prev;
        }
        n
    }
}

/// The function-backed [`MemRepr`]
#[derive(Debug)]
pub struct FunctionRepr {
    ptr_bits: u32,
    word_bytes: u32,
    fresh: Cell<u64>,
}

impl FunctionRepr {
    pub fn new(ptr_bits: u32, word_bytes: u32) -> Self {
        Self {
            ptr_bits,
            word_bytes,
            fresh: Cell::new(0),
        }
    }

    fn decl(&self, name: String) -> FuncDecl {
        FuncDecl::new(
            name,
            &[&Sort::bitvector(self.ptr_bits)],
            &Sort::bitvector(self.word_bytes * 8),
        )
    }

    fn memory(&self, layer: Layer) -> MemValue {
        MemValue::Function(FunctionMemory::new(layer, self.ptr_bits))
    }

    fn function<'a>(&self, mem: &'a MemValue) -> Result<&'a FunctionMemory, OpSemError> {
        match mem {
            MemValue::Function(f) => Ok(f),
            MemValue::Array(_) => Err(OpSemError::MemReprMismatch),
        }
    }

    fn end_of(&self, ptr: &BV, len: u64) -> BV {
        ptr.clone().add(len)
    }
}

impl MemRepr for FunctionRepr {
    fn kind(&self) -> MemReprKind {
        MemReprKind::Function
    }

    fn named_memory(&self, name: &str) -> MemValue {
        self.memory(Layer::Opaque(self.decl(name.to_string())))
    }

    fn fresh_memory(&self, prefix: &str) -> MemValue {
        let n = self.fresh.get();
        self.fresh.set(n + 1);
        self.memory(Layer::Opaque(self.decl(format!("{}!fn{}", prefix, n))))
    }

    fn constant_memory(&self, word: &BV) -> MemValue {
        self.memory(Layer::Constant(word.clone()))
    }

    fn coerce(&self, mem: MemValue) -> Result<MemValue, OpSemError> {
        match mem {
            MemValue::Function(_) => Ok(mem),
            MemValue::Array(a) => Ok(self.memory(Layer::Array(a))),
        }
    }

    fn load_aligned_word(&self, mem: &MemValue, ptr: &BV) -> Result<BV, OpSemError> {
        self.function(mem)?.apply(ptr)
    }

    fn store_aligned_word(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
    ) -> Result<MemValue, OpSemError> {
        Ok(self.memory(Layer::Store {
            prev: self.function(mem)?.clone(),
            addr: ptr.clone(),
            word: word.clone(),
        }))
    }

    fn mem_set(
        &self,
        mem: &MemValue,
        ptr: &BV,
        word: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError> {
        if len == 0 {
            return Ok(mem.clone());
        }
        Ok(self.memory(Layer::Fill {
            prev: self.function(mem)?.clone(),
            start: ptr.clone(),
            end: self.end_of(ptr, len),
            word: word.clone(),
        }))
    }

    fn mem_cpy(
        &self,
        dst_mem: &MemValue,
        src_mem: &MemValue,
        dst: &BV,
        src: &BV,
        len: u64,
    ) -> Result<MemValue, OpSemError> {
        if len == 0 {
            return Ok(dst_mem.clone());
        }
        Ok(self.memory(Layer::Copy {
            prev: self.function(dst_mem)?.clone(),
            start: dst.clone(),
            end: self.end_of(dst, len),
            src: self.function(src_mem)?.clone(),
            src_start: src.clone(),
        }))
    }

    fn mem_fill(&self, mem: &MemValue, ptr: &BV, words: &[BV]) -> Result<MemValue, OpSemError> {
        words.iter().enumerate().try_fold(mem.clone(), |acc, (i, word)| {
            let offset = i as u64 * self.word_bytes as u64;
            self.store_aligned_word(&acc, &ptr.clone().add(offset), word)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::{SatResult, Solver};

    fn repr() -> FunctionRepr {
        FunctionRepr::new(32, 4)
    }

    fn word_at(r: &FunctionRepr, mem: &MemValue, addr: u64) -> u64 {
        r.load_aligned_word(mem, &BV::from_u64(addr, 32))
            .unwrap()
            .simplify()
            .as_u64()
            .unwrap()
    }

    #[test]
    fn latest_store_wins() {
        let r = repr();
        let mem = r.constant_memory(&BV::from_u64(0, 32));
        let mem = r
            .store_aligned_word(&mem, &BV::from_u64(4, 32), &BV::from_u64(1, 32))
            .unwrap();
        let mem = r
            .store_aligned_word(&mem, &BV::from_u64(4, 32), &BV::from_u64(2, 32))
            .unwrap();
        assert_eq!(word_at(&r, &mem, 4), 2);
        assert_eq!(word_at(&r, &mem, 8), 0);
        assert_eq!(word_at(&r, &mem, 0), 0);
    }

    #[test]
    fn fill_is_one_layer() {
        let r = repr();
        let mem = r.fresh_memory("m");
        let mem = r
            .mem_set(&mem, &BV::from_u64(0x100, 32), &BV::from_u64(9, 32), 4096)
            .unwrap();
        let MemValue::Function(f) = &mem else {
            panic!("function repr produced an array")
        };
        assert_eq!(f.depth(), 1);
        assert_eq!(word_at(&r, &mem, 0x100 + 4092), 9);
    }

    #[test]
    fn copy_shifts_source_addresses() {
        let r = repr();
        let src = r.constant_memory(&BV::from_u64(0, 32));
        let src = r
            .store_aligned_word(&src, &BV::from_u64(0x44, 32), &BV::from_u64(0xbeef, 32))
            .unwrap();
        let dst = r.fresh_memory("dst");
        let out = r
            .mem_cpy(&dst, &src, &BV::from_u64(0x200, 32), &BV::from_u64(0x40, 32), 8)
            .unwrap();
        assert_eq!(word_at(&r, &out, 0x204), 0xbeef);
        assert_eq!(word_at(&r, &out, 0x200), 0);
    }

    #[test]
    fn opaque_base_is_unconstrained_outside_updates() {
        let r = repr();
        let mem = r.fresh_memory("m");
        let mem = r
            .store_aligned_word(&mem, &BV::from_u64(0, 32), &BV::from_u64(5, 32))
            .unwrap();
        let other = r.load_aligned_word(&mem, &BV::from_u64(4, 32)).unwrap();
        let solver = Solver::new();
        solver.assert(&other.eq(&BV::from_u64(5, 32)).not());
        assert_eq!(solver.check(), SatResult::Sat);
    }

    #[test]
    fn arrays_coerce_into_functions() {
        let r = repr();
        let a = Array::const_array(&Sort::bitvector(32), &BV::from_u64(3, 32));
        let mem = r.coerce(MemValue::Array(a)).unwrap();
        assert_eq!(word_at(&r, &mem, 12), 3);
    }

    #[test]
    fn array_term_agrees_with_application() {
        let r = repr();
        let mem = r.fresh_memory("m");
        let mem = r
            .store_aligned_word(&mem, &BV::from_u64(8, 32), &BV::from_u64(7, 32))
            .unwrap();
        let MemValue::Function(f) = &mem else {
            panic!("function repr produced an array")
        };
        let term = f.as_array().unwrap();
        assert_eq!(term.get_sort(), Sort::array(&Sort::bitvector(32), &Sort::bitvector(32)));
        let addr = BV::new_const("a", 32);
        let selected = term.select(&addr).as_bv().unwrap();
        let solver = Solver::new();
        solver.assert(&selected.eq(&f.apply(&addr).unwrap()).not());
        assert_eq!(solver.check(), SatResult::Unsat);
        assert!(std::ptr::eq(term, f.as_array().unwrap()));
    }
}
