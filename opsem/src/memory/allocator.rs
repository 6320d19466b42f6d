use opsem_ir::{Function, FunctionId, GlobalId, GlobalVariable, Module, ValueId};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use tracing::debug;
use z3::ast::{Ast, BV};

pub const MAX_STACK_ADDR: u64 = 0xC000_0000;
pub const MIN_STACK_ADDR: u64 = MAX_STACK_ADDR - 9_437_184;
pub const TEXT_SEGMENT_START: u64 = 0x0804_8000;
pub const DATA_SEGMENT_START: u64 = 0x0900_0000;
pub const BRK0_ADDR: u64 = 0x1000_0000;

/// Bytes of code space reserved per function
const FUNCTION_SLOT_BYTES: u64 = 16;

/// A half-open range `[low, high)` of concrete addresses. `(0, 0)` signals a failed allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddrInterval {
    pub low: u64,
    pub high: u64,
}

impl AddrInterval {
    pub const BAD: AddrInterval = AddrInterval { low: 0, high: 0 };

    pub fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    pub fn is_bad(&self) -> bool {
        *self == Self::BAD
    }

    pub fn len(&self) -> u64 {
        self.high - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.low <= addr && addr < self.high
    }

    pub fn overlaps(&self, other: &AddrInterval) -> bool {
        !self.is_empty() && !other.is_empty() && self.low < other.high && other.low < self.high
    }
}

impl Display for AddrInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.low, self.high)
    }
}

/// Lays out the virtual address space: code, globals, heap and a downward-growing stack.
pub trait Allocator: Debug {
    /// Reserve `bytes` of stack for the allocation site `site`
    fn salloc(&mut self, site: Option<ValueId>, bytes: u64, align: u32) -> AddrInterval;

    /// Reserve a stack block whose size is a term; fails unless the term is a constant
    fn salloc_symbolic(&mut self, site: Option<ValueId>, bytes: &BV, align: u32) -> AddrInterval {
        match bytes.simplify().as_u64() {
            Some(n) => self.salloc(site, n, align),
            None => AddrInterval::BAD,
        }
    }

    fn halloc(&mut self, bytes: u64, align: u32) -> AddrInterval;

    fn halloc_symbolic(&mut self, bytes: &BV, align: u32) -> AddrInterval {
        match bytes.simplify().as_u64() {
            Some(n) => self.halloc(n, align),
            None => AddrInterval::BAD,
        }
    }

    /// Reserve space for a global. Repeated requests for one global return the same interval.
    fn galloc(&mut self, gv: &GlobalVariable, bytes: u64, align: u32) -> AddrInterval;

    /// Reserve code space for a function. Repeated requests return the same interval.
    fn falloc(&mut self, f: &Function, align: u32) -> AddrInterval;

    fn global_interval(&self, id: GlobalId) -> Option<AddrInterval>;

    fn function_interval(&self, id: FunctionId) -> Option<AddrInterval>;

    /// The byte image a global starts with, if it is known
    fn global_init_value(&self, gv: &GlobalVariable) -> Option<Vec<u8>> {
        gv.initializer.clone()
    }

    fn on_module_entry(&mut self, _module: &Module) {}

    fn on_function_entry(&mut self, f: &Function);

    /// The current top of the stack
    fn stack_top(&self) -> u64;

    fn stack_range(&self) -> AddrInterval {
        AddrInterval::new(MIN_STACK_ADDR, MAX_STACK_ADDR)
    }

    fn brk0(&self) -> u64 {
        BRK0_ADDR
    }

    fn dump_globals_map(&self);
}

fn align_up(addr: u64, align: u32) -> u64 {
    let align = align.max(1) as u64;
    addr.div_ceil(align) * align
}

fn align_down(addr: u64, align: u32) -> u64 {
    let align = align.max(1) as u64;
    addr / align * align
}

/// Region cursors shared by both allocators
#[derive(Debug, Clone)]
struct Layout {
    text: u64,
    data: u64,
    heap: u64,
    stack: u64,
    globals: HashMap<GlobalId, AddrInterval>,
    functions: HashMap<FunctionId, AddrInterval>,
}

impl Layout {
    fn new() -> Self {
        Self {
            text: TEXT_SEGMENT_START,
            data: DATA_SEGMENT_START,
            heap: BRK0_ADDR,
            stack: MAX_STACK_ADDR,
            globals: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    fn bump_up(cursor: &mut u64, limit: u64, bytes: u64, align: u32) -> AddrInterval {
        let low = align_up(*cursor, align);
        match low.checked_add(bytes.max(1)) {
            Some(high) if high <= limit => {
                *cursor = high;
                AddrInterval::new(low, low + bytes)
            }
            _ => AddrInterval::BAD,
        }
    }

    fn bump_down(&mut self, bytes: u64, align: u32) -> AddrInterval {
        let low = match self.stack.checked_sub(bytes.max(1)) {
            Some(l) => align_down(l, align),
            None => return AddrInterval::BAD,
        };
        if low < MIN_STACK_ADDR {
            return AddrInterval::BAD;
        }
        self.stack = low;
        AddrInterval::new(low, low + bytes)
    }

    fn halloc(&mut self, bytes: u64, align: u32) -> AddrInterval {
        Self::bump_up(&mut self.heap, MIN_STACK_ADDR, bytes, align)
    }

    fn galloc(&mut self, gv: &GlobalVariable, bytes: u64, align: u32) -> AddrInterval {
        if let Some(i) = self.globals.get(&gv.id) {
            return *i;
        }
        let i = Self::bump_up(&mut self.data, BRK0_ADDR, bytes, align.max(gv.align));
        if !i.is_bad() {
            self.globals.insert(gv.id, i);
        }
        i
    }

    fn falloc(&mut self, f: &Function, align: u32) -> AddrInterval {
        if let Some(i) = self.functions.get(&f.id) {
            return *i;
        }
        let i = Self::bump_up(&mut self.text, DATA_SEGMENT_START, FUNCTION_SLOT_BYTES, align);
        if !i.is_bad() {
            self.functions.insert(f.id, i);
        }
        i
    }

    fn dump(&self) {
        let mut globals: Vec<_> = self.globals.iter().collect();
        globals.sort_by_key(|(_, i)| i.low);
        for (g, i) in globals {
            debug!("global {} at {}", g, i);
        }
        let mut functions: Vec<_> = self.functions.iter().collect();
        functions.sort_by_key(|(_, i)| i.low);
        for (f, i) in functions {
            debug!("function {} at {}", f, i);
        }
    }
}

/// Gives every function activation a fresh stack starting at [`MAX_STACK_ADDR`]
#[derive(Debug, Clone)]
pub struct NormalAllocator {
    layout: Layout,
}

impl NormalAllocator {
    pub fn new() -> Self {
        Self {
            layout: Layout::new(),
        }
    }
}

impl Default for NormalAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for NormalAllocator {
    fn salloc(&mut self, _site: Option<ValueId>, bytes: u64, align: u32) -> AddrInterval {
        self.layout.bump_down(bytes, align)
    }

    fn halloc(&mut self, bytes: u64, align: u32) -> AddrInterval {
        self.layout.halloc(bytes, align)
    }

    fn galloc(&mut self, gv: &GlobalVariable, bytes: u64, align: u32) -> AddrInterval {
        self.layout.galloc(gv, bytes, align)
    }

    fn falloc(&mut self, f: &Function, align: u32) -> AddrInterval {
        self.layout.falloc(f, align)
    }

    fn global_interval(&self, id: GlobalId) -> Option<AddrInterval> {
        self.layout.globals.get(&id).copied()
    }

    fn function_interval(&self, id: FunctionId) -> Option<AddrInterval> {
        self.layout.functions.get(&id).copied()
    }

    fn on_function_entry(&mut self, f: &Function) {
        debug!("resetting stack for {}", f.name);
        self.layout.stack = MAX_STACK_ADDR;
    }

    fn stack_top(&self) -> u64 {
        self.layout.stack
    }

    fn dump_globals_map(&self) {
        self.layout.dump()
    }
}

/// Never reuses memory: every stack allocation site owns one interval for the whole run
#[derive(Debug, Clone)]
pub struct StaticAllocator {
    layout: Layout,
    sites: HashMap<ValueId, AddrInterval>,
}

impl StaticAllocator {
    pub fn new() -> Self {
        Self {
            layout: Layout::new(),
            sites: HashMap::new(),
        }
    }
}

impl Default for StaticAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for StaticAllocator {
    fn salloc(&mut self, site: Option<ValueId>, bytes: u64, align: u32) -> AddrInterval {
        if let Some(i) = site.and_then(|s| self.sites.get(&s)) {
            return *i;
        }
        let i = self.layout.bump_down(bytes, align);
        if let (Some(s), false) = (site, i.is_bad()) {
            self.sites.insert(s, i);
        }
        i
    }

    fn halloc(&mut self, bytes: u64, align: u32) -> AddrInterval {
        self.layout.halloc(bytes, align)
    }

    fn galloc(&mut self, gv: &GlobalVariable, bytes: u64, align: u32) -> AddrInterval {
        self.layout.galloc(gv, bytes, align)
    }

    fn falloc(&mut self, f: &Function, align: u32) -> AddrInterval {
        self.layout.falloc(f, align)
    }

    fn global_interval(&self, id: GlobalId) -> Option<AddrInterval> {
        self.layout.globals.get(&id).copied()
    }

    fn function_interval(&self, id: FunctionId) -> Option<AddrInterval> {
        self.layout.functions.get(&id).copied()
    }

    fn on_function_entry(&mut self, _f: &Function) {}

    fn stack_top(&self) -> u64 {
        self.layout.stack
    }

    fn dump_globals_map(&self) {
        self.layout.dump();
        for (site, i) in &self.sites {
            debug!("stack site {} at {}", site, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsem_ir::Type;

    fn global(id: u32, size: u32) -> GlobalVariable {
        GlobalVariable::new(GlobalId(id), format!("g{}", id), Type::Int(size * 8))
    }

    #[test]
    fn regions_are_disjoint() {
        let mut a = NormalAllocator::new();
        let f = Function::new(FunctionId(0), "main", Type::Void);
        let s = a.salloc(None, 16, 4);
        let h = a.halloc(16, 4);
        let g = a.galloc(&global(0, 16), 16, 4);
        let c = a.falloc(&f, 4);
        let all = [s, h, g, c];
        for (i, x) in all.iter().enumerate() {
            assert!(!x.is_bad());
            for y in &all[i + 1..] {
                assert!(!x.overlaps(y), "{} overlaps {}", x, y);
            }
        }
        assert!(a.stack_range().contains(s.low));
        assert!(h.low >= a.brk0());
    }

    #[test]
    fn stack_grows_down_and_respects_alignment() {
        let mut a = NormalAllocator::new();
        let first = a.salloc(None, 3, 1);
        let second = a.salloc(None, 8, 8);
        assert_eq!(first.high, MAX_STACK_ADDR);
        assert!(second.high <= first.low);
        assert_eq!(second.low % 8, 0);
        assert!(!first.overlaps(&second));
    }

    #[test]
    fn normal_stack_resets_on_function_entry() {
        let mut a = NormalAllocator::new();
        let f = Function::new(FunctionId(0), "f", Type::Void);
        let first = a.salloc(None, 32, 4);
        a.on_function_entry(&f);
        assert_eq!(a.stack_top(), MAX_STACK_ADDR);
        let again = a.salloc(None, 32, 4);
        assert_eq!(first, again);
    }

    #[test]
    fn static_allocator_keeps_sites_stable() {
        let mut a = StaticAllocator::new();
        let f = Function::new(FunctionId(0), "f", Type::Void);
        let x = a.salloc(Some(ValueId(1)), 8, 4);
        let y = a.salloc(Some(ValueId(2)), 8, 4);
        a.on_function_entry(&f);
        assert_eq!(a.salloc(Some(ValueId(1)), 8, 4), x);
        assert!(!x.overlaps(&y));
        let z = a.salloc(Some(ValueId(3)), 8, 4);
        assert!(!z.overlaps(&x) && !z.overlaps(&y));
    }

    #[test]
    fn globals_and_functions_are_memoized() {
        let mut a = NormalAllocator::new();
        let g = global(0, 4);
        let f = Function::new(FunctionId(2), "f", Type::Void);
        assert_eq!(a.galloc(&g, 4, 4), a.galloc(&g, 4, 4));
        assert_eq!(a.falloc(&f, 4), a.falloc(&f, 4));
        assert_eq!(a.function_interval(FunctionId(2)).unwrap().low, TEXT_SEGMENT_START);
    }

    #[test]
    fn symbolic_sizes_fail() {
        let mut a = NormalAllocator::new();
        let n = BV::new_const("n", 32);
        assert!(a.salloc_symbolic(None, &n, 4).is_bad());
        assert!(a.halloc_symbolic(&n, 4).is_bad());
        let four = BV::from_u64(2, 32).bvadd(&BV::from_u64(2, 32));
        assert_eq!(a.halloc_symbolic(&four, 4).len(), 4);
    }

    #[test]
    fn exhausted_stack_fails() {
        let mut a = NormalAllocator::new();
        assert!(a.salloc(None, MAX_STACK_ADDR, 4).is_bad());
    }
}
