use crate::block::BasicBlock;
use crate::error::IrError;
use crate::function::{Function, Param};
use crate::global::GlobalVariable;
use crate::instruction::{
    BinOp, CastOp, GepStep, ICmpPredicate, InstKind, Instruction, RegionOp,
};
use crate::module::Module;
use crate::types::Type;
use crate::value::{BlockId, FunctionId, GlobalId, Operand, ValueId};

/// Incrementally assembles a [`Module`], handing out fresh ids as it goes.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    functions: Vec<Function>,
    globals: Vec<GlobalVariable>,
    next_value: u32,
    next_block: u32,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_value(&mut self) -> ValueId {
        let v = ValueId(self.next_value);
        self.next_value += 1;
        v
    }

    /// Add a function with the given signature. It stays a declaration until a block is added.
    pub fn function<T: AsRef<str>>(&mut self, name: T, params: &[Type], ret_ty: Type) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let mut f = Function::new(id, name, ret_ty);
        for ty in params {
            let id = self.fresh_value();
            f.params.push(Param {
                id,
                ty: ty.clone(),
                name: None,
            });
        }
        self.functions.push(f);
        id
    }

    pub fn global<T: AsRef<str>>(
        &mut self,
        name: T,
        ty: Type,
        initializer: Option<Vec<u8>>,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        let mut g = GlobalVariable::new(id, name, ty);
        g.initializer = initializer;
        self.globals.push(g);
        id
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut GlobalVariable {
        &mut self.globals[id.0 as usize]
    }

    pub fn params(&self, id: FunctionId) -> Vec<ValueId> {
        self.functions[id.0 as usize]
            .params
            .iter()
            .map(|p| p.id)
            .collect()
    }

    /// Append an empty block to `f`. The first block added becomes the entry block.
    pub fn block<T: AsRef<str>>(&mut self, f: FunctionId, name: T) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        let mut b = BasicBlock::new(id);
        b.name = Some(name.as_ref().to_string());
        self.functions[f.0 as usize].blocks.push(b);
        id
    }

    /// Start appending instructions to `block`
    ///
    /// # Panics
    ///
    /// If `block` was not created by this builder.
    pub fn at(&mut self, block: BlockId) -> BlockBuilder<'_> {
        let (f, b) = self
            .functions
            .iter()
            .enumerate()
            .find_map(|(fi, f)| {
                f.blocks
                    .iter()
                    .position(|b| b.id == block)
                    .map(|bi| (fi, bi))
            })
            .expect("block was not created by this builder");
        BlockBuilder {
            builder: self,
            function: f,
            block: b,
        }
    }

    pub fn build(self) -> Result<Module, IrError> {
        Module::new(self.functions, self.globals)
    }
}

/// Appends instructions to one block of a [`ModuleBuilder`]
pub struct BlockBuilder<'a> {
    builder: &'a mut ModuleBuilder,
    function: usize,
    block: usize,
}

impl BlockBuilder<'_> {
    fn insts(&mut self) -> &mut Vec<Instruction> {
        &mut self.builder.functions[self.function].blocks[self.block].instructions
    }

    /// Append an instruction defining a value of type `ty`
    pub fn push(&mut self, ty: Type, kind: InstKind) -> ValueId {
        let id = self.builder.fresh_value();
        self.insts().push(Instruction::with_result(id, ty, kind));
        id
    }

    /// Append an instruction that defines nothing
    pub fn push_void(&mut self, kind: InstKind) {
        self.insts().push(Instruction::new(kind));
    }

    pub fn binary<A: Into<Operand>, B: Into<Operand>>(
        &mut self,
        op: BinOp,
        width: u32,
        lhs: A,
        rhs: B,
    ) -> ValueId {
        self.push(
            Type::Int(width),
            InstKind::Binary {
                op,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
        )
    }

    pub fn icmp<A: Into<Operand>, B: Into<Operand>>(
        &mut self,
        pred: ICmpPredicate,
        lhs: A,
        rhs: B,
    ) -> ValueId {
        self.push(
            Type::bool(),
            InstKind::ICmp {
                pred,
                lhs: lhs.into(),
                rhs: rhs.into(),
            },
        )
    }

    pub fn alloca<C: Into<Operand>>(&mut self, elem_size: u64, count: C, align: u32) -> ValueId {
        self.push(
            Type::Ptr,
            InstKind::Alloca {
                elem_size,
                count: count.into(),
                align,
            },
        )
    }

    pub fn load<P: Into<Operand>>(&mut self, ty: Type, ptr: P, align: u32) -> ValueId {
        self.push(
            ty,
            InstKind::Load {
                ptr: ptr.into(),
                align,
            },
        )
    }

    pub fn store<V: Into<Operand>, P: Into<Operand>>(&mut self, value: V, ptr: P, align: u32) {
        self.push_void(InstKind::Store {
            value: value.into(),
            ptr: ptr.into(),
            align,
        })
    }

    pub fn gep<P: Into<Operand>>(&mut self, base: P, steps: Vec<GepStep>) -> ValueId {
        self.push(
            Type::Ptr,
            InstKind::Gep {
                base: base.into(),
                steps,
            },
        )
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(BlockId, Operand)>) -> ValueId {
        self.push(ty, InstKind::Phi { incoming })
    }

    pub fn cast<O: Into<Operand>>(&mut self, op: CastOp, ty: Type, operand: O) -> ValueId {
        self.push(
            ty,
            InstKind::Cast {
                op,
                operand: operand.into(),
            },
        )
    }

    pub fn select<C: Into<Operand>, T: Into<Operand>, F: Into<Operand>>(
        &mut self,
        ty: Type,
        cond: C,
        on_true: T,
        on_false: F,
    ) -> ValueId {
        self.push(
            ty,
            InstKind::Select {
                cond: cond.into(),
                on_true: on_true.into(),
                on_false: on_false.into(),
            },
        )
    }

    /// Append a call. A result is defined unless `ret_ty` is void.
    pub fn call<C: Into<Operand>>(
        &mut self,
        ret_ty: Type,
        callee: C,
        args: Vec<Operand>,
    ) -> Option<ValueId> {
        let kind = InstKind::Call {
            callee: callee.into(),
            args,
        };
        if ret_ty.is_void() {
            self.push_void(kind);
            None
        } else {
            Some(self.push(ret_ty, kind))
        }
    }

    /// Append a region operation defining a region of type `ty`
    pub fn region(&mut self, ty: Type, op: RegionOp) -> ValueId {
        self.push(ty, InstKind::Region(op))
    }

    /// Append a region operation that defines nothing
    pub fn region_marker(&mut self, op: RegionOp) {
        self.push_void(InstKind::Region(op))
    }

    pub fn br(&mut self, target: BlockId) {
        self.push_void(InstKind::Br { target })
    }

    pub fn cond_br<C: Into<Operand>>(&mut self, cond: C, on_true: BlockId, on_false: BlockId) {
        self.push_void(InstKind::CondBr {
            cond: cond.into(),
            on_true,
            on_false,
        })
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push_void(InstKind::Ret { value })
    }

    pub fn unreachable(&mut self) {
        self.push_void(InstKind::Unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_diamond() {
        let mut mb = ModuleBuilder::new();
        let main = mb.function("main", &[Type::Int(32)], Type::Void);
        let x = mb.params(main)[0];
        let entry = mb.block(main, "entry");
        let left = mb.block(main, "left");
        let right = mb.block(main, "right");
        let join = mb.block(main, "join");
        let c = mb.at(entry).icmp(ICmpPredicate::Slt, x, Operand::int(32, 0));
        mb.at(entry).cond_br(c, left, right);
        mb.at(left).br(join);
        mb.at(right).br(join);
        let p = mb.at(join).phi(
            Type::Int(32),
            vec![(left, Operand::int(32, 1)), (right, Operand::int(32, 2))],
        );
        mb.at(join).ret(Some(p.into()));
        let m = mb.build().unwrap();
        assert_eq!(m.block(entry).unwrap().successors(), vec![left, right]);
        assert_eq!(m.block(join).unwrap().first_non_phi(), 1);
        assert_eq!(m.value_type(c).unwrap(), &Type::bool());
        assert_eq!(m.value_type(x).unwrap(), &Type::Int(32));
    }
}
