use super::*;
use crate::config::{MemReprKind, OpSemConfig};
use crate::context::RegisterKey;
use crate::error::ErrorKind;
use crate::value::RegSort;
use opsem_ir::{
    BinOp, CastOp, FloatBinOp, GepStep, ICmpPredicate, Module, ModuleBuilder, RegionId,
    RegionOp, VectorOp,
};
use std::rc::Rc;
use z3::ast::Ast;
use z3::{SatResult, Solver, Sort};

fn context(module: Module, config: OpSemConfig) -> OpSemContext {
    OpSemContext::new(Rc::new(module), config).unwrap()
}

fn value(ctx: &OpSemContext, v: ValueId) -> SymValue {
    ctx.peek(&RegisterKey::Value(v)).cloned().unwrap()
}

fn concrete(ctx: &OpSemContext, v: ValueId) -> Option<u64> {
    value(ctx, v).as_bv().unwrap().simplify().as_u64()
}

/// The value of a register as the solver sees it, materializing it if needed
fn term(ctx: &mut OpSemContext, v: ValueId) -> SymValue {
    let reg = ctx.mk_value_register(v).unwrap().unwrap();
    ctx.read(&reg)
}

fn holds(facts: &[Bool], goal: &Bool) -> bool {
    let s = Solver::new();
    for f in facts {
        s.assert(f);
    }
    s.assert(goal.not());
    s.check() == SatResult::Unsat
}

fn provably_equal(a: &BV, b: &BV) -> bool {
    holds(&[], &a.eq(b))
}

fn both_reprs() -> [OpSemConfig; 2] {
    [MemReprKind::Array, MemReprKind::Function].map(|memory_repr| OpSemConfig {
        memory_repr,
        ..Default::default()
    })
}

#[test]
fn phis_read_before_any_is_written() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let body = mb.block(main, "body");
    mb.at(entry).br(body);
    let mut b = mb.at(body);
    let a = b.phi(Type::Int(32), vec![(entry, Operand::int(32, 1))]);
    let c = b.phi(
        Type::Int(32),
        vec![(entry, Operand::int(32, 2)), (body, a.into())],
    );
    b.br(body);
    mb.function_mut(main).blocks[1].instructions[0].kind = InstKind::Phi {
        incoming: vec![(entry, Operand::int(32, 1)), (body, c.into())],
    };

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let sem = BvOpSem::new();
    assert!(sem.exec_path(&mut ctx, &[entry, body]).unwrap());
    assert_eq!(concrete(&ctx, a), Some(1));
    assert_eq!(concrete(&ctx, c), Some(2));

    assert!(sem.exec_path(&mut ctx, &[body, body]).unwrap());
    assert_eq!(concrete(&ctx, a), Some(2));
    assert_eq!(concrete(&ctx, c), Some(1));
}

#[test]
fn constant_branch_to_the_other_successor_is_infeasible() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let taken = mb.block(main, "taken");
    let other = mb.block(main, "other");
    mb.at(entry).cond_br(Operand::bool(true), taken, other);
    mb.at(taken).ret(None);
    mb.at(other).ret(None);
    let module = Rc::new(mb.build().unwrap());
    let sem = BvOpSem::new();

    let mut ctx = OpSemContext::new(module.clone(), OpSemConfig::default()).unwrap();
    sem.exec_edge(&mut ctx, entry, other).unwrap();
    let err = sem.error_flag(&mut ctx, main).unwrap();
    assert_eq!(ctx.side().len(), 1);
    assert!(holds(&[], &ctx.side()[0].eq(&err)));
    assert!(
        ctx.recoveries()
            .iter()
            .any(|r| matches!(r, Recovery::InfeasibleEdge(_)))
    );

    let mut ctx = OpSemContext::new(module, OpSemConfig::default()).unwrap();
    sem.exec_edge(&mut ctx, entry, taken).unwrap();
    assert!(ctx.side().is_empty());
    assert_eq!(ctx.block(), Some(taken));
}

#[test]
fn symbolic_branch_adds_the_edge_condition() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let yes = mb.block(main, "yes");
    let no = mb.block(main, "no");
    let mut b = mb.at(entry);
    let c = b.icmp(ICmpPredicate::Eq, x, Operand::int(32, 0));
    b.cond_br(c, yes, no);
    mb.at(yes).ret(None);
    mb.at(no).ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let sem = BvOpSem::new();
    sem.exec_edge(&mut ctx, entry, no).unwrap();
    let x = term(&mut ctx, x).as_bv().unwrap().clone();
    assert_eq!(ctx.side().len(), 1);
    assert!(holds(ctx.side(), &x.eq(&BV::from_u64(0, 32)).not()));
    assert!(!holds(ctx.side(), &x.eq(&BV::from_u64(1, 32)).not()));
}

#[test]
fn concrete_arithmetic_matches_machine_integers() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let sum = b.binary(BinOp::Add, 32, Operand::int(32, 3), Operand::int(32, 4));
    let prod = b.binary(BinOp::Mul, 32, sum, Operand::int(32, 5));
    let wrap = b.binary(BinOp::Sub, 32, Operand::int(32, 0), Operand::int(32, 1));
    let lt = b.icmp(ICmpPredicate::Ult, sum, prod);
    let pick = b.select(Type::Int(32), lt, prod, sum);
    let low = b.cast(CastOp::Trunc, Type::Int(8), wrap);
    let wide = b.cast(CastOp::ZExt, Type::Int(32), low);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert_eq!(concrete(&ctx, sum), Some(7));
    assert_eq!(concrete(&ctx, prod), Some(35));
    assert_eq!(concrete(&ctx, wrap), Some(0xffff_ffff));
    assert_eq!(value(&ctx, lt).as_bool().unwrap().simplify().as_bool(), Some(true));
    assert_eq!(concrete(&ctx, pick), Some(35));
    assert_eq!(concrete(&ctx, low), Some(0xff));
    assert_eq!(concrete(&ctx, wide), Some(0xff));
}

/// `main(x)`: store `x` at `alloca + offset` and load it back
fn store_then_load(offset: i64, align: u32) -> (Module, BlockId, ValueId, ValueId) {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let base = b.alloca(8, Operand::int(32, 1), 4);
    let p = b.gep(base, vec![GepStep::Offset(offset)]);
    let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
    let m1 = b.region(Type::memory(), RegionOp::Store { mem: m0.into() });
    b.store(x, p, align);
    b.region_marker(RegionOp::Load { mem: m1.into() });
    let y = b.load(Type::Int(32), p, align);
    b.ret(None);
    (mb.build().unwrap(), entry, x, y)
}

#[test]
fn stored_values_load_back() {
    for config in both_reprs() {
        let kind = config.memory_repr;
        let (module, entry, x, y) = store_then_load(0, 4);
        let mut ctx = context(module, config);
        BvOpSem::new().exec(&mut ctx, entry).unwrap();
        let x = term(&mut ctx, x);
        let y = value(&ctx, y);
        assert!(provably_equal(x.as_bv().unwrap(), y.as_bv().unwrap()), "{:?}", kind);
        assert!(ctx.recoveries().is_empty());
    }
}

#[test]
fn unaligned_values_load_back() {
    for config in both_reprs() {
        let (module, entry, x, y) = store_then_load(3, 1);
        let mut ctx = context(module, config);
        BvOpSem::new().exec(&mut ctx, entry).unwrap();
        let x = term(&mut ctx, x);
        let y = value(&ctx, y);
        assert!(provably_equal(x.as_bv().unwrap(), y.as_bv().unwrap()));
    }
}

#[test]
fn scalar_regions_are_plain_registers() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32), Type::Ptr], Type::Void);
    let params = mb.params(main);
    let (x, p) = (params[0], params[1]);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let m0 = b.region(Type::scalar_memory(32), RegionOp::Init { region: RegionId(0) });
    let m1 = b.region(Type::scalar_memory(32), RegionOp::Store { mem: m0.into() });
    b.store(x, p, 4);
    b.region_marker(RegionOp::Load { mem: m1.into() });
    let y = b.load(Type::Int(32), p, 4);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert_eq!(value(&ctx, m1).reg_sort(), RegSort::Bv(32));
    let x = term(&mut ctx, x);
    assert!(provably_equal(x.as_bv().unwrap(), value(&ctx, y).as_bv().unwrap()));
}

fn calloc_module() -> (Module, BlockId, ValueId, ValueId) {
    let mut mb = ModuleBuilder::new();
    let calloc = mb.function("calloc", &[Type::Int(32), Type::Int(32)], Type::Ptr);
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
    let m1 = b.region(Type::memory(), RegionOp::Store { mem: m0.into() });
    let p = b
        .call(
            Type::Ptr,
            calloc,
            vec![Operand::int(32, 4), Operand::int(32, 4)],
        )
        .unwrap();
    b.region_marker(RegionOp::Load { mem: m1.into() });
    let y = b.load(Type::Int(32), p, 4);
    b.ret(None);
    (mb.build().unwrap(), entry, m1, y)
}

#[test]
fn calloc_zeroes_its_region_unless_ignored() {
    let (module, entry, m1, y) = calloc_module();
    let mut ctx = context(module, OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert!(provably_equal(value(&ctx, y).as_bv().unwrap(), &BV::from_u64(0, 32)));
    let anywhere = ctx.mem().fresh_ptr(4);
    let word = ctx
        .mem()
        .load_int_from_mem(value(&ctx, m1).as_mem().unwrap(), &anywhere, 4, 4)
        .unwrap();
    assert!(provably_equal(&word, &BV::from_u64(0, 32)));

    let (module, entry, _, y) = calloc_module();
    let config = OpSemConfig {
        ignore_calloc: true,
        ..Default::default()
    };
    let mut ctx = context(module, config);
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert!(!provably_equal(value(&ctx, y).as_bv().unwrap(), &BV::from_u64(0, 32)));
    assert!(ctx.side().is_empty());
}

#[test]
fn floating_point_is_fatal() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let zero = Operand::Const(Constant::Float {
        ty: Type::Float,
        bits: 0,
    });
    let mut b = mb.at(entry);
    b.push(
        Type::Float,
        InstKind::FloatBinary {
            op: FloatBinOp::FAdd,
            lhs: zero.clone(),
            rhs: zero,
        },
    );
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let err = BvOpSem::new().exec(&mut ctx, entry).unwrap_err();
    assert!(matches!(err, OpSemError::Unsupported { .. }));
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[test]
fn vectors_are_fatal() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    b.push(
        Type::Int(32),
        InstKind::Vector {
            op: VectorOp::ExtractElement,
            operands: vec![],
        },
    );
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let err = BvOpSem::new().exec(&mut ctx, entry).unwrap_err();
    assert!(matches!(err, OpSemError::Unsupported { .. }));
}

#[test]
fn switch_edges_are_fatal() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let one = mb.block(main, "one");
    let other = mb.block(main, "other");
    mb.at(entry).push_void(InstKind::Switch {
        cond: x.into(),
        default: other,
        cases: vec![(1, one)],
    });
    mb.at(one).ret(None);
    mb.at(other).ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let err = BvOpSem::new().exec_edge(&mut ctx, entry, one).unwrap_err();
    assert!(matches!(err, OpSemError::Unsupported { what: "switch", .. }));
}

#[test]
fn symbolic_memset_length_is_fatal() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Ptr, Type::Int(32)], Type::Void);
    let params = mb.params(main);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    b.push_void(InstKind::MemSet {
        dst: params[0].into(),
        value: Operand::int(8, 0),
        len: params[1].into(),
        align: 4,
    });
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let err = BvOpSem::new().exec(&mut ctx, entry).unwrap_err();
    assert!(matches!(err, OpSemError::SymbolicLength { op: "memset", .. }));
}

#[test]
fn untagged_load_is_skipped() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Ptr], Type::Void);
    let p = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let y = b.load(Type::Int(32), p, 4);
    b.store(y, p, 4);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert_eq!(value(&ctx, y).reg_sort(), RegSort::Bv(32));
    let skipped = ctx
        .recoveries()
        .iter()
        .filter(|r| matches!(r, Recovery::SkippedMemoryAccess(_)))
        .count();
    assert_eq!(skipped, 2);
    assert!(ctx.mem_read_register().is_none());
    assert!(ctx.mem_write_register().is_none());
}

fn external_calls(config: OpSemConfig) -> (OpSemContext, ValueId, ValueId) {
    let mut mb = ModuleBuilder::new();
    let ext = mb.function("ext", &[Type::Int(32)], Type::Int(32));
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let r1 = b.call(Type::Int(32), ext, vec![x.into()]).unwrap();
    let r2 = b.call(Type::Int(32), ext, vec![x.into()]).unwrap();
    b.ret(None);
    let mut ctx = context(mb.build().unwrap(), config);
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    (ctx, r1, r2)
}

#[test]
fn modeled_external_calls_are_functions_of_their_arguments() {
    let (ctx, r1, r2) = external_calls(OpSemConfig {
        model_external_calls: true,
        ..Default::default()
    });
    assert!(provably_equal(
        value(&ctx, r1).as_bv().unwrap(),
        value(&ctx, r2).as_bv().unwrap()
    ));
    assert!(ctx.recoveries().is_empty());
}

#[test]
fn unmodeled_external_calls_are_nondeterministic() {
    let ignored = OpSemConfig {
        model_external_calls: true,
        ignored_external_functions: vec!["ext".to_string()],
        ..Default::default()
    };
    for config in [OpSemConfig::default(), ignored] {
        let (ctx, r1, r2) = external_calls(config);
        assert!(!provably_equal(
            value(&ctx, r1).as_bv().unwrap(),
            value(&ctx, r2).as_bv().unwrap()
        ));
        assert!(
            ctx.recoveries()
                .iter()
                .any(|r| matches!(r, Recovery::NondetCall(_)))
        );
    }
}

fn summarized_call(params: &[Sort]) -> Result<OpSemContext, OpSemError> {
    let mut mb = ModuleBuilder::new();
    let callee = mb.function("callee", &[Type::Int(32)], Type::Int(32));
    let body = mb.block(callee, "entry");
    mb.at(body).ret(Some(Operand::int(32, 0)));
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    b.call(Type::Int(32), callee, vec![x.into()]);
    b.ret(None);

    let domain: Vec<&Sort> = params.iter().collect();
    let mut sem = BvOpSem::new();
    sem.add_summary(
        callee,
        FunctionSummary {
            relation: FuncDecl::new("callee.rel", &domain, &Sort::bool()),
            args: vec![0],
            globals: vec![],
            has_ret: true,
        },
    );
    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    sem.exec(&mut ctx, entry)?;
    Ok(ctx)
}

#[test]
fn summarized_calls_apply_the_relation_in_order() {
    let sorts = [
        Sort::bool(),
        Sort::bool(),
        Sort::bool(),
        Sort::bitvector(32),
        Sort::bitvector(32),
    ];
    let ctx = summarized_call(&sorts).unwrap();
    assert_eq!(ctx.side().len(), 1);
    let app = ctx.side()[0].to_string();
    assert!(app.starts_with("(callee.rel true false error.flag"), "{}", app);
    assert_eq!(ctx.params().len(), 3);
}

#[test]
fn summary_arity_must_match() {
    let sorts = [Sort::bool(), Sort::bool(), Sort::bool(), Sort::bitvector(32)];
    let err = summarized_call(&sorts).unwrap_err();
    assert!(matches!(
        err,
        OpSemError::SummaryArity {
            expected: 4,
            found: 5,
            ..
        }
    ));
}

#[test]
fn assumptions_become_side_conditions() {
    let mut mb = ModuleBuilder::new();
    let assume = mb.function("verifier.assume", &[Type::bool()], Type::Void);
    let main = mb.function("main", &[Type::Int(32)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let small = b.icmp(ICmpPredicate::Ule, x, Operand::int(32, 10));
    b.call(Type::Void, assume, vec![small.into()]);
    b.call(Type::Void, assume, vec![Operand::bool(true)]);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert_eq!(ctx.side().len(), 1);
    let x = term(&mut ctx, x).as_bv().unwrap().clone();
    assert!(holds(ctx.side(), &x.bvule(&BV::from_u64(10, 32))));
}

#[test]
fn error_calls_raise_the_flag_on_unreachable_edges() {
    let mut mb = ModuleBuilder::new();
    let error = mb.function("verifier.error", &[], Type::Void);
    let main = mb.function("main", &[Type::bool()], Type::Void);
    let c = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let ok = mb.block(main, "ok");
    let bad = mb.block(main, "bad");
    mb.at(entry).cond_br(c, ok, bad);
    mb.at(ok).ret(None);
    let mut b = mb.at(bad);
    b.call(Type::Void, error, vec![]);
    b.unreachable();

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let sem = BvOpSem::new();
    sem.exec_edge(&mut ctx, entry, bad).unwrap();
    let err = sem.error_flag(&mut ctx, main).unwrap();
    assert_eq!(err.simplify().as_bool(), Some(true));
}

#[test]
fn functions_that_cannot_fail_have_a_constant_flag() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[], Type::Void);
    mb.function_mut(main).can_fail = false;
    let entry = mb.block(main, "entry");
    mb.at(entry).ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let sem = BvOpSem::new();
    sem.exec(&mut ctx, entry).unwrap();
    assert_eq!(sem.error_flag(&mut ctx, main).unwrap().as_bool(), Some(false));
    assert!(ctx.peek(&RegisterKey::ErrorFlag(main)).is_none());
}

#[test]
fn bswap_reverses_bytes() {
    let mut mb = ModuleBuilder::new();
    let bswap = mb.function("llvm.bswap.i32", &[Type::Int(32)], Type::Int(32));
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let r = b
        .call(Type::Int(32), bswap, vec![Operand::int(32, 0x1122_3344)])
        .unwrap();
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert_eq!(concrete(&ctx, r), Some(0x4433_2211));
}

#[test]
fn malloc_returns_distinct_heap_blocks() {
    let mut mb = ModuleBuilder::new();
    let malloc = mb.function("malloc", &[Type::Int(32)], Type::Ptr);
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let p = b.call(Type::Ptr, malloc, vec![Operand::int(32, 16)]).unwrap();
    let q = b.call(Type::Ptr, malloc, vec![Operand::int(32, 16)]).unwrap();
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    let (p, q) = (concrete(&ctx, p).unwrap(), concrete(&ctx, q).unwrap());
    assert!(p + 16 <= q || q + 16 <= p);
    assert!(ctx.mem().stack_range().low > p.max(q));
}

#[test]
fn global_initializers_fill_their_region() {
    let mut mb = ModuleBuilder::new();
    let g = mb.global("counter", Type::Int(32), Some(vec![0x2a, 0, 0, 0]));
    let main = mb.function("main", &[], Type::Void);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
    let m1 = b.region(
        Type::memory(),
        RegionOp::GlobalInit {
            mem: m0.into(),
            global: g,
        },
    );
    b.region_marker(RegionOp::Load { mem: m1.into() });
    let y = b.load(Type::Int(32), g, 4);
    b.ret(None);
    let module = mb.build().unwrap();

    for config in both_reprs() {
        let mut ctx = context(module.clone(), config);
        BvOpSem::new().exec(&mut ctx, entry).unwrap();
        assert!(provably_equal(value(&ctx, y).as_bv().unwrap(), &BV::from_u64(42, 32)));
    }
}

#[test]
fn pointers_are_untracked_below_their_level() {
    let (module, entry, _, y) = store_then_load(0, 4);
    let config = OpSemConfig {
        track: crate::config::TrackLevel::Registers,
        ..Default::default()
    };
    let mut ctx = context(module, config);
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert!(
        ctx.recoveries()
            .iter()
            .any(|r| matches!(r, Recovery::IgnoredInstruction(_)))
    );
    assert_eq!(value(&ctx, y).reg_sort(), RegSort::Bv(32));
}

#[test]
fn edges_are_explored_in_isolation() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::bool()], Type::Int(32));
    let c = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let left = mb.block(main, "left");
    let right = mb.block(main, "right");
    let join = mb.block(main, "join");
    mb.at(entry).cond_br(c, left, right);
    mb.at(left).br(join);
    mb.at(right).br(join);
    let mut b = mb.at(join);
    let v = b.phi(
        Type::Int(32),
        vec![(left, Operand::int(32, 1)), (right, Operand::int(32, 2))],
    );
    b.ret(Some(v.into()));

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let traces = BvOpSem::new().explore_edges(&mut ctx, main).unwrap();
    assert_eq!(traces.len(), 4);
    let phi_on = |src: BlockId| {
        traces
            .iter()
            .find(|t| t.src == src && t.dst == join)
            .and_then(|t| t.store.get(&RegisterKey::Value(v)))
            .and_then(|v| v.as_bv().ok().and_then(|b| b.simplify().as_u64()))
    };
    assert_eq!(phi_on(left), Some(1));
    assert_eq!(phi_on(right), Some(2));
    assert!(ctx.peek(&RegisterKey::Value(v)).is_none());
    assert!(traces.iter().all(|t| !t.is_infeasible()));
    let to_left = traces.iter().find(|t| t.dst == left).unwrap();
    assert_eq!(to_left.side.len(), 1);
}

#[test]
fn summarized_calls_take_regions_in_both_reprs() {
    for config in both_reprs() {
        let mut mb = ModuleBuilder::new();
        let callee = mb.function("callee", &[Type::Int(32)], Type::Int(32));
        let body = mb.block(callee, "entry");
        mb.at(body).ret(Some(Operand::int(32, 0)));
        let main = mb.function("main", &[Type::Int(32)], Type::Void);
        let x = mb.params(main)[0];
        let entry = mb.block(main, "entry");
        let mut b = mb.at(entry);
        let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
        b.region_marker(RegionOp::ArgRef { mem: m0.into() });
        b.call(Type::Int(32), callee, vec![x.into()]);
        b.ret(None);

        let flag = Sort::bool();
        let word = Sort::bitvector(32);
        let region = Sort::array(&word, &word);
        let domain = [&flag, &flag, &flag, &region, &word, &word];
        let mut sem = BvOpSem::new();
        sem.add_summary(
            callee,
            FunctionSummary {
                relation: FuncDecl::new("callee.rel", &domain, &Sort::bool()),
                args: vec![0],
                globals: vec![],
                has_ret: true,
            },
        );
        let mut ctx = context(mb.build().unwrap(), config);
        sem.exec(&mut ctx, entry).unwrap();
        assert_eq!(ctx.side().len(), 1);
        assert_eq!(ctx.params().len(), 3);
        assert!(ctx.recoveries().is_empty());
    }
}

#[test]
fn edges_run_under_a_true_path_condition() {
    let mut mb = ModuleBuilder::new();
    let assume = mb.function("verifier.assume", &[Type::bool()], Type::Void);
    let main = mb.function("main", &[Type::bool()], Type::Void);
    let c = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let next = mb.block(main, "next");
    let mut b = mb.at(entry);
    b.call(Type::Void, assume, vec![c.into()]);
    b.br(next);
    mb.at(next).ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    ctx.set_path_cond(Bool::new_const("guard"));
    BvOpSem::new().exec_edge(&mut ctx, entry, next).unwrap();
    let c = term(&mut ctx, c).as_bool().unwrap().clone();
    assert_eq!(ctx.path_cond().as_bool(), Some(true));
    assert_eq!(ctx.side().len(), 1);
    assert!(holds(ctx.side(), &c));
}

type CastRun = (Result<(), OpSemError>, OpSemContext, ValueId, ValueId);

fn cast(op: CastOp, from: u32, to: u32) -> CastRun {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(from)], Type::Void);
    let x = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let y = b.cast(op, Type::Int(to), x);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let result = BvOpSem::new().exec(&mut ctx, entry);
    (result, ctx, x, y)
}

#[test]
fn casts_against_their_direction_are_fatal() {
    let (result, ..) = cast(CastOp::SExt, 32, 16);
    assert!(matches!(
        result,
        Err(OpSemError::CastWidth {
            op: "sext",
            from: 32,
            to: 16
        })
    ));
    let (result, ..) = cast(CastOp::ZExt, 32, 16);
    assert!(matches!(result, Err(OpSemError::CastWidth { op: "zext", .. })));
    let (result, ..) = cast(CastOp::Trunc, 8, 16);
    assert!(matches!(result, Err(OpSemError::CastWidth { op: "trunc", .. })));

    let (result, mut ctx, x, y) = cast(CastOp::ZExt, 8, 8);
    result.unwrap();
    let x = term(&mut ctx, x).as_bv().unwrap().clone();
    assert!(provably_equal(&x, value(&ctx, y).as_bv().unwrap()));
}

#[test]
fn symbolic_memcpy_length_is_fatal() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Ptr, Type::Ptr, Type::Int(32)], Type::Void);
    let params = mb.params(main);
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    b.push_void(InstKind::MemCpy {
        dst: params[0].into(),
        src: params[1].into(),
        len: params[2].into(),
        align: 4,
    });
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    let err = BvOpSem::new().exec(&mut ctx, entry).unwrap_err();
    assert!(matches!(err, OpSemError::SymbolicLength { op: "memcpy", .. }));
}

#[test]
fn copied_words_load_back() {
    for config in both_reprs() {
        let mut mb = ModuleBuilder::new();
        let main = mb.function("main", &[Type::Int(32)], Type::Void);
        let x = mb.params(main)[0];
        let entry = mb.block(main, "entry");
        let mut b = mb.at(entry);
        let src = b.alloca(8, Operand::int(32, 1), 4);
        let dst = b.alloca(8, Operand::int(32, 1), 4);
        let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
        let m1 = b.region(Type::memory(), RegionOp::Store { mem: m0.into() });
        b.store(x, src, 4);
        let m2 = b.region(Type::memory(), RegionOp::Store { mem: m1.into() });
        b.region_marker(RegionOp::TransferLoad { mem: m1.into() });
        b.push_void(InstKind::MemCpy {
            dst: dst.into(),
            src: src.into(),
            len: Operand::int(32, 4),
            align: 4,
        });
        b.region_marker(RegionOp::Load { mem: m2.into() });
        let y = b.load(Type::Int(32), dst, 4);
        b.ret(None);

        let mut ctx = context(mb.build().unwrap(), config);
        BvOpSem::new().exec(&mut ctx, entry).unwrap();
        let x = term(&mut ctx, x).as_bv().unwrap().clone();
        assert!(provably_equal(&x, value(&ctx, y).as_bv().unwrap()));
        assert!(ctx.recoveries().is_empty());
        assert!(ctx.mem_transfer_register().is_none());
    }
}

#[test]
fn skipped_loads_drop_every_region_tag() {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Ptr], Type::Void);
    let p = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let mut b = mb.at(entry);
    let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
    b.region_marker(RegionOp::TransferLoad { mem: m0.into() });
    b.load(Type::Int(32), p, 4);
    b.ret(None);

    let mut ctx = context(mb.build().unwrap(), OpSemConfig::default());
    BvOpSem::new().exec(&mut ctx, entry).unwrap();
    assert!(
        ctx.recoveries()
            .iter()
            .any(|r| matches!(r, Recovery::SkippedMemoryAccess(_)))
    );
    assert!(ctx.mem_transfer_register().is_none());
    assert!(ctx.mem_read_register().is_none());
    assert!(ctx.mem_write_register().is_none());
}

/// A diamond whose join holds `a` and `b`. From `left` the two swap, from
/// `right` they take constants. `a_first` picks which PHI comes first.
fn swapping_join(a_first: bool) -> (Module, [BlockId; 4], ValueId, ValueId) {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::bool()], Type::Void);
    let c = mb.params(main)[0];
    let entry = mb.block(main, "entry");
    let left = mb.block(main, "left");
    let right = mb.block(main, "right");
    let join = mb.block(main, "join");
    mb.at(entry).cond_br(c, left, right);
    mb.at(left).br(join);
    mb.at(right).br(join);
    let mut b = mb.at(join);
    let first = b.phi(Type::Int(32), vec![]);
    let second = b.phi(Type::Int(32), vec![]);
    b.ret(None);

    let (a, other, slots) = if a_first {
        (first, second, [0, 1])
    } else {
        (second, first, [1, 0])
    };
    let insts = &mut mb.function_mut(main).blocks[3].instructions;
    insts[slots[0]].kind = InstKind::Phi {
        incoming: vec![(left, other.into()), (right, Operand::int(32, 5))],
    };
    insts[slots[1]].kind = InstKind::Phi {
        incoming: vec![(left, a.into()), (right, Operand::int(32, 6))],
    };
    (mb.build().unwrap(), [entry, left, right, join], a, other)
}

#[test]
fn phis_at_a_join_update_together() {
    let seed = |ctx: &mut OpSemContext, v: ValueId, n: u64| {
        let reg = ctx.mk_value_register(v).unwrap().unwrap();
        ctx.write(&reg, BV::from_u64(n, 32).into()).unwrap();
    };
    for a_first in [true, false] {
        let (module, [entry, left, right, join], a, b) = swapping_join(a_first);
        let module = Rc::new(module);
        let sem = BvOpSem::new();

        let mut ctx = OpSemContext::new(module.clone(), OpSemConfig::default()).unwrap();
        seed(&mut ctx, a, 1);
        seed(&mut ctx, b, 2);
        assert!(sem.exec_path(&mut ctx, &[entry, left, join]).unwrap());
        assert_eq!(concrete(&ctx, a), Some(2));
        assert_eq!(concrete(&ctx, b), Some(1));

        let mut ctx = OpSemContext::new(module, OpSemConfig::default()).unwrap();
        seed(&mut ctx, a, 1);
        seed(&mut ctx, b, 2);
        assert!(sem.exec_path(&mut ctx, &[entry, right, join]).unwrap());
        assert_eq!(concrete(&ctx, a), Some(5));
        assert_eq!(concrete(&ctx, b), Some(6));
    }
}
