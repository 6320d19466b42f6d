use opsem::ir::{ModuleBuilder, Operand, RegionId, RegionOp, Type};
use opsem::{BvOpSem, MemReprKind, OpSemConfig, OpSemContext, SolverService};
use std::rc::Rc;
use z3::ast::{Ast, BV};

/// Stores a value through a stack slot, reads it back on one side of a branch, and asks the
/// solver whether the round trip is exact under each memory representation.
fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_line_number(true)
        .init();

    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32), Type::bool()], Type::Void);
    let params = mb.params(main);
    let (x, c) = (params[0], params[1]);
    let entry = mb.block(main, "entry");
    let read = mb.block(main, "read");
    let done = mb.block(main, "done");

    let mut b = mb.at(entry);
    let slot = b.alloca(4, Operand::int(32, 1), 4);
    let m0 = b.region(Type::memory(), RegionOp::Init { region: RegionId(0) });
    let m1 = b.region(Type::memory(), RegionOp::Store { mem: m0.into() });
    b.store(x, slot, 4);
    b.cond_br(c, read, done);

    let mut b = mb.at(read);
    b.region_marker(RegionOp::Load { mem: m1.into() });
    let y = b.load(Type::Int(32), slot, 4);
    b.br(done);
    mb.at(done).ret(None);
    let module = Rc::new(mb.build().unwrap());

    for repr in [MemReprKind::Array, MemReprKind::Function] {
        let config = OpSemConfig {
            memory_repr: repr,
            ..Default::default()
        };
        let mut ctx = OpSemContext::new(module.clone(), config).unwrap();
        let sem = BvOpSem::new();
        assert!(sem.exec_path(&mut ctx, &[entry, read, done]).unwrap());

        let mut solver = SolverService::new();
        solver.assert_all(ctx.side());
        let x = ctx.mk_value_register(x).unwrap().unwrap();
        let y = ctx.mk_value_register(y).unwrap().unwrap();
        let x: BV = ctx.read(&x).as_bv().unwrap().clone();
        let y: BV = ctx.read(&y).as_bv().unwrap().clone();
        println!("{:?}: round trip exact: {}", repr, solver.prove(&x.eq(&y)));

        for trace in sem.explore_edges(&mut ctx, main).unwrap() {
            println!("{}", trace);
        }
    }
}
