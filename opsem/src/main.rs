use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use opsem::ir::{BinOp, ICmpPredicate, Module, ModuleBuilder, Operand, Type};
use opsem::{BvOpSem, MemReprKind, OpSemConfig, OpSemContext, SolverService};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct OpSemParams {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ReprArg {
    Array,
    Function,
}

impl From<ReprArg> for MemReprKind {
    fn from(value: ReprArg) -> Self {
        match value {
            ReprArg::Array => MemReprKind::Array,
            ReprArg::Function => MemReprKind::Function,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the effective configuration
    Config,
    /// Explore every edge of a built-in program and print its side-conditions
    Demo {
        #[arg(long, value_enum)]
        repr: Option<ReprArg>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let params = OpSemParams::parse();
    let config: OpSemConfig = confy::load("opsem", None).context("loading configuration")?;
    config.validate()?;
    match params.command {
        Commands::Config => {
            let path = confy::get_configuration_file_path("opsem", None)?;
            println!("# {}", path.display());
            println!("{:#?}", config);
            Ok(())
        }
        Commands::Demo { repr } => {
            let config = match repr {
                Some(r) => OpSemConfig {
                    memory_repr: r.into(),
                    ..config
                },
                None => config,
            };
            demo(config)
        }
    }
}

/// `main(x, y)`: branch on `x < y`, then swap the pair through a PHI on one side
fn demo_module() -> anyhow::Result<Module> {
    let mut mb = ModuleBuilder::new();
    let main = mb.function("main", &[Type::Int(32), Type::Int(32)], Type::Int(32));
    let params = mb.params(main);
    let (x, y) = (params[0], params[1]);
    let entry = mb.block(main, "entry");
    let swap = mb.block(main, "swap");
    let join = mb.block(main, "join");

    let mut b = mb.at(entry);
    let lt = b.icmp(ICmpPredicate::Slt, x, y);
    b.cond_br(lt, join, swap);
    mb.at(swap).br(join);

    let mut b = mb.at(join);
    let lo = b.phi(Type::Int(32), vec![(entry, x.into()), (swap, y.into())]);
    let hi = b.phi(Type::Int(32), vec![(entry, y.into()), (swap, x.into())]);
    let diff = b.binary(BinOp::Sub, 32, hi, lo);
    b.ret(Some(Operand::Value(diff)));
    Ok(mb.build()?)
}

fn demo(config: OpSemConfig) -> anyhow::Result<()> {
    let module = Rc::new(demo_module()?);
    let main = module.main()?.id;
    let mut ctx = OpSemContext::new(module, config)?;
    let sem = BvOpSem::new();
    for trace in sem.explore_edges(&mut ctx, main)? {
        let solver = SolverService::new();
        solver.assert_all(&trace.side);
        println!("; {}", trace);
        println!("{}", solver.to_smt2());
    }
    Ok(())
}
