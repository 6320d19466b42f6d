use crate::error::OpSemError;
use tracing::debug;
use z3::ast::Bool;
use z3::{Model, SatResult, Solver, Tactic};

/// An explicitly owned solver for discharging the terms the engine produces.
///
/// Scopes are tracked so that `pop` is exactly the inverse of `push`: popping restores the
/// assertion set that was current when the matching `push` ran, and popping with no open scope
/// is an error rather than a no-op.
#[derive(Debug)]
pub struct SolverService {
    solver: Solver,
    depth: u32,
    tactic: bool,
}

impl SolverService {
    /// A plain solver
    pub fn new() -> Self {
        Self {
            solver: Solver::new(),
            depth: 0,
            tactic: false,
        }
    }

    /// A solver running [`default_tactic`], which suits bitvector terms over arrays and
    /// uninterpreted functions
    pub fn with_tactic() -> Self {
        Self {
            solver: default_tactic().solver(),
            depth: 0,
            tactic: true,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn push(&mut self) {
        self.solver.push();
        self.depth += 1;
    }

    pub fn pop(&mut self) -> Result<(), OpSemError> {
        if self.depth == 0 {
            return Err(OpSemError::NoScopeToPop);
        }
        self.solver.pop(1);
        self.depth -= 1;
        Ok(())
    }

    pub fn assert(&self, e: &Bool) {
        self.solver.assert(e);
    }

    pub fn assert_all<'a, I: IntoIterator<Item = &'a Bool>>(&self, es: I) {
        for e in es {
            self.solver.assert(e);
        }
    }

    pub fn check(&self) -> SatResult {
        let r = self.solver.check();
        debug!("check at depth {}: {:?}", self.depth, r);
        r
    }

    pub fn check_assuming(&self, assumptions: &[Bool]) -> SatResult {
        self.solver.check_assumptions(assumptions)
    }

    pub fn model(&self) -> Option<Model> {
        self.solver.get_model()
    }

    pub fn assertions(&self) -> Vec<Bool> {
        self.solver.get_assertions()
    }

    /// Whether `e` holds in every model of the current assertions
    pub fn prove(&mut self, e: &Bool) -> bool {
        self.push();
        self.solver.assert(e.not());
        let r = self.solver.check();
        self.solver.pop(1);
        self.depth -= 1;
        r == SatResult::Unsat
    }

    /// The current assertions as an SMT-LIB2 script
    pub fn to_smt2(&self) -> String {
        format!("{}", self.solver)
    }
}

impl Default for SolverService {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SolverService {
    /// A copy holding the same assertions at depth zero
    fn clone(&self) -> Self {
        let new = if self.tactic {
            Self::with_tactic()
        } else {
            Self::new()
        };
        for x in &self.assertions() {
            new.assert(x);
        }
        new
    }
}

impl From<Solver> for SolverService {
    fn from(solver: Solver) -> Self {
        Self {
            solver,
            depth: 0,
            tactic: false,
        }
    }
}

/// Simplify and eliminate variables first, then replace arrays with uninterpreted functions and
/// remove those by ackermann reduction, leaving a pure bitvector problem.
pub fn default_tactic() -> Tactic {
    let simplify = Tactic::new("simplify");
    let solve_eqs = Tactic::new("solve-eqs");
    let rep = Tactic::repeat(&simplify.and_then(&solve_eqs), u32::MAX);
    let bvarray2uf = Tactic::new("bvarray2uf");
    let ackermannize_bv = Tactic::new("ackermannize_bv");
    let smt = Tactic::new("smt");

    rep.and_then(&bvarray2uf)
        .and_then(&ackermannize_bv)
        .and_then(&smt)
}
