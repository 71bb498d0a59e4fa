//! Linear programs and the solver seam.
//!
//! `LinearProgram` is a plain description (bounded variables with
//! objective coefficients, sparse rows); an `LpSolver` turns it into an
//! `LpOutcome`. Infeasible and unbounded programs are statuses, not errors.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximize,
    Minimize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
struct VarDef {
    objective: f64,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Row {
    terms: Vec<(usize, f64)>,
    relation: Relation,
    rhs: f64,
}

#[derive(Debug, Clone)]
pub struct LinearProgram {
    direction: Direction,
    vars: Vec<VarDef>,
    rows: Vec<Row>,
}

impl LinearProgram {
    pub fn new(direction: Direction) -> Self {
        LinearProgram {
            direction,
            vars: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Add a variable with bounds `lower..=upper` (infinite bounds allowed);
    /// returns its index.
    pub fn add_var(&mut self, objective: f64, lower: f64, upper: f64) -> usize {
        self.vars.push(VarDef {
            objective,
            lower,
            upper,
        });
        self.vars.len() - 1
    }

    /// Add `Σ coef · var (relation) rhs`. Repeated variables are merged and
    /// zero coefficients dropped.
    pub fn add_constraint(&mut self, mut terms: Vec<(usize, f64)>, relation: Relation, rhs: f64) {
        terms.sort_by_key(|&(v, _)| v);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(terms.len());
        for (v, c) in terms {
            match merged.last_mut() {
                Some((last, acc)) if *last == v => *acc += c,
                _ => merged.push((v, c)),
            }
        }
        merged.retain(|&(_, c)| c != 0.0);
        self.rows.push(Row {
            terms: merged,
            relation,
            rhs,
        });
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.rows.len()
    }

    /// A row without variables reads `0 (relation) rhs`; false if that
    /// cannot hold.
    fn trivial_rows_hold(&self) -> bool {
        self.rows.iter().filter(|r| r.terms.is_empty()).all(|r| match r.relation {
            Relation::Eq => r.rhs == 0.0,
            Relation::Le => 0.0 <= r.rhs,
            Relation::Ge => 0.0 >= r.rhs,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LpStatus {
    Optimal,
    Infeasible,
    Unbounded,
}

impl fmt::Display for LpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LpStatus::Optimal => "optimal",
            LpStatus::Infeasible => "infeasible",
            LpStatus::Unbounded => "unbounded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LpOutcome {
    pub status: LpStatus,
    /// Meaningful only when `status` is `Optimal`.
    pub objective: f64,
    /// One value per variable, empty unless `Optimal`.
    pub values: Vec<f64>,
}

impl LpOutcome {
    fn failed(status: LpStatus) -> Self {
        LpOutcome {
            status,
            objective: 0.0,
            values: Vec::new(),
        }
    }
}

pub trait LpSolver {
    fn solve(&self, lp: &LinearProgram) -> LpOutcome;
}

/// Dense simplex backend (`minilp`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexSolver;

impl LpSolver for SimplexSolver {
    fn solve(&self, lp: &LinearProgram) -> LpOutcome {
        if !lp.trivial_rows_hold() {
            return LpOutcome::failed(LpStatus::Infeasible);
        }
        let direction = match lp.direction {
            Direction::Maximize => minilp::OptimizationDirection::Maximize,
            Direction::Minimize => minilp::OptimizationDirection::Minimize,
        };
        let mut problem = minilp::Problem::new(direction);
        let vars: Vec<minilp::Variable> = lp
            .vars
            .iter()
            .map(|v| problem.add_var(v.objective, (v.lower, v.upper)))
            .collect();
        for row in lp.rows.iter().filter(|r| !r.terms.is_empty()) {
            let mut expr = minilp::LinearExpr::empty();
            for &(v, c) in &row.terms {
                expr.add(vars[v], c);
            }
            let op = match row.relation {
                Relation::Eq => minilp::ComparisonOp::Eq,
                Relation::Le => minilp::ComparisonOp::Le,
                Relation::Ge => minilp::ComparisonOp::Ge,
            };
            problem.add_constraint(expr, op, row.rhs);
        }
        log::debug!(
            "solving LP with {} variables and {} rows",
            lp.var_count(),
            lp.constraint_count()
        );
        match problem.solve() {
            Ok(solution) => LpOutcome {
                status: LpStatus::Optimal,
                objective: solution.objective(),
                values: vars.iter().map(|&v| solution[v]).collect(),
            },
            Err(minilp::Error::Unbounded) => LpOutcome::failed(LpStatus::Unbounded),
            Err(_) => LpOutcome::failed(LpStatus::Infeasible),
        }
    }
}
