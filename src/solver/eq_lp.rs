//! Equilibrium strategy of one player of a two-player zero-sum game by
//! linear programming over the sequence form.
//!
//! Variables:
//! - `h(n) >= 0` for every hero action node n of the hero strategy tree:
//!   the probability that the hero plays the sequence ending in n. Other
//!   hero nodes share the variable of their nearest hero action ancestor,
//!   or the constant 1 above the first hero action.
//! - `v(n)` free, for every node of the opponent strategy tree: the hero's
//!   value at n when the opponent best-responds.
//!
//! Constraints:
//! - hero flow: at a hero decision, `Σ h(child) = h(node)`;
//! - opponent leaf: `v(n) = Σ chance · payoff · h(hero leaf)` over the
//!   hero's possible holdings;
//! - opponent decision: `v(n) <= v(child)` for every child;
//! - anywhere else: `v(n) = Σ v(child)`.
//!
//! Maximising `v(root)` gives the hero's equilibrium value and strategy.

use crate::action_tree::ActionTree;
use crate::chance_index::{JointChanceTable, StrategyAlignment};
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::error::{TreeError, TreeResult};
use crate::lp::{Direction, LinearProgram, LpSolver, LpStatus, Relation, SimplexSolver};
use crate::solver::{check_hero, Prepared};
use crate::strategy_tree::StrategyTree;

pub struct EqLp<'a> {
    action: &'a ActionTree,
    chance: &'a ChanceTree,
    hero: usize,
}

#[derive(Debug, Clone)]
pub struct EqLpResult {
    pub status: LpStatus,
    /// Equilibrium value of the hero; 0 unless `status` is `Optimal`.
    pub value: f64,
    /// Absolute equilibrium strategy of the hero, when optimal.
    pub strategy: Option<StrategyTree>,
}

impl EqLpResult {
    pub fn solution(&self) -> Option<(f64, &StrategyTree)> {
        match (self.status, &self.strategy) {
            (LpStatus::Optimal, Some(s)) => Some((self.value, s)),
            _ => None,
        }
    }
}

impl<'a> EqLp<'a> {
    pub fn new(action: &'a ActionTree, chance: &'a ChanceTree, hero: usize) -> TreeResult<Self> {
        super::check_trees(action, chance)?;
        if chance.players() != 2 {
            return Err(TreeError::InvalidArgument(format!(
                "equilibrium LP needs 2 players, got {}",
                chance.players()
            )));
        }
        check_hero(hero, 2)?;
        Ok(EqLp {
            action,
            chance,
            hero,
        })
    }

    pub fn solve(&self) -> TreeResult<EqLpResult> {
        self.solve_with(&SimplexSolver)
    }

    pub fn solve_with<S: LpSolver + ?Sized>(&self, solver: &S) -> TreeResult<EqLpResult> {
        let (action, chance) = (self.action, self.chance);
        let hero = self.hero;
        let opp = 1 - hero;

        let prepared = Prepared::new(action, chance)?;
        let table = JointChanceTable::build(chance, &prepared.indexer)?;
        let mut hero_tree =
            StrategyTree::from_action_and_chance(action, &chance.extract_player(hero)?)?;
        let opp_tree = StrategyTree::from_action_and_chance(action, &chance.extract_player(opp)?)?;
        let hero_align =
            StrategyAlignment::build(&hero_tree, hero, action, &prepared.children, &prepared.indexer)?;
        let opp_align =
            StrategyAlignment::build(&opp_tree, opp, action, &prepared.children, &prepared.indexer)?;
        let hero_children = ChildrenIndex::build(hero_tree.tree())?;
        let opp_children = ChildrenIndex::build(opp_tree.tree())?;
        let leaves = prepared.arrays.leaves();

        let mut lp = LinearProgram::new(Direction::Maximize);

        // Sequence variable of every hero node; None is the constant 1.
        let mut seq: Vec<Option<usize>> = vec![None; hero_tree.len() as usize];
        let mut path: Vec<Option<usize>> = Vec::new();
        for i in 0..hero_tree.len() {
            let d = hero_tree.depth(i) as usize;
            path.truncate(d);
            let var = match path.last() {
                None => None,
                Some(_) if hero_tree.node(i).is_player_action(hero) => {
                    Some(lp.add_var(0.0, 0.0, f64::INFINITY))
                }
                Some(&above) => above,
            };
            seq[i as usize] = var;
            path.push(var);
        }

        for i in 0..hero_tree.len() {
            let kids = hero_children.children(i);
            let decides = kids
                .first()
                .is_some_and(|&k| hero_tree.node(k as u64).is_player_action(hero));
            if !decides {
                continue;
            }
            let mut terms: Vec<(usize, f64)> = kids
                .iter()
                .filter_map(|&k| seq[k as usize])
                .map(|v| (v, 1.0))
                .collect();
            let rhs = match seq[i as usize] {
                Some(v) => {
                    terms.push((v, -1.0));
                    0.0
                }
                None => 1.0,
            };
            lp.add_constraint(terms, Relation::Eq, rhs);
        }

        // [leaf][hero chance index] -> hero node + 1, 0 where unreachable
        let mut hero_leaf: Vec<Vec<u64>> = prepared
            .outcomes
            .iter()
            .map(|o| vec![0u64; prepared.indexer.size(hero, o.round)])
            .collect();
        for i in 0..hero_tree.len() {
            if hero_tree.node(i).is_dealer_action {
                continue;
            }
            if let Some(k) = leaves.leaf_of(hero_align.action_node(i)) {
                hero_leaf[k][hero_align.chance_index(i) as usize] = i + 1;
            }
        }

        let values: Vec<usize> = (0..opp_tree.len())
            .map(|i| {
                let objective = if i == 0 { 1.0 } else { 0.0 };
                lp.add_var(objective, f64::NEG_INFINITY, f64::INFINITY)
            })
            .collect();
        let mut indices = [0u32; 2];
        for n in 0..opp_tree.len() {
            let vn = values[n as usize];
            let kids = opp_children.children(n);
            if kids.is_empty() {
                let node = opp_tree.node(n);
                let leaf = if node.is_dealer_action {
                    None
                } else {
                    leaves.leaf_of(opp_align.action_node(n))
                };
                let k = leaf.ok_or_else(|| {
                    TreeError::Mismatch(format!("opponent strategy leaf {} is not an action leaf", n))
                })?;
                let outcome = &prepared.outcomes[k];
                indices[opp] = opp_align.chance_index(n);
                let mut terms = vec![(vn, 1.0)];
                let mut rhs = 0.0;
                for (hero_idx, &h) in hero_leaf[k].iter().enumerate() {
                    if h == 0 {
                        continue;
                    }
                    indices[hero] = hero_idx as u32;
                    let Some(c) = table.lookup(outcome.round, &indices) else {
                        continue;
                    };
                    let coef = chance.node(c).probab * outcome.payoff(chance, c, hero);
                    match seq[(h - 1) as usize] {
                        Some(var) => terms.push((var, -coef)),
                        None => rhs += coef,
                    }
                }
                lp.add_constraint(terms, Relation::Eq, rhs);
            } else if opp_tree.node(kids[0] as u64).is_player_action(opp) {
                for &c in kids {
                    lp.add_constraint(vec![(vn, 1.0), (values[c as usize], -1.0)], Relation::Le, 0.0);
                }
            } else {
                let mut terms = vec![(vn, 1.0)];
                terms.extend(kids.iter().map(|&c| (values[c as usize], -1.0)));
                lp.add_constraint(terms, Relation::Eq, 0.0);
            }
        }

        log::info!(
            "equilibrium LP for player {}: {} variables, {} constraints",
            hero,
            lp.var_count(),
            lp.constraint_count()
        );
        let outcome = solver.solve(&lp);
        if outcome.status != LpStatus::Optimal {
            log::warn!("equilibrium LP for player {} is {}", hero, outcome.status);
            return Ok(EqLpResult {
                status: outcome.status,
                value: 0.0,
                strategy: None,
            });
        }

        let tree = hero_tree.tree_mut();
        for (i, var) in seq.iter().enumerate() {
            tree.node_mut(i as u64).probab = var.map_or(1.0, |v| outcome.values[v].max(0.0));
        }
        log::info!("equilibrium value of player {}: {}", hero, outcome.objective);
        Ok(EqLpResult {
            status: LpStatus::Optimal,
            value: outcome.objective,
            strategy: Some(hero_tree),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameDef;
    use crate::lp::LpOutcome;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kuhn_equilibrium_value() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();

        let first = EqLp::new(&action, &chance, 0).unwrap().solve().unwrap();
        let (value, strategy) = first.solution().unwrap();
        assert_abs_diff_eq!(value, -1.0 / 18.0, epsilon = 1e-7);
        assert_abs_diff_eq!(strategy.node(0).probab, 1.0);

        let second = EqLp::new(&action, &chance, 1).unwrap().solve().unwrap();
        assert_abs_diff_eq!(second.value, 1.0 / 18.0, epsilon = 1e-7);
    }

    struct Refuses;

    impl LpSolver for Refuses {
        fn solve(&self, _lp: &LinearProgram) -> LpOutcome {
            LpOutcome {
                status: LpStatus::Infeasible,
                objective: 0.0,
                values: Vec::new(),
            }
        }
    }

    #[test]
    fn failed_solve_is_reported_as_status() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();
        let result = EqLp::new(&action, &chance, 0).unwrap().solve_with(&Refuses).unwrap();
        assert_eq!(result.status, LpStatus::Infeasible);
        assert!(result.solution().is_none());
    }

    #[test]
    fn needs_two_players() {
        let mut def = GameDef::kuhn();
        def.players = 3;
        def.ranks = 4;
        def.blinds = vec![1.0; 3];
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();
        assert!(EqLp::new(&action, &chance, 0).is_err());
    }
}
