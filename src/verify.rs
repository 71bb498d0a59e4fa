//! Invariant checks and tree comparison.

use rayon::prelude::*;
use serde::Serialize;

use crate::action_tree::ActionTree;
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::error::{TreeError, TreeResult};
use crate::flat_tree::FlatAccess;
use crate::solver::{BestResponse, GameValue};
use crate::strategy_tree::StrategyTree;

/// Result of comparing two flat trees node by node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Equal,
    NodeCount { left: u64, right: u64 },
    /// First node whose depth differs.
    Depth { node: u64, left: u8, right: u8 },
    /// First node whose payload differs.
    Payload { node: u64 },
}

impl Comparison {
    pub fn is_equal(&self) -> bool {
        *self == Comparison::Equal
    }

    /// Turn a difference into a `Mismatch` error naming `what` was compared.
    pub fn into_result(self, what: &str) -> TreeResult<()> {
        let detail = match self {
            Comparison::Equal => return Ok(()),
            Comparison::NodeCount { left, right } => {
                format!("{}: {} nodes against {}", what, left, right)
            }
            Comparison::Depth { node, left, right } => {
                format!("{}: node {} at depth {} against {}", what, node, left, right)
            }
            Comparison::Payload { node } => format!("{}: node {} differs", what, node),
        };
        Err(TreeError::Mismatch(detail))
    }
}

/// Compare shape and payloads, stopping at the first difference.
pub fn compare_trees<A, B>(left: &A, right: &B) -> TreeResult<Comparison>
where
    A: FlatAccess + ?Sized,
    B: FlatAccess<Node = A::Node> + ?Sized,
    A::Node: PartialEq,
{
    compare_trees_by(left, right, |a, b| a == b)
}

/// Like [`compare_trees`] with a caller-defined payload equality.
pub fn compare_trees_by<A, B, F>(left: &A, right: &B, mut same: F) -> TreeResult<Comparison>
where
    A: FlatAccess + ?Sized,
    B: FlatAccess<Node = A::Node> + ?Sized,
    F: FnMut(&A::Node, &A::Node) -> bool,
{
    let (l, r) = (left.node_count(), right.node_count());
    if l != r {
        return Ok(Comparison::NodeCount { left: l, right: r });
    }
    for i in 0..l {
        let (dl, dr) = (left.read_depth(i)?, right.read_depth(i)?);
        if dl != dr {
            return Ok(Comparison::Depth {
                node: i,
                left: dl,
                right: dr,
            });
        }
        if !same(&left.read_node(i)?, &right.read_node(i)?) {
            return Ok(Comparison::Payload { node: i });
        }
    }
    Ok(Comparison::Equal)
}

/// Probabilities of the children of every node add up to the node's own
/// (the root has probability 1), and at joint leaves the pot shares of every
/// mask add up to 1 and go only to players inside the mask.
pub fn verify_chance_tree(chance: &ChanceTree, epsilon: f64) -> TreeResult<()> {
    let root = chance.node(0).probab;
    if (root - 1.0).abs() > epsilon {
        return Err(TreeError::Mismatch(format!(
            "chance root has probability {}, expected 1",
            root
        )));
    }
    let index = ChildrenIndex::build(chance.tree())?;
    for n in 0..chance.len() {
        let kids = index.children(n);
        if kids.is_empty() {
            if !chance.is_leaf(n) {
                return Err(TreeError::Mismatch(format!(
                    "chance node {} at depth {} has no children, leaves are at depth {}",
                    n,
                    chance.depth(n),
                    chance.full_depth()
                )));
            }
            if chance.is_joint() {
                verify_pot_shares(chance, n, epsilon)?;
            }
            continue;
        }
        let expected = chance.node(n).probab;
        let sum: f64 = kids.iter().map(|&k| chance.node(k as u64).probab).sum();
        if (sum - expected).abs() > epsilon {
            return Err(TreeError::Mismatch(format!(
                "children of chance node {} sum to {}, expected {}",
                n, sum, expected
            )));
        }
    }
    Ok(())
}

fn verify_pot_shares(chance: &ChanceTree, node: u64, epsilon: f64) -> TreeResult<()> {
    for mask in 1..(1u16 << chance.players()) {
        let shares = chance.pot_shares(node, mask);
        let outside = shares
            .iter()
            .enumerate()
            .any(|(p, &s)| s != 0.0 && mask & (1 << p) == 0);
        let sum: f64 = shares.iter().sum();
        if outside || (sum - 1.0).abs() > epsilon {
            return Err(TreeError::Mismatch(format!(
                "pot shares {:?} of chance leaf {} for mask {:X}",
                shares, node, mask
            )));
        }
    }
    Ok(())
}

/// Absolute strategy check for `hero`: at every hero decision the
/// children's probabilities add up to the node's (the root counts as 1);
/// every other child carries its parent's probability.
pub fn verify_abs_strategy(strategy: &StrategyTree, hero: usize, epsilon: f64) -> TreeResult<()> {
    if hero >= strategy.players() {
        return Err(TreeError::InvalidArgument(format!(
            "hero {} of {} players",
            hero,
            strategy.players()
        )));
    }
    let index = ChildrenIndex::build(strategy.tree())?;
    for n in 0..strategy.len() {
        let kids = index.children(n);
        let Some(&first) = kids.first() else {
            continue;
        };
        let expected = if n == 0 { 1.0 } else { strategy.node(n).probab };
        if strategy.node(first as u64).is_player_action(hero) {
            let sum: f64 = kids.iter().map(|&k| strategy.node(k as u64).probab).sum();
            if (sum - expected).abs() > epsilon {
                return Err(TreeError::Mismatch(format!(
                    "hero actions below strategy node {} sum to {}, expected {}",
                    n, sum, expected
                )));
            }
        } else if let Some(&k) = kids
            .iter()
            .find(|&&k| (strategy.node(k as u64).probab - expected).abs() > epsilon)
        {
            return Err(TreeError::Mismatch(format!(
                "strategy node {} has probability {}, its parent {} has {}",
                k,
                strategy.node(k as u64).probab,
                n,
                expected
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquilibriumReport {
    /// Value of every player under the given strategies.
    pub game_values: Vec<f64>,
    /// Value of every player's best response to the others.
    pub best_responses: Vec<f64>,
}

impl EquilibriumReport {
    /// What each player would gain by deviating.
    pub fn gains(&self) -> Vec<f64> {
        self.best_responses
            .iter()
            .zip(&self.game_values)
            .map(|(br, gv)| br - gv)
            .collect()
    }

    /// Largest gain from deviating.
    pub fn exploitability(&self) -> f64 {
        self.gains().into_iter().fold(0.0, f64::max)
    }

    pub fn zero_sum_error(&self) -> f64 {
        self.game_values.iter().sum::<f64>().abs()
    }

    pub fn is_equilibrium(&self, epsilon: f64) -> bool {
        self.exploitability() <= epsilon
    }
}

/// Game values of `strategies` and the best response of every position
/// against the others; the best responses are solved in parallel.
pub fn check_equilibrium(
    action: &ActionTree,
    chance: &ChanceTree,
    strategies: &[&StrategyTree],
) -> TreeResult<EquilibriumReport> {
    let game_values = GameValue::new(action, chance, strategies)?.solve()?;
    let best_responses = (0..strategies.len())
        .into_par_iter()
        .map(|hero| {
            let opponents: Vec<Option<&StrategyTree>> = strategies
                .iter()
                .enumerate()
                .map(|(p, s)| (p != hero).then_some(*s))
                .collect();
            BestResponse::new(action, chance, &opponents, hero)?
                .solve()
                .map(|br| br.value)
        })
        .collect::<TreeResult<Vec<f64>>>()?;

    let report = EquilibriumReport {
        game_values,
        best_responses,
    };
    log::info!(
        "exploitability {:.6}, zero-sum error {:.2e}",
        report.exploitability(),
        report.zero_sum_error()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameDef;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn built_chance_trees_conserve_probability() {
        for def in [GameDef::kuhn(), GameDef::leduc()] {
            let chance = ChanceTree::from_game_def(&def).unwrap();
            verify_chance_tree(&chance, 1e-12).unwrap();
            for p in 0..def.players {
                verify_chance_tree(&chance.extract_player(p).unwrap(), 1e-12).unwrap();
            }
        }
    }

    #[test]
    fn broken_probability_is_reported() {
        let mut chance = ChanceTree::from_game_def(&GameDef::kuhn()).unwrap();
        chance.tree_mut().node_mut(2).probab = 0.5;
        assert!(matches!(
            verify_chance_tree(&chance, 1e-9),
            Err(TreeError::Mismatch(_))
        ));
    }

    #[test]
    fn strategy_normalisation() {
        let def = GameDef::leduc();
        let action = ActionTree::from_game_def(&def).unwrap();
        let own = ChanceTree::from_game_def(&def).unwrap().extract_player(1).unwrap();
        let mut strategy = StrategyTree::from_action_and_chance(&action, &own).unwrap();
        strategy.set_random(1, &mut StdRng::seed_from_u64(5)).unwrap();
        verify_abs_strategy(&strategy, 1, 1e-9).unwrap();

        let leaf = strategy.len() - 1;
        strategy.tree_mut().node_mut(leaf).probab += 0.25;
        assert!(verify_abs_strategy(&strategy, 1, 1e-9).is_err());
    }

    #[test]
    fn comparison_finds_first_difference() {
        let def = GameDef::kuhn();
        let a = ChanceTree::from_game_def(&def).unwrap();
        let mut b = a.clone();
        assert_eq!(compare_trees(a.tree(), b.tree()).unwrap(), Comparison::Equal);

        b.tree_mut().node_mut(4).card = 7;
        let diff = compare_trees(a.tree(), b.tree()).unwrap();
        assert_eq!(diff, Comparison::Payload { node: 4 });
        assert!(diff.into_result("kuhn").is_err());

        let other = ChanceTree::from_game_def(&GameDef::leduc()).unwrap();
        assert!(matches!(
            compare_trees(a.tree(), other.tree()).unwrap(),
            Comparison::NodeCount { .. }
        ));
    }

    #[test]
    fn uniform_kuhn_is_exploitable() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();
        let uniform: Vec<StrategyTree> = (0..2)
            .map(|p| {
                let own = chance.extract_player(p).unwrap();
                let mut s = StrategyTree::from_action_and_chance(&action, &own).unwrap();
                s.set_uniform(p).unwrap();
                s
            })
            .collect();
        let report = check_equilibrium(&action, &chance, &[&uniform[0], &uniform[1]]).unwrap();
        assert!(report.zero_sum_error() < 1e-12);
        assert!(report.gains().iter().all(|&g| g >= -1e-12));
        assert!(!report.is_equilibrium(1e-3));
    }
}
