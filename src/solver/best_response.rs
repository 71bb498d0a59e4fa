//! Best response of one player (the hero) against fixed opponent
//! strategies.
//!
//! The hero's strategy tree is built fresh. Every hero leaf gets its
//! expected payoff by enumerating the opponents' chance indices; values
//! then flow up the tree, maximising at hero decisions and summing
//! everywhere else. A second, top-down pass turns the maximising choices
//! into a pure absolute strategy.

use crate::action_tree::ActionTree;
use crate::chance_index::{JointChanceTable, StrategyAlignment};
use crate::chance_tree::ChanceTree;
use crate::error::{TreeError, TreeResult};
use crate::flat_walker::{FlatTreeWalker, FlatVisitor};
use crate::solver::{check_hero, Prepared};
use crate::strategy_tree::{StrategyNode, StrategyTree};
use crate::walker::Flow;

pub struct BestResponse<'a> {
    action: &'a ActionTree,
    chance: &'a ChanceTree,
    strategies: Vec<Option<&'a StrategyTree>>,
    hero: usize,
}

#[derive(Debug, Clone)]
pub struct BestResponseResult {
    /// Expected value of the hero playing the best response.
    pub value: f64,
    /// Pure strategy of the hero in absolute form. At each hero decision
    /// the chosen action carries the decision node's own probability rather
    /// than 1.0 and every other action 0, so decisions the hero steers away
    /// from hold only zeros. The tree passes `verify_abs_strategy` and can
    /// be handed to `GameValue` as is.
    pub strategy: StrategyTree,
    /// Value of every node of `strategy`, unnormalised (weighted by the
    /// chance and opponent probabilities of reaching it).
    pub node_values: Vec<f64>,
}

impl<'a> BestResponse<'a> {
    /// `strategies[p]` must be set for every opponent; the hero's entry is
    /// ignored.
    pub fn new(
        action: &'a ActionTree,
        chance: &'a ChanceTree,
        strategies: &[Option<&'a StrategyTree>],
        hero: usize,
    ) -> TreeResult<Self> {
        super::check_trees(action, chance)?;
        let players = chance.players();
        check_hero(hero, players)?;
        if strategies.len() != players {
            return Err(TreeError::InvalidArgument(format!(
                "{} strategies for {} players",
                strategies.len(),
                players
            )));
        }
        if let Some(p) = (0..players).find(|&p| p != hero && strategies[p].is_none()) {
            return Err(TreeError::InvalidArgument(format!(
                "no strategy for opponent {}",
                p
            )));
        }
        Ok(BestResponse {
            action,
            chance,
            strategies: strategies.to_vec(),
            hero,
        })
    }

    pub fn solve(&self) -> TreeResult<BestResponseResult> {
        let hero = self.hero;
        let own = self.chance.extract_player(hero)?;
        let mut strategy = StrategyTree::from_action_and_chance(self.action, &own)?;
        drop(own);

        let mut prepared = Prepared::new(self.action, self.chance)?;
        for (p, s) in self.strategies.iter().enumerate().filter(|(p, _)| *p != hero) {
            if let Some(s) = s {
                prepared.load_strategy(self.action, s, p)?;
            }
        }
        let table = JointChanceTable::build(self.chance, &prepared.indexer)?;
        let alignment = StrategyAlignment::build(
            &strategy,
            hero,
            self.action,
            &prepared.children,
            &prepared.indexer,
        )?;

        let mut pass = ValuePass {
            hero,
            chance: self.chance,
            prepared: &prepared,
            table: &table,
            alignment: &alignment,
            values: vec![0.0; strategy.len() as usize],
            path: Vec::new(),
            indices: vec![0u32; self.chance.players()],
        };
        FlatTreeWalker::new().walk(strategy.tree(), &mut pass)?;
        let values = pass.values;

        choose_best(&mut strategy, hero, &values);
        log::info!("best response of player {}: {}", hero, values[0]);
        Ok(BestResponseResult {
            value: values[0],
            strategy,
            node_values: values,
        })
    }
}

/// Post-order value propagation over the hero strategy tree.
struct ValuePass<'s> {
    hero: usize,
    chance: &'s ChanceTree,
    prepared: &'s Prepared,
    table: &'s JointChanceTable,
    alignment: &'s StrategyAlignment,
    values: Vec<f64>,
    /// Open nodes and whether their value has been seeded by a child.
    path: Vec<(u64, bool)>,
    /// Scratch for the opponent index enumeration.
    indices: Vec<u32>,
}

impl ValuePass<'_> {
    /// Sum over opponent index combinations at leaf `k` with the hero
    /// holding `hero_idx`.
    fn leaf_value(&mut self, k: usize, hero_idx: u32) -> f64 {
        let outcome = &self.prepared.outcomes[k];
        let indexer = &self.prepared.indexer;
        let arrays = &self.prepared.arrays;
        let players = self.indices.len();
        let round = outcome.round;

        self.indices.iter_mut().for_each(|x| *x = 0);
        self.indices[self.hero] = hero_idx;
        let mut total = 0.0;
        loop {
            let mut w = 1.0;
            for p in (0..players).filter(|&p| p != self.hero) {
                w *= arrays.get(k, p)[self.indices[p] as usize];
                if w == 0.0 {
                    break;
                }
            }
            if w != 0.0 {
                if let Some(c) = self.table.lookup(round, &self.indices) {
                    let payoff = outcome.payoff(self.chance, c, self.hero);
                    total += self.chance.node(c).probab * w * payoff;
                }
            }

            // odometer over the opponents
            let mut carried = true;
            for p in (0..players).filter(|&p| p != self.hero) {
                self.indices[p] += 1;
                if (self.indices[p] as usize) < indexer.size(p, round) {
                    carried = false;
                    break;
                }
                self.indices[p] = 0;
            }
            if carried {
                break;
            }
        }
        total
    }
}

impl FlatVisitor<StrategyNode> for ValuePass<'_> {
    fn node_begin(&mut self, i: u64, node: &StrategyNode, _depth: u8) -> TreeResult<Flow> {
        self.path.push((i, false));
        self.values[i as usize] = 0.0;
        if !node.is_dealer_action {
            let a = self.alignment.action_node(i);
            if let Some(k) = self.prepared.arrays.leaves().leaf_of(a) {
                let v = self.leaf_value(k, self.alignment.chance_index(i));
                self.values[i as usize] = v;
            }
        }
        Ok(Flow::Continue)
    }

    fn node_end(&mut self, i: u64, node: &StrategyNode, _depth: u8) -> TreeResult<Flow> {
        self.path.pop();
        let v = self.values[i as usize];
        if let Some((parent, seeded)) = self.path.last_mut() {
            let slot = &mut self.values[*parent as usize];
            if node.is_player_action(self.hero) {
                if !*seeded || v > *slot {
                    *slot = v;
                }
                *seeded = true;
            } else {
                *slot += v;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Give each hero decision's first maximising child the decision's
/// probability and its other children 0; everything else inherits.
fn choose_best(strategy: &mut StrategyTree, hero: usize, values: &[f64]) {
    // (node, probability, best child taken)
    let mut frames: Vec<(u64, f64, bool)> = Vec::new();
    let tree = strategy.tree_mut();
    for i in 0..tree.len() {
        let d = tree.depth(i) as usize;
        frames.truncate(d);
        let node = tree.node(i);
        let p = match frames.last_mut() {
            None => 1.0,
            Some((parent, prob, taken)) if node.is_player_action(hero) => {
                if !*taken && values[i as usize] == values[*parent as usize] {
                    *taken = true;
                    *prob
                } else {
                    0.0
                }
            }
            Some((_, prob, _)) => *prob,
        };
        tree.node_mut(i).probab = p;
        frames.push((i, p, false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children_index::ChildrenIndex;
    use crate::game::GameDef;
    use crate::solver::GameValue;
    use approx::assert_abs_diff_eq;

    struct Fixture {
        action: ActionTree,
        chance: ChanceTree,
        uniform: Vec<StrategyTree>,
    }

    fn fixture(def: &GameDef) -> Fixture {
        let action = ActionTree::from_game_def(def).unwrap();
        let chance = ChanceTree::from_game_def(def).unwrap();
        let uniform = (0..def.players)
            .map(|p| {
                let own = chance.extract_player(p).unwrap();
                let mut s = StrategyTree::from_action_and_chance(&action, &own).unwrap();
                s.set_uniform(p).unwrap();
                s
            })
            .collect();
        Fixture {
            action,
            chance,
            uniform,
        }
    }

    #[test]
    fn best_response_beats_uniform_and_evaluates_to_its_value() {
        let f = fixture(&GameDef::kuhn());
        let opponents = [None, Some(&f.uniform[1])];
        let br = BestResponse::new(&f.action, &f.chance, &opponents, 0)
            .unwrap()
            .solve()
            .unwrap();

        let uniform = GameValue::new(&f.action, &f.chance, &[&f.uniform[0], &f.uniform[1]])
            .unwrap()
            .solve()
            .unwrap();
        assert!(br.value >= uniform[0]);

        let replay = GameValue::new(&f.action, &f.chance, &[&br.strategy, &f.uniform[1]])
            .unwrap()
            .solve()
            .unwrap();
        assert_abs_diff_eq!(replay[0], br.value, epsilon = 1e-12);
    }

    #[test]
    fn best_response_strategy_is_pure() {
        let f = fixture(&GameDef::kuhn());
        for hero in 0..2 {
            let mut opponents = [Some(&f.uniform[0]), Some(&f.uniform[1])];
            opponents[hero] = None;
            let br = BestResponse::new(&f.action, &f.chance, &opponents, hero)
                .unwrap()
                .solve()
                .unwrap();
            let tree = &br.strategy;
            let index = ChildrenIndex::build(tree.tree()).unwrap();
            let mut unreached = 0;
            for n in 0..tree.len() {
                let kids = index.children(n);
                if kids.is_empty() || !tree.node(kids[0] as u64).is_player_action(hero) {
                    continue;
                }
                let parent = if n == 0 { 1.0 } else { tree.node(n).probab };
                let probab = |k: &u32| tree.node(*k as u64).probab;
                let sum: f64 = kids.iter().map(probab).sum();
                assert_eq!(sum, parent);
                if parent == 0.0 {
                    unreached += 1;
                    assert!(kids.iter().all(|k| probab(k) == 0.0));
                } else {
                    assert_eq!(kids.iter().filter(|&&k| probab(&k) == parent).count(), 1);
                }
            }
            // the first player bets a jack against a uniform caller, so the
            // jack's reply to check-bet is never reached
            if hero == 0 {
                assert!(unreached > 0);
            }
        }
    }

    #[test]
    fn kuhn_king_always_calls_a_bet() {
        let f = fixture(&GameDef::kuhn());
        let opponents = [Some(&f.uniform[0]), None];
        let br = BestResponse::new(&f.action, &f.chance, &opponents, 1)
            .unwrap()
            .solve()
            .unwrap();
        let tree = &br.strategy;
        // find the deal of the king (card 2) and, below it, the reply to a bet
        let king = (0..tree.len())
            .find(|&i| tree.node(i).is_dealer_action && tree.node(i).card() == 2)
            .unwrap();
        let after_bet = (king + 1..tree.len())
            .find(|&i| {
                tree.depth(i) == tree.depth(king) + 1
                    && tree.node(i).position == 0
                    && tree.node(i).amount() == 1.0
            })
            .unwrap();
        let fold = after_bet + 1;
        let call = after_bet + 2;
        assert_eq!(tree.node(fold).probab, 0.0);
        assert_eq!(tree.node(call).probab, 1.0);
    }

    #[test]
    fn missing_opponent_is_rejected() {
        let f = fixture(&GameDef::kuhn());
        assert!(BestResponse::new(&f.action, &f.chance, &[None, None], 0).is_err());
        assert!(BestResponse::new(&f.action, &f.chance, &[None, Some(&f.uniform[1])], 2).is_err());
    }
}
