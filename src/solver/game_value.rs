//! Expected value of every player when all players follow fixed
//! strategies.

use crate::action_tree::ActionTree;
use crate::chance_index::{ChanceIndexer, LeafArrays};
use crate::chance_tree::{ChanceNode, ChanceTree};
use crate::error::{TreeError, TreeResult};
use crate::flat_walker::{FlatTreeWalker, FlatVisitor};
use crate::solver::{LeafOutcome, Prepared};
use crate::strategy_tree::StrategyTree;
use crate::walker::Flow;

pub struct GameValue<'a> {
    action: &'a ActionTree,
    chance: &'a ChanceTree,
    strategies: Vec<&'a StrategyTree>,
}

impl<'a> GameValue<'a> {
    /// `strategies[p]` is the absolute strategy of player p.
    pub fn new(
        action: &'a ActionTree,
        chance: &'a ChanceTree,
        strategies: &[&'a StrategyTree],
    ) -> TreeResult<Self> {
        super::check_trees(action, chance)?;
        if strategies.len() != chance.players() {
            return Err(TreeError::InvalidArgument(format!(
                "{} strategies for {} players",
                strategies.len(),
                chance.players()
            )));
        }
        Ok(GameValue {
            action,
            chance,
            strategies: strategies.to_vec(),
        })
    }

    /// Value of every player. Outer loop over action leaves, inner walk of
    /// the chance tree down to the leaf's round.
    pub fn solve(&self) -> TreeResult<Vec<f64>> {
        let players = self.chance.players();
        let mut prepared = Prepared::new(self.action, self.chance)?;
        for (p, strategy) in self.strategies.iter().enumerate() {
            prepared.load_strategy(self.action, strategy, p)?;
        }

        let depth = self.chance.full_depth() as usize + 1;
        let mut pass = LeafPass {
            chance: self.chance,
            indexer: &prepared.indexer,
            arrays: &prepared.arrays,
            leaf: 0,
            outcome: None,
            limit: 0,
            idx: vec![0u32; depth * players],
            weight: vec![0.0; depth],
            values: vec![0.0; players],
        };
        let mut walker = FlatTreeWalker::new();
        for (k, outcome) in prepared.outcomes.iter().enumerate() {
            pass.leaf = k;
            pass.limit = ((outcome.round + 1) * players) as u8;
            pass.outcome = Some(outcome);
            walker.walk(self.chance.tree(), &mut pass)?;
        }
        log::info!("game value {:?}", pass.values);
        Ok(pass.values)
    }
}

/// Chance walk for one action leaf. Scratch rows are reused across leaves.
struct LeafPass<'s> {
    chance: &'s ChanceTree,
    indexer: &'s ChanceIndexer,
    arrays: &'s LeafArrays,
    leaf: usize,
    outcome: Option<&'s LeafOutcome>,
    /// Chance depth where the leaf's round is fully dealt.
    limit: u8,
    /// Row d: every player's chance index after depth d.
    idx: Vec<u32>,
    /// Product of strategic probabilities down to depth d.
    weight: Vec<f64>,
    values: Vec<f64>,
}

impl FlatVisitor<ChanceNode> for LeafPass<'_> {
    fn node_begin(&mut self, i: u64, node: &ChanceNode, depth: u8) -> TreeResult<Flow> {
        let Some(outcome) = self.outcome else {
            return Ok(Flow::Terminate);
        };
        let players = self.values.len();
        let d = depth as usize;
        if d == 0 {
            self.idx[..players].iter_mut().for_each(|x| *x = 0);
            self.weight[0] = 1.0;
            return Ok(Flow::Continue);
        }
        self.idx.copy_within((d - 1) * players..d * players, d * players);
        let r = self.chance.round_of_depth(depth);
        let p = node.position as usize;
        let at = d * players + p;
        self.idx[at] = self.indexer.extend(self.idx[at], p, r, node.card);

        let mut w = self.weight[d - 1];
        if r == outcome.round {
            let s = self.arrays.get(self.leaf, p)[self.idx[at] as usize];
            if s == 0.0 {
                return Ok(Flow::Skip);
            }
            w *= s;
        }
        self.weight[d] = w;

        if depth == self.limit {
            for q in 0..players {
                self.values[q] += node.probab * w * outcome.payoff(self.chance, i, q);
            }
            return Ok(Flow::Skip);
        }
        Ok(Flow::Continue)
    }
}
