//! Solvers over aligned action, chance and strategy trees.
//!
//! All solvers share the same preparation: a children index of the action
//! tree, the chance indexer of the joint chance tree, one array per action
//! leaf and player keyed by chance index, and the pot accounting of every
//! action leaf.

pub mod best_response;
pub mod eq_lp;
pub mod game_value;

pub use best_response::{BestResponse, BestResponseResult};
pub use eq_lp::{EqLp, EqLpResult};
pub use game_value::GameValue;

use crate::action_tree::ActionTree;
use crate::chance_index::{leaf_round, ChanceIndexer, LeafArrays, StrategyAlignment};
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::error::{TreeError, TreeResult};
use crate::flat_walker::walk_preorder;
use crate::strategy_tree::StrategyTree;
use crate::walker::Flow;

/// Pot accounting at an action leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafOutcome {
    pub node: u64,
    pub round: usize,
    /// Players still in the hand.
    pub active: u16,
    pub pot: f64,
    /// Chips each player put in.
    pub in_pot: Vec<f64>,
}

impl LeafOutcome {
    /// Net result of `player` when the deal ends at `chance_node`.
    #[inline]
    pub fn payoff(&self, chance: &ChanceTree, chance_node: u64, player: usize) -> f64 {
        let share = if chance.is_leaf(chance_node) {
            chance.pot_share(chance_node, self.active, player)
        } else if self.active == 1 << player {
            1.0
        } else {
            0.0
        };
        self.pot * share - self.in_pot[player]
    }
}

pub(crate) fn check_trees(action: &ActionTree, chance: &ChanceTree) -> TreeResult<()> {
    if !chance.is_joint() {
        return Err(TreeError::InvalidArgument(
            "solvers need the joint chance tree".to_string(),
        ));
    }
    if action.players() != chance.players() || action.rounds() != chance.rounds() {
        return Err(TreeError::Mismatch(format!(
            "action tree has {} players and {} rounds, chance tree {} and {}",
            action.players(),
            action.rounds(),
            chance.players(),
            chance.rounds()
        )));
    }
    if chance.len() > i32::MAX as u64 {
        return Err(TreeError::TooLarge {
            what: "chance tree",
            count: chance.len(),
            limit: i32::MAX as u64,
        });
    }
    Ok(())
}

pub(crate) fn check_hero(hero: usize, players: usize) -> TreeResult<()> {
    if hero >= players {
        return Err(TreeError::InvalidArgument(format!(
            "hero {} of {} players",
            hero, players
        )));
    }
    Ok(())
}

/// Shared solver scratch, dropped with the solve call that built it.
pub(crate) struct Prepared {
    pub children: ChildrenIndex,
    pub indexer: ChanceIndexer,
    pub arrays: LeafArrays,
    pub outcomes: Vec<LeafOutcome>,
}

impl Prepared {
    pub fn new(action: &ActionTree, chance: &ChanceTree) -> TreeResult<Self> {
        check_trees(action, chance)?;
        let children = ChildrenIndex::build(action.tree())?;
        let indexer = ChanceIndexer::new(chance)?;
        let arrays = LeafArrays::new(action, &children, &indexer)?;
        let outcomes = leaf_outcomes(action, &arrays)?;
        log::debug!(
            "prepared {} action leaves over {} chance nodes",
            outcomes.len(),
            chance.len()
        );
        Ok(Prepared {
            children,
            indexer,
            arrays,
            outcomes,
        })
    }

    /// Load `player`'s leaf probabilities from its strategy tree.
    pub fn load_strategy(
        &mut self,
        action: &ActionTree,
        strategy: &StrategyTree,
        player: usize,
    ) -> TreeResult<()> {
        let alignment =
            StrategyAlignment::build(strategy, player, action, &self.children, &self.indexer)?;
        self.arrays.fill_from_strategy(strategy, &alignment, player)
    }
}

/// Pot accounting of every action leaf, in leaf order.
pub fn leaf_outcomes(action: &ActionTree, arrays: &LeafArrays) -> TreeResult<Vec<LeafOutcome>> {
    let players = action.players();
    let leaves = arrays.leaves();
    let mut outcomes: Vec<Option<LeafOutcome>> = vec![None; leaves.len()];
    let mut pots: Vec<Vec<f64>> = vec![vec![0.0; players]];

    walk_preorder(action.tree(), |i, node, depth| {
        let d = depth as usize;
        if d == 0 {
            return Ok(Flow::Continue);
        }
        pots.truncate(d);
        let mut in_pot = pots[d - 1].clone();
        in_pot[node.position as usize] += node.amount;
        if let Some(k) = leaves.leaf_of(i) {
            let round = leaf_round(action, i)?;
            if node.active_players.count_ones() > 1 && round + 1 != action.rounds() {
                return Err(TreeError::Format(format!(
                    "action leaf {} goes to showdown in round {} of {}",
                    i,
                    round,
                    action.rounds()
                )));
            }
            outcomes[k] = Some(LeafOutcome {
                node: i,
                round,
                active: node.active_players,
                pot: in_pot.iter().sum(),
                in_pot: in_pot.clone(),
            });
        }
        pots.push(in_pot);
        Ok(Flow::Continue)
    })?;

    outcomes
        .into_iter()
        .enumerate()
        .map(|(k, o)| o.ok_or_else(|| TreeError::Format(format!("leaf {} was not reached", k))))
        .collect()
}
