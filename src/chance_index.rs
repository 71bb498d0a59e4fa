//! Dense per-player chance indices and the arrays keyed by them.
//!
//! A player's chance index after round r is a mixed-radix number over the
//! cards the player has seen: the card of round k is multiplied by the
//! product of the radices of earlier rounds, with `max_card + 1` as the
//! radix of a round. Indices are dense enough to key flat `f64` arrays and
//! extend round by round (`index += card * offset`).

use crate::action_tree::ActionTree;
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::error::{TreeError, TreeResult};
use crate::flat_walker::walk_preorder;
use crate::strategy_tree::StrategyTree;
use crate::walker::Flow;

#[derive(Debug, Clone)]
pub struct ChanceIndexer {
    players: usize,
    rounds: usize,
    /// [player][round] radix of the round
    radix: Vec<Vec<u64>>,
    /// [player][round] index space size after the round
    size: Vec<Vec<u64>>,
}

impl ChanceIndexer {
    pub fn new(chance: &ChanceTree) -> TreeResult<Self> {
        let max = compute_max_card_per_round(chance)?;
        let (players, rounds) = (chance.players(), chance.rounds());
        let mut radix = vec![vec![1u64; rounds]; players];
        let mut size = vec![vec![1u64; rounds]; players];
        for p in 0..players {
            let mut total = 1u64;
            for r in 0..rounds {
                let rad = (max[p][r] + 1).max(1) as u64;
                total = total.saturating_mul(rad);
                if total > u32::MAX as u64 {
                    return Err(TreeError::TooLarge {
                        what: "chance index",
                        count: total,
                        limit: u32::MAX as u64,
                    });
                }
                radix[p][r] = rad;
                size[p][r] = total;
            }
        }
        log::debug!("chance index sizes {:?}", size);
        Ok(ChanceIndexer {
            players,
            rounds,
            radix,
            size,
        })
    }

    pub fn players(&self) -> usize {
        self.players
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Number of distinct indices of `player` after `round`.
    #[inline]
    pub fn size(&self, player: usize, round: usize) -> usize {
        self.size[player][round] as usize
    }

    /// Multiplier of the card dealt to `player` in `round`.
    #[inline]
    pub fn offset(&self, player: usize, round: usize) -> u32 {
        if round == 0 {
            1
        } else {
            self.size[player][round - 1] as u32
        }
    }

    #[inline]
    pub fn radix(&self, player: usize, round: usize) -> u32 {
        self.radix[player][round] as u32
    }

    /// Extend `index` by the card dealt to `player` in `round`.
    #[inline]
    pub fn extend(&self, index: u32, player: usize, round: usize, card: i32) -> u32 {
        index + card as u32 * self.offset(player, round)
    }
}

/// Highest card each player receives in each round, -1 where none.
pub fn compute_max_card_per_round(chance: &ChanceTree) -> TreeResult<Vec<Vec<i32>>> {
    let (players, rounds) = (chance.players(), chance.rounds());
    let mut max = vec![vec![-1i32; rounds]; players];
    let tree = chance.tree();
    for (i, (node, &depth)) in tree.nodes().iter().zip(tree.depths()).enumerate().skip(1) {
        let p = node.position as usize;
        if p >= players || node.card < 0 {
            return Err(TreeError::Format(format!(
                "chance node {} deals card {} to position {}",
                i, node.card, node.position
            )));
        }
        let r = chance.round_of_depth(depth);
        max[p][r] = max[p][r].max(node.card);
    }
    Ok(max)
}

// ---------------------------------------------------------------------------
// Leaf arrays
// ---------------------------------------------------------------------------

const NO_LEAF: u32 = u32::MAX;

/// Leaves of an action tree, numbered in preorder.
#[derive(Debug, Clone)]
pub struct LeafSet {
    slot_of: Vec<u32>,
    leaves: Vec<u64>,
}

impl LeafSet {
    pub fn new(children: &ChildrenIndex) -> Self {
        let mut slot_of = vec![NO_LEAF; children.node_count() as usize];
        let mut leaves = Vec::new();
        for leaf in children.leaves() {
            slot_of[leaf as usize] = leaves.len() as u32;
            leaves.push(leaf);
        }
        LeafSet { slot_of, leaves }
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Action node of leaf `k`.
    #[inline]
    pub fn node(&self, k: usize) -> u64 {
        self.leaves[k]
    }

    /// Leaf number of an action node, if it is a leaf.
    #[inline]
    pub fn leaf_of(&self, node: u64) -> Option<usize> {
        match self.slot_of.get(node as usize) {
            Some(&slot) if slot != NO_LEAF => Some(slot as usize),
            _ => None,
        }
    }
}

/// Per action leaf and player, a dense array over the player's chance
/// index in the leaf's round. A zero entry is a hole.
#[derive(Debug, Clone)]
pub struct LeafArrays {
    leaves: LeafSet,
    players: usize,
    data: Vec<Vec<f64>>,
}

impl LeafArrays {
    pub fn new(action: &ActionTree, children: &ChildrenIndex, indexer: &ChanceIndexer) -> TreeResult<Self> {
        let leaves = LeafSet::new(children);
        let players = indexer.players();
        let mut data = Vec::with_capacity(leaves.len() * players);
        for k in 0..leaves.len() {
            let round = leaf_round(action, leaves.node(k))?;
            for p in 0..players {
                data.push(vec![0.0; indexer.size(p, round)]);
            }
        }
        Ok(LeafArrays {
            leaves,
            players,
            data,
        })
    }

    pub fn leaves(&self) -> &LeafSet {
        &self.leaves
    }

    #[inline]
    pub fn get(&self, leaf: usize, player: usize) -> &[f64] {
        &self.data[leaf * self.players + player]
    }

    #[inline]
    pub fn get_mut(&mut self, leaf: usize, player: usize) -> &mut [f64] {
        &mut self.data[leaf * self.players + player]
    }

    /// Copy `player`'s probabilities at action leaves out of its strategy
    /// tree.
    pub fn fill_from_strategy(
        &mut self,
        strategy: &StrategyTree,
        alignment: &StrategyAlignment,
        player: usize,
    ) -> TreeResult<()> {
        for i in 0..strategy.len() {
            let node = strategy.node(i);
            if node.is_dealer_action {
                continue;
            }
            if let Some(k) = self.leaves.leaf_of(alignment.action_node(i)) {
                let idx = alignment.chance_index(i) as usize;
                let slot = self
                    .get_mut(k, player)
                    .get_mut(idx)
                    .ok_or_else(|| TreeError::Mismatch(format!("chance index {} of strategy node {}", idx, i)))?;
                *slot = node.probab;
            }
        }
        Ok(())
    }
}

/// Round in which the game ends at action leaf `node`.
pub fn leaf_round(action: &ActionTree, node: u64) -> TreeResult<usize> {
    let round = action.node(node).round;
    if round < 0 {
        return Err(TreeError::Format(format!(
            "action leaf {} ends the game before the first deal",
            node
        )));
    }
    Ok(round as usize)
}

// ---------------------------------------------------------------------------
// Strategy tree alignment
// ---------------------------------------------------------------------------

/// For every node of a player's strategy tree, the action node it stands
/// for (a deal node stands for the action that opened the round) and the
/// player's chance index at that point.
#[derive(Debug, Clone)]
pub struct StrategyAlignment {
    action_node: Vec<u32>,
    chance_index: Vec<u32>,
}

struct AlignFrame {
    action: u64,
    chance: u32,
    cursor: usize,
}

impl StrategyAlignment {
    pub fn build(
        strategy: &StrategyTree,
        player: usize,
        action: &ActionTree,
        children: &ChildrenIndex,
        indexer: &ChanceIndexer,
    ) -> TreeResult<Self> {
        if strategy.players() != action.players() || player >= action.players() {
            return Err(TreeError::InvalidArgument(format!(
                "strategy of player {} for {} players against an action tree for {}",
                player,
                strategy.players(),
                action.players()
            )));
        }
        let n = strategy.len() as usize;
        let mut action_node = vec![0u32; n];
        let mut chance_index = vec![0u32; n];
        let mut frames: Vec<AlignFrame> = Vec::new();

        walk_preorder(strategy.tree(), |i, node, depth| {
            let depth = depth as usize;
            frames.truncate(depth);
            let (a, c) = match frames.last_mut() {
                None => (0u64, 0u32),
                Some(parent) if node.is_dealer_action => {
                    if node.position as usize != player {
                        return Err(TreeError::Mismatch(format!(
                            "strategy node {} deals to position {}, expected {}",
                            i, node.position, player
                        )));
                    }
                    let round = (action.node(parent.action).round + 1) as usize;
                    if round >= indexer.rounds() || node.card() < 0 {
                        return Err(TreeError::Mismatch(format!(
                            "strategy node {} deals card {} in round {}",
                            i,
                            node.card(),
                            round
                        )));
                    }
                    let c = indexer.extend(parent.chance, player, round, node.card());
                    (parent.action, c)
                }
                Some(parent) => {
                    let kids = children.children(parent.action);
                    let Some(&a) = kids.get(parent.cursor) else {
                        return Err(TreeError::Mismatch(format!(
                            "strategy node {} has no counterpart among the {} children of action node {}",
                            i,
                            kids.len(),
                            parent.action
                        )));
                    };
                    parent.cursor += 1;
                    let expected = action.node(a as u64);
                    if expected.position != node.position || expected.amount != node.amount() {
                        return Err(TreeError::Mismatch(format!(
                            "strategy node {} is ({}, {}), action node {} is ({}, {})",
                            i,
                            node.position,
                            node.amount(),
                            a,
                            expected.position,
                            expected.amount
                        )));
                    }
                    (a as u64, parent.chance)
                }
            };
            action_node[i as usize] = a as u32;
            chance_index[i as usize] = c;
            frames.push(AlignFrame {
                action: a,
                chance: c,
                cursor: 0,
            });
            Ok(Flow::Continue)
        })?;

        Ok(StrategyAlignment {
            action_node,
            chance_index,
        })
    }

    #[inline]
    pub fn action_node(&self, i: u64) -> u64 {
        self.action_node[i as usize] as u64
    }

    #[inline]
    pub fn chance_index(&self, i: u64) -> u32 {
        self.chance_index[i as usize]
    }
}

// ---------------------------------------------------------------------------
// Joint chance lookup
// ---------------------------------------------------------------------------

/// `[round][joint index] -> joint chance node` where the joint index
/// combines every player's chance index; 0 marks an impossible
/// combination (the root is never a target).
#[derive(Debug, Clone)]
pub struct JointChanceTable {
    players: usize,
    /// [round][player]
    strides: Vec<Vec<u64>>,
    tables: Vec<Vec<u32>>,
}

impl JointChanceTable {
    pub fn build(chance: &ChanceTree, indexer: &ChanceIndexer) -> TreeResult<Self> {
        if !chance.is_joint() {
            return Err(TreeError::InvalidArgument(
                "lookup table needs the joint chance tree".to_string(),
            ));
        }
        if chance.len() > i32::MAX as u64 {
            return Err(TreeError::TooLarge {
                what: "chance tree",
                count: chance.len(),
                limit: i32::MAX as u64,
            });
        }
        let (players, rounds) = (chance.players(), chance.rounds());
        let mut strides = Vec::with_capacity(rounds);
        let mut tables = Vec::with_capacity(rounds);
        for r in 0..rounds {
            let mut stride = vec![0u64; players];
            let mut total = 1u64;
            for (p, s) in stride.iter_mut().enumerate() {
                *s = total;
                total = total.saturating_mul(indexer.size(p, r) as u64);
            }
            if total > u32::MAX as u64 {
                return Err(TreeError::TooLarge {
                    what: "joint chance table",
                    count: total,
                    limit: u32::MAX as u64,
                });
            }
            strides.push(stride);
            tables.push(vec![0u32; total as usize]);
        }

        // idx row d holds every player's index after depth d
        let mut idx = vec![0u32; (chance.full_depth() as usize + 1) * players];
        walk_preorder(chance.tree(), |i, node, depth| {
            let d = depth as usize;
            if d == 0 {
                return Ok(Flow::Continue);
            }
            idx.copy_within((d - 1) * players..d * players, d * players);
            let r = chance.round_of_depth(depth);
            let p = node.position as usize;
            let row = &mut idx[d * players..(d + 1) * players];
            row[p] = indexer.extend(row[p], p, r, node.card);
            if d % players == 0 {
                let joint: u64 = row
                    .iter()
                    .zip(&strides[r])
                    .map(|(&x, &s)| x as u64 * s)
                    .sum();
                tables[r][joint as usize] = i as u32;
            }
            Ok(Flow::Continue)
        })?;

        Ok(JointChanceTable {
            players,
            strides,
            tables,
        })
    }

    /// Chance node where every player holds `indices` at the end of
    /// `round`, or `None` when no deal produces them.
    #[inline]
    pub fn lookup(&self, round: usize, indices: &[u32]) -> Option<u64> {
        debug_assert_eq!(indices.len(), self.players);
        let joint: u64 = indices
            .iter()
            .zip(&self.strides[round])
            .map(|(&x, &s)| x as u64 * s)
            .sum();
        match self.tables[round].get(joint as usize) {
            Some(&node) if node != 0 => Some(node as u64),
            _ => None,
        }
    }
}
