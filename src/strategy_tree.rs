//! Strategy tree of one player: betting actions interleaved with the
//! player's own deals, each node carrying the absolute probability that
//! the player plays to it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

use crate::action_tree::ActionTree;
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::dual_walker::{DualTreeWalker, TreeSource};
use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{FlatNode, FlatTree, VersionTag};
use crate::text_dump::{decode_f64, encode_f64, TxtReader, TxtWriter};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StrategyNode {
    pub position: u8,
    /// Deal node (card) rather than a betting action (amount).
    pub is_dealer_action: bool,
    pub card_or_amount: f64,
    pub probab: f64,
}

impl StrategyNode {
    pub fn dealer(position: u8, card: i32) -> Self {
        StrategyNode {
            position,
            is_dealer_action: true,
            card_or_amount: card as f64,
            probab: 0.0,
        }
    }

    pub fn action(position: u8, amount: f64) -> Self {
        StrategyNode {
            position,
            is_dealer_action: false,
            card_or_amount: amount,
            probab: 0.0,
        }
    }

    #[inline]
    pub fn card(&self) -> i32 {
        self.card_or_amount as i32
    }

    #[inline]
    pub fn amount(&self) -> f64 {
        self.card_or_amount
    }

    /// Betting action taken by `player`.
    #[inline]
    pub fn is_player_action(&self, player: usize) -> bool {
        !self.is_dealer_action && self.position as usize == player
    }
}

impl FlatNode for StrategyNode {
    const SIZE: usize = 18;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.position;
        buf[1] = self.is_dealer_action as u8;
        LittleEndian::write_f64(&mut buf[2..10], self.card_or_amount);
        LittleEndian::write_f64(&mut buf[10..18], self.probab);
    }

    fn decode(buf: &[u8]) -> Self {
        StrategyNode {
            position: buf[0],
            is_dealer_action: buf[1] != 0,
            card_or_amount: LittleEndian::read_f64(&buf[2..10]),
            probab: LittleEndian::read_f64(&buf[10..18]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyTree {
    tree: FlatTree<StrategyNode>,
    players: usize,
}

impl StrategyTree {
    pub fn new(tree: FlatTree<StrategyNode>, players: usize) -> TreeResult<Self> {
        tree.validate()?;
        if players == 0 || players > crate::game::MAX_PLAYERS {
            return Err(TreeError::InvalidArgument(format!("{} players", players)));
        }
        Ok(StrategyTree { tree, players })
    }

    /// Skeleton of the strategy tree of the player owning `player_chance`.
    /// All probabilities are 0 until filled.
    pub fn from_action_and_chance(
        action: &ActionTree,
        player_chance: &ChanceTree,
    ) -> TreeResult<Self> {
        let walker = DualTreeWalker::new(action, player_chance)?;

        let mut count = 0u64;
        walker.walk(&mut |_: TreeSource, depth: usize| -> TreeResult<()> {
            if depth > u8::MAX as usize {
                return Err(TreeError::TooLarge {
                    what: "strategy tree depth",
                    count: depth as u64,
                    limit: u8::MAX as u64,
                });
            }
            count += 1;
            Ok(())
        })?;

        let mut tree = FlatTree::create(count)?;
        let mut next = 0u64;
        walker.walk(&mut |source: TreeSource, depth: usize| -> TreeResult<()> {
            let node = match source {
                TreeSource::Action(a) => {
                    let n = action.node(a);
                    StrategyNode::action(n.position, n.amount)
                }
                TreeSource::Chance(c) => {
                    let n = player_chance.node(c);
                    StrategyNode::dealer(n.position, n.card)
                }
            };
            tree.set(next, depth as u8, node)?;
            next += 1;
            Ok(())
        })?;

        let description = player_chance.tree().version().description.clone();
        tree.set_version(VersionTag::new(format!("{} strategy", description)));
        log::debug!("strategy tree has {} nodes", count);
        StrategyTree::new(tree, action.players())
    }

    pub fn players(&self) -> usize {
        self.players
    }

    pub fn tree(&self) -> &FlatTree<StrategyNode> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut FlatTree<StrategyNode> {
        &mut self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[inline]
    pub fn node(&self, i: u64) -> StrategyNode {
        self.tree.node(i)
    }

    #[inline]
    pub fn depth(&self, i: u64) -> u8 {
        self.tree.depth(i)
    }

    /// Absolute strategy where `hero` picks every action uniformly.
    pub fn set_uniform(&mut self, hero: usize) -> TreeResult<()> {
        self.fill_absolute(hero, |choices| vec![1.0 / choices as f64; choices])
    }

    /// Absolute strategy with random (strictly positive) action weights.
    pub fn set_random<R: Rng>(&mut self, hero: usize, rng: &mut R) -> TreeResult<()> {
        self.fill_absolute(hero, |choices| {
            let weights: Vec<f64> = (0..choices).map(|_| rng.gen_range(0.05..1.0)).collect();
            let total: f64 = weights.iter().sum();
            weights.into_iter().map(|w| w / total).collect()
        })
    }

    /// Top-down fill: the root gets 1, hero actions split their parent's
    /// probability by `split`, every other node inherits it.
    fn fill_absolute<F>(&mut self, hero: usize, mut split: F) -> TreeResult<()>
    where
        F: FnMut(usize) -> Vec<f64>,
    {
        if hero >= self.players {
            return Err(TreeError::InvalidArgument(format!(
                "hero {} of {} players",
                hero, self.players
            )));
        }
        let index = ChildrenIndex::build(&self.tree)?;
        self.tree.node_mut(0).probab = 1.0;
        for n in 0..self.len() {
            let kids = index.children(n);
            if kids.is_empty() {
                continue;
            }
            let parent = self.tree.node(n).probab;
            if self.tree.node(kids[0] as u64).is_player_action(hero) {
                let fractions = split(kids.len());
                for (&k, f) in kids.iter().zip(fractions) {
                    self.tree.node_mut(k as u64).probab = parent * f;
                }
            } else {
                for &k in kids {
                    self.tree.node_mut(k as u64).probab = parent;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Binary layout
    // -----------------------------------------------------------------------

    pub fn write_to<W: Write>(&self, w: &mut W) -> TreeResult<()> {
        self.tree.write_to(w)?;
        w.write_i32::<LittleEndian>(self.players as i32)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<Self> {
        let tree = FlatTree::read_from(r)?;
        let players = r.read_i32::<LittleEndian>()?;
        if players <= 0 {
            return Err(TreeError::Format(format!("strategy tree for {} players", players)));
        }
        StrategyTree::new(tree, players as usize)
    }

    pub fn save(&self, path: &Path) -> TreeResult<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> TreeResult<Self> {
        let mut r = BufReader::new(File::open(path)?);
        Self::read_from(&mut r)
    }

    // -----------------------------------------------------------------------
    // Text dump
    // -----------------------------------------------------------------------

    pub fn to_txt<W: Write>(&self, w: W) -> TreeResult<()> {
        let mut out = TxtWriter::new(w);
        out.header(self.tree.version(), self.len())?;
        out.field("PlayersCount", self.players)?;
        for i in 0..self.len() {
            let node = self.node(i);
            out.field("Id", i)?;
            out.field("D", self.depth(i))?;
            out.field("P", node.position)?;
            if node.is_dealer_action {
                out.field("C", node.card())?;
            } else {
                out.field("A", encode_f64(node.amount()))?;
            }
            out.double("Pr", node.probab)?;
        }
        Ok(())
    }

    pub fn from_txt<R: BufRead>(r: R) -> TreeResult<Self> {
        let mut input = TxtReader::new(r);
        let (version, count) = input.header()?;
        let players: usize = input.expect_parse("PlayersCount")?;

        let mut tree = FlatTree::create(count)?;
        tree.set_version(version);
        for i in 0..count {
            let id: u64 = input.expect_parse("Id")?;
            if id != i {
                return Err(input.error(format!("node id {} where {} was expected", id, i)));
            }
            let depth: u8 = input.expect_parse("D")?;
            let position: u8 = input.expect_parse("P")?;
            let tag = input.peek_tag()?.map(str::to_string);
            let mut node = match tag.as_deref() {
                Some("C") => StrategyNode::dealer(position, input.expect_parse("C")?),
                Some("A") => {
                    let raw = input.expect("A")?;
                    let amount = decode_f64(&raw)
                        .ok_or_else(|| input.error(format!("bad amount '{}'", raw)))?;
                    StrategyNode::action(position, amount)
                }
                _ => {
                    let err = input.expect("C").err();
                    return Err(err.unwrap_or_else(|| input.error("expected 'C' or 'A'")));
                }
            };
            node.probab = input.expect_f64("Pr")?;
            tree.set(i, depth, node)?;
        }
        input.expect_end()?;
        StrategyTree::new(tree, players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameDef;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn kuhn_strategy(player: usize) -> StrategyTree {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();
        let own = chance.extract_player(player).unwrap();
        StrategyTree::from_action_and_chance(&action, &own).unwrap()
    }

    fn hero_sums_match(tree: &StrategyTree, hero: usize) {
        let index = ChildrenIndex::build(tree.tree()).unwrap();
        for n in 0..tree.len() {
            let kids = index.children(n);
            if kids.is_empty() || !tree.node(kids[0] as u64).is_player_action(hero) {
                continue;
            }
            let sum: f64 = kids.iter().map(|&k| tree.node(k as u64).probab).sum();
            assert_abs_diff_eq!(sum, tree.node(n).probab, epsilon = 1e-12);
        }
    }

    #[test]
    fn skeleton_has_deals_and_actions() {
        let tree = kuhn_strategy(0);
        assert_eq!(tree.len(), 30);
        assert!(tree.node(3).is_dealer_action);
        assert_eq!(tree.node(3).card(), 0);
        assert_eq!(tree.node(4).amount(), 0.0);
        assert!(tree.tree().nodes().iter().all(|n| n.probab == 0.0));
    }

    #[test]
    fn uniform_and_random_fill_are_normalised() {
        let mut tree = kuhn_strategy(1);
        tree.set_uniform(1).unwrap();
        hero_sums_match(&tree, 1);
        let leaf_probs: f64 = tree
            .tree()
            .nodes()
            .iter()
            .filter(|n| n.is_player_action(1))
            .map(|n| n.probab)
            .sum();
        assert!(leaf_probs > 0.0);

        let mut rng = StdRng::seed_from_u64(3);
        tree.set_random(1, &mut rng).unwrap();
        hero_sums_match(&tree, 1);
        assert!(tree.set_uniform(2).is_err());
    }

    #[test]
    fn text_roundtrip_keeps_dealer_flags_and_cards() {
        let mut tree = kuhn_strategy(0);
        tree.set_random(0, &mut StdRng::seed_from_u64(11)).unwrap();
        let mut text = Vec::new();
        tree.to_txt(&mut text).unwrap();
        let back = StrategyTree::from_txt(text.as_slice()).unwrap();

        assert_eq!(back.players(), 2);
        assert_eq!(back.tree().depths(), tree.tree().depths());
        for i in 0..tree.len() {
            let (a, b) = (tree.node(i), back.node(i));
            assert_eq!(a.is_dealer_action, b.is_dealer_action);
            assert_eq!(a.card_or_amount.to_bits(), b.card_or_amount.to_bits());
            assert_eq!(a.probab.to_bits(), b.probab.to_bits());
        }
    }

    #[test]
    fn unknown_node_tag_is_rejected() {
        let tree = kuhn_strategy(0);
        let mut text = Vec::new();
        tree.to_txt(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap().replacen("\nA ", "\nX ", 1);
        assert!(matches!(
            StrategyTree::from_txt(text.as_bytes()),
            Err(TreeError::Parse { .. })
        ));
    }

    #[test]
    fn binary_roundtrip() {
        let mut tree = kuhn_strategy(1);
        tree.set_uniform(1).unwrap();
        let mut bytes = Vec::new();
        tree.write_to(&mut bytes).unwrap();
        let back = StrategyTree::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(back.tree().nodes(), tree.tree().nodes());
        assert_eq!(back.tree().version(), tree.tree().version());
    }
}
