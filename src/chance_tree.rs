//! Chance tree: every card deal of a game with its absolute probability.
//!
//! The joint tree has one level per player per round (`deals_per_round`
//! equals the player count); its leaves carry, for every non-empty set of
//! active players, the share of the pot each player wins at showdown. A
//! per-player tree has one level per round and no pot shares.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;

use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{FlatNode, FlatTree, VersionTag};
use crate::flat_walker::walk_preorder;
use crate::game::{pot_shares, Deal, GameDef, MAX_PLAYERS};
use crate::text_dump::{decode_f64, encode_f64, TxtReader, TxtWriter};
use crate::walker::Flow;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChanceNode {
    /// Player receiving the card; the root uses the player count.
    pub position: u8,
    /// Card dealt, -1 at the root.
    pub card: i32,
    /// Absolute probability of reaching this node.
    pub probab: f64,
}

impl FlatNode for ChanceNode {
    const SIZE: usize = 13;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.position;
        LittleEndian::write_i32(&mut buf[1..5], self.card);
        LittleEndian::write_f64(&mut buf[5..13], self.probab);
    }

    fn decode(buf: &[u8]) -> Self {
        ChanceNode {
            position: buf[0],
            card: LittleEndian::read_i32(&buf[1..5]),
            probab: LittleEndian::read_f64(&buf[5..13]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChanceTree {
    tree: FlatTree<ChanceNode>,
    players: usize,
    rounds: usize,
    deals_per_round: usize,
    /// node * masks * players + mask * players + player
    pot_shares: Vec<f64>,
}

impl ChanceTree {
    /// Wrap a filled flat tree. Pot shares are allocated (zeroed) for a
    /// joint tree and must be set by the caller.
    pub fn new(
        tree: FlatTree<ChanceNode>,
        players: usize,
        rounds: usize,
        deals_per_round: usize,
    ) -> TreeResult<Self> {
        tree.validate()?;
        if players == 0 || players > MAX_PLAYERS {
            return Err(TreeError::InvalidArgument(format!("{} players", players)));
        }
        if rounds == 0 || (deals_per_round != 1 && deals_per_round != players) {
            return Err(TreeError::InvalidArgument(format!(
                "{} rounds with {} deals per round for {} players",
                rounds, deals_per_round, players
            )));
        }
        if tree.max_depth() as usize > rounds * deals_per_round {
            return Err(TreeError::Format(format!(
                "chance tree is {} levels deep, {} rounds allow {}",
                tree.max_depth(),
                rounds,
                rounds * deals_per_round
            )));
        }
        let shares = if deals_per_round == players {
            let len = tree.len() as usize * (1usize << players) * players;
            vec![0.0; len]
        } else {
            Vec::new()
        };
        Ok(ChanceTree {
            tree,
            players,
            rounds,
            deals_per_round,
            pot_shares: shares,
        })
    }

    pub fn players(&self) -> usize {
        self.players
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn deals_per_round(&self) -> usize {
        self.deals_per_round
    }

    /// Whether this tree deals to every player (and carries pot shares).
    pub fn is_joint(&self) -> bool {
        self.deals_per_round == self.players
    }

    pub fn tree(&self) -> &FlatTree<ChanceNode> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut FlatTree<ChanceNode> {
        &mut self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[inline]
    pub fn node(&self, i: u64) -> ChanceNode {
        self.tree.node(i)
    }

    #[inline]
    pub fn depth(&self, i: u64) -> u8 {
        self.tree.depth(i)
    }

    /// Round dealt at `depth` (depth >= 1).
    #[inline]
    pub fn round_of_depth(&self, depth: u8) -> usize {
        (depth as usize - 1) / self.deals_per_round
    }

    /// Depth of the leaves.
    pub fn full_depth(&self) -> u8 {
        (self.rounds * self.deals_per_round) as u8
    }

    #[inline]
    pub fn is_leaf(&self, i: u64) -> bool {
        self.depth(i) == self.full_depth()
    }

    #[inline]
    fn share_offset(&self, node: u64, mask: u16) -> usize {
        (node as usize * (1usize << self.players) + mask as usize) * self.players
    }

    /// Pot fraction won by `player` at `node` when `mask` plays showdown.
    #[inline]
    pub fn pot_share(&self, node: u64, mask: u16, player: usize) -> f64 {
        self.pot_shares[self.share_offset(node, mask) + player]
    }

    pub fn pot_shares(&self, node: u64, mask: u16) -> &[f64] {
        let at = self.share_offset(node, mask);
        &self.pot_shares[at..at + self.players]
    }

    pub fn set_pot_shares(&mut self, node: u64, mask: u16, shares: &[f64]) -> TreeResult<()> {
        if !self.is_joint() {
            return Err(TreeError::InvalidArgument(
                "player chance trees carry no pot shares".to_string(),
            ));
        }
        if node >= self.len() || mask as usize >= 1 << self.players || shares.len() != self.players {
            return Err(TreeError::InvalidArgument(format!(
                "pot shares for node {} mask {:X} with {} values",
                node,
                mask,
                shares.len()
            )));
        }
        let at = self.share_offset(node, mask);
        self.pot_shares[at..at + self.players].copy_from_slice(shares);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    /// Enumerate every deal of `def`. Public cards are drawn at the first
    /// player's level of their round and repeated on the other levels.
    pub fn from_game_def(def: &GameDef) -> TreeResult<Self> {
        def.validate()?;
        let mut count = 1u64;
        Dealer::new(def, false).deal(0, 1.0, &mut |_, _, _| {
            count += 1;
            Ok(())
        })?;

        let players = def.players;
        let mut tree = FlatTree::create(count)?;
        tree.set(
            0,
            0,
            ChanceNode {
                position: players as u8,
                card: -1,
                probab: 1.0,
            },
        )?;
        let mut leaf_shares: Vec<(u64, Vec<f64>)> = Vec::new();
        let mut next = 1u64;
        Dealer::new(def, true).deal(0, 1.0, &mut |depth, node, shares| {
            tree.set(next, depth, node)?;
            if let Some(shares) = shares {
                leaf_shares.push((next, shares.to_vec()));
            }
            next += 1;
            Ok(())
        })?;
        tree.set_version(VersionTag::new(format!("{} chance tree", def.name)));

        let mut chance = ChanceTree::new(tree, players, def.rounds.len(), players)?;
        for (leaf, shares) in &leaf_shares {
            for (k, mask_shares) in shares.chunks(players).enumerate() {
                chance.set_pot_shares(*leaf, (k + 1) as u16, mask_shares)?;
            }
        }
        log::debug!("chance tree of {} has {} nodes", def.name, count);
        Ok(chance)
    }

    /// Chance tree as seen by `player`: one level per round holding the
    /// player's own card, with probabilities summed over everything the
    /// player cannot see.
    pub fn extract_player(&self, player: usize) -> TreeResult<ChanceTree> {
        if !self.is_joint() {
            return Err(TreeError::InvalidArgument(
                "player trees are extracted from a joint chance tree".to_string(),
            ));
        }
        if player >= self.players {
            return Err(TreeError::InvalidArgument(format!(
                "player {} of {}",
                player, self.players
            )));
        }
        let mut seqs: Vec<Vec<i32>> = vec![Vec::new()];
        let mut probs: BTreeMap<Vec<i32>, f64> = BTreeMap::new();
        walk_preorder(&self.tree, |_, node, depth| {
            if depth == 0 {
                return Ok(Flow::Continue);
            }
            seqs.truncate(depth as usize);
            let mut seq = seqs[depth as usize - 1].clone();
            if node.position as usize == player {
                seq.push(node.card);
                *probs.entry(seq.clone()).or_insert(0.0) += node.probab;
            }
            seqs.push(seq);
            Ok(Flow::Continue)
        })?;

        // Lexicographic order of card sequences is preorder.
        let mut tree = FlatTree::create(probs.len() as u64 + 1)?;
        tree.set(
            0,
            0,
            ChanceNode {
                position: self.players as u8,
                card: -1,
                probab: 1.0,
            },
        )?;
        for (i, (seq, probab)) in probs.iter().enumerate() {
            let card = seq.last().copied().unwrap_or(-1);
            tree.set(
                i as u64 + 1,
                seq.len() as u8,
                ChanceNode {
                    position: player as u8,
                    card,
                    probab: *probab,
                },
            )?;
        }
        tree.set_version(VersionTag::new(format!(
            "{} player {}",
            self.tree.version().description,
            player
        )));
        log::debug!("player {} chance tree has {} nodes", player, tree.len());
        ChanceTree::new(tree, self.players, self.rounds, 1)
    }

    // -----------------------------------------------------------------------
    // Binary layout
    // -----------------------------------------------------------------------

    pub fn write_to<W: Write>(&self, w: &mut W) -> TreeResult<()> {
        self.tree.write_to(w)?;
        w.write_i32::<LittleEndian>(self.players as i32)?;
        w.write_i32::<LittleEndian>(self.rounds as i32)?;
        w.write_i32::<LittleEndian>(self.deals_per_round as i32)?;
        w.write_u64::<LittleEndian>(self.pot_shares.len() as u64)?;
        for &s in &self.pot_shares {
            w.write_f64::<LittleEndian>(s)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<Self> {
        let tree = FlatTree::read_from(r)?;
        let players = r.read_i32::<LittleEndian>()?;
        let rounds = r.read_i32::<LittleEndian>()?;
        let deals = r.read_i32::<LittleEndian>()?;
        if players <= 0 || rounds <= 0 || deals <= 0 {
            return Err(TreeError::Format(format!(
                "chance tree with {} players, {} rounds, {} deals per round",
                players, rounds, deals
            )));
        }
        let mut chance = ChanceTree::new(tree, players as usize, rounds as usize, deals as usize)?;
        let stored = r.read_u64::<LittleEndian>()?;
        if stored != chance.pot_shares.len() as u64 {
            return Err(TreeError::Format(format!(
                "{} pot shares stored, tree needs {}",
                stored,
                chance.pot_shares.len()
            )));
        }
        r.read_f64_into::<LittleEndian>(&mut chance.pot_shares)?;
        Ok(chance)
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
        out.field("RoundsCount", self.rounds)?;
        out.field("PlayersCount", self.players)?;
        out.field("DealsPerRound", self.deals_per_round)?;
        for i in 0..self.len() {
            let node = self.node(i);
            out.field("Id", i)?;
            out.field("D", self.depth(i))?;
            out.field("P", node.position)?;
            out.field("C", node.card)?;
            out.double("Pr", node.probab)?;
            if self.is_joint() && self.is_leaf(i) {
                for mask in 1..(1u16 << self.players) {
                    let shares = self.pot_shares(i, mask).iter().map(|&s| encode_f64(s)).join(" ");
                    out.field("Ps", format!("{:X} {}", mask, shares))?;
                }
            }
        }
        Ok(())
    }

    pub fn from_txt<R: BufRead>(r: R) -> TreeResult<Self> {
        let mut input = TxtReader::new(r);
        let (version, count) = input.header()?;
        let rounds: usize = input.expect_parse("RoundsCount")?;
        let players: usize = input.expect_parse("PlayersCount")?;
        let deals: usize = input.expect_parse("DealsPerRound")?;

        let mut tree = FlatTree::create(count)?;
        tree.set_version(version);
        let mut shares = Vec::new();
        for i in 0..count {
            let id: u64 = input.expect_parse("Id")?;
            if id != i {
                return Err(input.error(format!("node id {} where {} was expected", id, i)));
            }
            let depth: u8 = input.expect_parse("D")?;
            let position: u8 = input.expect_parse("P")?;
            let card: i32 = input.expect_parse("C")?;
            let probab = input.expect_f64("Pr")?;
            tree.set(
                i,
                depth,
                ChanceNode {
                    position,
                    card,
                    probab,
                },
            )?;
            while let Some(line) = input.optional("Ps")? {
                shares.push((i, parse_shares(&line, players).ok_or_else(|| {
                    input.error(format!("bad pot shares '{}'", line))
                })?));
            }
        }
        input.expect_end()?;

        let mut chance = ChanceTree::new(tree, players, rounds, deals)?;
        for (node, (mask, values)) in shares {
            chance.set_pot_shares(node, mask, &values)?;
        }
        Ok(chance)
    }
}

fn parse_shares(line: &str, players: usize) -> Option<(u16, Vec<f64>)> {
    let mut parts = line.split_whitespace();
    let mask = u16::from_str_radix(parts.next()?, 16).ok()?;
    let values = parts.map(decode_f64).collect::<Option<Vec<f64>>>()?;
    if mask == 0 || values.len() != players {
        return None;
    }
    Some((mask, values))
}

// ---------------------------------------------------------------------------
// Deal enumeration
// ---------------------------------------------------------------------------

type DealSink<'s> = dyn FnMut(u8, ChanceNode, Option<&[f64]>) -> TreeResult<()> + 's;

struct Dealer<'a> {
    def: &'a GameDef,
    with_shares: bool,
    hands: Vec<Vec<u8>>,
    board: Vec<u8>,
    used: u64,
}

impl<'a> Dealer<'a> {
    fn new(def: &'a GameDef, with_shares: bool) -> Self {
        Dealer {
            def,
            with_shares,
            hands: vec![Vec::new(); def.players],
            board: Vec::new(),
            used: 0,
        }
    }

    fn deal(&mut self, level: usize, probab: f64, sink: &mut DealSink) -> TreeResult<()> {
        let players = self.def.players;
        let total = self.def.rounds.len() * players;
        if level == total {
            return Ok(());
        }
        let (round, player) = (level / players, level % players);
        let depth = (level + 1) as u8;
        let is_leaf = level + 1 == total;
        let public = self.def.rounds[round].deal == Deal::Public;

        if public && player > 0 {
            let card = self.board.last().copied().unwrap_or(0);
            let node = ChanceNode {
                position: player as u8,
                card: card as i32,
                probab,
            };
            self.emit(depth, node, is_leaf, sink)?;
            return self.deal(level + 1, probab, sink);
        }

        let deck = self.def.deck_size();
        let remaining = deck - self.used.count_ones() as usize;
        let p = probab / remaining as f64;
        for card in 0..deck as u8 {
            let bit = 1u64 << card;
            if self.used & bit != 0 {
                continue;
            }
            self.used |= bit;
            if public {
                self.board.push(card);
            } else {
                self.hands[player].push(card);
            }
            let node = ChanceNode {
                position: player as u8,
                card: card as i32,
                probab: p,
            };
            self.emit(depth, node, is_leaf, sink)?;
            self.deal(level + 1, p, sink)?;
            if public {
                self.board.pop();
            } else {
                self.hands[player].pop();
            }
            self.used &= !bit;
        }
        Ok(())
    }

    fn emit(&self, depth: u8, node: ChanceNode, is_leaf: bool, sink: &mut DealSink) -> TreeResult<()> {
        if !(is_leaf && self.with_shares) {
            return sink(depth, node, None);
        }
        let strengths = self.def.showdown(&self.hands, &self.board);
        let masks = 1u16 << self.def.players;
        let shares: Vec<f64> = (1..masks).flat_map(|m| pot_shares(&strengths, m)).collect();
        sink(depth, node, Some(&shares))
    }
}
