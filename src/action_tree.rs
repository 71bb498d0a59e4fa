//! Action tree: the public betting sequences of a game.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{FlatNode, FlatTree, VersionTag};
use crate::game::{GameDef, GameState};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActionNode {
    /// Acting player; the root uses the player count as dealer sentinel.
    pub position: u8,
    /// Chips put into the pot by this action.
    pub amount: f64,
    /// Betting round the action belongs to, -1 for blinds.
    pub round: i8,
    /// Players still in the hand after the action.
    pub active_players: u16,
}

impl FlatNode for ActionNode {
    const SIZE: usize = 12;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.position;
        LittleEndian::write_f64(&mut buf[1..9], self.amount);
        buf[9] = self.round as u8;
        LittleEndian::write_u16(&mut buf[10..12], self.active_players);
    }

    fn decode(buf: &[u8]) -> Self {
        ActionNode {
            position: buf[0],
            amount: LittleEndian::read_f64(&buf[1..9]),
            round: buf[9] as i8,
            active_players: LittleEndian::read_u16(&buf[10..12]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionTree {
    tree: FlatTree<ActionNode>,
    players: usize,
    rounds: usize,
}

impl ActionTree {
    pub fn new(tree: FlatTree<ActionNode>, players: usize, rounds: usize) -> TreeResult<Self> {
        tree.validate()?;
        if players == 0 || players > crate::game::MAX_PLAYERS {
            return Err(TreeError::InvalidArgument(format!("{} players", players)));
        }
        let root = tree.node(0);
        if root.position as usize != players {
            return Err(TreeError::Format(format!(
                "action tree root has position {}, expected dealer position {}",
                root.position, players
            )));
        }
        for (i, node) in tree.nodes().iter().enumerate().skip(1) {
            if node.position as usize >= players || node.round as i64 >= rounds as i64 {
                return Err(TreeError::Format(format!(
                    "action node {} has position {} in round {}",
                    i, node.position, node.round
                )));
            }
        }
        Ok(ActionTree {
            tree,
            players,
            rounds,
        })
    }

    /// Build every betting sequence of `def`. Counts nodes first, then
    /// fills a tree of exactly that size.
    pub fn from_game_def(def: &GameDef) -> TreeResult<Self> {
        def.validate()?;
        let mut root_state = def.initial_state();
        if root_state.is_dealer_acting() {
            root_state.start_next_round();
        }
        let root = ActionNode {
            position: def.players as u8,
            amount: 0.0,
            round: -1,
            active_players: root_state.active_players(),
        };

        let mut count = 1u64;
        emit_actions(&root_state, 1, &mut |_, _| {
            count += 1;
            Ok(())
        })?;

        let mut tree = FlatTree::create(count)?;
        tree.set(0, 0, root)?;
        let mut next = 1u64;
        emit_actions(&root_state, 1, &mut |depth, node| {
            tree.set(next, depth, node)?;
            next += 1;
            Ok(())
        })?;
        tree.set_version(VersionTag::new(format!("{} action tree", def.name)));
        log::debug!("action tree of {} has {} nodes", def.name, count);

        ActionTree::new(tree, def.players, def.rounds.len())
    }

    pub fn players(&self) -> usize {
        self.players
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn tree(&self) -> &FlatTree<ActionNode> {
        &self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[inline]
    pub fn node(&self, i: u64) -> ActionNode {
        self.tree.node(i)
    }

    #[inline]
    pub fn depth(&self, i: u64) -> u8 {
        self.tree.depth(i)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> TreeResult<()> {
        self.tree.write_to(w)?;
        w.write_i32::<LittleEndian>(self.players as i32)?;
        w.write_i32::<LittleEndian>(self.rounds as i32)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> TreeResult<Self> {
        let tree = FlatTree::read_from(r)?;
        let players = r.read_i32::<LittleEndian>()?;
        let rounds = r.read_i32::<LittleEndian>()?;
        if players <= 0 || rounds <= 0 {
            return Err(TreeError::Format(format!(
                "action tree with {} players and {} rounds",
                players, rounds
            )));
        }
        ActionTree::new(tree, players as usize, rounds as usize)
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
}

/// Emit the subtree below `state` in preorder as (depth, node) pairs.
fn emit_actions<F>(state: &GameState, depth: u8, sink: &mut F) -> TreeResult<()>
where
    F: FnMut(u8, ActionNode) -> TreeResult<()>,
{
    let actions = state.allowed_actions();
    if actions.is_empty() {
        return Ok(());
    }
    if depth == u8::MAX {
        return Err(TreeError::TooLarge {
            what: "action tree depth",
            count: depth as u64 + 1,
            limit: u8::MAX as u64,
        });
    }
    for action in actions {
        let mut next = state.clone();
        next.update_by_action(action)?;
        sink(
            depth,
            ActionNode {
                position: state.current_actor() as u8,
                amount: action.amount,
                round: state.round(),
                active_players: next.active_players(),
            },
        )?;
        if next.is_dealer_acting() {
            next.start_next_round();
        }
        emit_actions(&next, depth + 1, sink)?;
    }
    Ok(())
}
