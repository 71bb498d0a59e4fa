//! Game definitions and a fixed-limit rules engine.
//!
//! The trees and solvers only need a source of legal betting sequences and
//! showdown results. `GameDef` describes small fixed-limit games (Kuhn and
//! Leduc style: one card per player or on the board per round) and
//! `GameState` walks their betting.

use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};

/// Upper bound on players: pot shares are stored for every subset of them.
pub const MAX_PLAYERS: usize = 8;

const RANK_CHARS: &[u8] = b"23456789TJQKA";
const SUIT_CHARS: &[u8] = b"shdc";

static PRESETS: Lazy<Vec<GameDef>> = Lazy::new(|| vec![GameDef::kuhn(), GameDef::leduc()]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deal {
    /// One card to every player.
    Private,
    /// One shared board card.
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundDef {
    pub deal: Deal,
    pub bet_size: f64,
    pub max_raises: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDef {
    pub name: String,
    pub players: usize,
    pub ranks: u8,
    pub suits: u8,
    /// Forced bets posted before the first deal, one per player (or none).
    #[serde(default)]
    pub blinds: Vec<f64>,
    pub rounds: Vec<RoundDef>,
}

impl GameDef {
    /// Kuhn poker: three cards, ante 1, one bet of 1.
    pub fn kuhn() -> Self {
        GameDef {
            name: "kuhn".to_string(),
            players: 2,
            ranks: 3,
            suits: 1,
            blinds: vec![1.0, 1.0],
            rounds: vec![RoundDef {
                deal: Deal::Private,
                bet_size: 1.0,
                max_raises: 1,
            }],
        }
    }

    /// Leduc hold'em: six cards, ante 1, a private round betting 2 and a
    /// board round betting 4, two raises per round.
    pub fn leduc() -> Self {
        GameDef {
            name: "leduc".to_string(),
            players: 2,
            ranks: 3,
            suits: 2,
            blinds: vec![1.0, 1.0],
            rounds: vec![
                RoundDef {
                    deal: Deal::Private,
                    bet_size: 2.0,
                    max_raises: 2,
                },
                RoundDef {
                    deal: Deal::Public,
                    bet_size: 4.0,
                    max_raises: 2,
                },
            ],
        }
    }

    pub fn preset(name: &str) -> Option<&'static GameDef> {
        PRESETS.iter().find(|g| g.name == name)
    }

    pub fn preset_names() -> Vec<&'static str> {
        PRESETS.iter().map(|g| g.name.as_str()).collect()
    }

    /// Resolve a preset name or read a JSON definition from a file.
    pub fn load(spec: &str) -> TreeResult<GameDef> {
        let def = match GameDef::preset(spec) {
            Some(def) => def.clone(),
            None => {
                let json = std::fs::read_to_string(Path::new(spec))?;
                serde_json::from_str(&json)?
            }
        };
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> TreeResult<()> {
        let bad = |msg: String| Err(TreeError::InvalidArgument(format!("{}: {}", self.name, msg)));
        if self.players == 0 || self.players > MAX_PLAYERS {
            return bad(format!("players must be in 1..={}", MAX_PLAYERS));
        }
        if self.rounds.is_empty() || self.rounds.len() > i8::MAX as usize {
            return bad(format!("{} rounds", self.rounds.len()));
        }
        if self.ranks == 0 || self.ranks as usize > RANK_CHARS.len() {
            return bad(format!("{} ranks", self.ranks));
        }
        if self.suits == 0 || self.suits as usize > SUIT_CHARS.len() {
            return bad(format!("{} suits", self.suits));
        }
        if !self.blinds.is_empty() && self.blinds.len() != self.players {
            return bad(format!("{} blinds for {} players", self.blinds.len(), self.players));
        }
        if self.blinds.iter().any(|&b| b < 0.0) {
            return bad("negative blind".to_string());
        }
        if self.rounds.iter().any(|r| r.bet_size <= 0.0) {
            return bad("bet size must be positive".to_string());
        }
        let needed: usize = self
            .rounds
            .iter()
            .map(|r| match r.deal {
                Deal::Private => self.players,
                Deal::Public => 1,
            })
            .sum();
        if needed > self.deck_size() {
            return bad(format!("deals {} cards from a deck of {}", needed, self.deck_size()));
        }
        Ok(())
    }

    pub fn deck_size(&self) -> usize {
        self.ranks as usize * self.suits as usize
    }

    #[inline]
    pub fn rank(&self, card: u8) -> u8 {
        card / self.suits
    }

    /// Card name such as "Ks". A short deck takes the ranks just below the
    /// ace (Kuhn and Leduc play J, Q, K); only a full deck includes the ace.
    pub fn card_name(&self, card: u8) -> String {
        let ranks = self.ranks as usize;
        let top = if ranks == RANK_CHARS.len() { ranks } else { RANK_CHARS.len() - 1 };
        let offset = top - ranks;
        let rank = RANK_CHARS[offset + self.rank(card) as usize] as char;
        let suit = SUIT_CHARS[(card % self.suits) as usize] as char;
        format!("{}{}", rank, suit)
    }

    /// Strength of a hand: largest group of equal ranks (private cards plus
    /// board), then the rank of that group, then the best private rank.
    pub fn hand_strength(&self, private: &[u8], board: &[u8]) -> u32 {
        let mut counts = [0u8; 13];
        for &c in private.iter().chain(board) {
            counts[self.rank(c) as usize] += 1;
        }
        let (mult, group) = counts
            .iter()
            .enumerate()
            .map(|(rank, &n)| (n, rank))
            .max()
            .unwrap_or((0, 0));
        let high = private.iter().map(|&c| self.rank(c)).max().unwrap_or(0);
        mult as u32 * 10_000 + group as u32 * 100 + high as u32
    }

    /// Showdown strength of every player's hand.
    pub fn showdown(&self, hands: &[Vec<u8>], board: &[u8]) -> Vec<u32> {
        hands.iter().map(|h| self.hand_strength(h, board)).collect()
    }

    pub fn initial_state(&self) -> GameState<'_> {
        GameState::new(self)
    }
}

/// Fraction of the pot each player receives when the players in `mask`
/// reach showdown; ties split evenly.
pub fn pot_shares(strengths: &[u32], mask: u16) -> Vec<f64> {
    let mut shares = vec![0.0; strengths.len()];
    let in_mask = |p: usize| mask & (1 << p) != 0;
    let best = (0..strengths.len())
        .filter(|&p| in_mask(p))
        .map(|p| strengths[p])
        .max();
    if let Some(best) = best {
        let winners: Vec<usize> = (0..strengths.len())
            .filter(|&p| in_mask(p) && strengths[p] == best)
            .collect();
        let share = 1.0 / winners.len() as f64;
        for p in winners {
            shares[p] = share;
        }
    }
    shares
}

// ---------------------------------------------------------------------------
// Betting engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Blind,
    Fold,
    Call,
    Raise,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerAction {
    pub kind: ActionKind,
    /// Chips this action puts into the pot.
    pub amount: f64,
}

/// Public betting state of a fixed-limit game. Round -1 is blind posting.
#[derive(Debug, Clone)]
pub struct GameState<'a> {
    def: &'a GameDef,
    round: i8,
    in_pot: Vec<f64>,
    round_bets: Vec<f64>,
    active: u16,
    actor: usize,
    raises: u8,
    acted: u16,
    dealer_acting: bool,
    over: bool,
}

impl<'a> GameState<'a> {
    pub fn new(def: &'a GameDef) -> Self {
        let players = def.players;
        GameState {
            def,
            round: -1,
            in_pot: vec![0.0; players],
            round_bets: vec![0.0; players],
            active: ((1u32 << players) - 1) as u16,
            actor: 0,
            raises: 0,
            acted: 0,
            dealer_acting: def.blinds.is_empty(),
            over: false,
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.over
    }

    pub fn is_dealer_acting(&self) -> bool {
        self.dealer_acting
    }

    pub fn current_actor(&self) -> usize {
        self.actor
    }

    pub fn round(&self) -> i8 {
        self.round
    }

    pub fn active_players(&self) -> u16 {
        self.active
    }

    pub fn in_pot(&self) -> &[f64] {
        &self.in_pot
    }

    pub fn pot(&self) -> f64 {
        self.in_pot.iter().sum()
    }

    fn max_bet(&self) -> f64 {
        self.round_bets.iter().copied().fold(0.0, f64::max)
    }

    /// Legal actions of the current actor, in fold, call, raise order.
    pub fn allowed_actions(&self) -> Vec<PlayerAction> {
        if self.over || self.dealer_acting {
            return Vec::new();
        }
        if self.round < 0 {
            return vec![PlayerAction {
                kind: ActionKind::Blind,
                amount: self.def.blinds[self.actor],
            }];
        }
        let rules = &self.def.rounds[self.round as usize];
        let to_call = self.max_bet() - self.round_bets[self.actor];
        let mut actions = Vec::with_capacity(3);
        if to_call > 0.0 {
            actions.push(PlayerAction {
                kind: ActionKind::Fold,
                amount: 0.0,
            });
        }
        actions.push(PlayerAction {
            kind: ActionKind::Call,
            amount: to_call,
        });
        if self.raises < rules.max_raises {
            actions.push(PlayerAction {
                kind: ActionKind::Raise,
                amount: to_call + rules.bet_size,
            });
        }
        actions
    }

    pub fn update_by_action(&mut self, action: PlayerAction) -> TreeResult<()> {
        if !self.allowed_actions().contains(&action) {
            return Err(TreeError::InvalidArgument(format!(
                "{:?} is not allowed for player {} in round {}",
                action, self.actor, self.round
            )));
        }
        let bit = 1u16 << self.actor;
        self.in_pot[self.actor] += action.amount;
        self.round_bets[self.actor] += action.amount;

        match action.kind {
            ActionKind::Blind => {
                self.actor += 1;
                if self.actor == self.def.players {
                    self.dealer_acting = true;
                }
                return Ok(());
            }
            ActionKind::Fold => {
                self.active &= !bit;
                if self.active.count_ones() == 1 {
                    self.over = true;
                    return Ok(());
                }
            }
            ActionKind::Call => self.acted |= bit,
            ActionKind::Raise => {
                self.raises += 1;
                self.acted = bit;
            }
        }

        if self.round_complete() {
            if self.round as usize + 1 == self.def.rounds.len() {
                self.over = true;
            } else {
                self.dealer_acting = true;
            }
        } else {
            self.actor = self.next_active(self.actor);
        }
        Ok(())
    }

    /// Leave the dealer turn and open the next betting round.
    pub fn start_next_round(&mut self) {
        self.dealer_acting = false;
        self.round += 1;
        if self.round > 0 {
            self.round_bets.iter_mut().for_each(|b| *b = 0.0);
        }
        self.raises = 0;
        self.acted = 0;
        self.actor = self.next_active(self.def.players - 1);
    }

    fn round_complete(&self) -> bool {
        let max = self.max_bet();
        (self.acted & self.active) == self.active
            && (0..self.def.players)
                .filter(|&p| self.active & (1 << p) != 0)
                .all(|p| self.round_bets[p] == max)
    }

    fn next_active(&self, from: usize) -> usize {
        let n = self.def.players;
        (1..=n)
            .map(|k| (from + k) % n)
            .find(|&p| self.active & (1 << p) != 0)
            .unwrap_or(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(amount: f64) -> PlayerAction {
        PlayerAction {
            kind: ActionKind::Call,
            amount,
        }
    }

    fn raise(amount: f64) -> PlayerAction {
        PlayerAction {
            kind: ActionKind::Raise,
            amount,
        }
    }

    fn post_blinds(state: &mut GameState) {
        while state.round() < 0 && !state.is_dealer_acting() {
            let blind = state.allowed_actions()[0];
            state.update_by_action(blind).unwrap();
        }
        state.start_next_round();
    }

    #[test]
    fn presets_are_valid() {
        for name in GameDef::preset_names() {
            GameDef::preset(name).unwrap().validate().unwrap();
        }
        assert!(GameDef::preset("holdem").is_none());
    }

    #[test]
    fn kuhn_check_check_ends_game() {
        let def = GameDef::kuhn();
        let mut state = def.initial_state();
        post_blinds(&mut state);
        assert_eq!(state.round(), 0);
        assert_eq!(state.current_actor(), 0);
        assert_eq!(state.allowed_actions(), vec![call(0.0), raise(1.0)]);

        state.update_by_action(call(0.0)).unwrap();
        assert_eq!(state.current_actor(), 1);
        state.update_by_action(call(0.0)).unwrap();
        assert!(state.is_game_over());
        assert_eq!(state.pot(), 2.0);
    }

    #[test]
    fn kuhn_bet_fold() {
        let def = GameDef::kuhn();
        let mut state = def.initial_state();
        post_blinds(&mut state);
        state.update_by_action(raise(1.0)).unwrap();
        let actions = state.allowed_actions();
        assert_eq!(actions[0].kind, ActionKind::Fold);
        assert_eq!(actions.len(), 2, "raise cap reached");
        state.update_by_action(actions[0]).unwrap();
        assert!(state.is_game_over());
        assert_eq!(state.active_players(), 0b01);
    }

    #[test]
    fn leduc_moves_to_second_round() {
        let def = GameDef::leduc();
        let mut state = def.initial_state();
        post_blinds(&mut state);
        state.update_by_action(raise(2.0)).unwrap();
        state.update_by_action(call(2.0)).unwrap();
        assert!(state.is_dealer_acting());
        state.start_next_round();
        assert_eq!(state.round(), 1);
        assert_eq!(state.current_actor(), 0);
        assert_eq!(state.allowed_actions(), vec![call(0.0), raise(4.0)]);
        assert_eq!(state.in_pot(), &[3.0, 3.0]);
    }

    #[test]
    fn illegal_action_is_rejected() {
        let def = GameDef::kuhn();
        let mut state = def.initial_state();
        post_blinds(&mut state);
        assert!(state.update_by_action(raise(5.0)).is_err());
    }

    #[test]
    fn pair_beats_high_card_in_leduc() {
        let def = GameDef::leduc();
        // cards: 0,1 = J; 2,3 = Q; 4,5 = K
        let strengths = def.showdown(&[vec![0], vec![5]], &[1]);
        assert!(strengths[0] > strengths[1]);
        let strengths = def.showdown(&[vec![2], vec![4]], &[1]);
        assert!(strengths[1] > strengths[0]);
    }

    #[test]
    fn shares_split_ties_inside_mask() {
        assert_eq!(pot_shares(&[5, 5, 9], 0b011), vec![0.5, 0.5, 0.0]);
        assert_eq!(pot_shares(&[5, 5, 9], 0b111), vec![0.0, 0.0, 1.0]);
        assert_eq!(pot_shares(&[1, 2], 0b01), vec![1.0, 0.0]);
    }

    #[test]
    fn card_names_use_top_ranks() {
        let def = GameDef::leduc();
        assert_eq!(def.card_name(0), "Js");
        assert_eq!(def.card_name(5), "Kh");
        assert_eq!(GameDef::kuhn().card_name(2), "Ks");

        let mut full = GameDef::leduc();
        full.ranks = 13;
        assert_eq!(full.card_name(0), "2s");
        assert_eq!(full.card_name(25), "Ah");
    }

    #[test]
    fn game_def_json_roundtrip() {
        let def = GameDef::leduc();
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("\"public\""));
        let back: GameDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
