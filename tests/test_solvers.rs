//! Solvers on Kuhn and Leduc poker: game values, best responses and the
//! equilibrium linear program, checked against each other.

use approx::assert_abs_diff_eq;
use gto_trees::action_tree::{ActionNode, ActionTree};
use gto_trees::chance_tree::{ChanceNode, ChanceTree};
use gto_trees::flat_tree::FlatTree;
use gto_trees::game::GameDef;
use gto_trees::lp::LpStatus;
use gto_trees::solver::{BestResponse, BestResponseResult, EqLp, GameValue};
use gto_trees::strategy_tree::StrategyTree;
use gto_trees::verify::{check_equilibrium, verify_abs_strategy, verify_chance_tree};
use rand::rngs::StdRng;
use rand::SeedableRng;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Game {
    action: ActionTree,
    chance: ChanceTree,
}

impl Game {
    fn new(def: &GameDef) -> Self {
        Game {
            action: ActionTree::from_game_def(def).unwrap(),
            chance: ChanceTree::from_game_def(def).unwrap(),
        }
    }

    fn skeleton(&self, player: usize) -> StrategyTree {
        let own = self.chance.extract_player(player).unwrap();
        StrategyTree::from_action_and_chance(&self.action, &own).unwrap()
    }

    fn uniform(&self, player: usize) -> StrategyTree {
        let mut s = self.skeleton(player);
        s.set_uniform(player).unwrap();
        s
    }

    fn random(&self, player: usize, seed: u64) -> StrategyTree {
        let mut s = self.skeleton(player);
        s.set_random(player, &mut StdRng::seed_from_u64(seed)).unwrap();
        s
    }

    fn values(&self, strategies: &[&StrategyTree]) -> Vec<f64> {
        GameValue::new(&self.action, &self.chance, strategies)
            .unwrap()
            .solve()
            .unwrap()
    }

    fn best_response(&self, hero: usize, other: &StrategyTree) -> f64 {
        // the hero's slot is ignored
        self.best_response_to(hero, &[other, other]).value
    }

    /// Best response of `hero` to the other entries of `strategies`; the
    /// hero's own entry is ignored.
    fn best_response_to(&self, hero: usize, strategies: &[&StrategyTree]) -> BestResponseResult {
        let opponents: Vec<Option<&StrategyTree>> = strategies
            .iter()
            .enumerate()
            .map(|(p, s)| (p != hero).then_some(*s))
            .collect();
        BestResponse::new(&self.action, &self.chance, &opponents, hero)
            .unwrap()
            .solve()
            .unwrap()
    }
}

fn three_player_kuhn() -> GameDef {
    let mut def = GameDef::kuhn();
    def.players = 3;
    def.ranks = 4;
    def.blinds = vec![1.0; 3];
    def
}

// ---------------------------------------------------------------------------
// Minimal trees
// ---------------------------------------------------------------------------

#[test]
fn single_leaf_game_pays_the_pot_share() {
    let mut atree = FlatTree::<ActionNode>::create(2).unwrap();
    let root = ActionNode {
        position: 1,
        amount: 0.0,
        round: -1,
        active_players: 1,
    };
    atree.set(0, 0, root).unwrap();
    let stake = ActionNode {
        position: 0,
        amount: 3.0,
        round: 0,
        active_players: 1,
    };
    atree.set(1, 1, stake).unwrap();
    let action = ActionTree::new(atree, 1, 1).unwrap();

    let mut ctree = FlatTree::<ChanceNode>::create(2).unwrap();
    ctree
        .set(0, 0, ChanceNode { position: 1, card: -1, probab: 1.0 })
        .unwrap();
    ctree
        .set(1, 1, ChanceNode { position: 0, card: 0, probab: 1.0 })
        .unwrap();
    let mut chance = ChanceTree::new(ctree, 1, 1, 1).unwrap();
    chance.set_pot_shares(1, 1, &[1.0]).unwrap();
    verify_chance_tree(&chance, 0.0).unwrap();

    let own = chance.extract_player(0).unwrap();
    let mut strategy = StrategyTree::from_action_and_chance(&action, &own).unwrap();
    strategy.set_uniform(0).unwrap();
    let values = GameValue::new(&action, &chance, &[&strategy])
        .unwrap()
        .solve()
        .unwrap();
    // wins back the whole pot it paid in
    assert_eq!(values, vec![0.0]);
}

// ---------------------------------------------------------------------------
// Tree invariants
// ---------------------------------------------------------------------------

#[test]
fn chance_probabilities_are_conserved() {
    for def in [GameDef::kuhn(), GameDef::leduc()] {
        let chance = ChanceTree::from_game_def(&def).unwrap();
        verify_chance_tree(&chance, 1e-12).unwrap();
    }
}

#[test]
fn every_deal_level_carries_probability_one() {
    for def in [GameDef::kuhn(), GameDef::leduc(), three_player_kuhn()] {
        let chance = ChanceTree::from_game_def(&def).unwrap();
        for depth in 1..=chance.full_depth() {
            let level: f64 = (0..chance.len())
                .filter(|&i| chance.depth(i) == depth)
                .map(|i| chance.node(i).probab)
                .sum();
            assert_abs_diff_eq!(level, 1.0, epsilon = 1e-12);
        }
        verify_chance_tree(&chance, 1e-12).unwrap();
    }
    let kuhn = ChanceTree::from_game_def(&GameDef::kuhn()).unwrap();
    assert_eq!(kuhn.len(), 10);
}

#[test]
fn filled_strategies_are_normalised() {
    let game = Game::new(&GameDef::leduc());
    for p in 0..2 {
        verify_abs_strategy(&game.uniform(p), p, 1e-12).unwrap();
        verify_abs_strategy(&game.random(p, 40 + p as u64), p, 1e-12).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Best response
// ---------------------------------------------------------------------------

#[test]
fn best_response_is_never_beaten() {
    for def in [GameDef::kuhn(), GameDef::leduc()] {
        let game = Game::new(&def);
        for hero in 0..2 {
            let other = game.random(1 - hero, 7);
            let br = game.best_response(hero, &other);
            for seed in 0..5 {
                let mine = game.random(hero, 100 + seed);
                let pair = if hero == 0 { [&mine, &other] } else { [&other, &mine] };
                let value = game.values(&pair)[hero];
                assert!(br >= value - 1e-9, "{}: hero {} seed {}", def.name, hero, seed);
            }
        }
    }
}

#[test]
fn three_player_best_responses_replay_to_their_value() {
    let game = Game::new(&three_player_kuhn());
    let uniform: Vec<StrategyTree> = (0..3).map(|p| game.uniform(p)).collect();
    let refs: Vec<&StrategyTree> = uniform.iter().collect();
    let values = game.values(&refs);
    assert_eq!(values.len(), 3);
    assert_abs_diff_eq!(values.iter().sum::<f64>(), 0.0, epsilon = 1e-9);

    for hero in 0..3 {
        let br = game.best_response_to(hero, &refs);
        assert!(br.value >= values[hero] - 1e-9, "hero {}", hero);
        verify_abs_strategy(&br.strategy, hero, 1e-12).unwrap();

        let mut replay = refs.clone();
        replay[hero] = &br.strategy;
        let replayed = game.values(&replay);
        assert_abs_diff_eq!(replayed[hero], br.value, epsilon = 1e-9);
        assert_abs_diff_eq!(replayed.iter().sum::<f64>(), 0.0, epsilon = 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Equilibrium
// ---------------------------------------------------------------------------

#[test]
fn kuhn_equilibrium_is_consistent() {
    let game = Game::new(&GameDef::kuhn());
    let first = EqLp::new(&game.action, &game.chance, 0).unwrap().solve().unwrap();
    let second = EqLp::new(&game.action, &game.chance, 1).unwrap().solve().unwrap();
    assert_eq!(first.status, LpStatus::Optimal);
    assert_eq!(second.status, LpStatus::Optimal);
    assert_abs_diff_eq!(first.value, -1.0 / 18.0, epsilon = 1e-7);
    assert_abs_diff_eq!(first.value + second.value, 0.0, epsilon = 1e-7);

    let (s0, s1) = (first.strategy.unwrap(), second.strategy.unwrap());
    verify_abs_strategy(&s0, 0, 1e-7).unwrap();
    verify_abs_strategy(&s1, 1, 1e-7).unwrap();

    let values = game.values(&[&s0, &s1]);
    assert_abs_diff_eq!(values[0], -1.0 / 18.0, epsilon = 1e-7);
    assert_abs_diff_eq!(values[0] + values[1], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(game.best_response(0, &s1), values[0], epsilon = 1e-7);
    assert_abs_diff_eq!(game.best_response(1, &s0), values[1], epsilon = 1e-7);

    let report = check_equilibrium(&game.action, &game.chance, &[&s0, &s1]).unwrap();
    assert!(report.is_equilibrium(1e-7));
}

#[test]
fn uniform_leduc_is_exploitable_by_both_players() {
    let game = Game::new(&GameDef::leduc());
    let (u0, u1) = (game.uniform(0), game.uniform(1));
    let report = check_equilibrium(&game.action, &game.chance, &[&u0, &u1]).unwrap();
    assert!(report.zero_sum_error() < 1e-9);
    for gain in report.gains() {
        assert!(gain > 1e-3);
    }
}
