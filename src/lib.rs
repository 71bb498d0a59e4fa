//! Flat preorder game trees for small poker games, with walkers, the
//! chance indexer and three solvers: game value, best response and an
//! equilibrium linear program.

pub mod action_tree;
pub mod chance_index;
pub mod chance_tree;
pub mod children_index;
pub mod cli;
pub mod display;
pub mod dual_walker;
pub mod error;
pub mod flat_tree;
pub mod flat_walker;
pub mod game;
pub mod logging;
pub mod lp;
pub mod solver;
pub mod strategy_tree;
pub mod text_dump;
pub mod verify;
pub mod walker;

pub use error::{TreeError, TreeResult};
