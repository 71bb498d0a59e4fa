use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::action_tree::{ActionNode, ActionTree};
use crate::chance_tree::{ChanceNode, ChanceTree};
use crate::children_index::{ChildrenIndex, IndexedTree};
use crate::display::{
    equilibrium_table, lp_status, print_error, print_section, print_success, styled_value,
    tree_info_table, values_table,
};
use crate::error::{TreeError, TreeResult};
use crate::flat_tree::{FlatNode, StreamedTree};
use crate::game::GameDef;
use crate::logging;
use crate::solver::{BestResponse, EqLp, GameValue};
use crate::strategy_tree::{StrategyNode, StrategyTree};
use crate::verify::{check_equilibrium, verify_abs_strategy, verify_chance_tree};
use crate::walker::tree_stats;

#[derive(Parser)]
#[command(
    name = "gtt",
    version,
    about = "Flat game trees for small poker games: build, inspect, verify and solve."
)]
struct Cli {
    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TreeKind {
    Action,
    Chance,
    Strategy,
}

impl TreeKind {
    fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Action => "action",
            TreeKind::Chance => "chance",
            TreeKind::Strategy => "strategy",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the action tree, the chance tree and every player's chance tree
    Build {
        /// Preset name (kuhn, leduc) or path to a JSON game definition
        #[arg(short, long, default_value = "kuhn")]
        game: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Also write a strategy per player: uniform, or random with --seed
        #[arg(long)]
        strategies: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Header and shape of a tree file, read without loading it
    Info {
        file: PathBuf,
        #[arg(short, long)]
        kind: TreeKind,
        /// Cache the children index next to the file
        #[arg(long)]
        index: bool,
    },
    /// Text dump of a chance or strategy tree
    Dump {
        file: PathBuf,
        #[arg(short, long)]
        kind: TreeKind,
    },
    /// Check chance trees, strategies and, with a full set of strategies,
    /// how far they are from an equilibrium
    Verify {
        #[arg(short, long, default_value = "kuhn")]
        game: String,
        /// Strategy files in player order
        #[arg(short, long)]
        strategy: Vec<PathBuf>,
        #[arg(long, default_value_t = 1e-9)]
        epsilon: f64,
    },
    /// Run a solver
    Solve {
        #[command(subcommand)]
        solver: SolverCommands,
    },
}

#[derive(Subcommand)]
enum SolverCommands {
    /// Value of every player under fixed strategies (uniform if none given)
    GameValue {
        #[arg(short, long, default_value = "kuhn")]
        game: String,
        #[arg(short, long)]
        strategy: Vec<PathBuf>,
    },
    /// Best response of one player against the others' strategies
    BestResponse {
        #[arg(short, long, default_value = "kuhn")]
        game: String,
        #[arg(long, default_value_t = 0)]
        hero: usize,
        /// Strategy files in player order; the hero's entry is ignored
        #[arg(short, long)]
        strategy: Vec<PathBuf>,
        /// Write the best response strategy here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Equilibrium of a two-player game by linear programming
    Equilibrium {
        #[arg(short, long, default_value = "kuhn")]
        game: String,
        /// Directory for the equilibrium strategies
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 1e-6)]
        epsilon: f64,
    },
}

pub fn run() {
    let cli = Cli::parse();
    logging::init(logging::level_for(cli.verbose, cli.quiet));
    if let Err(e) = dispatch(cli) {
        print_error(&e.to_string());
        process::exit(1);
    }
}

pub fn run_with_args(args: Vec<String>) -> TreeResult<()> {
    dispatch(Cli::parse_from(args))
}

fn dispatch(cli: Cli) -> TreeResult<()> {
    let json = cli.json;
    match cli.command {
        Commands::Build {
            game,
            out,
            strategies,
            seed,
        } => cmd_build(&game, &out, strategies, seed),
        Commands::Info { file, kind, index } => match kind {
            TreeKind::Action => cmd_info::<ActionNode>(&file, kind, index, json),
            TreeKind::Chance => cmd_info::<ChanceNode>(&file, kind, index, json),
            TreeKind::Strategy => cmd_info::<StrategyNode>(&file, kind, index, json),
        },
        Commands::Dump { file, kind } => cmd_dump(&file, kind),
        Commands::Verify {
            game,
            strategy,
            epsilon,
        } => cmd_verify(&game, &strategy, epsilon, json),
        Commands::Solve { solver } => match solver {
            SolverCommands::GameValue { game, strategy } => cmd_game_value(&game, &strategy, json),
            SolverCommands::BestResponse {
                game,
                hero,
                strategy,
                out,
            } => cmd_best_response(&game, hero, &strategy, out.as_deref(), json),
            SolverCommands::Equilibrium { game, out, epsilon } => {
                cmd_equilibrium(&game, out.as_deref(), epsilon, json)
            }
        },
    }
}

fn print_json(value: &serde_json::Value) -> TreeResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_trees(game: &str) -> TreeResult<(GameDef, ActionTree, ChanceTree)> {
    let def = GameDef::load(game)?;
    let action = ActionTree::from_game_def(&def)?;
    let chance = ChanceTree::from_game_def(&def)?;
    log::info!(
        "{}: {} action nodes, {} chance nodes",
        def.name,
        action.len(),
        chance.len()
    );
    Ok((def, action, chance))
}

/// Load one strategy per player, or uniform strategies when none are given.
fn load_strategies(
    paths: &[PathBuf],
    action: &ActionTree,
    chance: &ChanceTree,
) -> TreeResult<Vec<StrategyTree>> {
    let players = chance.players();
    if paths.is_empty() {
        return (0..players)
            .map(|p| -> TreeResult<StrategyTree> {
                let mut s =
                    StrategyTree::from_action_and_chance(action, &chance.extract_player(p)?)?;
                s.set_uniform(p)?;
                Ok(s)
            })
            .collect();
    }
    if paths.len() != players {
        return Err(TreeError::InvalidArgument(format!(
            "{} strategy files for {} players",
            paths.len(),
            players
        )));
    }
    paths.iter().map(|p| StrategyTree::load(p)).collect()
}

fn cmd_build(game: &str, out: &Path, strategies: bool, seed: Option<u64>) -> TreeResult<()> {
    let (def, action, chance) = build_trees(game)?;
    std::fs::create_dir_all(out)?;
    let file = |suffix: String| out.join(format!("{}.{}", def.name, suffix));

    action.save(&file("action".to_string()))?;
    chance.save(&file("chance".to_string()))?;
    let mut rng = seed.map(StdRng::seed_from_u64);
    for p in 0..def.players {
        let own = chance.extract_player(p)?;
        own.save(&file(format!("chance.p{}", p)))?;
        if strategies {
            let mut s = StrategyTree::from_action_and_chance(&action, &own)?;
            match rng.as_mut() {
                Some(rng) => s.set_random(p, rng)?,
                None => s.set_uniform(p)?,
            }
            s.save(&file(format!("strategy.p{}", p)))?;
        }
    }
    print_success(&format!(
        "wrote {} trees ({} action nodes, {} chance nodes) to {}",
        def.name,
        action.len(),
        chance.len(),
        out.display()
    ));
    Ok(())
}

fn cmd_info<N: FlatNode>(file: &Path, kind: TreeKind, cache: bool, json: bool) -> TreeResult<()> {
    let tree = StreamedTree::<N>::open(file)?;
    let index = if cache {
        let side = PathBuf::from(format!("{}.idx", file.display()));
        ChildrenIndex::load_or_build(&tree, tree.version(), &side, false)?
    } else {
        ChildrenIndex::build(&tree)?
    };
    let stats = tree_stats(&IndexedTree::new(&tree, &index), 0);
    if json {
        return print_json(&json!({
            "kind": kind.as_str(),
            "version": tree.version().to_string(),
            "nodes": stats.nodes,
            "leaves": stats.leaves,
            "max_depth": stats.max_depth,
        }));
    }
    println!("{}", tree_info_table(kind.as_str(), tree.version(), &stats));
    Ok(())
}

fn cmd_dump(file: &Path, kind: TreeKind) -> TreeResult<()> {
    let stdout = io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    match kind {
        TreeKind::Chance => ChanceTree::load(file)?.to_txt(&mut w)?,
        TreeKind::Strategy => StrategyTree::load(file)?.to_txt(&mut w)?,
        TreeKind::Action => {
            return Err(TreeError::InvalidArgument(
                "text dumps exist for chance and strategy trees".to_string(),
            ))
        }
    }
    w.flush()?;
    Ok(())
}

fn cmd_verify(game: &str, paths: &[PathBuf], epsilon: f64, json: bool) -> TreeResult<()> {
    let (def, action, chance) = build_trees(game)?;
    verify_chance_tree(&chance, epsilon)?;
    for p in 0..def.players {
        verify_chance_tree(&chance.extract_player(p)?, epsilon)?;
    }
    if paths.is_empty() {
        if json {
            return print_json(&json!({ "game": def.name, "chance": "ok" }));
        }
        print_success(&format!("{}: chance trees are consistent", def.name));
        return Ok(());
    }

    let strategies = load_strategies(paths, &action, &chance)?;
    for (p, s) in strategies.iter().enumerate() {
        verify_abs_strategy(s, p, epsilon)?;
    }
    let refs: Vec<&StrategyTree> = strategies.iter().collect();
    let report = check_equilibrium(&action, &chance, &refs)?;
    if json {
        return print_json(&json!({
            "game": def.name,
            "chance": "ok",
            "strategies": "ok",
            "report": report,
            "exploitability": report.exploitability(),
        }));
    }
    print_success(&format!("{}: chance trees and strategies are consistent", def.name));
    print_section("Equilibrium check", &equilibrium_table(&report, epsilon));
    Ok(())
}

fn cmd_game_value(game: &str, paths: &[PathBuf], json: bool) -> TreeResult<()> {
    let (def, action, chance) = build_trees(game)?;
    let strategies = load_strategies(paths, &action, &chance)?;
    let refs: Vec<&StrategyTree> = strategies.iter().collect();
    let values = GameValue::new(&action, &chance, &refs)?.solve()?;
    if json {
        return print_json(&json!({ "game": def.name, "values": values }));
    }
    print_section(&format!("Game value: {}", def.name), &values_table("Value", &values));
    Ok(())
}

fn cmd_best_response(
    game: &str,
    hero: usize,
    paths: &[PathBuf],
    out: Option<&Path>,
    json: bool,
) -> TreeResult<()> {
    let (def, action, chance) = build_trees(game)?;
    let strategies = load_strategies(paths, &action, &chance)?;
    let opponents: Vec<Option<&StrategyTree>> = strategies
        .iter()
        .enumerate()
        .map(|(p, s)| (p != hero).then_some(s))
        .collect();
    let result = BestResponse::new(&action, &chance, &opponents, hero)?.solve()?;
    if let Some(path) = out {
        result.strategy.save(path)?;
    }
    if json {
        return print_json(&json!({ "game": def.name, "hero": hero, "value": result.value }));
    }
    println!(
        "Best response of player {} in {}: {}",
        hero,
        def.name,
        styled_value(result.value)
    );
    Ok(())
}

fn cmd_equilibrium(game: &str, out: Option<&Path>, epsilon: f64, json: bool) -> TreeResult<()> {
    let (def, action, chance) = build_trees(game)?;
    let mut statuses = Vec::new();
    let mut values = Vec::new();
    let mut strategies = Vec::new();
    for hero in 0..chance.players() {
        let result = EqLp::new(&action, &chance, hero)?.solve()?;
        statuses.push(result.status);
        values.push(result.value);
        if let Some(s) = result.strategy {
            strategies.push(s);
        }
    }
    if strategies.len() != chance.players() {
        if json {
            return print_json(&json!({ "game": def.name, "status": statuses }));
        }
        let shown: Vec<String> = statuses.iter().map(|&s| lp_status(s)).collect();
        println!("Equilibrium LP for {}: {}", def.name, shown.join(", "));
        return Ok(());
    }

    if let Some(dir) = out {
        std::fs::create_dir_all(dir)?;
        for (p, s) in strategies.iter().enumerate() {
            s.save(&dir.join(format!("{}.eq.p{}", def.name, p)))?;
        }
    }
    let refs: Vec<&StrategyTree> = strategies.iter().collect();
    let report = check_equilibrium(&action, &chance, &refs)?;
    if json {
        return print_json(&json!({
            "game": def.name,
            "status": statuses,
            "values": values,
            "report": report,
            "exploitability": report.exploitability(),
        }));
    }
    print_section(
        &format!("Equilibrium values: {}", def.name),
        &values_table("LP value", &values),
    );
    print_section("Check", &equilibrium_table(&report, epsilon));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn build_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        run_with_args(args(&["gtt", "build", "-g", "kuhn", "-o", out, "--strategies"])).unwrap();
        for name in ["kuhn.action", "kuhn.chance", "kuhn.chance.p1", "kuhn.strategy.p0"] {
            assert!(dir.path().join(name).exists(), "{}", name);
        }

        let chance = dir.path().join("kuhn.chance");
        let chance = chance.to_str().unwrap();
        run_with_args(args(&["gtt", "info", chance, "-k", "chance", "--index"])).unwrap();
        assert!(dir.path().join("kuhn.chance.idx").exists());

        let s0 = dir.path().join("kuhn.strategy.p0");
        let s1 = dir.path().join("kuhn.strategy.p1");
        run_with_args(args(&[
            "gtt",
            "--json",
            "verify",
            "-s",
            s0.to_str().unwrap(),
            "-s",
            s1.to_str().unwrap(),
        ]))
        .unwrap();
    }

    #[test]
    fn action_trees_have_no_text_dump() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        run_with_args(args(&["gtt", "build", "-o", out])).unwrap();
        let file = dir.path().join("kuhn.action");
        let err = run_with_args(args(&["gtt", "dump", file.to_str().unwrap(), "-k", "action"]));
        assert!(matches!(err, Err(TreeError::InvalidArgument(_))));
    }

    #[test]
    fn wrong_strategy_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none");
        let err = run_with_args(args(&[
            "gtt",
            "solve",
            "game-value",
            "-s",
            missing.to_str().unwrap(),
        ]));
        assert!(matches!(err, Err(TreeError::InvalidArgument(_))));
    }
}
