// ═══════════════════════════════════════════════════════════════════════
// Runner — CLI entry point for single battles, odds runs and their history
// ═══════════════════════════════════════════════════════════════════════

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use combat_agents::AgentKind;
use combat_engine::dice::SeededDice;
use combat_engine::engine::save_state;
use combat_engine::history::{HistoryEntry, RecordingHistory};
use combat_engine::setup::Scenario;
use combat_engine::types::*;
use combat_sim::{estimate_odds, make_agents, run_battle, Database, OddsConfig, OddsReport, DEFAULT_MAX_DECISIONS};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "combat-runner", about = "Turn-based battle resolution lab")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fight one battle from a scenario file
    Battle {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Agent type for the attacker: "random" or "heuristic"
        #[arg(short, long, default_value = "heuristic")]
        attacker: String,
        /// Agent type for the defender: "random" or "heuristic"
        #[arg(short, long, default_value = "heuristic")]
        defender: String,
        /// Print every step and event of the battle
        #[arg(short, long)]
        log: bool,
        /// Write the finished battle state as JSON
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Estimate win odds over many seeded battles
    Odds {
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(short, long, default_value_t = 1000)]
        battles: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(short, long, default_value = "heuristic")]
        attacker: String,
        #[arg(short, long, default_value = "heuristic")]
        defender: String,
        /// Run on one thread
        #[arg(long)]
        sequential: bool,
        /// Also store the batch in this database
        #[arg(long)]
        db: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show stored odds batches
    History {
        #[arg(long, default_value = "results.db")]
        db: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("combat=info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Battle { scenario, seed, attacker, defender, log, save } => {
            cmd_battle(&scenario, seed, &attacker, &defender, log, save.as_deref())
        }
        Commands::Odds { scenario, battles, seed, attacker, defender, sequential, db, json } => {
            let config = OddsConfig { battles, seed, parallel: !sequential, ..OddsConfig::default() };
            cmd_odds(&scenario, config, &attacker, &defender, db.as_deref(), json)
        }
        Commands::History { db, limit } => cmd_history(&db, limit),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn agent_kind(name: &str) -> Result<AgentKind, String> {
    AgentKind::from_name(name).ok_or_else(|| format!("unknown agent type {:?} (use random or heuristic)", name))
}

fn load(path: &Path) -> Result<BattleState, Box<dyn std::error::Error>> {
    Ok(Scenario::from_file(path)?.into_state()?)
}

fn cmd_battle(path: &Path, seed: u64, attacker: &str, defender: &str, log: bool, save: Option<&Path>) -> CliResult {
    let mut state = load(path)?;
    let mut agents = make_agents(&state, agent_kind(attacker)?, agent_kind(defender)?, seed);
    let mut dice = SeededDice::new(seed);
    let mut history = RecordingHistory::default();

    println!("=== Battle for {} (seed {}) ===\n", state.battle_site().name, seed);
    let result = run_battle(&mut state, &mut agents, &mut dice, &mut history, seed, DEFAULT_MAX_DECISIONS)?;

    if log {
        for entry in &history.entries {
            match entry {
                HistoryEntry::Step(name) => println!("{}", name),
                HistoryEntry::Event(text) => println!("    {}", text),
            }
        }
        println!();
    }

    let winner = match result.outcome {
        WhoWon::Attacker => state.player_name(state.attacker).to_string(),
        WhoWon::Defender => state.player_name(state.defender).to_string(),
        WhoWon::Draw => "nobody (draw)".to_string(),
    };
    println!("Battle finished!");
    println!("  Winner: {}", winner);
    println!("  Rounds: {}", result.rounds);
    println!("  Decisions: {}", result.decisions);
    for side in Side::ALL {
        let alive = state.alive(side);
        println!(
            "  {:10} -- {} left{}",
            state.player_name(state.player_for(side)),
            alive.len(),
            if alive.is_empty() { String::new() } else { format!(": {}", state.unit_names(&alive)) }
        );
    }

    if let Some(out) = save {
        std::fs::write(out, save_state(&state)?)?;
        println!("\nState saved to: {}", out.display());
    }
    Ok(())
}

fn cmd_odds(
    path: &Path,
    mut config: OddsConfig,
    attacker: &str,
    defender: &str,
    db_path: Option<&str>,
    json: bool,
) -> CliResult {
    let state = load(path)?;
    config.attacker = agent_kind(attacker)?;
    config.defender = agent_kind(defender)?;

    let report = estimate_odds(&state, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return store(db_path, path, &config, &report);
    }

    println!("=== Odds: {} battles for {} ===\n", config.battles, state.battle_site().name);

    println!("  {:10}: {:>6} wins ({:.1}%)", state.player_name(state.attacker), report.attacker_wins, report.attacker_win_pct);
    println!("  {:10}: {:>6} wins ({:.1}%)", state.player_name(state.defender), report.defender_wins, report.defender_win_pct);
    println!("  {:10}: {:>6}      ({:.1}%)", "draws", report.draws, report.draw_pct);
    println!();
    println!("  Average rounds:         {:.2}", report.average_rounds);
    println!("  Average attackers left: {:.2}", report.average_attackers_left);
    println!("  Average defenders left: {:.2}", report.average_defenders_left);

    store(db_path, path, &config, &report)
}

fn store(db_path: Option<&str>, scenario: &Path, config: &OddsConfig, report: &OddsReport) -> CliResult {
    let Some(db_path) = db_path else { return Ok(()) };
    let db = Database::new(db_path)?;
    db.store_batch(&scenario.display().to_string(), config, report)?;
    eprintln!("Results saved to: {} ({} batches)", db_path, db.batch_count()?);
    Ok(())
}

fn cmd_history(db_path: &str, limit: usize) -> CliResult {
    let db = Database::new(db_path)?;
    let batches = db.recent_batches(limit)?;
    if batches.is_empty() {
        println!("No batches found. Run `odds --db {}` first.", db_path);
        return Ok(());
    }
    println!("=== Recent odds batches ===\n");
    println!(
        "{:<5} {:<24} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Id", "Scenario", "Battles", "Att %", "Def %", "Draw %", "Rounds"
    );
    println!("{}", "-".repeat(75));
    for b in &batches {
        println!(
            "{:<5} {:<24} {:>8} {:>8.1} {:>8.1} {:>8.1} {:>8.2}",
            b.id,
            b.scenario,
            b.report.battles,
            b.report.attacker_win_pct,
            b.report.defender_win_pct,
            b.report.draw_pct,
            b.report.average_rounds
        );
    }
    Ok(())
}
