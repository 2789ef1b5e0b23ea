// ═══════════════════════════════════════════════════════════════════════
// Odds — many seeded battles of one setup, spread across cores
// ═══════════════════════════════════════════════════════════════════════

use combat_agents::AgentKind;
use combat_engine::types::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::runner::{run_seeded, BattleResult, DEFAULT_MAX_DECISIONS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsConfig {
    pub battles: usize,
    pub seed: u64,
    pub attacker: AgentKind,
    pub defender: AgentKind,
    pub max_decisions: usize,
    pub parallel: bool,
}

impl Default for OddsConfig {
    fn default() -> Self {
        OddsConfig {
            battles: 1000,
            seed: 42,
            attacker: AgentKind::Heuristic,
            defender: AgentKind::Heuristic,
            max_decisions: DEFAULT_MAX_DECISIONS,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsReport {
    pub battles: usize,
    pub attacker_wins: usize,
    pub defender_wins: usize,
    pub draws: usize,
    pub attacker_win_pct: f64,
    pub defender_win_pct: f64,
    pub draw_pct: f64,
    pub average_rounds: f64,
    pub average_attackers_left: f64,
    pub average_defenders_left: f64,
}

impl OddsReport {
    pub fn from_results(results: &[BattleResult]) -> Self {
        let battles = results.len();
        let count = |who: WhoWon| results.iter().filter(|r| r.outcome == who).count();
        let pct = |n: usize| if battles == 0 { 0.0 } else { n as f64 / battles as f64 * 100.0 };

        let (attacker_wins, defender_wins, draws) = (count(WhoWon::Attacker), count(WhoWon::Defender), count(WhoWon::Draw));
        OddsReport {
            battles,
            attacker_wins,
            defender_wins,
            draws,
            attacker_win_pct: pct(attacker_wins),
            defender_win_pct: pct(defender_wins),
            draw_pct: pct(draws),
            average_rounds: mean(results, |r| r.rounds as usize),
            average_attackers_left: mean(results, |r| r.attackers_left),
            average_defenders_left: mean(results, |r| r.defenders_left),
        }
    }
}

fn mean(results: &[BattleResult], f: impl Fn(&BattleResult) -> usize) -> f64 {
    if results.is_empty() {
        0.0
    } else {
        results.iter().map(f).sum::<usize>() as f64 / results.len() as f64
    }
}

/// Play `config.battles` copies of `state`, battle `i` seeded with
/// `config.seed + i`. The report is the same with or without rayon.
pub fn estimate_odds(state: &BattleState, config: &OddsConfig) -> Result<OddsReport> {
    let run_one = |i: usize| {
        let seed = config.seed.wrapping_add(i as u64);
        run_seeded(state, config.attacker, config.defender, seed, config.max_decisions)
    };

    let results: Vec<BattleResult> = if config.parallel {
        (0..config.battles).into_par_iter().map(run_one).collect::<Result<_>>()?
    } else {
        (0..config.battles).map(run_one).collect::<Result<_>>()?
    };

    let report = OddsReport::from_results(&results);
    info!(
        battles = report.battles,
        attacker = report.attacker_win_pct,
        defender = report.defender_win_pct,
        draw = report.draw_pct,
        "odds estimated"
    );
    Ok(report)
}
