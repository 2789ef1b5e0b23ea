// ═══════════════════════════════════════════════════════════════════════
// Battle Runner — runs a complete headless battle with agents
// ═══════════════════════════════════════════════════════════════════════

use std::collections::HashMap;

use combat_agents::{Agent, AgentKind};
use combat_engine::dice::{DiceSource, SeededDice};
use combat_engine::engine;
use combat_engine::history::{Context, HistorySink};
use combat_engine::types::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SimError};

pub const DEFAULT_MAX_DECISIONS: usize = 10_000;

/// Result of a completed battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleResult {
    pub seed: u64,
    pub outcome: WhoWon,
    pub rounds: u32,
    pub decisions: usize,
    pub attackers_left: usize,
    pub defenders_left: usize,
    /// Units that left the battle alive, by side.
    pub attackers_retreated: usize,
    pub defenders_retreated: usize,
}

/// Agents keyed by the player they answer for.
pub type Agents = HashMap<PlayerId, Box<dyn Agent>>;

/// One agent per side of `state`, seeded apart.
pub fn make_agents(state: &BattleState, attacker: AgentKind, defender: AgentKind, seed: u64) -> Agents {
    let mut agents: Agents = HashMap::new();
    agents.insert(state.attacker, attacker.build(seed));
    agents.insert(state.defender, defender.build(seed.wrapping_add(1)));
    agents
}

/// Drops everything. Odds runs play thousands of battles nobody reads.
#[derive(Debug, Default)]
pub struct QuietHistory;

impl HistorySink for QuietHistory {
    fn start_step(&mut self, _name: &str) {}
    fn event(&mut self, _text: &str) {}
}

/// Start `state` and play it to the end, asking `agents` whenever the
/// engine waits on a player.
pub fn run_battle(
    state: &mut BattleState,
    agents: &mut Agents,
    dice: &mut dyn DiceSource,
    history: &mut dyn HistorySink,
    seed: u64,
    max_decisions: usize, // safety limit against battles that never end
) -> Result<BattleResult> {
    let mut ctx = Context::new(dice, history);
    engine::start_battle(state, &mut ctx)?;
    let mut decisions = 0;

    loop {
        engine::advance(state, &mut ctx)?;

        if let Some(outcome) = state.outcome {
            return Ok(build_result(state, seed, outcome, decisions));
        }

        let Some(player) = state.pending.as_ref().map(|p| p.player()) else {
            return Err(SimError::Stuck(state.round));
        };
        let agent = agents.get_mut(&player).ok_or(SimError::MissingAgent(player))?;
        let Some(action) = agent.decide(state) else {
            return Err(SimError::Stuck(state.round));
        };
        debug!(agent = agent.name(), player = %state.player_name(player), ?action, "decision");
        engine::apply_action(state, &mut ctx, action)?;

        decisions += 1;
        if decisions > max_decisions {
            return Err(SimError::DecisionLimit { limit: max_decisions, round: state.round });
        }
    }
}

/// Play a copy of `state` with seeded dice and fresh agents.
pub fn run_seeded(
    state: &BattleState,
    attacker: AgentKind,
    defender: AgentKind,
    seed: u64,
    max_decisions: usize,
) -> Result<BattleResult> {
    let mut state = state.clone();
    let mut agents = make_agents(&state, attacker, defender, seed);
    let mut dice = SeededDice::new(seed);
    let mut history = QuietHistory;
    run_battle(&mut state, &mut agents, &mut dice, &mut history, seed, max_decisions)
}

fn retreated(state: &BattleState, side: Side) -> usize {
    state.retreats.iter().filter(|r| r.side == side).map(|r| r.units.len()).sum()
}

fn build_result(state: &BattleState, seed: u64, outcome: WhoWon, decisions: usize) -> BattleResult {
    BattleResult {
        seed,
        outcome,
        rounds: state.round,
        decisions,
        attackers_left: state.alive(Side::Offense).len(),
        defenders_left: state.alive(Side::Defense).len(),
        attackers_retreated: retreated(state, Side::Offense),
        defenders_retreated: retreated(state, Side::Defense),
    }
}
