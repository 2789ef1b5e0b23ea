// ═══════════════════════════════════════════════════════════════════════
// Agent Trait — interface that all decision makers implement
//
// KEY DESIGN PRINCIPLE:
//   The engine never calls an agent. The driver reads `state.pending`,
//   hands the battle to the agent of the player named there, and feeds
//   the returned Action back through `apply_action()`.
//
//   An agent only answers the two questions a battle can ask:
//     - which units absorb a volley's hits
//     - whether (and where) to retreat or submerge
// ═══════════════════════════════════════════════════════════════════════

use combat_engine::casualty::{CasualtyDetails, CasualtyRequest};
use combat_engine::engine::Action;
use combat_engine::retreat::RetreatRequest;
use combat_engine::types::*;
use serde::{Deserialize, Serialize};

use crate::heuristic::HeuristicAgent;
use crate::random::RandomAgent;

pub trait Agent: Send + Sync {
    /// Human-readable name for this agent (e.g., "Random", "Heuristic").
    fn name(&self) -> &str;

    /// Answer whatever the battle is waiting on. `None` when nothing is pending.
    fn decide(&mut self, state: &BattleState) -> Option<Action> {
        match state.pending.as_ref()? {
            PendingDecision::SelectCasualties(request) => {
                Some(Action::SelectCasualties(self.select_casualties(state, request)))
            }
            PendingDecision::Retreat(request) => Some(Action::Retreat(self.choose_retreat(state, request))),
        }
    }

    // ── Individual decision methods ────────────────────────────────────

    /// Pick the units absorbing `request.hits`. The request carries the
    /// engine's own pick in `default_selection`.
    fn select_casualties(&mut self, state: &BattleState, request: &CasualtyRequest) -> CasualtyDetails;

    /// Pick one of `request.candidates`, or `None` to stay and fight.
    fn choose_retreat(&mut self, state: &BattleState, request: &RetreatRequest) -> Option<TerritoryId>;
}

/// Expected hits per round of a side's alive units.
pub fn side_power(state: &BattleState, side: Side) -> f64 {
    let sides = state.rules.dice_sides.max(1) as f64;
    state
        .alive(side)
        .iter()
        .map(|u| {
            let t = state.type_of(*u);
            (t.strength(side) as u32).min(state.rules.dice_sides) as f64 * t.rolls(side) as f64 / sides
        })
        .sum()
}

/// Agent choice for a side, as named in configs and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Random,
    Heuristic,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::Random, AgentKind::Heuristic];

    pub fn build(self, seed: u64) -> Box<dyn Agent> {
        match self {
            AgentKind::Random => Box::new(RandomAgent::new(seed)),
            AgentKind::Heuristic => Box::new(HeuristicAgent::default()),
        }
    }

    pub fn from_name(name: &str) -> Option<AgentKind> {
        AgentKind::ALL.into_iter().find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Random => "random",
            AgentKind::Heuristic => "heuristic",
        }
    }
}
