// ═══════════════════════════════════════════════════════════════════════
// Heuristic Agent — makes decisions using simple strength estimates.
// Significantly stronger than RandomAgent.
// ═══════════════════════════════════════════════════════════════════════

use crate::agent::{side_power, Agent};
use combat_engine::casualty::{CasualtyDetails, CasualtyRequest};
use combat_engine::retreat::{RetreatKind, RetreatRequest};
use combat_engine::types::*;
use tracing::debug;

pub struct HeuristicAgent {
    /// Retreat once our expected hits per round drop below this share of
    /// the enemy's.
    retreat_ratio: f64,
}

impl Default for HeuristicAgent {
    fn default() -> Self {
        HeuristicAgent { retreat_ratio: 0.5 }
    }
}

impl HeuristicAgent {
    pub fn new(retreat_ratio: f64) -> Self {
        HeuristicAgent { retreat_ratio: retreat_ratio.max(0.0) }
    }

    fn outmatched(&self, state: &BattleState, side: Side) -> bool {
        let ours = side_power(state, side);
        let theirs = side_power(state, side.opposite());
        theirs > 0.0 && ours < theirs * self.retreat_ratio
    }
}

impl Agent for HeuristicAgent {
    fn name(&self) -> &str {
        "Heuristic"
    }

    /// The engine's pick already loses the weakest, cheapest units first
    /// and soaks hits on spare hit points.
    fn select_casualties(&mut self, _state: &BattleState, request: &CasualtyRequest) -> CasualtyDetails {
        request.default_selection.clone()
    }

    fn choose_retreat(&mut self, state: &BattleState, request: &RetreatRequest) -> Option<TerritoryId> {
        let leave = match request.kind {
            // subs are worth keeping whenever the fight turns
            RetreatKind::Subs => self.outmatched(state, request.side) || side_power(state, request.side) == 0.0,
            // planes escorting a landing only leave a lost cause
            RetreatKind::AirAmphibious => side_power(state, request.side) < side_power(state, request.side.opposite()) * 0.25,
            RetreatKind::PartialAmphibious | RetreatKind::FullForce => self.outmatched(state, request.side),
        };
        if !leave {
            return None;
        }
        // a real territory beats staying in the sea zone
        let choice = request
            .candidates
            .iter()
            .copied()
            .find(|t| *t != state.site)
            .or_else(|| request.candidates.first().copied());
        debug!(prompt = %request.prompt, ?choice, "heuristic retreat");
        choice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use combat_engine::setup::{Scenario, UnitTypeSpec};

    fn request(state: &BattleState, candidates: Vec<TerritoryId>) -> RetreatRequest {
        RetreatRequest {
            player: state.attacker,
            side: Side::Offense,
            kind: RetreatKind::FullForce,
            step_name: "Russians withdraw".into(),
            prompt: "Russians retreat?".into(),
            units: state.alive(Side::Offense),
            candidates,
            submerge_only: false,
        }
    }

    fn battle(attackers: u32, defenders: u32) -> BattleState {
        Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec::new("tank", 3, 3))
            .attack_from("Archangel", false)
            .attacking("tank", attackers)
            .defending("tank", defenders)
            .into_state()
            .unwrap()
    }

    #[test]
    fn test_stays_when_even() {
        let state = battle(3, 3);
        let archangel = state.find_territory("Archangel").unwrap();
        let mut agent = HeuristicAgent::default();
        assert_eq!(agent.choose_retreat(&state, &request(&state, vec![archangel])), None);
    }

    #[test]
    fn test_leaves_when_outmatched() {
        let state = battle(1, 4);
        let archangel = state.find_territory("Archangel").unwrap();
        let mut agent = HeuristicAgent::default();
        assert_eq!(agent.choose_retreat(&state, &request(&state, vec![state.site, archangel])), Some(archangel));
    }

    #[test]
    fn test_decide_uses_pending() {
        let mut state = battle(1, 4);
        let mut agent = HeuristicAgent::default();
        assert_eq!(agent.decide(&state), None);

        let archangel = state.find_territory("Archangel").unwrap();
        state.pending = Some(PendingDecision::Retreat(request(&state, vec![archangel])));
        assert_eq!(agent.decide(&state), Some(combat_engine::engine::Action::Retreat(Some(archangel))));
    }
}
