// ═══════════════════════════════════════════════════════════════════════
// Retreats — who may leave, where to, and submerge-vs-retreat handling
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CombatError, Result};
use crate::history::HistorySink;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetreatKind {
    /// Evading units (submarines).
    Subs,
    /// Air units leaving an amphibious assault.
    AirAmphibious,
    /// Units that did not land from the sea; air retreats in place.
    PartialAmphibious,
    /// The whole attacking force.
    FullForce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetreatRequest {
    pub player: PlayerId,
    pub side: Side,
    pub kind: RetreatKind,
    pub step_name: String,
    pub prompt: String,
    pub units: Vec<UnitId>,
    /// Legal destinations. The battle site itself means "submerge".
    pub candidates: Vec<TerritoryId>,
    /// Submerging in place is the only possible move.
    pub submerge_only: bool,
}

/// Outcome of a chosen destination, before it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetreatPlan {
    pub submerge: Vec<UnitId>,
    pub moves: Vec<(TerritoryId, Vec<UnitId>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retreater {
    pub kind: RetreatKind,
    pub side: Side,
}

impl Retreater {
    pub fn new(kind: RetreatKind, side: Side) -> Self {
        Retreater { kind, side }
    }

    pub fn retreat_units(&self, state: &BattleState) -> Vec<UnitId> {
        let alive = state.alive(self.side);
        let keep = |u: &UnitId| {
            let t = state.type_of(*u);
            match self.kind {
                RetreatKind::Subs => t.can_evade,
                RetreatKind::AirAmphibious => t.is_air,
                RetreatKind::PartialAmphibious => !state.unit(*u).was_amphibious,
                RetreatKind::FullForce => true,
            }
        };
        alive.into_iter().filter(keep).collect()
    }

    pub fn possible_sites(&self, state: &BattleState, units: &[UnitId]) -> Vec<TerritoryId> {
        let territories = state.retreat_territories(self.side);
        match self.kind {
            RetreatKind::Subs => {
                let submerge = can_submerge(state, self.side);
                if submerge && territories.is_empty() {
                    vec![state.site]
                } else {
                    let mut sites = territories;
                    if submerge {
                        sites.push(state.site);
                    }
                    sites
                }
            }
            RetreatKind::AirAmphibious => vec![state.site],
            RetreatKind::PartialAmphibious => {
                let has_land = units.iter().any(|u| state.type_of(*u).is_land());
                territories
                    .into_iter()
                    .filter(|t| !has_land || !state.territory(*t).is_water)
                    .collect()
            }
            RetreatKind::FullForce => {
                let mut sites = Vec::new();
                if !(state.rules.transport_casualties_restricted && only_defenseless_transports(state, self.side.opposite())) {
                    sites = territories;
                }
                if state.battle_site().is_water && units.iter().any(|u| state.type_of(*u).is_air) {
                    sites.push(state.site);
                }
                sites
            }
        }
    }

    /// Split the retreating units for a chosen destination.
    pub fn split(&self, state: &BattleState, units: &[UnitId], to: TerritoryId) -> RetreatPlan {
        let mut plan = RetreatPlan::default();
        let (air, rest): (Vec<UnitId>, Vec<UnitId>) =
            units.iter().copied().partition(|u| state.type_of(*u).is_air);
        match self.kind {
            RetreatKind::Subs if to == state.site => plan.submerge = units.to_vec(),
            RetreatKind::Subs => plan.moves.push((to, units.to_vec())),
            RetreatKind::AirAmphibious => plan.moves.push((state.site, units.to_vec())),
            RetreatKind::PartialAmphibious => {
                if !air.is_empty() {
                    plan.moves.push((state.site, air));
                }
                if !rest.is_empty() {
                    plan.moves.push((to, rest));
                }
            }
            // picking the sea zone itself only lets the planes go
            RetreatKind::FullForce if to == state.site => plan.moves.push((state.site, air)),
            RetreatKind::FullForce => plan.moves.push((to, units.to_vec())),
        }
        plan
    }
}

/// Whether evaders of `side` may dive in place instead of leaving.
pub fn can_submerge(state: &BattleState, side: Side) -> bool {
    state.rules.submersible_subs
        || (side == Side::Defense && state.rules.submarines_defending_may_submerge_or_retreat)
}

pub fn only_defenseless_transports(state: &BattleState, side: Side) -> bool {
    let alive = state.alive(side);
    !alive.is_empty() && alive.iter().all(|u| state.type_of(*u).is_defenseless_transport())
}

fn has_evaders(state: &BattleState, side: Side) -> bool {
    state.any_unit(side, &[Status::Alive], |t| t.can_evade)
}

fn enemy_destroyer(state: &BattleState, side: Side) -> bool {
    state.any_unit(side.opposite(), &Status::ALL, |t| t.is_destroyer)
}

// ── Step names ─────────────────────────────────────────────────────────

pub fn offensive_subs_retreat_named(state: &BattleState) -> bool {
    has_evaders(state, Side::Offense)
        && !state.is_amphibious
        && !(state.rules.transport_casualties_restricted && only_defenseless_transports(state, Side::Defense))
        && (state.rules.submersible_subs || !state.retreat_territories(Side::Offense).is_empty())
}

pub fn defensive_subs_retreat_named(state: &BattleState) -> bool {
    has_evaders(state, Side::Defense)
        && (can_submerge(state, Side::Defense) || !state.retreat_territories(Side::Defense).is_empty())
}

fn planes_may_leave_amphibious(state: &BattleState) -> bool {
    let rules = &state.rules;
    (rules.ww2v2 || rules.attacker_retreat_planes || rules.partial_amphibious_retreat)
        && state.any_unit(Side::Offense, &[Status::Alive], |t| t.is_air)
}

fn partial_amphibious_applies(state: &BattleState) -> bool {
    state.rules.partial_amphibious_retreat
        && state
            .alive(Side::Offense)
            .iter()
            .any(|u| !state.unit(*u).was_amphibious && !state.type_of(*u).is_air)
}

fn general_retreater(state: &BattleState) -> Option<Retreater> {
    if state.is_amphibious {
        let partial = Retreater::new(RetreatKind::PartialAmphibious, Side::Offense);
        // with nowhere for the ground units to go, the planes may still leave
        if partial_amphibious_applies(state) && !partial.possible_sites(state, &partial.retreat_units(state)).is_empty() {
            Some(partial)
        } else if planes_may_leave_amphibious(state) {
            Some(Retreater::new(RetreatKind::AirAmphibious, Side::Offense))
        } else {
            None
        }
    } else {
        Some(Retreater::new(RetreatKind::FullForce, Side::Offense))
    }
}

pub fn offensive_general_retreat_named(state: &BattleState) -> bool {
    match general_retreater(state) {
        None => false,
        Some(r) if r.kind == RetreatKind::FullForce => {
            let units = r.retreat_units(state);
            !units.is_empty() && !r.possible_sites(state, &units).is_empty()
        }
        Some(_) => true,
    }
}

// ── Queries ────────────────────────────────────────────────────────────

fn subs_retreat(state: &BattleState, side: Side, step_name: &str) -> Option<RetreatRequest> {
    if state.is_over() || enemy_destroyer(state, side) || state.is_amphibious {
        return None;
    }
    if side == Side::Offense
        && state.rules.transport_casualties_restricted
        && only_defenseless_transports(state, Side::Defense)
    {
        return None;
    }
    let retreater = Retreater::new(RetreatKind::Subs, side);
    let units = retreater.retreat_units(state);
    let candidates = retreater.possible_sites(state, &units);
    if units.is_empty() || candidates.is_empty() {
        return None;
    }
    let player = state.player_for(side);
    Some(RetreatRequest {
        player,
        side,
        kind: RetreatKind::Subs,
        step_name: step_name.to_string(),
        prompt: format!("{} retreat subs?", state.player_name(player)),
        submerge_only: candidates == [state.site],
        units,
        candidates,
    })
}

pub fn offensive_subs_retreat(state: &BattleState, step_name: &str) -> Option<RetreatRequest> {
    subs_retreat(state, Side::Offense, step_name)
}

pub fn defensive_subs_retreat(state: &BattleState, step_name: &str) -> Option<RetreatRequest> {
    subs_retreat(state, Side::Defense, step_name)
}

pub fn offensive_general_retreat(state: &BattleState, step_name: &str) -> Option<RetreatRequest> {
    if state.is_over() {
        return None;
    }
    let retreater = general_retreater(state)?;
    let units = retreater.retreat_units(state);
    let candidates = retreater.possible_sites(state, &units);
    if units.is_empty() || candidates.is_empty() {
        return None;
    }
    let attacker = state.player_name(state.attacker);
    let prompt = match retreater.kind {
        RetreatKind::AirAmphibious => format!("{} retreat planes?", attacker),
        RetreatKind::PartialAmphibious => format!("{} retreat non-amphibious units?", attacker),
        _ => format!("{} retreat?", attacker),
    };
    Some(RetreatRequest {
        player: state.attacker,
        side: Side::Offense,
        kind: retreater.kind,
        step_name: step_name.to_string(),
        prompt,
        units,
        candidates,
        submerge_only: false,
    })
}

// ── Applying ───────────────────────────────────────────────────────────

/// Carry out the player's answer. `None` means the units stay and fight.
pub fn retreat_units(
    state: &mut BattleState,
    history: &mut dyn HistorySink,
    request: &RetreatRequest,
    choice: Option<TerritoryId>,
) -> Result<()> {
    let Some(to) = choice else {
        history.event(&format!("{} does not retreat", state.player_name(request.player)));
        return Ok(());
    };
    if !request.candidates.contains(&to) {
        let name = match state.territories.get(to.0 as usize) {
            Some(t) => t.name.clone(),
            None => format!("territory #{}", to.0),
        };
        return Err(CombatError::InvalidAction(format!("{} is not a legal retreat destination", name)));
    }

    let units: Vec<UnitId> = request
        .units
        .iter()
        .copied()
        .filter(|u| state.alive(request.side).contains(u))
        .collect();
    let plan = Retreater::new(request.kind, request.side).split(state, &units, to);

    if !plan.submerge.is_empty() {
        for unit in &plan.submerge {
            state.unit_mut(*unit).submerged = true;
        }
        state.remove_from_combat(request.side, &plan.submerge);
        state.retreats.push(RetreatRecord {
            side: request.side,
            units: plan.submerge.clone(),
            to: state.site,
            submerged: true,
        });
        let text = format!("{} submerged", state.unit_names(&plan.submerge));
        info!(player = %state.player_name(request.player), units = plan.submerge.len(), "{}", text);
        history.event(&text);
    }
    for (destination, units) in plan.moves {
        if units.is_empty() {
            continue;
        }
        state.remove_from_combat(request.side, &units);
        let text = format!("{} retreated to {}", state.unit_names(&units), state.territory(destination).name);
        info!(player = %state.player_name(request.player), units = units.len(), "{}", text);
        history.event(&text);
        state.retreats.push(RetreatRecord { side: request.side, units, to: destination, submerged: false });
    }

    if state.active(request.side).is_empty() && !state.is_over() {
        state.outcome = Some(match request.side {
            Side::Offense => WhoWon::Defender,
            Side::Defense => WhoWon::Attacker,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::history::RecordingHistory;
    use crate::setup::{Scenario, StackSpec, UnitTypeSpec};

    fn sea(rules: RuleConfig) -> Scenario {
        Scenario::new("Sea Zone 5", true)
            .rules(rules)
            .unit_type(UnitTypeSpec { is_sea: true, is_first_strike: true, can_evade: true, ..UnitTypeSpec::new("submarine", 2, 1) })
            .unit_type(UnitTypeSpec { is_sea: true, is_destroyer: true, ..UnitTypeSpec::new("destroyer", 2, 2) })
            .unit_type(UnitTypeSpec { is_sea: true, is_sea_transport: true, ..UnitTypeSpec::new("transport", 0, 0) })
            .unit_type(UnitTypeSpec { is_air: true, ..UnitTypeSpec::new("fighter", 3, 4) })
            .unit_type(UnitTypeSpec { is_sea: true, ..UnitTypeSpec::new("cruiser", 3, 3) })
    }

    fn submersible() -> RuleConfig {
        RuleConfig { submersible_subs: true, ..Default::default() }
    }

    #[test]
    fn test_offensive_subs_named_when_submersible() {
        let state = sea(submersible()).attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        assert!(offensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_offensive_subs_named_with_retreat_territory() {
        let state = sea(RuleConfig::default())
            .attacking("submarine", 1)
            .defending("cruiser", 1)
            .attack_from("Sea Zone 4", true)
            .into_state()
            .unwrap();
        assert!(offensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_offensive_subs_not_named_without_options() {
        let state = sea(RuleConfig::default()).attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        assert!(!offensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_offensive_subs_not_named_in_amphibious_assault() {
        let state = sea(submersible()).amphibious().attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        assert!(!offensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_offensive_subs_not_named_against_defenseless_transports() {
        let rules = RuleConfig { transport_casualties_restricted: true, ..submersible() };
        let state = sea(rules).attacking("submarine", 1).defending("transport", 1).into_state().unwrap();
        assert!(!offensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_names_appear_even_with_enemy_destroyer() {
        let state = sea(submersible()).attacking("submarine", 1).defending("destroyer", 1).into_state().unwrap();
        assert!(offensive_subs_retreat_named(&state));
        assert!(offensive_subs_retreat(&state, "Russians withdraw subs").is_none());
    }

    #[test]
    fn test_waiting_to_die_destroyer_still_blocks() {
        let mut state = sea(submersible()).attacking("submarine", 1).defending("destroyer", 1).into_state().unwrap();
        let destroyer = state.defense.alive[0];
        state.mark_waiting_to_die(Side::Defense, &[destroyer]);
        assert!(offensive_subs_retreat(&state, "x").is_none());
    }

    #[test]
    fn test_submersible_without_territories_is_a_submerge_query() {
        let state = sea(submersible()).attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        let request = offensive_subs_retreat(&state, "Russians submerge subs").unwrap();
        assert_eq!(request.prompt, "Russians retreat subs?");
        assert_eq!(request.candidates, vec![state.site]);
        assert!(request.submerge_only);
    }

    #[test]
    fn test_defender_may_submerge_or_retreat_lists_both() {
        let rules = RuleConfig { submarines_defending_may_submerge_or_retreat: true, ..Default::default() };
        let state = sea(rules)
            .attacking("cruiser", 1)
            .defending("submarine", 1)
            .neighbor("Sea Zone 6", true)
            .into_state()
            .unwrap();
        assert!(defensive_subs_retreat_named(&state));
        let request = defensive_subs_retreat(&state, "Germans withdraw subs").unwrap();
        let sz6 = state.find_territory("Sea Zone 6").unwrap();
        assert_eq!(request.candidates, vec![sz6, state.site]);
        assert_eq!(request.prompt, "Germans retreat subs?");
        assert!(!request.submerge_only);
    }

    #[test]
    fn test_defender_not_named_without_options() {
        let state = sea(RuleConfig::default()).attacking("cruiser", 1).defending("submarine", 1).into_state().unwrap();
        assert!(!defensive_subs_retreat_named(&state));
    }

    #[test]
    fn test_choosing_the_site_submerges() {
        let mut state = sea(submersible())
            .attacking("submarine", 1)
            .attacking("cruiser", 1)
            .defending("cruiser", 1)
            .into_state()
            .unwrap();
        let request = offensive_subs_retreat(&state, "x").unwrap();
        let mut history = RecordingHistory::default();
        let site = state.site;
        retreat_units(&mut state, &mut history, &request, Some(site)).unwrap();
        let sub = request.units[0];
        assert!(state.unit(sub).submerged);
        assert!(!state.alive(Side::Offense).contains(&sub));
        assert_eq!(history.events(), vec!["submarine submerged"]);
        assert!(!state.is_over());
    }

    #[test]
    fn test_emptying_a_side_ends_the_battle() {
        let mut state = sea(submersible()).attacking("submarine", 2).defending("cruiser", 1).into_state().unwrap();
        let request = offensive_subs_retreat(&state, "x").unwrap();
        let site = state.site;
        retreat_units(&mut state, &mut RecordingHistory::default(), &request, Some(site)).unwrap();
        assert_eq!(state.outcome, Some(WhoWon::Defender));
    }

    #[test]
    fn test_illegal_destination_rejected() {
        let mut state = sea(submersible()).attacking("submarine", 1).defending("cruiser", 1).neighbor("Sea Zone 9", true).into_state().unwrap();
        let request = offensive_subs_retreat(&state, "x").unwrap();
        let elsewhere = state.find_territory("Sea Zone 9").unwrap();
        let err = retreat_units(&mut state, &mut RecordingHistory::default(), &request, Some(elsewhere)).unwrap_err();
        assert!(matches!(err, CombatError::InvalidAction(_)));
    }

    #[test]
    fn test_staying_changes_nothing() {
        let mut state = sea(submersible()).attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        let request = offensive_subs_retreat(&state, "x").unwrap();
        retreat_units(&mut state, &mut RecordingHistory::default(), &request, None).unwrap();
        assert_eq!(state.alive(Side::Offense).len(), 1);
    }

    fn land(rules: RuleConfig) -> Scenario {
        Scenario::new("Karelia", false)
            .rules(rules)
            .unit_type(UnitTypeSpec::new("infantry", 1, 2))
            .unit_type(UnitTypeSpec { is_air: true, ..UnitTypeSpec::new("fighter", 3, 4) })
    }

    #[test]
    fn test_amphibious_planes_retreat() {
        let rules = RuleConfig { ww2v2: true, ..Default::default() };
        let state = land(rules)
            .amphibious()
            .attacking("fighter", 1)
            .attacking_stack(StackSpec { was_amphibious: true, ..StackSpec::new("infantry", 1) })
            .defending("infantry", 1)
            .into_state()
            .unwrap();
        assert!(offensive_general_retreat_named(&state));
        let request = offensive_general_retreat(&state, "Russians withdraw").unwrap();
        assert_eq!(request.prompt, "Russians retreat planes?");
        assert_eq!(request.candidates, vec![state.site]);
        assert_eq!(request.units.len(), 1);
    }

    #[test]
    fn test_amphibious_without_plane_rules_cannot_retreat() {
        let state = land(RuleConfig::default())
            .amphibious()
            .attacking("fighter", 1)
            .defending("infantry", 1)
            .into_state()
            .unwrap();
        assert!(!offensive_general_retreat_named(&state));
        assert!(offensive_general_retreat(&state, "x").is_none());
    }

    #[test]
    fn test_partial_amphibious_retreat_goes_to_land() {
        let rules = RuleConfig { partial_amphibious_retreat: true, ..Default::default() };
        let mut state = land(rules)
            .amphibious()
            .attacking_stack(StackSpec { was_amphibious: true, ..StackSpec::new("infantry", 1) })
            .attacking("infantry", 1)
            .attacking("fighter", 1)
            .defending("infantry", 1)
            .attack_from("Archangel", false)
            .attack_from("Sea Zone 4", true)
            .into_state()
            .unwrap();
        let request = offensive_general_retreat(&state, "Russians withdraw").unwrap();
        assert_eq!(request.prompt, "Russians retreat non-amphibious units?");
        let archangel = state.find_territory("Archangel").unwrap();
        assert_eq!(request.candidates, vec![archangel]);
        assert_eq!(request.units.len(), 2);

        retreat_units(&mut state, &mut RecordingHistory::default(), &request, Some(archangel)).unwrap();
        assert_eq!(state.alive(Side::Offense).len(), 1);
        let destinations: Vec<TerritoryId> = state.retreats.iter().map(|r| r.to).collect();
        assert_eq!(destinations, vec![state.site, archangel]);
    }

    #[test]
    fn test_partial_amphibious_without_territories_lets_planes_leave() {
        let rules = RuleConfig { partial_amphibious_retreat: true, ..Default::default() };
        let state = land(rules)
            .amphibious()
            .attacking_stack(StackSpec { was_amphibious: true, ..StackSpec::new("infantry", 1) })
            .attacking("infantry", 1)
            .attacking("fighter", 1)
            .defending("infantry", 1)
            .into_state()
            .unwrap();
        assert!(offensive_general_retreat_named(&state));
        let request = offensive_general_retreat(&state, "Russians withdraw").unwrap();
        assert_eq!(request.kind, RetreatKind::AirAmphibious);
        assert_eq!(request.prompt, "Russians retreat planes?");
        assert_eq!(request.candidates, vec![state.site]);
        assert_eq!(request.units.len(), 1);
    }

    #[test]
    fn test_unknown_destination_rejected() {
        let mut state = sea(submersible()).attacking("submarine", 1).defending("cruiser", 1).into_state().unwrap();
        let request = offensive_subs_retreat(&state, "x").unwrap();
        let err = retreat_units(&mut state, &mut RecordingHistory::default(), &request, Some(TerritoryId(99))).unwrap_err();
        assert!(matches!(err, CombatError::InvalidAction(msg) if msg.contains("#99")));
        assert_eq!(state.alive(Side::Offense).len(), 1);
    }

    #[test]
    fn test_general_retreat_needs_territories() {
        let state = land(RuleConfig::default()).attacking("infantry", 1).defending("infantry", 1).into_state().unwrap();
        assert!(!offensive_general_retreat_named(&state));
        let state = land(RuleConfig::default())
            .attacking("infantry", 1)
            .defending("infantry", 1)
            .attack_from("Archangel", false)
            .into_state()
            .unwrap();
        assert!(offensive_general_retreat_named(&state));
        assert_eq!(offensive_general_retreat(&state, "x").unwrap().prompt, "Russians retreat?");
    }

    #[test]
    fn test_air_at_sea_can_always_retreat() {
        let state = sea(RuleConfig::default()).attacking("fighter", 1).defending("cruiser", 1).into_state().unwrap();
        assert!(offensive_general_retreat_named(&state));
        let request = offensive_general_retreat(&state, "x").unwrap();
        assert_eq!(request.candidates, vec![state.site]);
    }

    #[test]
    fn test_defenseless_transports_forbid_general_retreat() {
        let rules = RuleConfig { transport_casualties_restricted: true, ..Default::default() };
        let state = sea(rules)
            .attacking("cruiser", 1)
            .defending("transport", 1)
            .attack_from("Sea Zone 4", true)
            .into_state()
            .unwrap();
        assert!(!offensive_general_retreat_named(&state));
    }

    #[test]
    fn test_enemy_occupied_territory_is_no_retreat() {
        let mut scenario = land(RuleConfig::default())
            .attacking("infantry", 1)
            .defending("infantry", 1)
            .attack_from("Archangel", false);
        scenario.territories[1].occupied_by = vec!["Germans".into()];
        let state = scenario.into_state().unwrap();
        assert!(state.retreat_territories(Side::Offense).is_empty());
    }
}
