// ═══════════════════════════════════════════════════════════════════════
// Firing groups — partition firing units by shared targets and suicide
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ability::{BattlePhaseList, CombatAbility};
use crate::generator::{FIRST_STRIKE_UNITS, NAVAL_BOMBARD, UNITS};
use crate::types::*;

pub const AIR_VS_NON_SUBS: &str = "air vs non subs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiringGroup {
    pub display_name: String,
    pub firing_units: Vec<UnitId>,
    pub target_units: Vec<UnitId>,
    pub suicide_on_hit: bool,
}

/// Targets a firing side may ever hit, before per-ability filtering.
fn eligible_targets(state: &BattleState, firing_side: Side, targets: &[UnitId]) -> Vec<UnitId> {
    let mut eligible: Vec<UnitId> = targets
        .iter()
        .copied()
        .filter(|u| {
            let t = state.type_of(*u);
            !t.is_infrastructure && !t.is_suicide_on(firing_side.opposite())
        })
        .collect();
    eligible.sort();
    eligible.dedup();
    eligible
}

fn resolved_normal<'a>(
    state: &BattleState,
    abilities: &'a BattlePhaseList,
    side: Side,
    unit: UnitId,
) -> Option<&'a CombatAbility> {
    abilities
        .unit_ability(state, side, unit, DiceType::Normal)
        .filter(|a| a.usable_in_round(state.round))
}

/// Split `firing` into groups sharing one target list and one suicide
/// mode. Output order depends only on the unit sets, never on input order.
pub fn split(
    state: &BattleState,
    firing: &[UnitId],
    targets: &[UnitId],
    abilities: &BattlePhaseList,
    side: Side,
    base_name: &str,
) -> Vec<FiringGroup> {
    let targets = eligible_targets(state, side, targets);
    if targets.is_empty() {
        return Vec::new();
    }
    let mut firing: Vec<UnitId> = firing.to_vec();
    firing.sort();
    firing.dedup();

    // target list → (firing units, any gated by destroyer)
    let mut by_targets: BTreeMap<Vec<UnitId>, Vec<(UnitId, &CombatAbility)>> = BTreeMap::new();
    for unit in firing {
        let Some(ability) = resolved_normal(state, abilities, side, unit) else { continue };
        let unit_targets: Vec<UnitId> = targets
            .iter()
            .copied()
            .filter(|t| ability.targets.contains(&state.unit(*t).unit_type))
            .collect();
        if unit_targets.is_empty() {
            continue;
        }
        by_targets.entry(unit_targets).or_default().push((unit, ability));
    }

    let mut groups = Vec::new();
    for (unit_targets, members) in by_targets {
        let name = target_group_name(state, &targets, &unit_targets, &members, base_name);

        let plain: Vec<UnitId> = members.iter().filter(|(_, a)| !a.suicide_on_hit).map(|(u, _)| *u).collect();
        let mut suicide_by_type: BTreeMap<UnitTypeId, Vec<UnitId>> = BTreeMap::new();
        for (unit, _) in members.iter().filter(|(_, a)| a.suicide_on_hit) {
            suicide_by_type.entry(state.unit(*unit).unit_type).or_default().push(*unit);
        }

        let shared = !plain.is_empty() || suicide_by_type.len() > 1;
        if !plain.is_empty() {
            groups.push(FiringGroup {
                display_name: name.clone(),
                firing_units: plain,
                target_units: unit_targets.clone(),
                suicide_on_hit: false,
            });
        }
        let several_types = suicide_by_type.len() > 1;
        for (type_id, units) in suicide_by_type {
            let display_name = match (shared, several_types) {
                (_, true) => format!("{} suicide {}", name, state.unit_type(type_id).name),
                (true, false) => format!("{} suicide", name),
                (false, false) => name.clone(),
            };
            groups.push(FiringGroup {
                display_name,
                firing_units: units,
                target_units: unit_targets.clone(),
                suicide_on_hit: true,
            });
        }
    }

    groups.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.firing_units.cmp(&b.firing_units))
    });
    groups
}

fn target_group_name(
    state: &BattleState,
    all_targets: &[UnitId],
    group_targets: &[UnitId],
    members: &[(UnitId, &CombatAbility)],
    base_name: &str,
) -> String {
    if group_targets.len() == all_targets.len() {
        return base_name.to_string();
    }
    let all_air = members.iter().all(|(u, _)| state.type_of(*u).is_air);
    let gated = members.iter().any(|(_, a)| a.name.ends_with("without destroyer"));
    if all_air && gated {
        return AIR_VS_NON_SUBS.to_string();
    }
    let first = members.iter().map(|(u, _)| *u).min();
    match first {
        Some(u) => format!("{} {}", base_name, state.type_of(u).name),
        None => base_name.to_string(),
    }
}

/// Units of `side` that take part in a first strike or general volley.
pub fn eligible_firing_units(state: &BattleState, side: Side, kind: FireKind) -> Vec<UnitId> {
    let rules = &state.rules;
    state
        .active(side)
        .into_iter()
        .filter(|u| {
            let unit = state.unit(*u);
            let t = state.unit_type(unit.unit_type);
            let matches_kind = match kind {
                FireKind::FirstStrike => t.is_first_strike,
                _ => !t.is_first_strike,
            };
            let owner_ok = side == Side::Defense || rules.allied_air_independent || unit.owner == state.attacker;
            let munition_ok = side == Side::Offense
                || !rules.defending_suicide_and_munition_units_do_not_fire
                || !(t.is_suicide_on_attack || t.is_suicide_on_defense);
            matches_kind && owner_ok && munition_ok
        })
        .collect()
}

/// First strike or general fire groups for `side` against the enemy's alive units.
pub fn split_general(state: &BattleState, side: Side, kind: FireKind) -> Vec<FiringGroup> {
    let firing = eligible_firing_units(state, side, kind);
    let targets = state.alive(side.opposite());
    let base = match kind {
        FireKind::FirstStrike => FIRST_STRIKE_UNITS,
        _ => UNITS,
    };
    split(state, &firing, &targets, &state.abilities, side, base)
}

/// AA groups, one per `type_aa` usable this round.
pub fn split_aa(state: &BattleState, side: Side) -> Vec<FiringGroup> {
    let mut by_type: BTreeMap<String, (Vec<UnitId>, &CombatAbility)> = BTreeMap::new();
    for unit in state.active(side) {
        let Some(ability) = state.abilities.unit_ability(state, side, unit, DiceType::Aa) else { continue };
        if !ability.usable_in_round(state.round) {
            continue;
        }
        by_type.entry(ability.name.clone()).or_insert((Vec::new(), ability)).0.push(unit);
    }

    let enemies = state.alive(side.opposite());
    let mut groups = Vec::new();
    for (type_aa, (mut firing, ability)) in by_type {
        let targets: Vec<UnitId> = enemies
            .iter()
            .copied()
            .filter(|u| ability.targets.contains(&state.unit(*u).unit_type))
            .collect();
        if targets.is_empty() {
            continue;
        }
        firing.sort();
        groups.push(FiringGroup {
            display_name: type_aa,
            firing_units: firing,
            target_units: targets,
            suicide_on_hit: ability.suicide_on_hit,
        });
    }
    groups
}

/// Naval bombardment of a land battle, first round only.
pub fn split_bombard(state: &BattleState) -> Vec<FiringGroup> {
    if state.round != 1 || state.battle_site().is_water {
        return Vec::new();
    }
    let mut firing: Vec<UnitId> = state
        .bombarding
        .iter()
        .copied()
        .filter(|u| {
            state
                .abilities
                .unit_ability(state, Side::Offense, *u, DiceType::Bombard)
                .is_some_and(|a| a.usable_in_round(state.round))
        })
        .collect();
    let targets = eligible_targets(state, Side::Offense, &state.alive(Side::Defense));
    if firing.is_empty() || targets.is_empty() {
        return Vec::new();
    }
    firing.sort();
    vec![FiringGroup {
        display_name: NAVAL_BOMBARD.to_string(),
        firing_units: firing,
        target_units: targets,
        suicide_on_hit: false,
    }]
}
