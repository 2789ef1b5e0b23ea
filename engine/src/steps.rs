// ═══════════════════════════════════════════════════════════════════════
// Step sequencing — which steps a round has, and in what order
//
// Every candidate step kind is asked whether it applies to the current
// BattleState. The applicable ones are sorted by `Order`, a fixed total
// order encoding rule precedence (sneak attacks before general fire,
// general fire before retreats). Applicability is re-derived at the start
// of every round, since destroyers and evaders come and go.
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};

use crate::generator::UNITS;
use crate::retreat;
use crate::splitter::{self, FiringGroup};
use crate::types::*;

pub const REMOVE_CASUALTIES: &str = "Remove casualties";
pub const REMOVE_SNEAK_ATTACK_CASUALTIES: &str = "Remove sneak attack casualties";
pub const REMOVE_BOMBARDMENT_CASUALTIES: &str = "Remove bombardment casualties";
pub const REMOVE_UNESCORTED_TRANSPORTS: &str = "Remove unescorted transports";
pub const SUBMERGE_SUBS_VS_AIR_ONLY: &str = "Submerge subs vs air only";

// ── Order ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Order {
    AaOffensive,
    AaDefensive,
    NavalBombardment,
    RemoveUnescortedTransports,
    SubOffensiveRetreatBeforeBattle,
    SubDefensiveRetreatBeforeBattle,
    SubmergeSubsVsOnlyAir,
    FirstStrikeDefensiveSneak,
    FirstStrikeOffensiveSneak,
    FirstStrikeRemoveCasualtiesEarly,
    FirstStrikeOffensiveRegular,
    FirstStrikeDefensiveRegular,
    FirstStrikeRemoveCasualtiesLate,
    GeneralOffensive,
    FirstStrikeDefensiveNoSneak,
    GeneralDefensive,
    RemoveCasualties,
    SubOffensiveRetreatAfterBattle,
    OffensiveGeneralRetreat,
    SubDefensiveRetreatAfterBattle,
}

// ── First strike oracle ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FirstStrikeState {
    /// Fires first and its victims are removed before they can answer.
    Sneak,
    /// Sneaks, but the other side's first strikers fire back the same way.
    WithOpposing,
    /// Fires with everyone else.
    NoSneak,
    /// No sneak attack, but still ahead of the attacker's general fire.
    NoSneakButBeforeStandard,
}

fn has_destroyer(state: &BattleState, side: Side) -> bool {
    state.any_unit(side, &[Status::Alive], |t| t.is_destroyer)
}

/// How a side's first-strike units fire this round, or `None` without any.
pub fn first_strike_state(state: &BattleState, side: Side) -> Option<FirstStrikeState> {
    if !state.any_unit(side, &[Status::Alive], |t| t.is_first_strike) {
        return None;
    }
    let rules = &state.rules;
    let attacking_destroyer = has_destroyer(state, Side::Offense);
    let defending_destroyer = has_destroyer(state, Side::Defense);
    let result = match side {
        Side::Offense => {
            if defending_destroyer {
                FirstStrikeState::NoSneak
            } else if rules.ww2v2 || (rules.defending_subs_sneak_attack && !attacking_destroyer) {
                FirstStrikeState::WithOpposing
            } else {
                FirstStrikeState::Sneak
            }
        }
        Side::Defense => {
            if rules.ww2v2 {
                if attacking_destroyer {
                    FirstStrikeState::NoSneakButBeforeStandard
                } else {
                    FirstStrikeState::WithOpposing
                }
            } else if rules.defending_subs_sneak_attack {
                if attacking_destroyer {
                    FirstStrikeState::NoSneak
                } else if defending_destroyer {
                    FirstStrikeState::Sneak
                } else {
                    FirstStrikeState::WithOpposing
                }
            } else {
                FirstStrikeState::NoSneak
            }
        }
    };
    Some(result)
}

fn is_sneaky(fs: Option<FirstStrikeState>) -> bool {
    matches!(fs, Some(FirstStrikeState::Sneak | FirstStrikeState::WithOpposing))
}

/// Sides whose first-strike casualties are removed before they can fire
/// back, and whether that happens in the early slot.
pub fn sneak_casualty_sides(state: &BattleState) -> Option<(Vec<Side>, bool)> {
    let offense = first_strike_state(state, Side::Offense);
    let defense = first_strike_state(state, Side::Defense);
    if !is_sneaky(offense) && !is_sneaky(defense) {
        return None;
    }
    let early = offense == Some(FirstStrikeState::Sneak) || defense == Some(FirstStrikeState::Sneak);
    let sides = if state.rules.ww2v2 {
        let mut sides = Vec::new();
        // the side opposite each sneaking side, offense first
        if is_sneaky(defense) {
            sides.push(Side::Offense);
        }
        if is_sneaky(offense) {
            sides.push(Side::Defense);
        }
        sides
    } else {
        vec![Side::Offense, Side::Defense]
    };
    Some((sides, early))
}

// ── Step kinds ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    AaFire(Side),
    NavalBombardment,
    RemoveUnprotectedUnits,
    SubsRetreat { side: Side, before_battle: bool },
    SubmergeSubsVsOnlyAir,
    FirstStrikeFire(Side),
    ClearFirstStrikeCasualties,
    GeneralFire(Side),
    RemoveCasualties,
    OffensiveGeneralRetreat,
}

impl StepKind {
    pub const ALL: [StepKind; 16] = [
        StepKind::AaFire(Side::Offense),
        StepKind::AaFire(Side::Defense),
        StepKind::NavalBombardment,
        StepKind::RemoveUnprotectedUnits,
        StepKind::SubsRetreat { side: Side::Offense, before_battle: true },
        StepKind::SubsRetreat { side: Side::Defense, before_battle: true },
        StepKind::SubmergeSubsVsOnlyAir,
        StepKind::FirstStrikeFire(Side::Offense),
        StepKind::FirstStrikeFire(Side::Defense),
        StepKind::ClearFirstStrikeCasualties,
        StepKind::GeneralFire(Side::Offense),
        StepKind::GeneralFire(Side::Defense),
        StepKind::RemoveCasualties,
        StepKind::SubsRetreat { side: Side::Offense, before_battle: false },
        StepKind::SubsRetreat { side: Side::Defense, before_battle: false },
        StepKind::OffensiveGeneralRetreat,
    ];

    /// Position in the round. Steps whose slot depends on the first-strike
    /// oracle read it from `state`.
    pub fn order(&self, state: &BattleState) -> Order {
        match *self {
            StepKind::AaFire(Side::Offense) => Order::AaOffensive,
            StepKind::AaFire(Side::Defense) => Order::AaDefensive,
            StepKind::NavalBombardment => Order::NavalBombardment,
            StepKind::RemoveUnprotectedUnits => Order::RemoveUnescortedTransports,
            StepKind::SubsRetreat { side: Side::Offense, before_battle: true } => Order::SubOffensiveRetreatBeforeBattle,
            StepKind::SubsRetreat { side: Side::Defense, before_battle: true } => Order::SubDefensiveRetreatBeforeBattle,
            StepKind::SubsRetreat { side: Side::Offense, before_battle: false } => Order::SubOffensiveRetreatAfterBattle,
            StepKind::SubsRetreat { side: Side::Defense, before_battle: false } => Order::SubDefensiveRetreatAfterBattle,
            StepKind::SubmergeSubsVsOnlyAir => Order::SubmergeSubsVsOnlyAir,
            StepKind::FirstStrikeFire(Side::Offense) => match first_strike_state(state, Side::Offense) {
                Some(FirstStrikeState::Sneak) => Order::FirstStrikeOffensiveSneak,
                _ => Order::FirstStrikeOffensiveRegular,
            },
            StepKind::FirstStrikeFire(Side::Defense) => match first_strike_state(state, Side::Defense) {
                Some(FirstStrikeState::Sneak) => Order::FirstStrikeDefensiveSneak,
                Some(FirstStrikeState::NoSneak) | None => Order::FirstStrikeDefensiveNoSneak,
                _ => Order::FirstStrikeDefensiveRegular,
            },
            StepKind::ClearFirstStrikeCasualties => match sneak_casualty_sides(state) {
                Some((_, true)) => Order::FirstStrikeRemoveCasualtiesEarly,
                _ => Order::FirstStrikeRemoveCasualtiesLate,
            },
            StepKind::GeneralFire(Side::Offense) => Order::GeneralOffensive,
            StepKind::GeneralFire(Side::Defense) => Order::GeneralDefensive,
            StepKind::RemoveCasualties => Order::RemoveCasualties,
            StepKind::OffensiveGeneralRetreat => Order::OffensiveGeneralRetreat,
        }
    }

    pub fn applicability(&self, state: &BattleState) -> Applicability {
        let rules = &state.rules;
        let names: Vec<String> = match *self {
            StepKind::AaFire(side) => splitter::split_aa(state, side)
                .iter()
                .flat_map(|g| fire_step_names(state, side, &g.display_name, FireKind::Aa))
                .collect(),
            StepKind::NavalBombardment => {
                let mut names: Vec<String> = splitter::split_bombard(state)
                    .iter()
                    .flat_map(|g| fire_step_names(state, Side::Offense, &g.display_name, FireKind::Bombard))
                    .collect();
                if !names.is_empty() && !rules.naval_bombard_casualties_return_fire {
                    names.push(REMOVE_BOMBARDMENT_CASUALTIES.to_string());
                }
                names
            }
            StepKind::RemoveUnprotectedUnits => {
                let transports = Side::ALL
                    .iter()
                    .any(|s| state.any_unit(*s, &[Status::Alive], |t| t.is_sea_transport));
                if rules.transport_casualties_restricted && state.battle_site().is_water && transports {
                    vec![REMOVE_UNESCORTED_TRANSPORTS.to_string()]
                } else {
                    Vec::new()
                }
            }
            StepKind::SubsRetreat { side, before_battle } => {
                let named = match side {
                    Side::Offense => retreat::offensive_subs_retreat_named(state),
                    Side::Defense => retreat::defensive_subs_retreat_named(state),
                };
                if named && before_battle == rules.sub_retreat_before_battle {
                    vec![subs_retreat_name(state, side)]
                } else {
                    Vec::new()
                }
            }
            StepKind::SubmergeSubsVsOnlyAir => {
                if Side::ALL.iter().any(|s| !evaders_safe_from_air(state, *s).is_empty()) {
                    vec![SUBMERGE_SUBS_VS_AIR_ONLY.to_string()]
                } else {
                    Vec::new()
                }
            }
            StepKind::FirstStrikeFire(side) => {
                if first_strike_state(state, side).is_none() {
                    Vec::new()
                } else {
                    group_names(state, side, &splitter::split_general(state, side, FireKind::FirstStrike), FireKind::FirstStrike)
                }
            }
            StepKind::ClearFirstStrikeCasualties => match sneak_casualty_sides(state) {
                Some((sides, _)) if !sides.is_empty() => vec![REMOVE_SNEAK_ATTACK_CASUALTIES.to_string()],
                _ => Vec::new(),
            },
            StepKind::GeneralFire(side) => {
                group_names(state, side, &splitter::split_general(state, side, FireKind::General), FireKind::General)
            }
            StepKind::RemoveCasualties => vec![REMOVE_CASUALTIES.to_string()],
            StepKind::OffensiveGeneralRetreat => {
                if retreat::offensive_general_retreat_named(state) {
                    vec![general_retreat_name(state)]
                } else {
                    Vec::new()
                }
            }
        };
        if names.is_empty() {
            Applicability::Inapplicable
        } else {
            Applicability::Applicable(names)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Inapplicable,
    Applicable(Vec<String>),
}

// ── Names ──────────────────────────────────────────────────────────────

/// The three display names of one firing group: fire, select, notify.
pub fn fire_step_names(state: &BattleState, firing_side: Side, group: &str, kind: FireKind) -> [String; 3] {
    let firer = state.player_name(state.player_for(firing_side));
    let hit = state.player_name(state.player_for(firing_side.opposite()));
    match kind {
        FireKind::Aa => [
            format!("{} {} AA fire", firer, group),
            format!("{} select {} casualties", hit, group),
            format!("{} notify {} casualties", hit, group),
        ],
        FireKind::General if group == UNITS => [
            format!("{} fire", firer),
            format!("{} select casualties", hit),
            format!("{} notify casualties", hit),
        ],
        _ => [
            format!("{} {} fire", firer, group),
            format!("{} select {} casualties", hit, group),
            format!("{} notify {} casualties", hit, group),
        ],
    }
}

fn group_names(state: &BattleState, side: Side, groups: &[FiringGroup], kind: FireKind) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| fire_step_names(state, side, &g.display_name, kind))
        .collect()
}

pub fn subs_retreat_name(state: &BattleState, side: Side) -> String {
    let player = state.player_name(state.player_for(side));
    if retreat::can_submerge(state, side) {
        format!("{} submerge subs", player)
    } else {
        format!("{} withdraw subs", player)
    }
}

pub fn general_retreat_name(state: &BattleState) -> String {
    format!("{} withdraw", state.player_name(state.attacker))
}

/// Evaders of `side` facing nothing but air that cannot target them, with
/// no enemy destroyer around.
pub fn evaders_safe_from_air(state: &BattleState, side: Side) -> Vec<UnitId> {
    let enemy = side.opposite();
    let enemy_alive = state.alive(enemy);
    if enemy_alive.is_empty()
        || !enemy_alive.iter().all(|u| state.type_of(*u).is_air)
        || state.any_unit(enemy, &Status::ALL, |t| t.is_destroyer)
    {
        return Vec::new();
    }
    let enemy_types = state.types_present(enemy);
    state
        .alive(side)
        .into_iter()
        .filter(|u| {
            let t = state.type_of(*u);
            t.can_evade && enemy_types.iter().all(|e| t.can_not_be_targeted_by.contains(e))
        })
        .collect()
}

// ── Round ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStep {
    pub kind: StepKind,
    pub order: Order,
    pub names: Vec<String>,
}

/// The applicable steps of the current round, in execution order.
pub fn round_steps(state: &BattleState) -> Vec<RoundStep> {
    let mut steps: Vec<RoundStep> = StepKind::ALL
        .into_iter()
        .filter_map(|kind| match kind.applicability(state) {
            Applicability::Applicable(names) => Some(RoundStep { kind, order: kind.order(state), names }),
            Applicability::Inapplicable => None,
        })
        .collect();
    steps.sort_by_key(|s| s.order);
    steps
}

pub fn step_names(steps: &[RoundStep]) -> Vec<String> {
    steps.iter().flat_map(|s| s.names.iter().cloned()).collect()
}
