// ═══════════════════════════════════════════════════════════════════════
// Casualties — default selection, validation and constrained re-selection
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{CombatError, Result};
use crate::splitter::FiringGroup;
use crate::types::*;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyDetails {
    pub killed: Vec<UnitId>,
    /// One entry per hit absorbed without dying.
    pub damaged: Vec<UnitId>,
    pub auto_calculated: bool,
}

/// Question put to the hit player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasualtyRequest {
    pub player: PlayerId,
    pub hit_side: Side,
    pub kind: FireKind,
    pub step_name: String,
    pub group: FiringGroup,
    pub hits: usize,
    pub targets: Vec<UnitId>,
    pub default_selection: CasualtyDetails,
}

pub fn max_hits_before_death(state: &BattleState, unit: UnitId) -> usize {
    let hp = state.type_of(unit).hit_points as usize;
    hp.saturating_sub(state.unit(unit).hits as usize + 1)
}

fn remaining_hit_points(state: &BattleState, unit: UnitId) -> usize {
    max_hits_before_death(state, unit) + 1
}

/// Group key for policies that must not move casualties across owners or types.
fn owner_and_type(state: &BattleState, unit: UnitId) -> (PlayerId, UnitTypeId) {
    let u = state.unit(unit);
    (u.owner, u.unit_type)
}

impl CasualtyDetails {
    pub fn new(killed: Vec<UnitId>, damaged: Vec<UnitId>, auto_calculated: bool) -> Self {
        CasualtyDetails { killed, damaged, auto_calculated }
    }

    pub fn size(&self) -> usize {
        self.killed.len() + self.damaged.len()
    }

    fn damage_count(&self, unit: UnitId) -> usize {
        self.damaged.iter().filter(|u| **u == unit).count()
    }

    /// Hits this selection soaks up. A killed unit soaks all its remaining
    /// hit points whether or not it is also listed as damaged.
    pub fn hits_absorbed(&self, state: &BattleState) -> usize {
        let mut units: Vec<UnitId> = self.killed.iter().chain(self.damaged.iter()).copied().collect();
        units.sort();
        units.dedup();
        units
            .into_iter()
            .map(|u| {
                if self.killed.contains(&u) {
                    remaining_hit_points(state, u)
                } else {
                    self.damage_count(u)
                }
            })
            .sum()
    }

    /// Contract B: within each (owner, type) group, kill the units the
    /// comparator puts first, keeping the per-group kill count.
    pub fn ensure_units_are_killed_first(
        &mut self,
        state: &BattleState,
        targets: &[UnitId],
        matcher: impl Fn(UnitId) -> bool,
        comparator: impl Fn(UnitId, UnitId) -> Ordering,
    ) {
        let mut killed_per_group: BTreeMap<(PlayerId, UnitTypeId), usize> = BTreeMap::new();
        for unit in self.killed.iter().filter(|u| matcher(**u)) {
            *killed_per_group.entry(owner_and_type(state, *unit)).or_default() += 1;
        }
        if killed_per_group.is_empty() {
            return;
        }

        let mut killed: Vec<UnitId> = self.killed.iter().copied().filter(|u| !matcher(*u)).collect();
        let mut spared: Vec<UnitId> = Vec::new();
        for (group, count) in killed_per_group {
            let mut candidates: Vec<UnitId> = targets
                .iter()
                .copied()
                .filter(|u| matcher(*u) && owner_and_type(state, *u) == group)
                .collect();
            candidates.sort_by(|a, b| comparator(*a, *b).then(a.cmp(b)));
            let chosen: Vec<UnitId> = candidates.into_iter().take(count).collect();
            spared.extend(
                self.killed
                    .iter()
                    .copied()
                    .filter(|u| matcher(*u) && owner_and_type(state, *u) == group && !chosen.contains(u)),
            );
            killed.extend(chosen);
        }

        // damage taken by a unit that now dies moves to a unit it replaced
        let mut spared = spared.into_iter();
        for entry in self.damaged.iter_mut() {
            if killed.contains(entry) {
                if let Some(replacement) = spared.next() {
                    *entry = replacement;
                }
            }
        }
        self.killed = killed;
    }

    /// Contract C: re-deal the matching damage onto the comparator-preferred
    /// units of each (owner, type) group.
    pub fn ensure_units_are_damaged_first(
        &mut self,
        state: &BattleState,
        targets: &[UnitId],
        matcher: impl Fn(UnitId) -> bool,
        comparator: impl Fn(UnitId, UnitId) -> Ordering,
    ) -> Result<()> {
        let mut damaged_per_group: BTreeMap<(PlayerId, UnitTypeId), Vec<UnitId>> = BTreeMap::new();
        for unit in self.damaged.iter().filter(|u| matcher(**u)) {
            damaged_per_group.entry(owner_and_type(state, *unit)).or_default().push(*unit);
        }
        if damaged_per_group.is_empty() {
            return Ok(());
        }

        let mut damaged: Vec<UnitId> = self.damaged.iter().copied().filter(|u| !matcher(*u)).collect();
        for (group, group_damaged) in damaged_per_group {
            let eligible: Vec<UnitId> = targets
                .iter()
                .copied()
                .filter(|u| matcher(*u) && owner_and_type(state, *u) == group && !self.killed.contains(u))
                .collect();
            damaged.extend(redistribute_hits(state, &group_damaged, &eligible, &comparator)?);
        }
        self.damaged = damaged;
        Ok(())
    }

    /// Contract D: amphibious units with a positive marine bonus die last.
    pub fn ensure_units_with_positive_marine_bonus_are_killed_last(&mut self, state: &BattleState, targets: &[UnitId]) {
        let bonus = |u: UnitId| -> i8 {
            if state.unit(u).was_amphibious {
                state.type_of(u).is_marine
            } else {
                0
            }
        };
        self.ensure_units_are_killed_first(
            state,
            targets,
            |u| state.type_of(u).is_marine != 0,
            |a, b| bonus(a).cmp(&bonus(b)),
        );
    }
}

/// Land units that came in amphibiously die before those that did not.
pub fn kill_amphibious_first(details: &mut CasualtyDetails, state: &BattleState, targets: &[UnitId]) {
    details.ensure_units_are_killed_first(
        state,
        targets,
        |u| state.type_of(u).is_land(),
        |a, b| state.unit(b).was_amphibious.cmp(&state.unit(a).was_amphibious),
    );
}

/// Contract C core. `counts` is the per-unit hit multiset, `capacities`
/// the absorbable hits of each eligible unit in preference order.
/// Returns hits assigned per eligible unit.
pub fn redistribute(counts: &[usize], capacities: &[usize]) -> Result<Vec<usize>> {
    let mut counts = counts.to_vec();
    counts.sort_unstable_by(|a, b| b.cmp(a));
    let mut owed = counts.into_iter();

    let mut assigned = vec![0; capacities.len()];
    let mut carry = 0;
    for (slot, capacity) in assigned.iter_mut().zip(capacities) {
        let due = carry + owed.next().unwrap_or(0);
        *slot = due.min(*capacity);
        carry = due - *slot;
    }
    carry += owed.sum::<usize>();
    if carry > 0 {
        return Err(CombatError::InvariantViolation(format!(
            "{} hits left over after redistributing onto {} units",
            carry,
            capacities.len()
        )));
    }
    Ok(assigned)
}

/// Move the hits in `damaged` onto `eligible`, preferred units first.
/// One entry per hit in the result.
pub fn redistribute_hits(
    state: &BattleState,
    damaged: &[UnitId],
    eligible: &[UnitId],
    comparator: impl Fn(UnitId, UnitId) -> Ordering,
) -> Result<Vec<UnitId>> {
    let mut per_unit: BTreeMap<UnitId, usize> = BTreeMap::new();
    for unit in damaged {
        *per_unit.entry(*unit).or_default() += 1;
    }
    let counts: Vec<usize> = per_unit.into_values().collect();

    let mut eligible = eligible.to_vec();
    eligible.sort_by(|a, b| comparator(*a, *b).then(a.cmp(b)));
    eligible.dedup();
    let capacities: Vec<usize> = eligible.iter().map(|u| max_hits_before_death(state, *u)).collect();

    let assigned = redistribute(&counts, &capacities)?;
    let result: Vec<UnitId> = eligible
        .iter()
        .zip(assigned)
        .flat_map(|(unit, n)| std::iter::repeat(*unit).take(n))
        .collect();
    if result.len() != damaged.len() {
        return Err(CombatError::InvariantViolation(format!(
            "redistributed {} hits but {} were taken",
            result.len(),
            damaged.len()
        )));
    }
    Ok(result)
}

// ── Selection ──────────────────────────────────────────────────────────

/// Units of a group's targets that may actually be chosen as casualties.
pub fn casualty_targets(state: &BattleState, targets: &[UnitId]) -> Vec<UnitId> {
    let alive: Vec<UnitId> = targets
        .iter()
        .copied()
        .filter(|u| !state.killed.contains(u))
        .collect();
    if state.rules.transport_casualties_restricted {
        let others: Vec<UnitId> = alive
            .iter()
            .copied()
            .filter(|u| !state.type_of(*u).is_defenseless_transport())
            .collect();
        if !others.is_empty() {
            return others;
        }
    }
    alive
}

pub fn total_hit_points(state: &BattleState, targets: &[UnitId]) -> usize {
    targets.iter().map(|u| remaining_hit_points(state, *u)).sum()
}

/// Engine pick: weakest and cheapest first, soaking hits with spare hit
/// points before anything dies.
pub fn default_casualties(state: &BattleState, hit_side: Side, targets: &[UnitId], hits: usize) -> CasualtyDetails {
    let mut sorted = targets.to_vec();
    sorted.sort_by(|a, b| {
        let (ta, tb) = (state.type_of(*a), state.type_of(*b));
        ta.strength(hit_side)
            .cmp(&tb.strength(hit_side))
            .then(ta.cost.cmp(&tb.cost))
            .then(a.cmp(b))
    });

    if hits >= total_hit_points(state, &sorted) {
        return CasualtyDetails::new(sorted, Vec::new(), true);
    }

    let mut remaining = hits;
    let mut damaged = Vec::new();
    for unit in &sorted {
        let take = max_hits_before_death(state, *unit).min(remaining);
        damaged.extend(std::iter::repeat(*unit).take(take));
        remaining -= take;
    }
    // every target is now one hit from death, so each kill costs one hit
    let killed: Vec<UnitId> = sorted.iter().copied().take(remaining).collect();
    damaged.retain(|u| !killed.contains(u));
    CasualtyDetails::new(killed, damaged, is_auto_selection(state, &sorted))
}

fn is_auto_selection(state: &BattleState, targets: &[UnitId]) -> bool {
    match targets.first() {
        None => true,
        Some(first) => {
            let t = state.unit(*first).unit_type;
            state.unit_type(t).hit_points == 1 && targets.iter().all(|u| state.unit(*u).unit_type == t)
        }
    }
}

/// Check a player's answer against the request it answers.
pub fn validate_selection(state: &BattleState, request: &CasualtyRequest, details: &CasualtyDetails) -> Result<()> {
    for unit in details.killed.iter().chain(details.damaged.iter()) {
        if !request.targets.contains(unit) {
            return Err(CombatError::InvalidAction(format!("unit {} is not a legal casualty", unit.0)));
        }
    }
    let mut killed = details.killed.clone();
    killed.sort();
    killed.dedup();
    if killed.len() != details.killed.len() {
        return Err(CombatError::InvalidAction("a unit is killed twice".into()));
    }
    for unit in &details.damaged {
        if !details.killed.contains(unit) && details.damage_count(*unit) > max_hits_before_death(state, *unit) {
            return Err(CombatError::InvalidAction(format!(
                "unit {} takes more hits than it can survive",
                unit.0
            )));
        }
    }
    let expected = request.hits.min(total_hit_points(state, &request.targets));
    let absorbed = details.hits_absorbed(state);
    if absorbed != expected {
        return Err(CombatError::InvalidAction(format!(
            "selection absorbs {} hits, expected {}",
            absorbed, expected
        )));
    }
    Ok(())
}

/// Ordering policies applied to every selection, player or engine made.
pub fn post_process(state: &BattleState, hit_side: Side, targets: &[UnitId], details: &mut CasualtyDetails) -> Result<()> {
    let is_air = |u: UnitId| state.type_of(u).is_air;
    let movement = |u: UnitId| state.unit(u).movement_left;

    details.ensure_units_are_killed_first(state, targets, is_air, |a, b| movement(a).cmp(&movement(b)));
    details.ensure_units_are_damaged_first(state, targets, is_air, |a, b| movement(b).cmp(&movement(a)))?;
    if hit_side == Side::Offense && state.is_amphibious {
        details.ensure_units_with_positive_marine_bonus_are_killed_last(state, targets);
    }
    if state.rules.partial_amphibious_retreat {
        kill_amphibious_first(details, state, targets);
    }
    Ok(())
}
