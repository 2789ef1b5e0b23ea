// ═══════════════════════════════════════════════════════════════════════
// Unit abilities — combat abilities, conversions and the battle phase list
// ═══════════════════════════════════════════════════════════════════════
//
// Abilities live in an append-only arena. A phase holds, per player, a row
// of slots pointing into the arena. Merging never mutates a record: it
// pushes a new record with the unioned attached types and repoints the
// slot, so every AbilityRef handed out earlier stays valid.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{CombatError, Result};
use crate::types::*;

pub const AA_PHASE: &str = "AA";
pub const BOMBARD_PHASE: &str = "BOMBARD";
pub const FIRST_STRIKE_PHASE: &str = "FIRST_STRIKE";
pub const GENERAL_PHASE: &str = "GENERAL";

pub const DEFAULT_PHASES: [&str; 4] = [AA_PHASE, BOMBARD_PHASE, FIRST_STRIKE_PHASE, GENERAL_PHASE];

// ── Combat ability ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatAbility {
    pub name: String,
    pub attached_unit_types: BTreeSet<UnitTypeId>,
    pub targets: BTreeSet<UnitTypeId>,
    pub dice_type: DiceType,
    pub sides: SideSet,
    /// Last round the ability may be used in. None = every round.
    pub round: Option<u32>,
    pub return_fire: bool,
    pub suicide_on_hit: bool,
    pub suicide_after_fire: SideSet,
}

/// Everything that decides whether two abilities may share one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    targets: BTreeSet<UnitTypeId>,
    dice_type: DiceType,
    sides: SideSet,
    round: Option<u32>,
    return_fire: bool,
    suicide_on_hit: bool,
    suicide_after_fire: SideSet,
    attached: Option<BTreeSet<UnitTypeId>>,
}

impl CombatAbility {
    pub fn new(name: &str, dice_type: DiceType) -> Self {
        CombatAbility {
            name: name.to_string(),
            attached_unit_types: BTreeSet::new(),
            targets: BTreeSet::new(),
            dice_type,
            sides: SideSet::BOTH,
            round: None,
            return_fire: true,
            suicide_on_hit: false,
            suicide_after_fire: SideSet::NONE,
        }
    }

    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            targets: self.targets.clone(),
            dice_type: self.dice_type,
            sides: self.sides,
            round: self.round,
            return_fire: self.return_fire,
            suicide_on_hit: self.suicide_on_hit,
            suicide_after_fire: self.suicide_after_fire,
            // suicide-on-hit records must never be shared across unit types
            attached: self.suicide_on_hit.then(|| self.attached_unit_types.clone()),
        }
    }

    pub fn can_merge_attached_unit_types(&self, other: &CombatAbility) -> bool {
        self.merge_key() == other.merge_key()
    }

    /// A fresh record carrying the union of both attached type sets.
    pub fn merged_with(&self, other: &CombatAbility) -> CombatAbility {
        let mut merged = self.clone();
        merged
            .attached_unit_types
            .extend(other.attached_unit_types.iter().copied());
        merged
    }

    pub fn usable_in_round(&self, round: u32) -> bool {
        self.round.map_or(true, |last| round <= last)
    }
}

// ── Handles ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbilityId(pub u32);

/// Stable handle to a slot in a phase row. Survives merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbilityRef {
    pub phase: usize,
    pub player: PlayerId,
    pub slot: usize,
}

// ── Conversions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    /// Trigger unit fights on the same side.
    Friendly,
    /// Trigger unit fights on the opposing side.
    Foe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertAbility {
    pub name: String,
    pub player: PlayerId,
    pub attached_unit_types: BTreeSet<UnitTypeId>,
    pub team: Team,
    pub from: AbilityRef,
    /// None removes the ability outright.
    pub to: Option<AbilityRef>,
}

impl ConvertAbility {
    fn same_conversion(&self, other: &ConvertAbility) -> bool {
        self.name == other.name
            && self.player == other.player
            && self.team == other.team
            && self.from == other.from
            && self.to == other.to
    }

    /// Whether a trigger unit is present for units fighting on `side`.
    pub fn is_active(&self, state: &BattleState, side: Side) -> bool {
        let trigger_side = match self.team {
            Team::Friendly => side,
            Team::Foe => side.opposite(),
        };
        state
            .active(trigger_side)
            .iter()
            .any(|u| self.attached_unit_types.contains(&state.unit(*u).unit_type))
    }
}

// ── Phases ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerRow {
    player: PlayerId,
    slots: Vec<AbilityId>,
    #[serde(skip)]
    index: HashMap<MergeKey, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePhase {
    pub name: String,
    rows: Vec<PlayerRow>,
}

impl BattlePhase {
    fn new(name: &str) -> Self {
        BattlePhase { name: name.to_string(), rows: Vec::new() }
    }

    fn row(&self, player: PlayerId) -> Option<&PlayerRow> {
        self.rows.iter().find(|r| r.player == player)
    }

    fn row_mut(&mut self, player: PlayerId) -> &mut PlayerRow {
        match self.rows.iter().position(|r| r.player == player) {
            Some(pos) => &mut self.rows[pos],
            None => {
                self.rows.push(PlayerRow { player, slots: Vec::new(), index: HashMap::new() });
                let last = self.rows.len() - 1;
                &mut self.rows[last]
            }
        }
    }
}

/// Units of one side currently governed by one ability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitAbilityAndUnits {
    pub ability: AbilityRef,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattlePhaseStep {
    pub phase: String,
    pub side: Side,
    pub abilities: Vec<UnitAbilityAndUnits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePhaseList {
    phases: Vec<BattlePhase>,
    arena: Vec<CombatAbility>,
    converts: Vec<ConvertAbility>,
}

impl Default for BattlePhaseList {
    fn default() -> Self {
        BattlePhaseList::with_phases(&DEFAULT_PHASES)
    }
}

impl BattlePhaseList {
    pub fn with_phases(names: &[&str]) -> Self {
        BattlePhaseList {
            phases: names.iter().map(|n| BattlePhase::new(n)).collect(),
            arena: Vec::new(),
            converts: Vec::new(),
        }
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    fn phase_index(&self, name: &str) -> Result<usize> {
        self.phases
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CombatError::UnknownPhase {
                name: name.to_string(),
                existing: self.phase_names().join(", "),
            })
    }

    pub fn phase(&self, name: &str) -> Result<&BattlePhase> {
        let idx = self.phase_index(name)?;
        Ok(&self.phases[idx])
    }

    /// Drop every ability and conversion, keeping the phase names.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.converts.clear();
        for phase in &mut self.phases {
            phase.rows.clear();
        }
    }

    pub fn get(&self, r: AbilityRef) -> Result<&CombatAbility> {
        let phase = self.phases.get(r.phase).ok_or_else(|| CombatError::UnknownPhase {
            name: format!("#{}", r.phase),
            existing: self.phase_names().join(", "),
        })?;
        phase
            .row(r.player)
            .and_then(|row| row.slots.get(r.slot))
            .and_then(|id| self.arena.get(id.0 as usize))
            .ok_or_else(|| {
                CombatError::InvariantViolation(format!(
                    "no ability in {} for player {} slot {}",
                    phase.name, r.player.0, r.slot
                ))
            })
    }

    pub fn phase_name(&self, r: AbilityRef) -> &str {
        &self.phases[r.phase].name
    }

    pub fn converts(&self) -> &[ConvertAbility] {
        &self.converts
    }

    /// Abilities of a player in a phase, slot order.
    pub fn abilities_of(&self, phase: &str, player: PlayerId) -> Result<Vec<(AbilityRef, &CombatAbility)>> {
        let idx = self.phase_index(phase)?;
        Ok(self.phases[idx]
            .row(player)
            .map(|row| {
                row.slots
                    .iter()
                    .enumerate()
                    .map(|(slot, id)| (AbilityRef { phase: idx, player, slot }, &self.arena[id.0 as usize]))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Add an ability, merging it into an equal-keyed record of the same
    /// phase and player when one exists. Returns the slot it landed in.
    pub fn add_ability(&mut self, player: PlayerId, phase: &str, ability: CombatAbility) -> Result<AbilityRef> {
        let phase_idx = self.phase_index(phase)?;
        let key = ability.merge_key();
        let BattlePhaseList { phases, arena, .. } = self;
        let row = phases[phase_idx].row_mut(player);

        let record = match row.index.get(&key) {
            Some(&slot) => {
                let merged = arena[row.slots[slot].0 as usize].merged_with(&ability);
                (slot, merged)
            }
            None => {
                row.slots.push(AbilityId(u32::MAX));
                let slot = row.slots.len() - 1;
                row.index.insert(key, slot);
                (slot, ability)
            }
        };
        let (slot, ability) = record;
        arena.push(ability);
        row.slots[slot] = AbilityId((arena.len() - 1) as u32);
        Ok(AbilityRef { phase: phase_idx, player, slot })
    }

    pub fn add_convert(&mut self, convert: ConvertAbility) {
        match self.converts.iter_mut().find(|c| c.same_conversion(&convert)) {
            Some(existing) => existing
                .attached_unit_types
                .extend(convert.attached_unit_types.iter().copied()),
            None => self.converts.push(convert),
        }
    }

    /// Rebuild the merge-key indexes after deserialization.
    pub fn reindex(&mut self) {
        let BattlePhaseList { phases, arena, .. } = self;
        for phase in phases.iter_mut() {
            for row in phase.rows.iter_mut() {
                row.index = row
                    .slots
                    .iter()
                    .enumerate()
                    .map(|(slot, id)| (arena[id.0 as usize].merge_key(), slot))
                    .collect();
            }
        }
    }

    // ── Resolution ─────────────────────────────────────────────────────

    /// Follow active conversions from one ability. Friendly conversions
    /// are taken before foe ones; a conversion to nothing ends the chain.
    fn convert(&self, state: &BattleState, side: Side, start: AbilityRef) -> Option<AbilityRef> {
        let mut current = start;
        let mut seen = vec![start];
        loop {
            let next = [Team::Friendly, Team::Foe].iter().find_map(|team| {
                self.converts.iter().find(|c| {
                    c.team == *team && c.from == current && c.is_active(state, side)
                })
            });
            match next {
                None => return Some(current),
                Some(c) => match c.to {
                    None => return None,
                    Some(to) if seen.contains(&to) => return Some(current),
                    Some(to) => {
                        seen.push(to);
                        current = to;
                    }
                },
            }
        }
    }

    /// Abilities a single unit holds on `side`, after conversions.
    pub fn unit_abilities(&self, state: &BattleState, side: Side, unit: UnitId) -> Vec<AbilityRef> {
        let u = state.unit(unit);
        let mut refs = Vec::new();
        for (phase_idx, phase) in self.phases.iter().enumerate() {
            let Some(row) = phase.row(u.owner) else { continue };
            for (slot, id) in row.slots.iter().enumerate() {
                let ability = &self.arena[id.0 as usize];
                if !ability.attached_unit_types.contains(&u.unit_type) {
                    continue;
                }
                let start = AbilityRef { phase: phase_idx, player: u.owner, slot };
                if let Some(r) = self.convert(state, side, start) {
                    if self.get(r).is_ok_and(|a| a.sides.contains(side)) && !refs.contains(&r) {
                        refs.push(r);
                    }
                }
            }
        }
        refs
    }

    /// First resolved ability of a dice type for a unit.
    pub fn unit_ability(&self, state: &BattleState, side: Side, unit: UnitId, dice_type: DiceType) -> Option<&CombatAbility> {
        self.unit_abilities(state, side, unit)
            .into_iter()
            .filter_map(|r| self.get(r).ok())
            .find(|a| a.dice_type == dice_type)
    }

    /// Group a side's active units by the abilities they resolve to.
    pub fn resolve(&self, state: &BattleState, side: Side) -> Vec<UnitAbilityAndUnits> {
        let mut groups: Vec<UnitAbilityAndUnits> = Vec::new();
        for unit in state.active(side) {
            for r in self.unit_abilities(state, side, unit) {
                match groups.iter_mut().find(|g| g.ability == r) {
                    Some(group) => group.units.push(unit),
                    None => groups.push(UnitAbilityAndUnits { ability: r, units: vec![unit] }),
                }
            }
        }
        groups.sort_by_key(|g| g.ability);
        groups
    }

    /// At most one step per (phase, side) that has units to act.
    pub fn battle_steps(&self, state: &BattleState) -> Vec<BattlePhaseStep> {
        let mut steps = Vec::new();
        let resolved: Vec<(Side, Vec<UnitAbilityAndUnits>)> =
            Side::ALL.iter().map(|s| (*s, self.resolve(state, *s))).collect();
        for (phase_idx, phase) in self.phases.iter().enumerate() {
            for (side, groups) in &resolved {
                let abilities: Vec<UnitAbilityAndUnits> = groups
                    .iter()
                    .filter(|g| g.ability.phase == phase_idx)
                    .cloned()
                    .collect();
                if !abilities.is_empty() {
                    steps.push(BattlePhaseStep { phase: phase.name.clone(), side: *side, abilities });
                }
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{Scenario, UnitTypeSpec};

    fn state_with(attacking: &[&str], defending: &[&str]) -> BattleState {
        let mut scenario = Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec::new("infantry", 1, 2))
            .unit_type(UnitTypeSpec::new("artillery", 2, 2));
        for name in attacking {
            scenario = scenario.attacking(name, 1);
        }
        for name in defending {
            scenario = scenario.defending(name, 1);
        }
        scenario.into_state().unwrap()
    }

    fn attached(state: &BattleState, names: &[&str]) -> BTreeSet<UnitTypeId> {
        names.iter().map(|n| state.find_unit_type(n).unwrap()).collect()
    }

    #[test]
    fn test_unknown_phase_lists_existing() {
        let mut list = BattlePhaseList::default();
        let err = list
            .add_ability(PlayerId(0), "NOPE", CombatAbility::new("x", DiceType::Normal))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NOPE"));
        assert!(msg.contains("AA, BOMBARD, FIRST_STRIKE, GENERAL"));
    }

    #[test]
    fn test_dangling_ref_is_an_error() {
        let mut list = BattlePhaseList::default();
        let r = list.add_ability(PlayerId(0), GENERAL_PHASE, CombatAbility::new("x", DiceType::Normal)).unwrap();
        assert_eq!(list.get(r).unwrap().name, "x");
        assert!(matches!(list.get(AbilityRef { slot: 5, ..r }), Err(CombatError::InvariantViolation(_))));
        assert!(matches!(list.get(AbilityRef { player: PlayerId(3), ..r }), Err(CombatError::InvariantViolation(_))));
        assert!(matches!(list.get(AbilityRef { phase: 9, ..r }), Err(CombatError::UnknownPhase { .. })));
    }

    #[test]
    fn test_merge_ignores_name_and_attached() {
        let state = state_with(&["infantry"], &[]);
        let mut a = CombatAbility::new("one", DiceType::Normal);
        a.attached_unit_types = attached(&state, &["infantry"]);
        let mut b = CombatAbility::new("two", DiceType::Normal);
        b.attached_unit_types = attached(&state, &["artillery"]);
        assert!(a.can_merge_attached_unit_types(&b));

        let mut list = BattlePhaseList::default();
        let ra = list.add_ability(PlayerId(0), GENERAL_PHASE, a).unwrap();
        let rb = list.add_ability(PlayerId(0), GENERAL_PHASE, b).unwrap();
        assert_eq!(ra, rb);
        assert_eq!(list.get(ra).unwrap().name, "one");
        assert_eq!(list.get(ra).unwrap().attached_unit_types, attached(&state, &["infantry", "artillery"]));
    }

    #[test]
    fn test_suicide_on_hit_never_shares_across_types() {
        let state = state_with(&["infantry"], &[]);
        let mut a = CombatAbility::new("units", DiceType::Normal);
        a.suicide_on_hit = true;
        a.attached_unit_types = attached(&state, &["infantry"]);
        let mut b = a.clone();
        b.attached_unit_types = attached(&state, &["artillery"]);
        assert!(!a.can_merge_attached_unit_types(&b));

        let mut list = BattlePhaseList::default();
        let ra = list.add_ability(PlayerId(0), GENERAL_PHASE, a).unwrap();
        let rb = list.add_ability(PlayerId(0), GENERAL_PHASE, b).unwrap();
        assert_ne!(ra, rb);
    }

    #[test]
    fn test_merge_keeps_old_refs_valid() {
        let state = state_with(&["infantry"], &[]);
        let mut list = BattlePhaseList::default();
        let mut a = CombatAbility::new("units", DiceType::Normal);
        a.attached_unit_types = attached(&state, &["infantry"]);
        let first = list.add_ability(PlayerId(0), GENERAL_PHASE, a.clone()).unwrap();
        let before = list.get(first).unwrap().clone();
        a.attached_unit_types = attached(&state, &["artillery"]);
        list.add_ability(PlayerId(0), GENERAL_PHASE, a).unwrap();
        assert_eq!(before.attached_unit_types.len(), 1);
        assert_eq!(list.get(first).unwrap().attached_unit_types.len(), 2);
    }

    #[test]
    fn test_no_attached_types_makes_no_steps() {
        let mut state = state_with(&["infantry"], &[]);
        state
            .abilities
            .add_ability(state.attacker, GENERAL_PHASE, CombatAbility::new("1", DiceType::Normal))
            .unwrap();
        assert!(state.abilities.battle_steps(&state).is_empty());
    }

    #[test]
    fn test_attached_type_without_units_makes_no_steps() {
        let mut state = state_with(&["infantry"], &[]);
        let mut ability = CombatAbility::new("1", DiceType::Normal);
        ability.attached_unit_types = attached(&state, &["artillery"]);
        state.abilities.add_ability(state.attacker, GENERAL_PHASE, ability).unwrap();
        assert!(state.abilities.battle_steps(&state).is_empty());
    }

    #[test]
    fn test_one_step_per_phase_and_side() {
        let mut state = state_with(&["infantry"], &["infantry"]);
        let mut ability = CombatAbility::new("1", DiceType::Normal);
        ability.attached_unit_types = attached(&state, &["infantry"]);
        let (attacker, defender) = (state.attacker, state.defender);
        state.abilities.add_ability(attacker, GENERAL_PHASE, ability.clone()).unwrap();
        ability.return_fire = false;
        state.abilities.add_ability(attacker, GENERAL_PHASE, ability.clone()).unwrap();
        state.abilities.add_ability(defender, GENERAL_PHASE, ability.clone()).unwrap();
        state.abilities.add_ability(attacker, FIRST_STRIKE_PHASE, ability).unwrap();

        let steps = state.abilities.battle_steps(&state);
        let keys: Vec<(&str, Side)> = steps.iter().map(|s| (s.phase.as_str(), s.side)).collect();
        assert_eq!(
            keys,
            vec![
                (FIRST_STRIKE_PHASE, Side::Offense),
                (GENERAL_PHASE, Side::Offense),
                (GENERAL_PHASE, Side::Defense),
            ]
        );
    }

    #[test]
    fn test_conversion_moves_units_to_other_phase() {
        let mut state = state_with(&["infantry", "artillery"], &[]);
        let attacker = state.attacker;
        let mut initial = CombatAbility::new("1", DiceType::Normal);
        initial.attached_unit_types = attached(&state, &["infantry"]);
        let mut converted = CombatAbility::new("2", DiceType::Normal);
        converted.return_fire = false;
        let from = state.abilities.add_ability(attacker, GENERAL_PHASE, initial).unwrap();
        let to = state.abilities.add_ability(attacker, FIRST_STRIKE_PHASE, converted).unwrap();
        state.abilities.add_convert(ConvertAbility {
            name: "convert".into(),
            player: attacker,
            attached_unit_types: attached(&state, &["artillery"]),
            team: Team::Friendly,
            from,
            to: Some(to),
        });

        let steps = state.abilities.battle_steps(&state);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].phase, FIRST_STRIKE_PHASE);
        assert_eq!(steps[0].abilities.len(), 1);
        assert_eq!(steps[0].abilities[0].ability, to);
    }

    #[test]
    fn test_conversion_without_target_removes_ability() {
        let mut state = state_with(&["infantry", "artillery"], &[]);
        let attacker = state.attacker;
        let mut initial = CombatAbility::new("1", DiceType::Normal);
        initial.attached_unit_types = attached(&state, &["infantry"]);
        let from = state.abilities.add_ability(attacker, GENERAL_PHASE, initial).unwrap();
        state.abilities.add_convert(ConvertAbility {
            name: "convert".into(),
            player: attacker,
            attached_unit_types: attached(&state, &["artillery"]),
            team: Team::Friendly,
            from,
            to: None,
        });
        assert!(state.abilities.battle_steps(&state).is_empty());
    }

    #[test]
    fn test_foe_conversion_needs_enemy_trigger() {
        let mut state = state_with(&["infantry", "artillery"], &["infantry"]);
        let attacker = state.attacker;
        let mut initial = CombatAbility::new("1", DiceType::Normal);
        initial.attached_unit_types = attached(&state, &["infantry"]);
        let from = state.abilities.add_ability(attacker, GENERAL_PHASE, initial).unwrap();
        state.abilities.add_convert(ConvertAbility {
            name: "convert".into(),
            player: attacker,
            attached_unit_types: attached(&state, &["artillery"]),
            team: Team::Foe,
            from,
            to: None,
        });
        // artillery is friendly here, so nothing converts
        assert_eq!(state.abilities.battle_steps(&state).len(), 1);
    }

    #[test]
    fn test_reindex_restores_merging() {
        let state = state_with(&["infantry"], &[]);
        let mut list = BattlePhaseList::default();
        let mut a = CombatAbility::new("units", DiceType::Normal);
        a.attached_unit_types = attached(&state, &["infantry"]);
        list.add_ability(PlayerId(0), GENERAL_PHASE, a.clone()).unwrap();

        let json = serde_json::to_string(&list).unwrap();
        let mut loaded: BattlePhaseList = serde_json::from_str(&json).unwrap();
        loaded.reindex();
        a.attached_unit_types = attached(&state, &["artillery"]);
        let r = loaded.add_ability(PlayerId(0), GENERAL_PHASE, a).unwrap();
        assert_eq!(r.slot, 0);
        assert_eq!(loaded.get(r).unwrap().attached_unit_types.len(), 2);
    }
}
