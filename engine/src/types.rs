// ═══════════════════════════════════════════════════════════════════════
// Core types — units, unit types, players, territories and BattleState
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ability::BattlePhaseList;
use crate::casualty::CasualtyRequest;
use crate::config::RuleConfig;
use crate::engine::Continuation;
use crate::retreat::RetreatRequest;

// ── Enums ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Offense,
    Defense,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Offense, Side::Defense];

    pub fn opposite(self) -> Side {
        match self {
            Side::Offense => Side::Defense,
            Side::Defense => Side::Offense,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Offense => write!(f, "offense"),
            Side::Defense => write!(f, "defense"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Alive,
    WaitingToDie,
}

impl Status {
    pub const ALL: [Status; 2] = [Status::Alive, Status::WaitingToDie];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiceType {
    Aa,
    Bombard,
    Normal,
}

/// What kind of fire produced a set of hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireKind {
    Aa,
    Bombard,
    FirstStrike,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhoWon {
    Attacker,
    Defender,
    Draw,
}

impl std::fmt::Display for WhoWon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhoWon::Attacker => write!(f, "attacker"),
            WhoWon::Defender => write!(f, "defender"),
            WhoWon::Draw => write!(f, "draw"),
        }
    }
}

// ── Ids ────────────────────────────────────────────────────────────────
// Compact, copyable identifiers. Each indexes into its BattleState table.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitTypeId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerritoryId(pub u16);

// ── Side set ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SideSet {
    pub offense: bool,
    pub defense: bool,
}

impl SideSet {
    pub const NONE: SideSet = SideSet { offense: false, defense: false };
    pub const BOTH: SideSet = SideSet { offense: true, defense: true };

    pub fn of(sides: &[Side]) -> SideSet {
        let mut set = SideSet::NONE;
        for side in sides {
            set.insert(*side);
        }
        set
    }

    pub fn insert(&mut self, side: Side) {
        match side {
            Side::Offense => self.offense = true,
            Side::Defense => self.defense = true,
        }
    }

    pub fn contains(&self, side: Side) -> bool {
        match side {
            Side::Offense => self.offense,
            Side::Defense => self.defense,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.offense && !self.defense
    }
}

// ── Unit types ─────────────────────────────────────────────────────────

/// Anti-aircraft block of a unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AaAttachment {
    pub type_aa: String,
    pub attack_aa: u8,
    pub offensive_attack_aa: u8,
    /// -1 = one shot per eligible target
    pub max_aa_attacks: i32,
    /// -1 = every round
    pub max_rounds_aa: i32,
    pub targets_aa: BTreeSet<UnitTypeId>,
    pub will_not_fire_if_present: BTreeSet<UnitTypeId>,
}

/// Raw per-type rule flags. Abilities are derived from these once per
/// battle phase start (see `generator`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitType {
    pub id: UnitTypeId,
    pub name: String,
    pub attack: u8,
    pub defense: u8,
    pub attack_rolls: u8,
    pub defense_rolls: u8,
    pub hit_points: u8,
    pub cost: u32,
    pub is_air: bool,
    pub is_sea: bool,
    pub is_first_strike: bool,
    pub can_evade: bool,
    pub is_destroyer: bool,
    pub is_infrastructure: bool,
    pub is_sea_transport: bool,
    pub is_suicide_on_attack: bool,
    pub is_suicide_on_defense: bool,
    pub is_suicide_on_hit: bool,
    pub can_not_target: BTreeSet<UnitTypeId>,
    pub can_not_be_targeted_by: BTreeSet<UnitTypeId>,
    pub can_bombard: bool,
    pub bombard: u8,
    /// Strength bonus when attacking out of an amphibious landing.
    pub is_marine: i8,
    pub aa: Option<AaAttachment>,
}

impl UnitType {
    pub fn new(id: UnitTypeId, name: &str) -> Self {
        UnitType {
            id,
            name: name.to_string(),
            attack: 0,
            defense: 0,
            attack_rolls: 1,
            defense_rolls: 1,
            hit_points: 1,
            cost: 0,
            is_air: false,
            is_sea: false,
            is_first_strike: false,
            can_evade: false,
            is_destroyer: false,
            is_infrastructure: false,
            is_sea_transport: false,
            is_suicide_on_attack: false,
            is_suicide_on_defense: false,
            is_suicide_on_hit: false,
            can_not_target: BTreeSet::new(),
            can_not_be_targeted_by: BTreeSet::new(),
            can_bombard: false,
            bombard: 0,
            is_marine: 0,
            aa: None,
        }
    }

    pub fn strength(&self, side: Side) -> u8 {
        match side {
            Side::Offense => self.attack,
            Side::Defense => self.defense,
        }
    }

    pub fn rolls(&self, side: Side) -> u8 {
        match side {
            Side::Offense => self.attack_rolls,
            Side::Defense => self.defense_rolls,
        }
    }

    pub fn is_land(&self) -> bool {
        !self.is_air && !self.is_sea
    }

    pub fn is_defenseless_transport(&self) -> bool {
        self.is_sea_transport && self.attack == 0 && self.defense == 0
    }

    pub fn is_suicide_on(&self, side: Side) -> bool {
        match side {
            Side::Offense => self.is_suicide_on_attack,
            Side::Defense => self.is_suicide_on_defense,
        }
    }
}

// ── Unit ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub unit_type: UnitTypeId,
    pub owner: PlayerId,
    pub hits: u8,
    pub was_amphibious: bool,
    pub movement_left: u8,
    pub submerged: bool,
}

// ── Players and territories ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub alliance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Territory {
    pub id: TerritoryId,
    pub name: String,
    pub is_water: bool,
    pub owner: Option<PlayerId>,
    pub neighbors: Vec<TerritoryId>,
    /// Players with units standing in this territory (outside the battle).
    pub occupied_by: BTreeSet<PlayerId>,
}

// ── Retreat record ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetreatRecord {
    pub side: Side,
    pub units: Vec<UnitId>,
    pub to: TerritoryId,
    pub submerged: bool,
}

// ── Pending decision ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingDecision {
    /// Hit player must pick which targets absorb the hits.
    SelectCasualties(CasualtyRequest),
    /// Controlling player picks a retreat/submerge destination (or stays).
    Retreat(RetreatRequest),
}

impl PendingDecision {
    pub fn player(&self) -> PlayerId {
        match self {
            PendingDecision::SelectCasualties(request) => request.player,
            PendingDecision::Retreat(request) => request.player,
        }
    }
}

// ── Battle state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideUnits {
    pub alive: Vec<UnitId>,
    pub waiting_to_die: Vec<UnitId>,
}

impl SideUnits {
    fn bucket(&self, status: Status) -> &Vec<UnitId> {
        match status {
            Status::Alive => &self.alive,
            Status::WaitingToDie => &self.waiting_to_die,
        }
    }

    fn remove(&mut self, ids: &[UnitId]) {
        self.alive.retain(|u| !ids.contains(u));
        self.waiting_to_die.retain(|u| !ids.contains(u));
    }
}

/// Per-battle aggregate. Every step reads and mutates this record; it is
/// fully serializable so a battle can be saved and resumed mid-round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleState {
    pub site: TerritoryId,
    pub attacker: PlayerId,
    pub defender: PlayerId,
    pub round: u32,
    pub is_amphibious: bool,
    pub rules: RuleConfig,

    pub unit_types: Vec<UnitType>,
    pub players: Vec<Player>,
    pub territories: Vec<Territory>,
    /// Unit table, indexed by UnitId.
    pub units: Vec<Unit>,

    pub offense: SideUnits,
    pub defense: SideUnits,
    /// Offensive units bombarding from outside the site (never targets).
    pub bombarding: Vec<UnitId>,
    pub attacking_from: Vec<TerritoryId>,

    pub killed: Vec<UnitId>,
    pub retreats: Vec<RetreatRecord>,

    pub abilities: BattlePhaseList,
    /// Continuation stack; the top is the last element.
    pub stack: Vec<Continuation>,
    /// Display names of the steps derived for the current round.
    pub step_names: Vec<String>,

    pub pending: Option<PendingDecision>,
    pub outcome: Option<WhoWon>,
}

impl BattleState {
    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.0 as usize]
    }

    pub fn unit_mut(&mut self, id: UnitId) -> &mut Unit {
        &mut self.units[id.0 as usize]
    }

    pub fn unit_type(&self, id: UnitTypeId) -> &UnitType {
        &self.unit_types[id.0 as usize]
    }

    pub fn find_unit_type(&self, name: &str) -> Option<UnitTypeId> {
        self.unit_types.iter().find(|t| t.name == name).map(|t| t.id)
    }

    pub fn find_territory(&self, name: &str) -> Option<TerritoryId> {
        self.territories.iter().find(|t| t.name == name).map(|t| t.id)
    }

    /// Type of a unit.
    pub fn type_of(&self, id: UnitId) -> &UnitType {
        self.unit_type(self.unit(id).unit_type)
    }

    pub fn player(&self, id: PlayerId) -> &Player {
        &self.players[id.0 as usize]
    }

    pub fn player_name(&self, id: PlayerId) -> &str {
        &self.player(id).name
    }

    pub fn territory(&self, id: TerritoryId) -> &Territory {
        &self.territories[id.0 as usize]
    }

    pub fn battle_site(&self) -> &Territory {
        self.territory(self.site)
    }

    pub fn player_for(&self, side: Side) -> PlayerId {
        match side {
            Side::Offense => self.attacker,
            Side::Defense => self.defender,
        }
    }

    pub fn is_allied(&self, a: PlayerId, b: PlayerId) -> bool {
        a == b || self.player(a).alliance == self.player(b).alliance
    }

    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn side_units(&self, side: Side) -> &SideUnits {
        match side {
            Side::Offense => &self.offense,
            Side::Defense => &self.defense,
        }
    }

    fn side_units_mut(&mut self, side: Side) -> &mut SideUnits {
        match side {
            Side::Offense => &mut self.offense,
            Side::Defense => &mut self.defense,
        }
    }

    pub fn units_in(&self, side: Side, status: Status) -> &[UnitId] {
        self.side_units(side).bucket(status)
    }

    /// Units of a side in any of the given statuses, alive first.
    pub fn filter_units(&self, side: Side, statuses: &[Status]) -> Vec<UnitId> {
        Status::ALL
            .iter()
            .filter(|s| statuses.contains(s))
            .flat_map(|s| self.units_in(side, *s).iter().copied())
            .collect()
    }

    pub fn alive(&self, side: Side) -> Vec<UnitId> {
        self.units_in(side, Status::Alive).to_vec()
    }

    /// Alive and waiting-to-die units.
    pub fn active(&self, side: Side) -> Vec<UnitId> {
        self.filter_units(side, &Status::ALL)
    }

    pub fn any_unit(&self, side: Side, statuses: &[Status], pred: impl Fn(&UnitType) -> bool) -> bool {
        self.filter_units(side, statuses)
            .iter()
            .any(|u| pred(self.type_of(*u)))
    }

    /// Unit types present on a side (alive or waiting to die).
    pub fn types_present(&self, side: Side) -> BTreeSet<UnitTypeId> {
        self.active(side).iter().map(|u| self.unit(*u).unit_type).collect()
    }

    /// Move hit units from alive to waiting-to-die.
    pub fn mark_waiting_to_die(&mut self, side: Side, ids: &[UnitId]) {
        let units = self.side_units_mut(side);
        for id in ids {
            if let Some(pos) = units.alive.iter().position(|u| u == id) {
                units.alive.remove(pos);
                units.waiting_to_die.push(*id);
            }
        }
    }

    /// Remove a side's waiting-to-die units from the battle for good.
    pub fn clear_waiting_to_die(&mut self, side: Side) -> Vec<UnitId> {
        let removed = std::mem::take(&mut self.side_units_mut(side).waiting_to_die);
        self.killed.extend(removed.iter().copied());
        removed
    }

    /// Kill units straight away, skipping the waiting-to-die bucket.
    pub fn kill_now(&mut self, side: Side, ids: &[UnitId]) {
        self.side_units_mut(side).remove(ids);
        for id in ids {
            if !self.killed.contains(id) {
                self.killed.push(*id);
            }
        }
    }

    /// Take units out of the combat pools without killing them.
    pub fn remove_from_combat(&mut self, side: Side, ids: &[UnitId]) {
        self.side_units_mut(side).remove(ids);
    }

    /// Where a side's units may retreat to, excluding the battle site.
    pub fn retreat_territories(&self, side: Side) -> Vec<TerritoryId> {
        let player = self.player_for(side);
        let hostile = |t: &Territory| t.occupied_by.iter().any(|p| !self.is_allied(*p, player));
        match side {
            Side::Offense => self
                .attacking_from
                .iter()
                .copied()
                .filter(|t| *t != self.site)
                .filter(|t| {
                    let territory = self.territory(*t);
                    !hostile(territory)
                        && (territory.is_water
                            || territory.owner.is_some_and(|o| self.is_allied(o, player)))
                })
                .collect(),
            Side::Defense => self
                .battle_site()
                .neighbors
                .iter()
                .copied()
                .filter(|t| {
                    let territory = self.territory(*t);
                    territory.is_water && !hostile(territory)
                })
                .collect(),
        }
    }

    pub fn unit_names(&self, ids: &[UnitId]) -> String {
        ids.iter()
            .map(|u| self.type_of(*u).name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
