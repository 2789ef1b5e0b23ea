// ═══════════════════════════════════════════════════════════════════════
// Battle setup — scenario files (TOML) and the BattleState they produce
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::ability::BattlePhaseList;
use crate::config::RuleConfig;
use crate::error::{CombatError, Result};
use crate::types::*;

// ── Scenario file model ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub rules: RuleConfig,
    pub players: Vec<PlayerSpec>,
    #[serde(default)]
    pub territories: Vec<TerritorySpec>,
    pub unit_types: Vec<UnitTypeSpec>,
    pub battle: BattleSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSpec {
    pub name: String,
    /// Defaults to the player's own name (no allies).
    #[serde(default)]
    pub alliance: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerritorySpec {
    pub name: String,
    pub water: bool,
    pub owner: Option<String>,
    pub neighbors: Vec<String>,
    pub occupied_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitTypeSpec {
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
    pub can_not_target: Vec<String>,
    pub can_not_be_targeted_by: Vec<String>,
    pub can_bombard: bool,
    /// Defaults to `attack`.
    pub bombard: Option<u8>,
    pub is_marine: i8,
    pub aa: Option<AaSpec>,
}

impl Default for UnitTypeSpec {
    fn default() -> Self {
        UnitTypeSpec {
            name: String::new(),
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
            can_not_target: Vec::new(),
            can_not_be_targeted_by: Vec::new(),
            can_bombard: false,
            bombard: None,
            is_marine: 0,
            aa: None,
        }
    }
}

impl UnitTypeSpec {
    pub fn new(name: &str, attack: u8, defense: u8) -> Self {
        UnitTypeSpec { name: name.to_string(), attack, defense, ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AaSpec {
    pub type_aa: String,
    pub attack_aa: u8,
    pub offensive_attack_aa: u8,
    pub max_aa_attacks: i32,
    pub max_rounds_aa: i32,
    pub targets_aa: Vec<String>,
    pub will_not_fire_if_present: Vec<String>,
}

impl Default for AaSpec {
    fn default() -> Self {
        AaSpec {
            type_aa: "AA".to_string(),
            attack_aa: 0,
            offensive_attack_aa: 0,
            max_aa_attacks: -1,
            max_rounds_aa: -1,
            targets_aa: Vec::new(),
            will_not_fire_if_present: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleSpec {
    pub site: String,
    pub attacker: String,
    pub defender: String,
    #[serde(default)]
    pub amphibious: bool,
    #[serde(default)]
    pub attacking_from: Vec<String>,
    #[serde(default = "first_round")]
    pub round: u32,
    #[serde(default)]
    pub attacking: Vec<StackSpec>,
    #[serde(default)]
    pub defending: Vec<StackSpec>,
    #[serde(default)]
    pub bombarding: Vec<StackSpec>,
}

fn first_round() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSpec {
    #[serde(rename = "type")]
    pub unit_type: String,
    pub count: u32,
    /// Defaults to the side's player.
    pub owner: Option<String>,
    pub hits: u8,
    pub was_amphibious: bool,
    pub movement_left: u8,
}

impl Default for StackSpec {
    fn default() -> Self {
        StackSpec {
            unit_type: String::new(),
            count: 1,
            owner: None,
            hits: 0,
            was_amphibious: false,
            movement_left: 0,
        }
    }
}

impl StackSpec {
    pub fn new(unit_type: &str, count: u32) -> Self {
        StackSpec { unit_type: unit_type.to_string(), count, ..Default::default() }
    }
}

// ── Builder ────────────────────────────────────────────────────────────
// Programmatic scenarios: "Russians" (Allies) attack "Germans" (Axis).

impl Scenario {
    pub fn new(site: &str, water: bool) -> Self {
        Scenario {
            rules: RuleConfig::default(),
            players: vec![
                PlayerSpec { name: "Russians".into(), alliance: Some("Allies".into()) },
                PlayerSpec { name: "Germans".into(), alliance: Some("Axis".into()) },
            ],
            territories: vec![TerritorySpec {
                name: site.to_string(),
                water,
                owner: (!water).then(|| "Germans".to_string()),
                ..Default::default()
            }],
            unit_types: Vec::new(),
            battle: BattleSpec {
                site: site.to_string(),
                attacker: "Russians".into(),
                defender: "Germans".into(),
                amphibious: false,
                attacking_from: Vec::new(),
                round: 1,
                attacking: Vec::new(),
                defending: Vec::new(),
                bombarding: Vec::new(),
            },
        }
    }

    pub fn rules(mut self, rules: RuleConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn unit_type(mut self, spec: UnitTypeSpec) -> Self {
        self.unit_types.push(spec);
        self
    }

    pub fn attacking(self, unit_type: &str, count: u32) -> Self {
        self.attacking_stack(StackSpec::new(unit_type, count))
    }

    pub fn attacking_stack(mut self, stack: StackSpec) -> Self {
        self.battle.attacking.push(stack);
        self
    }

    pub fn defending(mut self, unit_type: &str, count: u32) -> Self {
        self.battle.defending.push(StackSpec::new(unit_type, count));
        self
    }

    pub fn bombarding(mut self, unit_type: &str, count: u32) -> Self {
        self.battle.bombarding.push(StackSpec::new(unit_type, count));
        self
    }

    pub fn amphibious(mut self) -> Self {
        self.battle.amphibious = true;
        self
    }

    /// Adjacent territory the attack came from. Land ones belong to the attacker.
    pub fn attack_from(mut self, name: &str, water: bool) -> Self {
        self = self.neighbor(name, water);
        if let Some(t) = self.territories.iter_mut().find(|t| t.name == name) {
            if !water {
                t.owner = Some(self.battle.attacker.clone());
            }
        }
        self.battle.attacking_from.push(name.to_string());
        self
    }

    /// Adjacent territory with no role in the attack.
    pub fn neighbor(mut self, name: &str, water: bool) -> Self {
        let site = self.battle.site.clone();
        self.territories.push(TerritorySpec {
            name: name.to_string(),
            water,
            neighbors: vec![site],
            ..Default::default()
        });
        self
    }

    // ── Loading ─────────────────────────────────────────────────────────

    pub fn parse_toml(content: &str) -> Result<Scenario> {
        let scenario: Scenario =
            toml::from_str(content).map_err(|e| CombatError::Scenario(e.to_string()))?;
        if scenario.rules.dice_sides == 0 {
            return Err(CombatError::Scenario("dice_sides must be positive".into()));
        }
        Ok(scenario)
    }

    pub fn from_file(path: &Path) -> Result<Scenario> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CombatError::Scenario(format!("{}: {}", path.display(), e)))?;
        Scenario::parse_toml(&content)
    }

    /// Resolve every name and build the battle. Abilities are generated
    /// when the battle starts, not here.
    pub fn into_state(self) -> Result<BattleState> {
        if self.battle.round == 0 {
            return Err(CombatError::Scenario("round starts at 1".into()));
        }
        if self.battle.attacking.is_empty() && self.battle.defending.is_empty() {
            return Err(CombatError::Scenario("battle has no units".into()));
        }

        let players: Vec<Player> = self
            .players
            .iter()
            .enumerate()
            .map(|(i, p)| Player {
                id: PlayerId(i as u8),
                name: p.name.clone(),
                alliance: p.alliance.clone().unwrap_or_else(|| p.name.clone()),
            })
            .collect();
        let player_ids: HashMap<&str, PlayerId> =
            players.iter().map(|p| (p.name.as_str(), p.id)).collect();
        let player = |name: &str| -> Result<PlayerId> {
            player_ids
                .get(name)
                .copied()
                .ok_or_else(|| CombatError::UnknownPlayer(name.to_string()))
        };

        let mut type_ids: HashMap<&str, UnitTypeId> = HashMap::new();
        for (i, spec) in self.unit_types.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(CombatError::Scenario("unit type without a name".into()));
            }
            if type_ids.insert(spec.name.as_str(), UnitTypeId(i as u16)).is_some() {
                return Err(CombatError::Scenario(format!("duplicate unit type {}", spec.name)));
            }
        }
        let type_id = |name: &str| -> Result<UnitTypeId> {
            type_ids
                .get(name)
                .copied()
                .ok_or_else(|| CombatError::UnknownUnitType(name.to_string()))
        };
        let type_set = |names: &[String]| -> Result<BTreeSet<UnitTypeId>> {
            names.iter().map(|n| type_id(n)).collect()
        };

        let mut unit_types = Vec::with_capacity(self.unit_types.len());
        for (i, spec) in self.unit_types.iter().enumerate() {
            if spec.hit_points == 0 {
                return Err(CombatError::Scenario(format!("{} has no hit points", spec.name)));
            }
            let mut t = UnitType::new(UnitTypeId(i as u16), &spec.name);
            t.attack = spec.attack;
            t.defense = spec.defense;
            t.attack_rolls = spec.attack_rolls;
            t.defense_rolls = spec.defense_rolls;
            t.hit_points = spec.hit_points;
            t.cost = spec.cost;
            t.is_air = spec.is_air;
            t.is_sea = spec.is_sea;
            t.is_first_strike = spec.is_first_strike;
            t.can_evade = spec.can_evade;
            t.is_destroyer = spec.is_destroyer;
            t.is_infrastructure = spec.is_infrastructure;
            t.is_sea_transport = spec.is_sea_transport;
            t.is_suicide_on_attack = spec.is_suicide_on_attack;
            t.is_suicide_on_defense = spec.is_suicide_on_defense;
            t.is_suicide_on_hit = spec.is_suicide_on_hit;
            t.can_not_target = type_set(&spec.can_not_target)?;
            t.can_not_be_targeted_by = type_set(&spec.can_not_be_targeted_by)?;
            t.can_bombard = spec.can_bombard;
            t.bombard = spec.bombard.unwrap_or(spec.attack);
            t.is_marine = spec.is_marine;
            t.aa = match &spec.aa {
                Some(aa) => Some(AaAttachment {
                    type_aa: aa.type_aa.clone(),
                    attack_aa: aa.attack_aa,
                    offensive_attack_aa: aa.offensive_attack_aa,
                    max_aa_attacks: aa.max_aa_attacks,
                    max_rounds_aa: aa.max_rounds_aa,
                    targets_aa: type_set(&aa.targets_aa)?,
                    will_not_fire_if_present: type_set(&aa.will_not_fire_if_present)?,
                }),
                None => None,
            };
            unit_types.push(t);
        }

        let territory_ids: HashMap<&str, TerritoryId> = self
            .territories
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), TerritoryId(i as u16)))
            .collect();
        let territory = |name: &str| -> Result<TerritoryId> {
            territory_ids
                .get(name)
                .copied()
                .ok_or_else(|| CombatError::UnknownTerritory(name.to_string()))
        };

        let mut territories = Vec::with_capacity(self.territories.len());
        for (i, spec) in self.territories.iter().enumerate() {
            territories.push(Territory {
                id: TerritoryId(i as u16),
                name: spec.name.clone(),
                is_water: spec.water,
                owner: spec.owner.as_deref().map(player).transpose()?,
                neighbors: Vec::new(),
                occupied_by: spec.occupied_by.iter().map(|p| player(p)).collect::<Result<_>>()?,
            });
        }
        // adjacency is symmetric
        for (i, spec) in self.territories.iter().enumerate() {
            for name in &spec.neighbors {
                let other = territory(name)?;
                let this = TerritoryId(i as u16);
                if !territories[i].neighbors.contains(&other) {
                    territories[i].neighbors.push(other);
                }
                let back = &mut territories[other.0 as usize].neighbors;
                if !back.contains(&this) {
                    back.push(this);
                }
            }
        }

        let site = territory(&self.battle.site)
            .map_err(|_| CombatError::Scenario(format!("battle site {} is missing", self.battle.site)))?;
        let attacker = player(&self.battle.attacker)?;
        let defender = player(&self.battle.defender)?;
        let attacking_from = self
            .battle
            .attacking_from
            .iter()
            .map(|t| territory(t))
            .collect::<Result<Vec<_>>>()?;

        let mut units: Vec<Unit> = Vec::new();
        let mut place = |stacks: &[StackSpec], default_owner: PlayerId| -> Result<Vec<UnitId>> {
            let mut ids = Vec::new();
            for stack in stacks {
                let unit_type = type_id(&stack.unit_type)?;
                let owner = match &stack.owner {
                    Some(name) => player(name)?,
                    None => default_owner,
                };
                if stack.hits >= unit_types[unit_type.0 as usize].hit_points {
                    return Err(CombatError::Scenario(format!(
                        "{} starts with {} hits and would already be dead",
                        stack.unit_type, stack.hits
                    )));
                }
                for _ in 0..stack.count {
                    let id = UnitId(units.len() as u32);
                    units.push(Unit {
                        id,
                        unit_type,
                        owner,
                        hits: stack.hits,
                        was_amphibious: stack.was_amphibious,
                        movement_left: stack.movement_left,
                        submerged: false,
                    });
                    ids.push(id);
                }
            }
            Ok(ids)
        };
        let offense = place(&self.battle.attacking, attacker)?;
        let defense = place(&self.battle.defending, defender)?;
        let bombarding = place(&self.battle.bombarding, attacker)?;

        Ok(BattleState {
            site,
            attacker,
            defender,
            round: self.battle.round,
            is_amphibious: self.battle.amphibious,
            rules: self.rules,
            unit_types,
            players,
            territories,
            units,
            offense: SideUnits { alive: offense, waiting_to_die: Vec::new() },
            defense: SideUnits { alive: defense, waiting_to_die: Vec::new() },
            bombarding,
            attacking_from,
            killed: Vec::new(),
            retreats: Vec::new(),
            abilities: BattlePhaseList::default(),
            stack: Vec::new(),
            step_names: Vec::new(),
            pending: None,
            outcome: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[rules]
ww2v2 = true

[[players]]
name = "Americans"
alliance = "Allies"

[[players]]
name = "British"
alliance = "Allies"

[[players]]
name = "Japanese"

[[territories]]
name = "Sea Zone 6"
water = true
neighbors = ["Hawaii"]

[[territories]]
name = "Hawaii"
owner = "Americans"

[[unit_types]]
name = "submarine"
attack = 2
defense = 1
is_sea = true
is_first_strike = true
can_evade = true
can_not_be_targeted_by = ["fighter"]

[[unit_types]]
name = "fighter"
attack = 3
defense = 4
is_air = true

[[unit_types]]
name = "battleship"
attack = 4
defense = 4
hit_points = 2
is_sea = true
can_bombard = true

[battle]
site = "Sea Zone 6"
attacker = "Japanese"
defender = "Americans"

[[battle.attacking]]
type = "submarine"
count = 2

[[battle.defending]]
type = "battleship"
hits = 1

[[battle.defending]]
type = "fighter"
owner = "British"
"#;

    #[test]
    fn test_parse_sample_scenario() {
        let state = Scenario::parse_toml(SAMPLE).unwrap().into_state().unwrap();
        assert!(state.rules.ww2v2);
        assert_eq!(state.round, 1);
        assert_eq!(state.offense.alive.len(), 2);
        assert_eq!(state.defense.alive.len(), 2);
        assert!(state.battle_site().is_water);

        let fighter = state.find_unit_type("fighter").unwrap();
        let sub = state.unit_type(state.find_unit_type("submarine").unwrap());
        assert!(sub.can_not_be_targeted_by.contains(&fighter));

        let battleship = state.defense.alive[0];
        assert_eq!(state.unit(battleship).hits, 1);
        assert_eq!(state.type_of(battleship).bombard, 4);

        let british_fighter = state.defense.alive[1];
        assert_eq!(state.player_name(state.unit(british_fighter).owner), "British");
        assert!(state.is_allied(state.unit(british_fighter).owner, state.defender));
        assert!(!state.is_allied(state.attacker, state.defender));
    }

    #[test]
    fn test_neighbors_are_symmetric() {
        let state = Scenario::parse_toml(SAMPLE).unwrap().into_state().unwrap();
        let hawaii = state.find_territory("Hawaii").unwrap();
        assert_eq!(state.territory(hawaii).neighbors, vec![state.site]);
        assert_eq!(state.battle_site().neighbors, vec![hawaii]);
    }

    #[test]
    fn test_unknown_unit_type_is_reported() {
        let broken = SAMPLE.replace("type = \"battleship\"", "type = \"cruiser\"");
        let err = Scenario::parse_toml(&broken).unwrap().into_state().unwrap_err();
        assert!(matches!(err, CombatError::UnknownUnitType(name) if name == "cruiser"));
    }

    #[test]
    fn test_missing_site_is_a_scenario_error() {
        let broken = SAMPLE.replace("site = \"Sea Zone 6\"", "site = \"Sea Zone 7\"");
        let err = Scenario::parse_toml(&broken).unwrap().into_state().unwrap_err();
        assert!(matches!(err, CombatError::Scenario(_)));
    }

    #[test]
    fn test_dead_on_arrival_units_rejected() {
        let broken = SAMPLE.replace("hits = 1", "hits = 2");
        assert!(Scenario::parse_toml(&broken).unwrap().into_state().is_err());
    }

    #[test]
    fn test_bundled_scenarios_load() {
        for content in [
            include_str!("../../scenarios/land_assault.toml"),
            include_str!("../../scenarios/sea_zone.toml"),
            include_str!("../../scenarios/amphibious.toml"),
        ] {
            let state = Scenario::parse_toml(content).unwrap().into_state().unwrap();
            assert!(!state.offense.alive.is_empty());
            assert!(!state.defense.alive.is_empty());
            assert!(!state.battle_site().neighbors.is_empty());
        }
    }

    #[test]
    fn test_builder_places_units() {
        let state = Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec::new("infantry", 1, 2))
            .attacking("infantry", 3)
            .defending("infantry", 1)
            .attack_from("Archangel", false)
            .into_state()
            .unwrap();
        assert_eq!(state.offense.alive.len(), 3);
        assert_eq!(state.player_name(state.attacker), "Russians");
        let archangel = state.find_territory("Archangel").unwrap();
        assert_eq!(state.attacking_from, vec![archangel]);
        assert_eq!(state.territory(archangel).owner, Some(state.attacker));
    }
}
