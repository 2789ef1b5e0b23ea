// ═══════════════════════════════════════════════════════════════════════
// Rule configuration — the historical variant toggles a battle runs under
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};

/// Immutable set of rule toggles. Every step's applicability is a pure
/// function of (BattleState, RuleConfig).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub ww2v2: bool,
    pub defending_subs_sneak_attack: bool,
    pub sub_retreat_before_battle: bool,
    pub submersible_subs: bool,
    pub submarines_defending_may_submerge_or_retreat: bool,
    pub partial_amphibious_retreat: bool,
    pub attacker_retreat_planes: bool,
    pub allied_air_independent: bool,
    pub transport_casualties_restricted: bool,
    pub naval_bombard_casualties_return_fire: bool,
    pub defending_suicide_and_munition_units_do_not_fire: bool,
    pub dice_sides: u32,
    /// 0 = unlimited
    pub max_rounds: u32,
}

impl Default for RuleConfig {
    fn default() -> Self {
        RuleConfig {
            ww2v2: false,
            defending_subs_sneak_attack: false,
            sub_retreat_before_battle: false,
            submersible_subs: false,
            submarines_defending_may_submerge_or_retreat: false,
            partial_amphibious_retreat: false,
            attacker_retreat_planes: false,
            allied_air_independent: true,
            transport_casualties_restricted: false,
            naval_bombard_casualties_return_fire: false,
            defending_suicide_and_munition_units_do_not_fire: false,
            dice_sides: 6,
            max_rounds: 0,
        }
    }
}

impl RuleConfig {
    /// Parse a standalone rules file (the same keys as a scenario's `[rules]` table).
    pub fn from_toml(content: &str) -> Result<Self> {
        let rules: RuleConfig = toml::from_str(content)
            .map_err(|e| CombatError::Scenario(e.to_string()))?;
        if rules.dice_sides == 0 {
            return Err(CombatError::Scenario("dice_sides must be positive".into()));
        }
        Ok(rules)
    }

    pub fn round_limit(&self) -> Option<u32> {
        (self.max_rounds > 0).then_some(self.max_rounds)
    }
}
