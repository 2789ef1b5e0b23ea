// ═══════════════════════════════════════════════════════════════════════
// Ability generation — derive combat abilities from raw unit type flags
// ═══════════════════════════════════════════════════════════════════════

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::ability::*;
use crate::config::RuleConfig;
use crate::error::Result;
use crate::types::*;

pub const UNITS: &str = "units";
pub const FIRST_STRIKE_UNITS: &str = "first strike units";
pub const NAVAL_BOMBARD: &str = "Bombard";

const WILL_NOT_FIRE_AA_PREFIX: &str = "willNotFireAa";

/// Lookups shared by every player's generation pass.
struct Context<'a> {
    unit_types: &'a [UnitType],
    rules: &'a RuleConfig,
    /// type_aa → targets. First declaring type wins.
    aa_targets: HashMap<&'a str, BTreeSet<UnitTypeId>>,
    /// firing type → types it can only hit with a friendly destroyer around
    needs_destroyer: HashMap<UnitTypeId, BTreeSet<UnitTypeId>>,
    destroyers: BTreeSet<UnitTypeId>,
}

impl<'a> Context<'a> {
    fn new(unit_types: &'a [UnitType], rules: &'a RuleConfig) -> Self {
        let mut aa_targets = HashMap::new();
        for t in unit_types {
            if let Some(aa) = &t.aa {
                aa_targets.entry(aa.type_aa.as_str()).or_insert_with(|| aa.targets_aa.clone());
            }
        }

        // can_not_be_targeted_by is keyed by the target; invert it
        let mut needs_destroyer: HashMap<UnitTypeId, BTreeSet<UnitTypeId>> = HashMap::new();
        for t in unit_types {
            for firing in &t.can_not_be_targeted_by {
                needs_destroyer.entry(*firing).or_default().insert(t.id);
            }
        }

        let destroyers = unit_types.iter().filter(|t| t.is_destroyer).map(|t| t.id).collect();

        Context { unit_types, rules, aa_targets, needs_destroyer, destroyers }
    }

    fn targets_with_destroyer(&self, firing: &UnitType) -> BTreeSet<UnitTypeId> {
        self.unit_types
            .iter()
            .filter(|t| !t.is_infrastructure && !firing.can_not_target.contains(&t.id))
            .map(|t| t.id)
            .collect()
    }

    fn targets_without_destroyer(&self, firing: &UnitType) -> BTreeSet<UnitTypeId> {
        let gated = self.needs_destroyer.get(&firing.id);
        self.targets_with_destroyer(firing)
            .into_iter()
            .filter(|t| gated.map_or(true, |g| !g.contains(t)))
            .collect()
    }
}

fn suicide_after_fire(t: &UnitType) -> SideSet {
    let mut sides = SideSet::NONE;
    if t.is_suicide_on_attack {
        sides.insert(Side::Offense);
    }
    if t.is_suicide_on_defense {
        sides.insert(Side::Defense);
    }
    sides
}

/// Rebuild every ability and conversion in `phases` from the unit types.
/// Runs once at the start of a battle phase, per player.
pub fn generate(
    players: &[Player],
    unit_types: &[UnitType],
    phases: &mut BattlePhaseList,
    rules: &RuleConfig,
) -> Result<()> {
    phases.clear();
    let ctx = Context::new(unit_types, rules);

    for player in players {
        for t in unit_types {
            if t.aa.is_some() {
                create_aa_abilities(&ctx, phases, player.id, t)?;
            }
            create_unit_abilities(&ctx, phases, player.id, t)?;
        }
        create_bombard_abilities(&ctx, phases, player.id)?;
    }

    debug!(
        players = players.len(),
        unit_types = unit_types.len(),
        converts = phases.converts().len(),
        "generated unit abilities"
    );
    Ok(())
}

fn create_aa_abilities(ctx: &Context, phases: &mut BattlePhaseList, player: PlayerId, t: &UnitType) -> Result<()> {
    let Some(aa) = &t.aa else { return Ok(()) };
    let mut sides = SideSet::NONE;
    if aa.offensive_attack_aa > 0 && aa.max_aa_attacks != 0 {
        sides.insert(Side::Offense);
    }
    if aa.attack_aa > 0 && aa.max_aa_attacks != 0 {
        sides.insert(Side::Defense);
    }
    if sides.is_empty() {
        return Ok(());
    }

    let ability = CombatAbility {
        name: aa.type_aa.clone(),
        attached_unit_types: BTreeSet::from([t.id]),
        targets: ctx.aa_targets.get(aa.type_aa.as_str()).cloned().unwrap_or_default(),
        dice_type: DiceType::Aa,
        sides,
        round: (aa.max_rounds_aa != -1).then(|| aa.max_rounds_aa.max(0) as u32),
        return_fire: false,
        suicide_on_hit: t.is_suicide_on_hit,
        suicide_after_fire: suicide_after_fire(t),
    };
    let r = phases.add_ability(player, AA_PHASE, ability)?;

    for blocker in &aa.will_not_fire_if_present {
        phases.add_convert(ConvertAbility {
            name: format!("{} {}", WILL_NOT_FIRE_AA_PREFIX, aa.type_aa),
            player,
            attached_unit_types: BTreeSet::from([*blocker]),
            team: Team::Foe,
            from: r,
            to: None,
        });
    }
    Ok(())
}

fn create_unit_abilities(ctx: &Context, phases: &mut BattlePhaseList, player: PlayerId, t: &UnitType) -> Result<()> {
    let mut sides = SideSet::NONE;
    if t.attack > 0 {
        sides.insert(Side::Offense);
    }
    if t.defense > 0 {
        if t.is_first_strike && !ctx.rules.defending_subs_sneak_attack {
            // without sneak attack a defending first striker fights in general combat
            create_abilities_in_phase(ctx, phases, player, t, SideSet::of(&[Side::Defense]), GENERAL_PHASE)?;
        } else {
            sides.insert(Side::Defense);
        }
    }
    if sides.is_empty() {
        return Ok(());
    }
    let phase = if t.is_first_strike { FIRST_STRIKE_PHASE } else { GENERAL_PHASE };
    create_abilities_in_phase(ctx, phases, player, t, sides, phase)
}

fn create_abilities_in_phase(
    ctx: &Context,
    phases: &mut BattlePhaseList,
    player: PlayerId,
    t: &UnitType,
    sides: SideSet,
    phase: &str,
) -> Result<()> {
    let needs_destroyer = ctx.needs_destroyer.get(&t.id).is_some_and(|g| !g.is_empty());
    let is_first_strike = phase == FIRST_STRIKE_PHASE;
    let base = if is_first_strike { FIRST_STRIKE_UNITS } else { UNITS };

    let template = CombatAbility {
        name: base.to_string(),
        attached_unit_types: BTreeSet::new(),
        targets: ctx.targets_with_destroyer(t),
        dice_type: DiceType::Normal,
        sides,
        round: None,
        return_fire: !is_first_strike,
        suicide_on_hit: t.is_suicide_on_hit,
        suicide_after_fire: suicide_after_fire(t),
    };

    // A gated unit attaches only to the restricted ability; the full one is
    // reached through the destroyer conversion below.
    let mut full = template.clone();
    if !needs_destroyer {
        full.attached_unit_types.insert(t.id);
    }
    let full_ref = phases.add_ability(player, phase, full)?;
    if is_first_strike {
        create_anti_first_strike(ctx, phases, player, full_ref)?;
    }

    if needs_destroyer {
        let restricted = CombatAbility {
            name: format!("{} without destroyer", base),
            attached_unit_types: BTreeSet::from([t.id]),
            targets: ctx.targets_without_destroyer(t),
            ..template
        };
        let restricted_ref = phases.add_ability(player, phase, restricted)?;
        if is_first_strike {
            create_anti_first_strike(ctx, phases, player, restricted_ref)?;
        }
        phases.add_convert(ConvertAbility {
            name: format!("allow {} to hit more units", t.name),
            player,
            attached_unit_types: ctx.destroyers.clone(),
            team: Team::Friendly,
            from: restricted_ref,
            to: Some(full_ref),
        });
    }
    Ok(())
}

fn create_anti_first_strike(ctx: &Context, phases: &mut BattlePhaseList, player: PlayerId, from: AbilityRef) -> Result<()> {
    if ctx.destroyers.is_empty() {
        return Ok(());
    }
    let mut with_return_fire = phases.get(from)?.clone();
    with_return_fire.attached_unit_types.clear();
    with_return_fire.return_fire = true;
    let phase = if ctx.rules.ww2v2 { FIRST_STRIKE_PHASE } else { GENERAL_PHASE };
    let to = phases.add_ability(player, phase, with_return_fire)?;

    phases.add_convert(ConvertAbility {
        name: "neutralize first strike ability".to_string(),
        player,
        attached_unit_types: ctx.destroyers.clone(),
        team: Team::Foe,
        from,
        to: Some(to),
    });
    Ok(())
}

fn create_bombard_abilities(ctx: &Context, phases: &mut BattlePhaseList, player: PlayerId) -> Result<()> {
    let bombarders: BTreeSet<UnitTypeId> =
        ctx.unit_types.iter().filter(|t| t.can_bombard).map(|t| t.id).collect();
    if bombarders.is_empty() {
        return Ok(());
    }
    let ability = CombatAbility {
        name: NAVAL_BOMBARD.to_string(),
        attached_unit_types: bombarders,
        targets: ctx.unit_types.iter().filter(|t| !t.is_infrastructure).map(|t| t.id).collect(),
        dice_type: DiceType::Bombard,
        sides: SideSet::of(&[Side::Offense]),
        round: Some(1),
        return_fire: ctx.rules.naval_bombard_casualties_return_fire,
        suicide_on_hit: false,
        suicide_after_fire: SideSet::NONE,
    };
    phases.add_ability(player, BOMBARD_PHASE, ability)?;
    Ok(())
}
