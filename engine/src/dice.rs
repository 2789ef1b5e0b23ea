// ═══════════════════════════════════════════════════════════════════════
// Dice — injected dice source and hit computation for a firing group
// ═══════════════════════════════════════════════════════════════════════

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

use crate::splitter::FiringGroup;
use crate::types::*;

/// Source of die results. Values are 0-based: a die of `sides` sides
/// returns 0..sides.
pub trait DiceSource {
    fn roll(&mut self, sides: u32, count: usize, annotation: &str) -> Vec<u32>;
}

/// Reproducible dice from a seed.
pub struct SeededDice {
    rng: ChaCha8Rng,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        SeededDice { rng: ChaCha8Rng::seed_from_u64(seed) }
    }
}

impl DiceSource for SeededDice {
    fn roll(&mut self, sides: u32, count: usize, _annotation: &str) -> Vec<u32> {
        (0..count).map(|_| self.rng.gen_range(0..sides.max(1))).collect()
    }
}

/// Replays fixed values. Once exhausted every die rolls its highest face.
#[derive(Debug, Default)]
pub struct ScriptedDice {
    values: VecDeque<u32>,
    pub annotations: Vec<String>,
}

impl ScriptedDice {
    pub fn new(values: &[u32]) -> Self {
        ScriptedDice { values: values.iter().copied().collect(), annotations: Vec::new() }
    }
}

impl DiceSource for ScriptedDice {
    fn roll(&mut self, sides: u32, count: usize, annotation: &str) -> Vec<u32> {
        self.annotations.push(annotation.to_string());
        (0..count)
            .map(|_| self.values.pop_front().unwrap_or(sides.saturating_sub(1)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roll {
    pub values: Vec<u32>,
    pub hits: usize,
}

/// Strength of every die a group throws, in unit order.
pub fn die_strengths(state: &BattleState, group: &FiringGroup, side: Side, kind: FireKind) -> Vec<u32> {
    let sides = state.rules.dice_sides;
    let mut strengths = Vec::new();
    match kind {
        FireKind::Aa => {
            let targets = group.target_units.len();
            for unit in &group.firing_units {
                let Some(aa) = &state.type_of(*unit).aa else { continue };
                let strength = match side {
                    Side::Offense => aa.offensive_attack_aa,
                    Side::Defense => aa.attack_aa,
                } as u32;
                let shots = if aa.max_aa_attacks < 0 { targets } else { aa.max_aa_attacks as usize };
                strengths.extend(std::iter::repeat(strength.min(sides)).take(shots));
            }
            // never more shots than targets
            strengths.truncate(targets);
        }
        FireKind::Bombard => {
            for unit in &group.firing_units {
                strengths.push((state.type_of(*unit).bombard as u32).min(sides));
            }
        }
        FireKind::FirstStrike | FireKind::General => {
            for unit in &group.firing_units {
                let t = state.type_of(*unit);
                let mut strength = t.strength(side) as i32;
                if side == Side::Offense && state.unit(*unit).was_amphibious {
                    strength += t.is_marine as i32;
                }
                let strength = strength.clamp(0, sides as i32) as u32;
                strengths.extend(std::iter::repeat(strength).take(t.rolls(side) as usize));
            }
        }
    }
    strengths
}

/// Throw one die per strength entry. A die hits when its value is below
/// the strength it was thrown at.
pub fn roll_group(
    state: &BattleState,
    dice: &mut dyn DiceSource,
    group: &FiringGroup,
    side: Side,
    kind: FireKind,
    annotation: &str,
) -> Roll {
    let strengths = die_strengths(state, group, side, kind);
    if strengths.is_empty() {
        return Roll { values: Vec::new(), hits: 0 };
    }
    let values = dice.roll(state.rules.dice_sides, strengths.len(), annotation);
    let hits = values.iter().zip(&strengths).filter(|(v, s)| **v < **s).count();
    Roll { values, hits }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{AaSpec, Scenario, StackSpec, UnitTypeSpec};

    fn group(firing: Vec<UnitId>, targets: Vec<UnitId>) -> FiringGroup {
        FiringGroup { display_name: "units".into(), firing_units: firing, target_units: targets, suicide_on_hit: false }
    }

    #[test]
    fn test_seeded_dice_are_reproducible() {
        let a = SeededDice::new(7).roll(6, 20, "");
        let b = SeededDice::new(7).roll(6, 20, "");
        assert_eq!(a, b);
        assert!(a.iter().all(|v| *v < 6));
    }

    #[test]
    fn test_scripted_dice_replay_then_miss() {
        let mut dice = ScriptedDice::new(&[0, 3]);
        assert_eq!(dice.roll(6, 3, "x"), vec![0, 3, 5]);
        assert_eq!(dice.annotations, vec!["x".to_string()]);
    }

    #[test]
    fn test_hits_below_strength() {
        let state = Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec { attack_rolls: 2, ..UnitTypeSpec::new("tank", 3, 3) })
            .attacking("tank", 1)
            .defending("tank", 1)
            .into_state()
            .unwrap();
        let g = group(state.alive(Side::Offense), state.alive(Side::Defense));
        let mut dice = ScriptedDice::new(&[2, 3]);
        let roll = roll_group(&state, &mut dice, &g, Side::Offense, FireKind::General, "");
        assert_eq!(roll.values, vec![2, 3]);
        assert_eq!(roll.hits, 1);
    }

    #[test]
    fn test_marine_bonus_only_when_amphibious() {
        let state = Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec { is_marine: 1, ..UnitTypeSpec::new("marine", 1, 2) })
            .attacking_stack(StackSpec { was_amphibious: true, ..StackSpec::new("marine", 1) })
            .attacking("marine", 1)
            .defending("marine", 1)
            .into_state()
            .unwrap();
        let g = group(state.alive(Side::Offense), state.alive(Side::Defense));
        assert_eq!(die_strengths(&state, &g, Side::Offense, FireKind::General), vec![2, 1]);
    }

    #[test]
    fn test_aa_shots_capped_at_targets() {
        let aa = AaSpec { attack_aa: 1, max_aa_attacks: 3, targets_aa: vec!["fighter".into()], ..Default::default() };
        let state = Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec { aa: Some(aa), ..UnitTypeSpec::new("aa gun", 0, 0) })
            .unit_type(UnitTypeSpec { is_air: true, ..UnitTypeSpec::new("fighter", 3, 4) })
            .attacking("fighter", 2)
            .defending("aa gun", 1)
            .into_state()
            .unwrap();
        let g = group(state.alive(Side::Defense), state.alive(Side::Offense));
        assert_eq!(die_strengths(&state, &g, Side::Defense, FireKind::Aa), vec![1, 1]);
    }
}
