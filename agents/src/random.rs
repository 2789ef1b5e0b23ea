// ═══════════════════════════════════════════════════════════════════════
// Random Agent — makes all decisions randomly.
// Serves as baseline and for testing engine stability.
// ═══════════════════════════════════════════════════════════════════════

use crate::agent::Agent;
use combat_engine::casualty::{max_hits_before_death, CasualtyDetails, CasualtyRequest};
use combat_engine::retreat::RetreatRequest;
use combat_engine::types::*;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub struct RandomAgent {
    rng: ChaCha8Rng,
    /// Chance of taking an offered retreat.
    retreat_chance: f64,
}

impl RandomAgent {
    pub fn new(seed: u64) -> Self {
        RandomAgent { rng: ChaCha8Rng::seed_from_u64(seed), retreat_chance: 0.25 }
    }

    pub fn with_retreat_chance(mut self, chance: f64) -> Self {
        self.retreat_chance = chance.clamp(0.0, 1.0);
        self
    }
}

impl Agent for RandomAgent {
    fn name(&self) -> &str {
        "Random"
    }

    /// A legal selection built from a shuffled target list: each unit
    /// either soaks the hits still owed or dies.
    fn select_casualties(&mut self, state: &BattleState, request: &CasualtyRequest) -> CasualtyDetails {
        let mut targets = request.targets.clone();
        targets.shuffle(&mut self.rng);

        let mut owed = request.hits;
        let mut details = CasualtyDetails::default();
        for unit in targets {
            if owed == 0 {
                break;
            }
            let spare = max_hits_before_death(state, unit);
            if owed > spare {
                details.killed.push(unit);
                owed -= spare + 1;
            } else {
                details.damaged.extend(std::iter::repeat(unit).take(owed));
                owed = 0;
            }
        }
        details
    }

    fn choose_retreat(&mut self, _state: &BattleState, request: &RetreatRequest) -> Option<TerritoryId> {
        if !self.rng.gen_bool(self.retreat_chance) {
            return None;
        }
        request.candidates.choose(&mut self.rng).copied()
    }
}
