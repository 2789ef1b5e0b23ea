// ═══════════════════════════════════════════════════════════════════════
// Errors — failures while driving battles or storing their results
// ═══════════════════════════════════════════════════════════════════════

use combat_engine::error::CombatError;
use combat_engine::types::PlayerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Combat(#[from] CombatError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Battle exceeded {limit} decisions without finishing (round {round})")]
    DecisionLimit { limit: usize, round: u32 },

    #[error("No agent for player {0:?}")]
    MissingAgent(PlayerId),

    #[error("Battle stuck in round {0}: nothing pending and no outcome")]
    Stuck(u32),
}

pub type Result<T> = std::result::Result<T, SimError>;
