// ═══════════════════════════════════════════════════════════════════════
// Errors — structured failures surfaced to whoever drives the engine
// ═══════════════════════════════════════════════════════════════════════

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CombatError {
    #[error("The phase {name} doesn't exist (existing phases: {existing})")]
    UnknownPhase { name: String, existing: String },

    #[error("Unknown unit type: {0}")]
    UnknownUnitType(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("Unknown territory: {0}")]
    UnknownTerritory(String),

    #[error("Invalid scenario: {0}")]
    Scenario(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CombatError>;
