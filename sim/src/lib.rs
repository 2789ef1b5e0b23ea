pub mod error;
pub mod runner;
pub mod odds;
pub mod database;

pub use error::{Result, SimError};
pub use runner::{make_agents, run_battle, run_seeded, Agents, BattleResult, QuietHistory, DEFAULT_MAX_DECISIONS};
pub use odds::{estimate_odds, OddsConfig, OddsReport};
pub use database::{Database, StoredBatch};
