pub mod types;
pub mod error;
pub mod config;
pub mod setup;
pub mod ability;
pub mod generator;
pub mod splitter;
pub mod casualty;
pub mod dice;
pub mod retreat;
pub mod steps;
pub mod history;
pub mod engine;


pub use types::*;
pub use error::{CombatError, Result};
pub use engine::{advance, apply_action, load_state, save_state, start_battle, Action};
