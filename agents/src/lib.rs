pub mod agent;
pub mod random;
pub mod heuristic;

pub use agent::{side_power, Agent, AgentKind};
pub use random::RandomAgent;
pub use heuristic::HeuristicAgent;
