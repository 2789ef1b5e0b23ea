// ═══════════════════════════════════════════════════════════════════════
// History — write-only sink for step transitions and unit changes
// ═══════════════════════════════════════════════════════════════════════

use tracing::info;

use crate::dice::DiceSource;

/// Receives what happened, for replay or display. Nothing reads it back.
pub trait HistorySink {
    fn start_step(&mut self, name: &str);
    fn event(&mut self, text: &str);
}

/// Emits each entry as a structured tracing event.
#[derive(Debug, Default)]
pub struct TracingHistory {
    step: String,
}

impl HistorySink for TracingHistory {
    fn start_step(&mut self, name: &str) {
        self.step = name.to_string();
        info!(step = %name, "battle step");
    }

    fn event(&mut self, text: &str) {
        info!(step = %self.step, "{}", text);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    Step(String),
    Event(String),
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingHistory {
    pub entries: Vec<HistoryEntry>,
}

impl RecordingHistory {
    pub fn steps(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                HistoryEntry::Step(s) => Some(s.as_str()),
                HistoryEntry::Event(_) => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                HistoryEntry::Event(s) => Some(s.as_str()),
                HistoryEntry::Step(_) => None,
            })
            .collect()
    }
}

impl HistorySink for RecordingHistory {
    fn start_step(&mut self, name: &str) {
        self.entries.push(HistoryEntry::Step(name.to_string()));
    }

    fn event(&mut self, text: &str) {
        self.entries.push(HistoryEntry::Event(text.to_string()));
    }
}

/// Capabilities a battle borrows while it runs.
pub struct Context<'a> {
    pub dice: &'a mut dyn DiceSource,
    pub history: &'a mut dyn HistorySink,
}

impl<'a> Context<'a> {
    pub fn new(dice: &'a mut dyn DiceSource, history: &'a mut dyn HistorySink) -> Self {
        Context { dice, history }
    }
}
