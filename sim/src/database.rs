// ═══════════════════════════════════════════════════════════════════════
// Database — SQLite storage for odds batches
// ═══════════════════════════════════════════════════════════════════════

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::odds::{OddsConfig, OddsReport};

pub struct Database {
    conn: Connection,
}

/// One stored batch, as read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBatch {
    pub id: i64,
    pub scenario: String,
    pub seed: u64,
    pub attacker_agent: String,
    pub defender_agent: String,
    pub report: OddsReport,
    pub created_at: String,
}

impl Database {
    /// Open (or create) a database at the given path.
    pub fn new(path: &str) -> Result<Self> {
        let db = Database { conn: Connection::open(path)? };
        db.create_schema()?;
        Ok(db)
    }

    /// In-memory database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let db = Database { conn: Connection::open_in_memory()? };
        db.create_schema()?;
        Ok(db)
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch("
            CREATE TABLE IF NOT EXISTS batches (
                id              INTEGER PRIMARY KEY,
                scenario        TEXT NOT NULL,
                seed            INTEGER NOT NULL,
                attacker_agent  TEXT NOT NULL,
                defender_agent  TEXT NOT NULL,
                battles         INTEGER NOT NULL,
                attacker_wins   INTEGER NOT NULL,
                defender_wins   INTEGER NOT NULL,
                draws           INTEGER NOT NULL,
                average_rounds  REAL NOT NULL,
                attackers_left  REAL NOT NULL,
                defenders_left  REAL NOT NULL,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
        ")?;
        Ok(())
    }

    /// Store one odds run. Percentages are derived again on read.
    pub fn store_batch(&self, scenario: &str, config: &OddsConfig, report: &OddsReport) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO batches (scenario, seed, attacker_agent, defender_agent, battles,
                                  attacker_wins, defender_wins, draws,
                                  average_rounds, attackers_left, defenders_left)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                scenario,
                config.seed as i64,
                config.attacker.name(),
                config.defender.name(),
                report.battles as i64,
                report.attacker_wins as i64,
                report.defender_wins as i64,
                report.draws as i64,
                report.average_rounds,
                report.average_attackers_left,
                report.average_defenders_left,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Latest batches first.
    pub fn recent_batches(&self, limit: usize) -> Result<Vec<StoredBatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, scenario, seed, attacker_agent, defender_agent, battles,
                    attacker_wins, defender_wins, draws,
                    average_rounds, attackers_left, defenders_left, created_at
             FROM batches ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let battles = row.get::<_, i64>(5)? as usize;
            let attacker_wins = row.get::<_, i64>(6)? as usize;
            let defender_wins = row.get::<_, i64>(7)? as usize;
            let draws = row.get::<_, i64>(8)? as usize;
            let pct = |n: usize| if battles == 0 { 0.0 } else { n as f64 / battles as f64 * 100.0 };
            Ok(StoredBatch {
                id: row.get(0)?,
                scenario: row.get(1)?,
                seed: row.get::<_, i64>(2)? as u64,
                attacker_agent: row.get(3)?,
                defender_agent: row.get(4)?,
                report: OddsReport {
                    battles,
                    attacker_wins,
                    defender_wins,
                    draws,
                    attacker_win_pct: pct(attacker_wins),
                    defender_win_pct: pct(defender_wins),
                    draw_pct: pct(draws),
                    average_rounds: row.get(9)?,
                    average_attackers_left: row.get(10)?,
                    average_defenders_left: row.get(11)?,
                },
                created_at: row.get(12)?,
            })
        })?;

        let batches = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// Get total number of batches stored.
    pub fn batch_count(&self) -> Result<u32> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM batches", [], |row| row.get(0))?)
    }
}
