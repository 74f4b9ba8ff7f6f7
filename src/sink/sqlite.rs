use super::OutputSink;
use crate::errors::{EngineError, EngineResult};
use crate::types::TableRow;
use rusqlite::Connection;
use std::path::Path;

/// Persists factor rows into SQLite, each tagged with this sink's run id.
pub struct SqliteSink {
    conn: Connection,
    run_id: String,
}

impl SqliteSink {
    pub fn open(db_path: &Path) -> EngineResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Database(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        tracing::info!("database opened at {}", db_path.display());
        Self::with_connection(conn)
    }

    pub fn in_memory() -> EngineResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> EngineResult<Self> {
        let schema = include_str!("../../migrations/001_init.sql");
        conn.execute_batch(schema)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO scan_runs (run_id, started_at) VALUES (?1, datetime('now'))",
            rusqlite::params![run_id],
        )?;
        Ok(Self { conn, run_id })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Rows written under this run id.
    pub fn count_rows(&self) -> EngineResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM factor_rows WHERE run_id = ?1",
            rusqlite::params![self.run_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

impl OutputSink for SqliteSink {
    fn write(&mut self, rows: &[TableRow]) -> EngineResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO factor_rows (run_id, symbol, valuation_date, strike, market_price, theoretical_price, mispricing, percent_mispricing, call_market, call_theoretical, call_mispricing, put_market, put_theoretical, put_mispricing, composite)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for r in rows {
                stmt.execute(rusqlite::params![
                    self.run_id,
                    r.symbol,
                    r.valuation_date.to_string(),
                    r.strike,
                    r.market_price,
                    r.theoretical_price,
                    r.mispricing,
                    r.percent_mispricing,
                    r.call_market,
                    r.call_theoretical,
                    r.call_mispricing,
                    r.put_market,
                    r.put_theoretical,
                    r.put_mispricing,
                    r.composite,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(run_id = %self.run_id, rows = rows.len(), "factor rows inserted");
        Ok(())
    }
}
