//! SQLite persistence for one reporting run.
//!
//! RULE: Only store.rs talks to the database.
//! The database is transient: in-memory by default, dropped when the run ends.

use crate::{
    aggregate::{ProgramTotals, SummaryRow, SummaryTable},
    error::{ReportError, ReportResult},
    event::EventLogEntry,
    period::ReportPeriod,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub struct ReportStore {
    conn: Connection,
}

impl ReportStore {
    /// Open an in-memory database (the normal case).
    pub fn in_memory() -> ReportResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReportResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_report_run.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, period: &ReportPeriod, version: &str) -> ReportResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, period_from, period_to, version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                period.from_param(),
                period.to_param(),
                version,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fails with RunNotInitialized unless insert_run was called for `run_id`.
    pub fn require_run(&self, run_id: &str) -> ReportResult<()> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT run_id FROM run WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        found.map(|_| ()).ok_or(ReportError::RunNotInitialized)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> ReportResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (run_id, program_id, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.run_id,
                entry.program_id,
                entry.stage,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_program(&self, run_id: &str, program_id: &str) -> ReportResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, program_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1 AND program_id = ?2
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id, program_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn events_for_run(&self, run_id: &str) -> ReportResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, program_id, stage, event_type, payload
             FROM event_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Agency summary ─────────────────────────────────────────

    /// Replace the stored summary for one program.
    pub fn save_summary(&self, run_id: &str, program_id: &str, table: &SummaryTable) -> ReportResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM agency_summary WHERE run_id = ?1 AND program_id = ?2",
            params![run_id, program_id],
        )?;
        for (position, row) in table.rows.iter().enumerate() {
            tx.execute(
                "INSERT INTO agency_summary
                    (run_id, program_id, position, agency, delivered, fraud, flagged,
                     net_valid, fraud_rate_pct, flag_rate_pct)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    program_id,
                    position as i64,
                    row.agency,
                    row.delivered as i64,
                    row.fraud as i64,
                    row.flagged as i64,
                    row.net_valid,
                    row.fraud_rate_pct,
                    row.flag_rate_pct,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored summary rows in their original (delivered-descending) order.
    pub fn summary_rows(&self, run_id: &str, program_id: &str) -> ReportResult<Vec<SummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT agency, delivered, fraud, flagged, net_valid, fraud_rate_pct, flag_rate_pct
             FROM agency_summary WHERE run_id = ?1 AND program_id = ?2
             ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id, program_id], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Sums across all agencies of one program; zeros when nothing is stored.
    pub fn program_totals(&self, run_id: &str, program_id: &str) -> ReportResult<ProgramTotals> {
        let totals = self.conn.query_row(
            "SELECT COALESCE(SUM(delivered), 0), COALESCE(SUM(fraud), 0),
                    COALESCE(SUM(flagged), 0),   COALESCE(SUM(net_valid), 0)
             FROM agency_summary WHERE run_id = ?1 AND program_id = ?2",
            params![run_id, program_id],
            |row| {
                Ok(ProgramTotals::new(
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, i64>(2)? as u64,
                    row.get(3)?,
                ))
            },
        )?;
        Ok(totals)
    }

    pub fn top_agencies_by_net_valid(
        &self,
        run_id: &str,
        program_id: &str,
        n: usize,
    ) -> ReportResult<Vec<SummaryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT agency, delivered, fraud, flagged, net_valid, fraud_rate_pct, flag_rate_pct
             FROM agency_summary WHERE run_id = ?1 AND program_id = ?2
             ORDER BY net_valid DESC, delivered DESC, agency ASC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![run_id, program_id, n as i64], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventLogEntry> {
    Ok(EventLogEntry {
        id:         Some(row.get(0)?),
        run_id:     row.get(1)?,
        program_id: row.get(2)?,
        stage:      row.get(3)?,
        event_type: row.get(4)?,
        payload:    row.get(5)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok(SummaryRow {
        agency:         row.get(0)?,
        delivered:      row.get::<_, i64>(1)? as u64,
        fraud:          row.get::<_, i64>(2)? as u64,
        flagged:        row.get::<_, i64>(3)? as u64,
        net_valid:      row.get(4)?,
        fraud_rate_pct: row.get(5)?,
        flag_rate_pct:  row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> ReportStore {
        let store = ReportStore::in_memory().expect("in-memory store");
        store.migrate().expect("migrate");
        store
    }

    fn table() -> SummaryTable {
        SummaryTable {
            flagged_column:      "addl_fraud".into(),
            flagged_rate_column: "addl_fraud_rate_%".into(),
            rows:                vec![SummaryRow::new("alpha".into(), 4, 1, 1)],
        }
    }

    #[test]
    fn migrations_can_be_reapplied() {
        let store = store();
        store.migrate().expect("second migrate is a no-op");
    }

    #[test]
    fn summary_for_unknown_run_is_rejected() {
        let store = store();
        assert!(
            store.save_summary("no-such-run", "grant", &table()).is_err(),
            "foreign keys are enforced on the in-memory store"
        );
        assert!(matches!(store.require_run("no-such-run"), Err(ReportError::RunNotInitialized)));
    }

    #[test]
    fn saved_summary_round_trips_for_a_known_run() {
        let store = store();
        let period = ReportPeriod::previous_month(NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date"));
        store.insert_run("run-1", &period, "test").expect("insert run");

        store.save_summary("run-1", "grant", &table()).expect("save");
        store.save_summary("run-1", "grant", &table()).expect("save replaces");
        assert_eq!(store.summary_rows("run-1", "grant").expect("rows"), table().rows);
    }
}
