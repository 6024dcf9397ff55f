// 🗄️ Report Store - SQLite persistence of finished runs
//
// Append-only: each run gets a fresh UUID, its field values and issues are
// written in one transaction. Nothing here feeds back into a run.

use crate::fields::FieldData;
use crate::report::ReconciliationReport;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Runs
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            valuation_year INTEGER NOT NULL,
            ev_mode TEXT NOT NULL,
            peers INTEGER NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Field values (one row per entity x field x fiscal year)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS field_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            entity TEXT NOT NULL,
            field TEXT NOT NULL,
            fiscal_year INTEGER NOT NULL,
            value_num REAL,
            value_text TEXT,
            source TEXT,
            as_of TEXT,
            status TEXT NOT NULL,
            note TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Issues
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(run_id),
            entity TEXT NOT NULL,
            field TEXT,
            fiscal_year INTEGER,
            rule TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            value_json TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_field_values_run ON field_values(run_id, entity)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_issues_run ON issues(run_id, severity)",
        [],
    )?;

    Ok(())
}

/// Persist a finished report; returns the new run id
pub fn save_report(conn: &Connection, report: &ReconciliationReport) -> Result<String> {
    let run_id = Uuid::new_v4().to_string();
    let summary_json = serde_json::to_string(&report.summary).context("Failed to serialize summary")?;

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO runs (run_id, created_at, fingerprint, valuation_year, ev_mode, peers, summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id,
            Utc::now().to_rfc3339(),
            report.fingerprint,
            report.summary.valuation_year,
            report.summary.ev_mode.name(),
            report.summary.peers as i64,
            summary_json,
        ],
    )?;

    let mut values = 0usize;
    let mut issues = 0usize;

    for record in &report.records {
        for value in record.fields.values.values() {
            let (num, text) = match &value.value {
                Some(FieldData::Number(n)) => (Some(*n), None),
                Some(FieldData::Text(t)) => (None, Some(t.as_str())),
                None => (None, None),
            };

            tx.execute(
                "INSERT INTO field_values (
                    run_id, entity, field, fiscal_year, value_num, value_text,
                    source, as_of, status, note
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    record.entity(),
                    value.key.field.name(),
                    value.key.fiscal_year,
                    num,
                    text,
                    value.source.as_ref().map(|s| s.to_string()),
                    value.as_of.map(|d| d.to_string()),
                    value.status.as_str(),
                    value.note,
                ],
            )?;
            values += 1;
        }

        for issue in &record.issues {
            let value_json = if issue.values.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&issue.values)?)
            };

            tx.execute(
                "INSERT INTO issues (
                    run_id, entity, field, fiscal_year, rule, severity, message, value_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_id,
                    issue.entity,
                    issue.field.map(|k| k.field.name()),
                    issue.field.map(|k| k.fiscal_year),
                    issue.rule.name(),
                    issue.severity.as_str(),
                    issue.message,
                    value_json,
                ],
            )?;
            issues += 1;
        }
    }

    tx.commit().context("Failed to commit run")?;

    info!(run_id = %run_id, field_values = values, issues = issues, "report stored");
    Ok(run_id)
}

// ============================================================================
// READ BACK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredIssue {
    pub entity: String,
    pub field: Option<String>,
    pub fiscal_year: Option<i32>,
    pub rule: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: String,
    pub created_at: String,
    pub fingerprint: String,
    pub valuation_year: i32,
    pub peers: i64,
}

pub fn load_issues_for_run(conn: &Connection, run_id: &str) -> Result<Vec<StoredIssue>> {
    let mut stmt = conn.prepare(
        "SELECT entity, field, fiscal_year, rule, severity, message
         FROM issues
         WHERE run_id = ?1
         ORDER BY id",
    )?;

    let issues = stmt
        .query_map(params![run_id], |row| {
            Ok(StoredIssue {
                entity: row.get(0)?,
                field: row.get(1)?,
                fiscal_year: row.get(2)?,
                rule: row.get(3)?,
                severity: row.get(4)?,
                message: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(issues)
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<StoredRun>> {
    let run = conn
        .query_row(
            "SELECT run_id, created_at, fingerprint, valuation_year, peers FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| {
                Ok(StoredRun {
                    run_id: row.get(0)?,
                    created_at: row.get(1)?,
                    fingerprint: row.get(2)?,
                    valuation_year: row.get(3)?,
                    peers: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(run)
}

pub fn count_field_values(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM field_values WHERE run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconciliationConfig;
    use crate::fields::Field;
    use crate::normalizer::NormalizationTable;
    use crate::peers::{Peer, PeerRegistry};
    use crate::pipeline::{Reconciler, RunInput};
    use crate::records::{RawRecord, SourceData};

    fn report() -> ReconciliationReport {
        let config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        let reconciler = Reconciler::new(config, vec![NormalizationTable::new("wrds")]).unwrap();
        let peers = PeerRegistry::new(vec![Peer::new("ACME", "Acme Corp")]).unwrap();
        let input = RunInput::new(peers).with_source(
            "wrds",
            SourceData::available(vec![RawRecord::new("ACME", 2024)
                .with_number("market_cap", 100.0)
                .with_number("net_debt", 20.0)]),
        );
        reconciler.run(&input)
    }

    #[test]
    fn test_save_and_read_back() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let report = report();
        let run_id = save_report(&conn, &report).unwrap();

        let run = get_run(&conn, &run_id).unwrap().unwrap();
        assert_eq!(run.fingerprint, report.fingerprint);
        assert_eq!(run.valuation_year, 2024);
        assert_eq!(count_field_values(&conn, &run_id).unwrap(), Field::ALL.len() as i64);

        let issues = load_issues_for_run(&conn, &run_id).unwrap();
        assert_eq!(issues.len(), report.issues().count());
        assert!(issues.iter().any(|i| i.rule == "missing_required_field" && i.severity == "error"));
        println!("✅ Stored run {} with {} issues", run_id, issues.len());
    }

    #[test]
    fn test_runs_are_append_only() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let report = report();
        let first = save_report(&conn, &report).unwrap();
        let second = save_report(&conn, &report).unwrap();

        assert_ne!(first, second);
        assert_eq!(
            load_issues_for_run(&conn, &first).unwrap(),
            load_issues_for_run(&conn, &second).unwrap()
        );
        assert!(get_run(&conn, "no-such-run").unwrap().is_none());
    }
}
