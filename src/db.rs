// 🗄️ Persistence - registration cache + run history
//
// One SQLite file holds the registration cache that makes reruns cheap and
// every reconciled table the pipeline has produced, keyed by run id.

use crate::reconciliation::{ReconciledRow, StatusFlags};
use crate::registration::{LookupSource, RegistrationIssue, RegistrationRecord};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Registration cache (one row per plate, latest lookup wins)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations (
            plate_number TEXT PRIMARY KEY,
            issuer_name TEXT,
            is_learner_approved INTEGER NOT NULL,
            expiry_date TEXT,
            source TEXT NOT NULL,
            resolved_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Runs + their reconciled rows
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            run_date TEXT NOT NULL,
            started_at TEXT NOT NULL,
            inventory_digest TEXT NOT NULL,
            listings_digest TEXT NOT NULL,
            report_path TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            lookups INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_rows (
            run_id TEXT NOT NULL REFERENCES runs(id),
            position INTEGER NOT NULL,
            stock_number TEXT NOT NULL,
            date_into_stock TEXT,
            stock_type TEXT NOT NULL,
            make TEXT NOT NULL,
            model TEXT NOT NULL,
            vin TEXT NOT NULL,
            plate_number TEXT NOT NULL,
            learner_approved INTEGER,
            expiry_date TEXT,
            registration_issue TEXT,
            date_listed TEXT,
            listed_price REAL,
            needs_registration_transfer INTEGER NOT NULL,
            needs_listing_created INTEGER NOT NULL,
            needs_plate_check INTEGER NOT NULL,
            PRIMARY KEY (run_id, position)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_rows_stock ON report_rows(run_id, stock_number)",
        [],
    )?;

    Ok(())
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date_text(text: Option<String>) -> Option<NaiveDate> {
    text.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

// ============================================================================
// REGISTRATION CACHE
// ============================================================================

pub fn upsert_registrations(
    conn: &Connection,
    records: &[&RegistrationRecord],
    resolved_at: &str,
) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO registrations (
            plate_number, issuer_name, is_learner_approved, expiry_date, source, resolved_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(plate_number) DO UPDATE SET
            issuer_name = excluded.issuer_name,
            is_learner_approved = excluded.is_learner_approved,
            expiry_date = excluded.expiry_date,
            source = excluded.source,
            resolved_at = excluded.resolved_at",
    )?;

    for record in records {
        stmt.execute(params![
            record.plate_number,
            record.issuer_name,
            record.is_learner_approved,
            date_text(record.expiry_date),
            record.source.code(),
            resolved_at,
        ])?;
    }

    Ok(records.len())
}

pub fn load_registrations(conn: &Connection) -> Result<HashMap<String, RegistrationRecord>> {
    let mut stmt = conn.prepare(
        "SELECT plate_number, issuer_name, is_learner_approved, expiry_date, source
         FROM registrations",
    )?;

    let records = stmt
        .query_map([], |row| {
            let source: String = row.get(4)?;
            Ok(RegistrationRecord {
                plate_number: row.get(0)?,
                issuer_name: row.get(1)?,
                is_learner_approved: row.get(2)?,
                expiry_date: parse_date_text(row.get(3)?),
                source: LookupSource::from_code(&source).unwrap_or(LookupSource::Documents),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records
        .into_iter()
        .map(|record| (record.plate_number.clone(), record))
        .collect())
}

// ============================================================================
// RUN HISTORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub run_date: NaiveDate,
    pub started_at: String,
    pub inventory_digest: String,
    pub listings_digest: String,
    pub report_path: String,
    pub row_count: usize,
    pub lookups: usize,
}

impl RunRecord {
    pub fn new(run_date: NaiveDate, inventory_digest: String, listings_digest: String) -> Self {
        RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            run_date,
            started_at: Utc::now().to_rfc3339(),
            inventory_digest,
            listings_digest,
            report_path: String::new(),
            row_count: 0,
            lookups: 0,
        }
    }
}

/// Store a run and its rows atomically.
pub fn save_run(conn: &mut Connection, run: &RunRecord, rows: &[ReconciledRow]) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO runs (
            id, run_date, started_at, inventory_digest, listings_digest,
            report_path, row_count, lookups
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.id,
            date_text(Some(run.run_date)),
            run.started_at,
            run.inventory_digest,
            run.listings_digest,
            run.report_path,
            run.row_count as i64,
            run.lookups as i64,
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO report_rows (
                run_id, position, stock_number, date_into_stock, stock_type, make, model,
                vin, plate_number, learner_approved, expiry_date, registration_issue,
                date_listed, listed_price,
                needs_registration_transfer, needs_listing_created, needs_plate_check
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?;

        for (position, row) in rows.iter().enumerate() {
            stmt.execute(params![
                run.id,
                position as i64,
                row.stock_number,
                date_text(row.date_into_stock),
                row.stock_type,
                row.make,
                row.model,
                row.vin,
                row.plate_number,
                row.learner_approved,
                date_text(row.expiry_date),
                row.registration_issue.map(|i| i.label()),
                date_text(row.date_listed),
                row.listed_price,
                row.status.needs_registration_transfer,
                row.status.needs_listing_created,
                row.status.needs_plate_check,
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn run_from_row(row: &Row) -> rusqlite::Result<RunRecord> {
    let run_date: String = row.get(1)?;
    let row_count: i64 = row.get(6)?;
    let lookups: i64 = row.get(7)?;
    Ok(RunRecord {
        id: row.get(0)?,
        run_date: NaiveDate::parse_from_str(&run_date, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        started_at: row.get(2)?,
        inventory_digest: row.get(3)?,
        listings_digest: row.get(4)?,
        report_path: row.get(5)?,
        row_count: row_count as usize,
        lookups: lookups as usize,
    })
}

pub fn latest_run(conn: &Connection) -> Result<Option<RunRecord>> {
    let run = conn
        .query_row(
            "SELECT id, run_date, started_at, inventory_digest, listings_digest,
                    report_path, row_count, lookups
             FROM runs
             ORDER BY started_at DESC, rowid DESC
             LIMIT 1",
            [],
            run_from_row,
        )
        .optional()?;

    Ok(run)
}

pub fn load_report_rows(conn: &Connection, run_id: &str) -> Result<Vec<ReconciledRow>> {
    let mut stmt = conn.prepare(
        "SELECT stock_number, date_into_stock, stock_type, make, model, vin, plate_number,
                learner_approved, expiry_date, registration_issue, date_listed, listed_price,
                needs_registration_transfer, needs_listing_created, needs_plate_check
         FROM report_rows
         WHERE run_id = ?1
         ORDER BY position",
    )?;

    let rows = stmt
        .query_map(params![run_id], |row| {
            let issue: Option<String> = row.get(9)?;
            Ok(ReconciledRow {
                stock_number: row.get(0)?,
                date_into_stock: parse_date_text(row.get(1)?),
                stock_type: row.get(2)?,
                make: row.get(3)?,
                model: row.get(4)?,
                vin: row.get(5)?,
                plate_number: row.get(6)?,
                learner_approved: row.get(7)?,
                expiry_date: parse_date_text(row.get(8)?),
                registration_issue: issue.as_deref().and_then(RegistrationIssue::from_label),
                date_listed: parse_date_text(row.get(10)?),
                listed_price: row.get(11)?,
                status: StatusFlags {
                    needs_registration_transfer: row.get(12)?,
                    needs_listing_created: row.get(13)?,
                    needs_plate_check: row.get(14)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// The most recent run and its rows, if any run has been stored.
pub fn load_latest_report(conn: &Connection) -> Result<Option<(RunRecord, Vec<ReconciledRow>)>> {
    match latest_run(conn)? {
        Some(run) => {
            let rows = load_report_rows(conn, &run.id)?;
            Ok(Some((run, rows)))
        }
        None => Ok(None),
    }
}

/// SHA-256 of a file's bytes, lowercase hex.
pub fn file_digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {} for digest", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn record(plate: &str, issuer: Option<&str>, expiry: Option<NaiveDate>) -> RegistrationRecord {
        RegistrationRecord {
            plate_number: plate.to_string(),
            issuer_name: issuer.map(str::to_string),
            is_learner_approved: true,
            expiry_date: expiry,
            source: LookupSource::Documents,
        }
    }

    #[test]
    fn test_registration_cache_upsert() {
        let conn = test_conn();

        let first = record("ABC12", None, None);
        upsert_registrations(&conn, &[&first], "2026-10-15T08:00:00+00:00").unwrap();

        let second = record("ABC12", Some("MOTO DEALER PTY LTD"), Some(day(2027, 3, 1)));
        let other = record("XYZ99", Some("Other Co"), None);
        upsert_registrations(&conn, &[&second, &other], "2026-10-16T08:00:00+00:00").unwrap();

        let loaded = load_registrations(&conn).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["ABC12"], second);
        assert_eq!(loaded["XYZ99"].issuer_name.as_deref(), Some("Other Co"));
        println!("✅ Registration cache upsert test PASSED");
    }

    #[test]
    fn test_run_round_trip() {
        let mut conn = test_conn();

        let rows = vec![
            ReconciledRow {
                stock_number: "U1001".to_string(),
                date_into_stock: Some(day(2026, 10, 3)),
                stock_type: "Used".to_string(),
                make: "BMW".to_string(),
                model: "R1250GS".to_string(),
                vin: "WB10M1200K6000001".to_string(),
                plate_number: "ABC12".to_string(),
                learner_approved: Some(false),
                expiry_date: Some(day(2027, 1, 1)),
                registration_issue: Some(RegistrationIssue::NotUnderExpectedIssuer),
                date_listed: None,
                listed_price: None,
                status: StatusFlags {
                    needs_registration_transfer: true,
                    needs_listing_created: true,
                    needs_plate_check: false,
                },
            },
            ReconciledRow {
                stock_number: "U1002".to_string(),
                date_into_stock: None,
                stock_type: "Consignment".to_string(),
                make: "KTM".to_string(),
                model: "390 Duke".to_string(),
                vin: "VBKJPJ4000C000002".to_string(),
                plate_number: String::new(),
                learner_approved: None,
                expiry_date: None,
                registration_issue: None,
                date_listed: Some(day(2026, 10, 1)),
                listed_price: Some(6990.0),
                status: StatusFlags {
                    needs_plate_check: true,
                    ..Default::default()
                },
            },
        ];

        let mut run = RunRecord::new(day(2026, 10, 16), "aa".to_string(), "bb".to_string());
        run.row_count = rows.len();
        run.lookups = 1;
        save_run(&mut conn, &run, &rows).unwrap();

        let (latest, loaded) = load_latest_report(&conn).unwrap().unwrap();
        assert_eq!(latest, run);
        assert_eq!(loaded, rows);
        println!("✅ Run round trip test PASSED");
    }

    #[test]
    fn test_latest_report_empty_database() {
        let conn = test_conn();
        assert!(load_latest_report(&conn).unwrap().is_none());
    }

    #[test]
    fn test_file_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.dat");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(file_digest(&dir.path().join("missing")).is_err());
    }
}
