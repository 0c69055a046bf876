// 🔄 Pipeline - one batch run, inputs to report
//
// load → repair/extract → resolve registrations (cached) → reconcile → write
//
// The run date is passed in; nothing below reads the clock to decide
// derived dates.

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::parser::{InventoryParser, ListingParser, SourceParser};
use crate::reconciliation::{ReconciledRow, ReconciliationEngine};
use crate::registration::{resolve_with_cache, resolved_at, RegistrationResolver};
use crate::report;
use anyhow::Result;
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub inventory_rows: usize,
    pub listing_rows: usize,
    pub rows_written: usize,
    pub registrations_reused: usize,
    pub registrations_looked_up: usize,
    pub registrations_skipped: usize,
    pub needs_registration_transfer: usize,
    pub needs_listing_created: usize,
    pub report_path: PathBuf,
}

/// Today in local time, for when no run date is given.
pub fn default_run_date() -> NaiveDate {
    Local::now().date_naive()
}

fn require_input(role: &'static str, path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(PipelineError::MissingInput { role, path }.into())
    }
}

/// Execute one run. `lookup_limit` overrides the configured limit.
pub fn run_pipeline(
    config: &Config,
    run_date: NaiveDate,
    resolver: &dyn RegistrationResolver,
    conn: &mut Connection,
    lookup_limit: Option<usize>,
) -> Result<PipelineSummary> {
    let inventory_path = require_input("inventory", config.inputs.inventory_path(run_date))?;
    let listings_path = require_input("listings", config.inputs.listings_path(run_date))?;

    tracing::info!(
        %run_date,
        inventory = %inventory_path.display(),
        listings = %listings_path.display(),
        "starting run"
    );

    let mut run = db::RunRecord::new(
        run_date,
        db::file_digest(&inventory_path)?,
        db::file_digest(&listings_path)?,
    );

    // Stage 1: sources
    let inventory_parser = InventoryParser::new(&config.inventory);
    let inventory = inventory_parser.parse(&inventory_path)?;
    tracing::info!(source = inventory_parser.source_type().code(), rows = inventory.len(), "source loaded");

    let listing_parser = ListingParser::new(run_date);
    let listings = listing_parser.parse(&listings_path)?;
    tracing::info!(source = listing_parser.source_type().code(), rows = listings.len(), "source loaded");

    // Stage 2: registrations
    let prior = db::load_registrations(conn)?;
    let limit = lookup_limit.or(config.registration.lookup_limit);
    let outcome = resolve_with_cache(
        inventory.iter().map(|row| row.plate_number.as_str()),
        &prior,
        resolver,
        limit,
    );
    let fresh = outcome.fresh_records();
    db::upsert_registrations(conn, &fresh, &resolved_at())?;

    // Stage 3: merge
    let engine = ReconciliationEngine::new(config.registration.expected_issuer.as_str());
    let rows = engine.reconcile(&inventory, &listings, &outcome.records);

    // Stage 4: outputs
    let report_path = config.output.report.clone();
    report::write_report(&report_path, &rows)?;

    run.report_path = report_path.display().to_string();
    run.row_count = rows.len();
    run.lookups = outcome.looked_up.len();
    db::save_run(conn, &run, &rows)?;

    let summary = PipelineSummary {
        run_id: run.id,
        run_date,
        inventory_rows: inventory.len(),
        listing_rows: listings.len(),
        rows_written: rows.len(),
        registrations_reused: outcome.records.len() - outcome.looked_up.len(),
        registrations_looked_up: outcome.looked_up.len(),
        registrations_skipped: outcome.skipped.len(),
        needs_registration_transfer: rows
            .iter()
            .filter(|r| r.status.needs_registration_transfer)
            .count(),
        needs_listing_created: rows.iter().filter(|r| r.status.needs_listing_created).count(),
        report_path,
    };

    tracing::info!(
        run_id = %summary.run_id,
        rows = summary.rows_written,
        looked_up = summary.registrations_looked_up,
        "run complete"
    );
    Ok(summary)
}

/// Rows for the views: a report spreadsheet when given, otherwise the
/// latest stored run.
pub fn load_view_rows(
    conn: &Connection,
    report_path: Option<&Path>,
) -> Result<Vec<ReconciledRow>> {
    if let Some(path) = report_path {
        if !path.is_file() {
            return Err(PipelineError::MissingInput {
                role: "report",
                path: path.to_path_buf(),
            }
            .into());
        }
        return report::read_report(path);
    }

    match db::load_latest_report(conn)? {
        Some((run, rows)) => {
            tracing::info!(run_id = %run.id, run_date = %run.run_date, rows = rows.len(), "loaded latest run");
            Ok(rows)
        }
        None => {
            tracing::warn!("no stored runs; run the pipeline first");
            Ok(Vec::new())
        }
    }
}
