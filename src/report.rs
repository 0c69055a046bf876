// 📊 Report Sink - stock status spreadsheet + filterable view model
//
// The spreadsheet is the operator-facing output. The filter/sort model here
// is shared by the terminal view and the JSON server.

use crate::error::PipelineError;
use crate::parser::cell_text;
use crate::reconciliation::{ReconciledRow, StatusFlags};
use crate::registration::{ExpiryStatus, RegistrationIssue};
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Reader};
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const REPORT_COLUMNS: [&str; 12] = [
    "Stock Number",
    "Date Into Stock",
    "Make",
    "Model",
    "Learner Approved",
    "VIN",
    "Plate Number",
    "Expiry Date",
    "Registration Issue",
    "Date Listed",
    "Listed Price",
    "Status",
];

const REPORT_DATE_FORMAT: &str = "%d-%b-%Y";
const SHEET_NAME: &str = "Stock Status";

// ============================================================================
// FORMATTING
// ============================================================================

/// `DD-Mon-YYYY`, empty when absent.
pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(REPORT_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn parse_report_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), REPORT_DATE_FORMAT).ok()
}

pub fn learner_text(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "Yes",
        Some(false) => "No",
        None => "",
    }
}

fn parse_learner(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

/// `$12,345.67`, empty when absent.
pub fn format_price(price: Option<f64>) -> String {
    let Some(price) = price else {
        return String::new();
    };
    let cents = (price.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if price < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Last seven characters only, e.g. `***6000001`.
pub fn mask_vin(vin: &str) -> String {
    let count = vin.chars().count();
    if count < 7 {
        return vin.to_string();
    }
    let tail: String = vin.chars().skip(count - 7).collect();
    format!("***{tail}")
}

// ============================================================================
// SPREADSHEET WRITER / READER
// ============================================================================

pub fn write_report(path: &Path, rows: &[ReconciledRow]) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, name) in REPORT_COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *name, &header)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, &row.stock_number)?;
        worksheet.write_string(r, 1, format_date(row.date_into_stock))?;
        worksheet.write_string(r, 2, &row.make)?;
        worksheet.write_string(r, 3, &row.model)?;
        worksheet.write_string(r, 4, learner_text(row.learner_approved))?;
        worksheet.write_string(r, 5, &row.vin)?;
        worksheet.write_string(r, 6, &row.plate_number)?;
        worksheet.write_string(r, 7, format_date(row.expiry_date))?;
        worksheet.write_string(
            r,
            8,
            row.registration_issue.map(|i| i.label()).unwrap_or_default(),
        )?;
        worksheet.write_string(r, 9, format_date(row.date_listed))?;
        if let Some(price) = row.listed_price {
            worksheet.write_number(r, 10, price)?;
        }
        worksheet.write_string(r, 11, row.status.to_string())?;
    }

    worksheet.autofit();

    workbook
        .save(path)
        .with_context(|| format!("Failed to save report {}", path.display()))?;

    tracing::info!(path = %path.display(), rows = rows.len(), "report written");
    Ok(())
}

/// Read a report written by `write_report`. Every report column must be
/// present in the header row.
pub fn read_report(path: &Path) -> Result<Vec<ReconciledRow>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| anyhow!("Failed to open report {}: {}", path.display(), e))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("Report {} contains no sheets", path.display()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| anyhow!("Failed to read sheet '{}': {}", sheet_name, e))?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|cells| cells.iter().map(|c| cell_text(c).unwrap_or_default()).collect())
        .unwrap_or_default();

    let mut index = [0usize; REPORT_COLUMNS.len()];
    for (slot, column) in index.iter_mut().zip(REPORT_COLUMNS) {
        *slot = header
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| PipelineError::MissingColumn {
                source: path.display().to_string(),
                column: column.to_string(),
            })?;
    }

    let report = rows
        .map(|cells| {
            let get = |col: usize| {
                cells
                    .get(index[col])
                    .and_then(cell_text)
                    .unwrap_or_default()
            };
            ReconciledRow {
                stock_number: get(0),
                date_into_stock: parse_report_date(&get(1)),
                stock_type: String::new(),
                make: get(2),
                model: get(3),
                learner_approved: parse_learner(&get(4)),
                vin: get(5),
                plate_number: get(6),
                expiry_date: parse_report_date(&get(7)),
                registration_issue: RegistrationIssue::from_label(&get(8)),
                date_listed: parse_report_date(&get(9)),
                listed_price: get(10).trim().parse().ok(),
                status: StatusFlags::parse(&get(11)),
            }
        })
        .filter(|row| !row.stock_number.is_empty())
        .collect();

    Ok(report)
}

// ============================================================================
// FILTER / SORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MakeFilter {
    All,
    /// Make contains the category, case-insensitive.
    Category(String),
    /// Make matches none of the configured categories.
    Other,
}

impl MakeFilter {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "" | "ALL" => MakeFilter::All,
            "OTHER" => MakeFilter::Other,
            category => MakeFilter::Category(category.to_string()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            MakeFilter::All => "ALL".to_string(),
            MakeFilter::Category(c) => c.clone(),
            MakeFilter::Other => "OTHER".to_string(),
        }
    }

    fn matches(&self, make: &str, categories: &[String]) -> bool {
        let make = make.to_ascii_uppercase();
        match self {
            MakeFilter::All => true,
            MakeFilter::Category(c) => make.contains(&c.to_ascii_uppercase()),
            MakeFilter::Other => !categories
                .iter()
                .any(|c| make.contains(&c.to_ascii_uppercase())),
        }
    }

    /// ALL → each category → OTHER → ALL.
    pub fn cycle(&self, categories: &[String]) -> Self {
        let next_category = |i: usize| {
            categories
                .get(i)
                .map(|c| MakeFilter::Category(c.to_ascii_uppercase()))
                .unwrap_or(MakeFilter::Other)
        };
        match self {
            MakeFilter::All => next_category(0),
            MakeFilter::Category(current) => {
                let pos = categories
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(current));
                match pos {
                    Some(i) => next_category(i + 1),
                    None => MakeFilter::Other,
                }
            }
            MakeFilter::Other => MakeFilter::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    DateIntoStock,
    ExpiryDate,
    DateListed,
}

impl SortKey {
    pub fn label(&self) -> &'static str {
        match self {
            SortKey::DateIntoStock => "Date Into Stock",
            SortKey::ExpiryDate => "Expiry Date",
            SortKey::DateListed => "Date Listed",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            SortKey::DateIntoStock => SortKey::ExpiryDate,
            SortKey::ExpiryDate => SortKey::DateListed,
            SortKey::DateListed => SortKey::DateIntoStock,
        }
    }

    fn value(&self, row: &ReconciledRow) -> Option<NaiveDate> {
        match self {
            SortKey::DateIntoStock => row.date_into_stock,
            SortKey::ExpiryDate => row.expiry_date,
            SortKey::DateListed => row.date_listed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub fn toggle(&self) -> Self {
        match self {
            SortOrder::NewestFirst => SortOrder::OldestFirst,
            SortOrder::OldestFirst => SortOrder::NewestFirst,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::NewestFirst => "Newest first",
            SortOrder::OldestFirst => "Oldest first",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFilter {
    pub make: MakeFilter,
    pub learner_only: bool,
    pub needs_listing_only: bool,
    pub needs_transfer_only: bool,
    pub stock_search: String,
    pub plate_search: String,
    pub sort_key: SortKey,
    pub sort_order: SortOrder,
}

impl Default for ReportFilter {
    fn default() -> Self {
        ReportFilter {
            make: MakeFilter::All,
            learner_only: false,
            needs_listing_only: false,
            needs_transfer_only: false,
            stock_search: String::new(),
            plate_search: String::new(),
            sort_key: SortKey::DateIntoStock,
            sort_order: SortOrder::NewestFirst,
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim();
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl ReportFilter {
    pub fn matches(&self, row: &ReconciledRow, categories: &[String]) -> bool {
        self.make.matches(&row.make, categories)
            && (!self.learner_only || row.learner_approved == Some(true))
            && (!self.needs_listing_only || row.status.needs_listing_created)
            && (!self.needs_transfer_only || row.status.needs_registration_transfer)
            && contains_ignore_case(&row.stock_number, &self.stock_search)
            && contains_ignore_case(&row.plate_number, &self.plate_search)
    }

    /// Matching rows in display order. Rows without the sort date go last
    /// in either order; equal dates keep their incoming order.
    pub fn apply<'a>(&self, rows: &'a [ReconciledRow], categories: &[String]) -> Vec<&'a ReconciledRow> {
        let mut selected: Vec<&ReconciledRow> = rows
            .iter()
            .filter(|row| self.matches(row, categories))
            .collect();

        selected.sort_by(|a, b| {
            match (self.sort_key.value(a), self.sort_key.value(b)) {
                (Some(x), Some(y)) => match self.sort_order {
                    SortOrder::NewestFirst => y.cmp(&x),
                    SortOrder::OldestFirst => x.cmp(&y),
                },
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        });

        selected
    }

    pub fn is_default(&self) -> bool {
        *self == ReportFilter::default()
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    pub total: usize,
    pub needs_registration_transfer: usize,
    pub needs_listing_created: usize,
    pub needs_plate_check: usize,
    pub learner_approved: usize,
    pub by_make: BTreeMap<String, usize>,
    pub by_expiry: BTreeMap<String, usize>,
}

impl ReportStats {
    pub fn compute(
        rows: &[ReconciledRow],
        categories: &[String],
        today: NaiveDate,
        warning_days: i64,
    ) -> Self {
        let mut stats = ReportStats {
            total: rows.len(),
            ..Default::default()
        };

        for row in rows {
            stats.needs_registration_transfer += row.status.needs_registration_transfer as usize;
            stats.needs_listing_created += row.status.needs_listing_created as usize;
            stats.needs_plate_check += row.status.needs_plate_check as usize;
            stats.learner_approved += (row.learner_approved == Some(true)) as usize;

            let make = categories
                .iter()
                .find(|c| row.make.to_ascii_uppercase().contains(&c.to_ascii_uppercase()))
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| "OTHER".to_string());
            *stats.by_make.entry(make).or_insert(0) += 1;

            let expiry: ExpiryStatus = row.expiry_status(today, warning_days);
            *stats.by_expiry.entry(expiry.label().to_string()).or_insert(0) += 1;
        }

        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn categories() -> Vec<String> {
        vec!["BMW".to_string(), "KAW".to_string(), "KTM".to_string()]
    }

    fn row(stock: &str, make: &str, plate: &str, into_stock: Option<NaiveDate>) -> ReconciledRow {
        ReconciledRow {
            stock_number: stock.to_string(),
            date_into_stock: into_stock,
            stock_type: "Used".to_string(),
            make: make.to_string(),
            model: "Model".to_string(),
            vin: "WB10M1200K6000001".to_string(),
            plate_number: plate.to_string(),
            learner_approved: None,
            expiry_date: None,
            registration_issue: None,
            date_listed: None,
            listed_price: None,
            status: StatusFlags::default(),
        }
    }

    fn sample() -> Vec<ReconciledRow> {
        let mut a = row("U1001", "BMW", "ABC12", Some(day(2026, 10, 3)));
        a.learner_approved = Some(true);
        a.expiry_date = Some(day(2026, 10, 26));
        a.date_listed = Some(day(2026, 10, 5));
        a.listed_price = Some(24990.0);

        let mut b = row("U1002", "Kawasaki", "XYZ99", Some(day(2026, 9, 15)));
        b.status.needs_registration_transfer = true;
        b.status.needs_listing_created = true;
        b.registration_issue = Some(RegistrationIssue::NotUnderExpectedIssuer);
        b.expiry_date = Some(day(2026, 1, 1));

        let mut c = row("U1003", "Honda", "", None);
        c.status.needs_listing_created = true;
        c.status.needs_plate_check = true;

        vec![a, b, c]
    }

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(format_date(Some(day(2026, 10, 6))), "06-Oct-2026");
        assert_eq!(format_date(None), "");
        assert_eq!(parse_report_date("06-Oct-2026"), Some(day(2026, 10, 6)));
        assert_eq!(format_price(Some(12345.67)), "$12,345.67");
        assert_eq!(format_price(Some(990.0)), "$990.00");
        assert_eq!(format_price(Some(1_000_000.0)), "$1,000,000.00");
        assert_eq!(format_price(None), "");
        assert_eq!(mask_vin("WB10M1200K6000001"), "***6000001");
        assert_eq!(mask_vin("SHORT"), "SHORT");
        assert_eq!(learner_text(Some(false)), "No");
    }

    #[test]
    fn test_make_filter() {
        let rows = sample();
        let cats = categories();

        let kaw = ReportFilter {
            make: MakeFilter::parse("kaw"),
            ..Default::default()
        };
        let other = ReportFilter {
            make: MakeFilter::Other,
            ..Default::default()
        };

        let kaw_rows: Vec<&str> = kaw.apply(&rows, &cats).iter().map(|r| r.stock_number.as_str()).collect();
        let other_rows: Vec<&str> = other.apply(&rows, &cats).iter().map(|r| r.stock_number.as_str()).collect();

        assert_eq!(kaw_rows, vec!["U1002"]);
        assert_eq!(other_rows, vec!["U1003"]);
    }

    #[test]
    fn test_flag_filters_and_search() {
        let rows = sample();
        let cats = categories();

        let learners = ReportFilter { learner_only: true, ..Default::default() };
        assert_eq!(learners.apply(&rows, &cats).len(), 1);

        let listing = ReportFilter { needs_listing_only: true, ..Default::default() };
        assert_eq!(listing.apply(&rows, &cats).len(), 2);

        let transfer = ReportFilter { needs_transfer_only: true, ..Default::default() };
        assert_eq!(transfer.apply(&rows, &cats)[0].stock_number, "U1002");

        let search = ReportFilter { plate_search: "xyz".to_string(), ..Default::default() };
        assert_eq!(search.apply(&rows, &cats)[0].stock_number, "U1002");

        let stock = ReportFilter { stock_search: "u100".to_string(), ..Default::default() };
        assert_eq!(stock.apply(&rows, &cats).len(), 3);
    }

    #[test]
    fn test_sorting_keeps_missing_dates_last() {
        let rows = sample();
        let cats = categories();

        let oldest = ReportFilter { sort_order: SortOrder::OldestFirst, ..Default::default() };
        let order: Vec<&str> = oldest.apply(&rows, &cats).iter().map(|r| r.stock_number.as_str()).collect();
        assert_eq!(order, vec!["U1002", "U1001", "U1003"]);

        let by_listing = ReportFilter { sort_key: SortKey::DateListed, ..Default::default() };
        let order: Vec<&str> = by_listing.apply(&rows, &cats).iter().map(|r| r.stock_number.as_str()).collect();
        assert_eq!(order, vec!["U1001", "U1002", "U1003"]);
    }

    #[test]
    fn test_make_filter_cycle() {
        let cats = categories();
        let mut filter = MakeFilter::All;
        let mut seen = Vec::new();
        for _ in 0..5 {
            filter = filter.cycle(&cats);
            seen.push(filter.label());
        }
        assert_eq!(seen, vec!["BMW", "KAW", "KTM", "OTHER", "ALL"]);
    }

    #[test]
    fn test_stats() {
        let stats = ReportStats::compute(&sample(), &categories(), day(2026, 10, 16), 30);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.needs_registration_transfer, 1);
        assert_eq!(stats.needs_listing_created, 2);
        assert_eq!(stats.needs_plate_check, 1);
        assert_eq!(stats.learner_approved, 1);
        assert_eq!(stats.by_make["BMW"], 1);
        assert_eq!(stats.by_make["KAW"], 1);
        assert_eq!(stats.by_make["OTHER"], 1);
        assert_eq!(stats.by_expiry["Expires soon"], 1);
        assert_eq!(stats.by_expiry["Expired"], 1);
        assert_eq!(stats.by_expiry["Unknown"], 1);
    }

    #[test]
    fn test_report_spreadsheet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let rows = sample();

        write_report(&path, &rows).unwrap();
        let read = read_report(&path).unwrap();

        assert_eq!(read.len(), 3);
        assert_eq!(read[0].stock_number, "U1001");
        assert_eq!(read[0].date_into_stock, Some(day(2026, 10, 3)));
        assert_eq!(read[0].learner_approved, Some(true));
        assert_eq!(read[0].listed_price, Some(24990.0));
        assert_eq!(read[1].registration_issue, Some(RegistrationIssue::NotUnderExpectedIssuer));
        assert_eq!(read[1].status, rows[1].status);
        assert_eq!(read[2].learner_approved, None);
        assert_eq!(read[2].date_into_stock, None);
    }

    #[test]
    fn test_report_missing_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Stock Number").unwrap();
        sheet.write_string(1, 0, "U1").unwrap();
        workbook.save(&path).unwrap();

        let err = read_report(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingColumn { column, .. }) if column == "Date Into Stock"
        ));
    }
}
