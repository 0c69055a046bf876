// 🏗️ Source Parsers - Inventory export + listings export
//
// Both sources share one trait so the pipeline can load them the same way.
// Inventory is a headed CSV (`Stock{date}.dat`); listings are a headerless
// spreadsheet whose rows need repair before fields can be extracted.

use crate::config::InventoryConfig;
use crate::error::PipelineError;
use crate::extract::{date_listed, extract_age_days, extract_price, extract_vehicle_id};
use crate::repair::{repair_rows, RawRow, RepairedRow};
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceType - which export a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    Inventory,
    Listings,
}

impl SourceType {
    /// Short code used in logs and error messages
    pub fn code(&self) -> &'static str {
        match self {
            SourceType::Inventory => "inventory",
            SourceType::Listings => "listings",
        }
    }
}

/// One physical stock item. Source of truth for what exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub stock_number: String,
    pub date_into_stock: Option<NaiveDate>,
    pub stock_type: String,
    pub make: String,
    pub model: String,
    pub vin: String,
    /// Empty when the export held something too long to be a plate.
    pub plate_number: String,
}

/// Fixed layout of the listings export, in column order.
pub const LISTING_COLUMNS: [&str; 10] = [
    "make",
    "price",
    "odometer",
    "search_views",
    "detailed_views",
    "lead_count",
    "contact_watchers",
    "age",
    "health",
    "photos",
];

/// One online listing after row repair, with derived fields filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    pub make: Option<String>,
    pub price_text: Option<String>,
    pub odometer: Option<String>,
    pub search_views: Option<String>,
    pub detailed_views: Option<String>,
    pub lead_count: Option<String>,
    pub contact_watchers: Option<String>,
    pub age_text: Option<String>,
    pub health: Option<String>,
    pub photos: Option<String>,
    /// Raw pipe-delimited continuation text.
    pub details: String,

    // Derived
    pub vin: Option<String>,
    pub date_listed: Option<NaiveDate>,
    pub listed_price: Option<f64>,
}

impl ListingRow {
    pub fn from_repaired(row: RepairedRow, today: NaiveDate) -> Self {
        let cell = |i: usize| row.cells.get(i).cloned().flatten();

        let details = row.details.clone();
        let age_text = cell(7);
        let price_text = cell(1);

        ListingRow {
            vin: extract_vehicle_id(Some(details.as_str())),
            date_listed: date_listed(today, extract_age_days(age_text.as_deref())),
            listed_price: extract_price(price_text.as_deref()),
            make: cell(0),
            price_text,
            odometer: cell(2),
            search_views: cell(3),
            detailed_views: cell(4),
            lead_count: cell(5),
            contact_watchers: cell(6),
            age_text,
            health: cell(8),
            photos: cell(9),
            details,
        }
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// SourceParser - load one export into typed records
pub trait SourceParser {
    type Record;

    fn parse(&self, file_path: &Path) -> Result<Vec<Self::Record>>;

    fn source_type(&self) -> SourceType;
}

// ============================================================================
// INVENTORY
// ============================================================================

const INVENTORY_FIELDS: usize = 7;

pub struct InventoryParser {
    status_column: String,
    for_sale_status: String,
    max_plate_len: usize,
}

impl InventoryParser {
    pub fn new(config: &InventoryConfig) -> Self {
        InventoryParser {
            status_column: config.status_column.clone(),
            for_sale_status: config.for_sale_status.clone(),
            max_plate_len: config.max_plate_len,
        }
    }

    /// Parse a headed CSV export. Only rows in the for-sale status are kept;
    /// the status column is dropped and the rest map positionally to
    /// `[stock_number, date_into_stock, stock_type, make, model, vin, plate]`.
    pub fn parse_reader<R: Read>(&self, reader: R, source_name: &str) -> Result<Vec<InventoryRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = decode_record(
            reader
                .byte_headers()
                .with_context(|| format!("Failed to read header row of {}", source_name))?,
        );

        let status_idx = headers
            .iter()
            .position(|h| h.trim() == self.status_column)
            .ok_or_else(|| PipelineError::MissingColumn {
                source: source_name.to_string(),
                column: self.status_column.clone(),
            })?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;

        for result in reader.byte_records() {
            let record = result.with_context(|| format!("Failed to parse CSV row in {}", source_name))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if std::str::from_utf8(record.as_slice()).is_err() {
                tracing::warn!(source = source_name, line, "row is not valid UTF-8; invalid bytes replaced");
            }
            let values = decode_record(&record);

            if values.get(status_idx).map(|v| v.trim()) != Some(self.for_sale_status.as_str()) {
                skipped += 1;
                continue;
            }

            let fields: Vec<&str> = values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != status_idx)
                .map(|(_, v)| v.trim())
                .collect();

            if fields.len() < INVENTORY_FIELDS {
                return Err(PipelineError::ShortRecord {
                    source: source_name.to_string(),
                    line,
                    expected: INVENTORY_FIELDS,
                    found: fields.len(),
                }
                .into());
            }

            rows.push(InventoryRow {
                stock_number: fields[0].to_string(),
                date_into_stock: parse_stock_date(fields[1]),
                stock_type: normalize_stock_type(fields[2]),
                make: fields[3].to_string(),
                model: fields[4].to_string(),
                vin: fields[5].to_string(),
                plate_number: sanitize_plate(fields[6], self.max_plate_len),
            });
        }

        tracing::debug!(source = source_name, kept = rows.len(), skipped, "inventory rows filtered");
        Ok(rows)
    }
}

impl SourceParser for InventoryParser {
    type Record = InventoryRow;

    fn parse(&self, file_path: &Path) -> Result<Vec<InventoryRow>> {
        let file = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;
        self.parse_reader(file, &file_path.display().to_string())
    }

    fn source_type(&self) -> SourceType {
        SourceType::Inventory
    }
}

/// Exports come from systems that do not always write UTF-8; bad bytes
/// become U+FFFD instead of failing the whole file.
fn decode_record(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// `dd/mm/yy`; anything else is absent.
pub fn parse_stock_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%d/%m/%y").ok()
}

fn normalize_stock_type(value: &str) -> String {
    match value {
        "Consignment Stock" => "Consignment".to_string(),
        other => other.to_string(),
    }
}

/// Values longer than `max_len` are not real plates.
pub fn sanitize_plate(value: &str, max_len: usize) -> String {
    let value = value.trim();
    if value.chars().count() > max_len {
        String::new()
    } else {
        value.to_string()
    }
}

// ============================================================================
// LISTINGS
// ============================================================================

pub struct ListingParser {
    today: NaiveDate,
}

impl ListingParser {
    pub fn new(today: NaiveDate) -> Self {
        ListingParser { today }
    }

    /// Repair raw rows and derive vin / date listed / price.
    pub fn parse_rows(&self, rows: Vec<RawRow>) -> Vec<ListingRow> {
        let total = rows.len();
        let listings: Vec<ListingRow> = repair_rows(rows.into_iter().map(fit_listing_width))
            .into_iter()
            .map(|row| ListingRow::from_repaired(row, self.today))
            .collect();

        tracing::debug!(
            raw_rows = total,
            listings = listings.len(),
            with_vin = listings.iter().filter(|l| l.vin.is_some()).count(),
            "listing rows repaired"
        );
        listings
    }
}

impl SourceParser for ListingParser {
    type Record = ListingRow;

    fn parse(&self, file_path: &Path) -> Result<Vec<ListingRow>> {
        let rows = read_raw_rows(file_path)?;
        Ok(self.parse_rows(rows))
    }

    fn source_type(&self) -> SourceType {
        SourceType::Listings
    }
}

fn fit_listing_width(mut row: RawRow) -> RawRow {
    row.resize(LISTING_COLUMNS.len(), None);
    row
}

/// Read a headerless export: `.csv` through the csv reader, anything else
/// as a workbook (first sheet).
pub fn read_raw_rows(file_path: &Path) -> Result<Vec<RawRow>> {
    let is_csv = file_path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("csv"));

    if is_csv {
        read_csv_rows(file_path)
    } else {
        read_workbook_rows(file_path)
    }
}

fn read_csv_rows(file_path: &Path) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(file_path)
        .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result.with_context(|| format!("Failed to parse CSV row in {}", file_path.display()))?;
        if std::str::from_utf8(record.as_slice()).is_err() {
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            tracing::warn!(file = %file_path.display(), line, "row is not valid UTF-8; invalid bytes replaced");
        }
        rows.push(decode_record(&record).into_iter().map(non_empty).collect());
    }
    Ok(rows)
}

fn read_workbook_rows(file_path: &Path) -> Result<Vec<RawRow>> {
    let mut workbook = open_workbook_auto(file_path)
        .map_err(|e| anyhow!("Failed to open workbook {}: {}", file_path.display(), e))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("Workbook {} contains no sheets", file_path.display()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| anyhow!("Failed to read sheet '{}': {}", sheet_name, e))?;

    // The range starts at the first used cell; keep column positions absolute.
    let col_offset = range.start().map(|(_, col)| col as usize).unwrap_or(0);

    Ok(range
        .rows()
        .map(|cells| {
            std::iter::repeat(None)
                .take(col_offset)
                .chain(cells.iter().map(cell_text))
                .collect::<RawRow>()
        })
        .collect())
}

pub(crate) fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{:?}", e),
    };
    non_empty(text)
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

// ============================================================================
// TESTS
// ============================================================================
