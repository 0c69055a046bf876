// Stock Status - Core Library
// Dealership stock reconciliation: inventory + listings + registrations → report

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod reconciliation;
pub mod registration;
pub mod repair;
pub mod report;

// Re-export commonly used types
pub use config::{Config, ResolverStrategy, DEFAULT_CONFIG_FILE};
pub use db::{
    file_digest, latest_run, load_latest_report, load_registrations, open_database, save_run,
    setup_database, upsert_registrations, RunRecord,
};
pub use error::PipelineError;
pub use parser::{InventoryParser, InventoryRow, ListingParser, ListingRow, SourceParser, SourceType};
pub use pipeline::{default_run_date, load_view_rows, run_pipeline, PipelineSummary};
pub use reconciliation::{ReconciledRow, ReconciliationEngine, StatusFlags};
pub use registration::{
    build_resolver, resolve_with_cache, DocumentStore, ExpiryStatus, LookupSource, PdfToText,
    RegistrationIssue, RegistrationRecord, RegistrationResolver,
};
pub use repair::{repair_rows, RawRow, RepairedRow};
pub use report::{
    format_date, format_price, mask_vin, read_report, write_report, MakeFilter, ReportFilter,
    ReportStats, SortKey, SortOrder,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
