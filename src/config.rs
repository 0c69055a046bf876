// ⚙️ Configuration - stock-status.toml
//
// Only `registration.expected_issuer` is required; everything else has a
// default matching the dealership's export layout.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "stock-status.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// Input paths. `{date}` expands to the run date as `ddmmyy`.
#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    #[serde(default = "default_inventory_path")]
    pub inventory: String,
    #[serde(default = "default_listings_path")]
    pub listings: String,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            inventory: default_inventory_path(),
            listings: default_listings_path(),
        }
    }
}

fn default_inventory_path() -> String {
    "raw_data/Stock{date}.dat".to_string()
}

fn default_listings_path() -> String {
    "raw_data/autogate_data_{date}.xlsx".to_string()
}

impl InputsConfig {
    pub fn inventory_path(&self, run_date: NaiveDate) -> PathBuf {
        expand_date(&self.inventory, run_date)
    }

    pub fn listings_path(&self, run_date: NaiveDate) -> PathBuf {
        expand_date(&self.listings, run_date)
    }
}

fn expand_date(template: &str, run_date: NaiveDate) -> PathBuf {
    PathBuf::from(template.replace("{date}", &run_date.format("%d%m%y").to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_report_path")]
    pub report: PathBuf,
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report: default_report_path(),
            database: default_database_path(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("used_stock_data.xlsx")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("stock_status.db")
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_status_column")]
    pub status_column: String,
    #[serde(default = "default_for_sale_status")]
    pub for_sale_status: String,
    /// Longer values are not real plates and are blanked.
    #[serde(default = "default_max_plate_len")]
    pub max_plate_len: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            status_column: default_status_column(),
            for_sale_status: default_for_sale_status(),
            max_plate_len: default_max_plate_len(),
        }
    }
}

fn default_status_column() -> String {
    "Status Desc.".to_string()
}

fn default_for_sale_status() -> String {
    "For Sale".to_string()
}

fn default_max_plate_len() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStrategy {
    /// Scan a folder of registration certificates.
    Documents,
    /// Query the remote registration check service.
    Remote,
}

impl Default for ResolverStrategy {
    fn default() -> Self {
        Self::Documents
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Registered operator name every stock vehicle should carry.
    pub expected_issuer: String,
    #[serde(default)]
    pub strategy: ResolverStrategy,
    #[serde(default = "default_certificate_folder")]
    pub certificate_folder: PathBuf,
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
    #[serde(default)]
    pub remote_endpoint: Option<String>,
    /// Cap on new lookups per run.
    #[serde(default)]
    pub lookup_limit: Option<usize>,
}

fn default_certificate_folder() -> PathBuf {
    PathBuf::from("certificates")
}

fn default_expiry_warning_days() -> i64 {
    30
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_make_categories")]
    pub make_categories: Vec<String>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            make_categories: default_make_categories(),
        }
    }
}

fn default_make_categories() -> Vec<String> {
    vec!["BMW".to_string(), "KAW".to_string(), "KTM".to_string()]
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Config = toml::from_str(input).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.registration.expected_issuer.trim().is_empty() {
            anyhow::bail!("registration.expected_issuer must not be empty");
        }
        if self.registration.strategy == ResolverStrategy::Remote
            && self.registration.remote_endpoint.is_none()
        {
            anyhow::bail!("registration.remote_endpoint is required for the remote strategy");
        }
        if self.registration.expiry_warning_days < 0 {
            anyhow::bail!("registration.expiry_warning_days must not be negative");
        }
        Ok(())
    }
}
