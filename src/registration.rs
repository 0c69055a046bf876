// 🪪 Registration Resolver - plate number → registration status
//
// Two interchangeable strategies behind one trait:
//   - DocumentStore: newest certificate in a folder whose filename has the plate
//   - RemoteLookup:  the registration check web service (feature "remote")
//
// Resolution is best-effort. Every failure becomes an unresolved record,
// never an error. Plates resolved in a previous run are not looked up again.

use crate::config::{RegistrationConfig, ResolverStrategy};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

// ============================================================================
// RECORD
// ============================================================================

/// Which strategy produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    Documents,
    Remote,
}

impl LookupSource {
    pub fn code(&self) -> &'static str {
        match self {
            LookupSource::Documents => "documents",
            LookupSource::Remote => "remote",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "documents" => Some(LookupSource::Documents),
            "remote" => Some(LookupSource::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub plate_number: String,
    pub issuer_name: Option<String>,
    pub is_learner_approved: bool,
    pub expiry_date: Option<NaiveDate>,
    pub source: LookupSource,
}

impl RegistrationRecord {
    pub fn unresolved(plate_number: &str, source: LookupSource) -> Self {
        RegistrationRecord {
            plate_number: plate_number.to_string(),
            issuer_name: None,
            is_learner_approved: false,
            expiry_date: None,
            source,
        }
    }

    /// Resolved records carry an issuer or an expiry.
    pub fn is_resolved(&self) -> bool {
        self.issuer_name.is_some() || self.expiry_date.is_some()
    }

    /// Identity problems only. Expiry proximity is not an issue.
    ///
    /// The remote service never reports an issuer, so a missing issuer on a
    /// remote record is not held against it.
    pub fn issue(&self, expected_issuer: &str) -> Option<RegistrationIssue> {
        if !self.is_resolved() {
            return Some(RegistrationIssue::NoRegistrationFound);
        }
        match (&self.issuer_name, self.source) {
            (Some(issuer), _) if issuer.trim().eq_ignore_ascii_case(expected_issuer.trim()) => None,
            (Some(_), _) => Some(RegistrationIssue::NotUnderExpectedIssuer),
            (None, LookupSource::Documents) => Some(RegistrationIssue::NoRegistrationFound),
            (None, LookupSource::Remote) => None,
        }
    }
}

// ============================================================================
// DERIVED LABELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationIssue {
    NotUnderExpectedIssuer,
    NoRegistrationFound,
}

impl RegistrationIssue {
    pub fn label(&self) -> &'static str {
        match self {
            RegistrationIssue::NotUnderExpectedIssuer => "Registration not under expected issuer",
            RegistrationIssue::NoRegistrationFound => "No registration found",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Registration not under expected issuer" => Some(RegistrationIssue::NotUnderExpectedIssuer),
            "No registration found" => Some(RegistrationIssue::NoRegistrationFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Expired,
    ExpiringSoon,
    Valid,
    Unknown,
}

impl ExpiryStatus {
    /// Expired before `today`; expiring soon up to and including
    /// `today + warning_days`.
    pub fn classify(expiry: Option<NaiveDate>, today: NaiveDate, warning_days: i64) -> Self {
        let Some(expiry) = expiry else {
            return ExpiryStatus::Unknown;
        };
        if expiry < today {
            return ExpiryStatus::Expired;
        }
        match Duration::try_days(warning_days).and_then(|d| today.checked_add_signed(d)) {
            Some(horizon) if expiry <= horizon => ExpiryStatus::ExpiringSoon,
            _ => ExpiryStatus::Valid,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExpiryStatus::Expired => "Expired",
            ExpiryStatus::ExpiringSoon => "Expires soon",
            ExpiryStatus::Valid => "Valid",
            ExpiryStatus::Unknown => "Unknown",
        }
    }
}

// ============================================================================
// RESOLVER CAPABILITY
// ============================================================================

/// Must not fail: any problem resolves to `RegistrationRecord::unresolved`.
pub trait RegistrationResolver {
    fn resolve(&self, plate_number: &str) -> RegistrationRecord;

    fn source(&self) -> LookupSource;
}

/// Build the resolver named in the configuration.
pub fn build_resolver(config: &RegistrationConfig) -> Result<Box<dyn RegistrationResolver>> {
    match config.strategy {
        ResolverStrategy::Documents => Ok(Box::new(DocumentStore::new(
            config.certificate_folder.clone(),
            PdfToText,
        ))),
        ResolverStrategy::Remote => build_remote(config),
    }
}

#[cfg(feature = "remote")]
fn build_remote(config: &RegistrationConfig) -> Result<Box<dyn RegistrationResolver>> {
    let endpoint = config
        .remote_endpoint
        .clone()
        .ok_or_else(|| anyhow!("registration.remote_endpoint is not set"))?;
    Ok(Box::new(RemoteLookup::new(endpoint)?))
}

#[cfg(not(feature = "remote"))]
fn build_remote(_config: &RegistrationConfig) -> Result<Box<dyn RegistrationResolver>> {
    Err(anyhow!(
        "remote registration lookup is not available; rebuild with --features remote"
    ))
}

// ============================================================================
// DOCUMENT STORE STRATEGY
// ============================================================================

/// Turns a certificate file into plain text.
pub trait TextExtractor {
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// `.txt` files are read as-is; everything else goes through `pdftotext`.
pub struct PdfToText;

impl TextExtractor for PdfToText {
    fn extract_text(&self, path: &Path) -> Result<String> {
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("txt"));
        if is_text {
            return std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()));
        }

        which::which("pdftotext").map_err(|_| anyhow!("pdftotext not installed (poppler-utils)"))?;

        let output = Command::new("pdftotext")
            .arg(path)
            .arg("-")
            .output()
            .context("failed to run pdftotext")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "pdftotext failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub struct DocumentStore<E: TextExtractor> {
    folder: PathBuf,
    extractor: E,
}

impl<E: TextExtractor> DocumentStore<E> {
    pub fn new(folder: PathBuf, extractor: E) -> Self {
        DocumentStore { folder, extractor }
    }

    /// Most recently modified file whose name contains the plate.
    pub fn latest_document(&self, plate_number: &str) -> Result<Option<PathBuf>> {
        let entries = std::fs::read_dir(&self.folder)
            .with_context(|| format!("Failed to list {}", self.folder.display()))?;

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().contains(plate_number) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            // Equal timestamps fall back to the greater file name.
            let path = entry.path();
            if latest.as_ref().map_or(true, |(seen, seen_path)| {
                (modified, path.file_name()) > (*seen, seen_path.file_name())
            }) {
                latest = Some((modified, path));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }

    fn try_resolve(&self, plate_number: &str) -> Result<Option<RegistrationRecord>> {
        let Some(path) = self.latest_document(plate_number)? else {
            return Ok(None);
        };
        let text = self.extractor.extract_text(&path)?;
        let record = parse_certificate_text(&text).map(|fields| RegistrationRecord {
            plate_number: plate_number.to_string(),
            issuer_name: fields.issuer_name,
            is_learner_approved: fields.is_learner_approved,
            expiry_date: fields.expiry_date,
            source: LookupSource::Documents,
        });
        if record.is_none() {
            tracing::warn!(plate = plate_number, document = %path.display(), "certificate layout not recognised");
        }
        Ok(record)
    }
}

impl<E: TextExtractor> RegistrationResolver for DocumentStore<E> {
    fn resolve(&self, plate_number: &str) -> RegistrationRecord {
        match self.try_resolve(plate_number) {
            Ok(Some(record)) => record,
            Ok(None) => RegistrationRecord::unresolved(plate_number, LookupSource::Documents),
            Err(e) => {
                tracing::warn!(plate = plate_number, error = %e, "certificate lookup failed");
                RegistrationRecord::unresolved(plate_number, LookupSource::Documents)
            }
        }
    }

    fn source(&self) -> LookupSource {
        LookupSource::Documents
    }
}

/// Fields read off a certificate by line position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFields {
    pub issuer_name: Option<String>,
    pub is_learner_approved: bool,
    pub expiry_date: Option<NaiveDate>,
}

const PLATE_LINE: usize = 3;
const ISSUER_LINE: usize = 7;
const EXPIRY_LINES: std::ops::RangeInclusive<usize> = 10..=13;
const CONDITION_LINES: std::ops::RangeInclusive<usize> = 15..=16;
const LEARNER_MARKER: &str = "LA.";

fn certificate_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{2}-\d{2}-\d{4}").expect("valid date pattern"))
}

/// Positional parse. `None` when the layout does not match: no plate line,
/// no issuer line, or no expiry in the expected lines.
///
/// An expiry that matches the pattern but is not a real date leaves
/// `expiry_date` empty without discarding the issuer.
pub fn parse_certificate_text(text: &str) -> Option<CertificateFields> {
    let lines: Vec<&str> = text.split('\n').collect();

    let printed_plate = lines.get(PLATE_LINE)?.split_whitespace().next()?;
    let issuer_line = lines.get(ISSUER_LINE)?;
    let issuer = issuer_line
        .char_indices()
        .nth(printed_plate.chars().count())
        .map_or("", |(start, _)| &issuer_line[start..])
        .trim();

    let expiry_text = EXPIRY_LINES
        .filter_map(|i| lines.get(i))
        .find_map(|line| certificate_date_pattern().find(line))?
        .as_str();

    let is_learner_approved = CONDITION_LINES
        .filter_map(|i| lines.get(i))
        .any(|line| line.trim_start().starts_with(LEARNER_MARKER));

    Some(CertificateFields {
        issuer_name: if issuer.is_empty() { None } else { Some(issuer.to_string()) },
        is_learner_approved,
        expiry_date: NaiveDate::parse_from_str(expiry_text, "%d-%m-%Y").ok(),
    })
}

// ============================================================================
// REMOTE STRATEGY
// ============================================================================

fn remote_expiry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)registration expiry\s*:\s*(?:<[^>]*>\s*)*(\d{1,2}\s+[A-Za-z]+\s+\d{4})")
            .expect("valid expiry pattern")
    })
}

fn remote_conditions_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)condition codes\s*:?\s*(?:<[^>]*>\s*)*([^<\n]*)").expect("valid conditions pattern")
    })
}

/// Read a registration check response. Without an expiry the plate is
/// treated as unknown to the service.
pub fn parse_remote_response(plate_number: &str, body: &str) -> RegistrationRecord {
    let expiry = remote_expiry_pattern()
        .captures(body)
        .and_then(|caps| {
            let text = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
            NaiveDate::parse_from_str(&text, "%d %B %Y").ok()
        });

    let Some(expiry) = expiry else {
        return RegistrationRecord::unresolved(plate_number, LookupSource::Remote);
    };

    let is_learner_approved = remote_conditions_pattern()
        .captures(body)
        .map(|caps| {
            caps[1]
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|code| code == "LA")
        })
        .unwrap_or(false);

    RegistrationRecord {
        plate_number: plate_number.to_string(),
        issuer_name: None,
        is_learner_approved,
        expiry_date: Some(expiry),
        source: LookupSource::Remote,
    }
}

#[cfg(feature = "remote")]
pub struct RemoteLookup {
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl RemoteLookup {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(RemoteLookup { endpoint, client })
    }

    fn fetch(&self, plate_number: &str) -> Result<String> {
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[("plate", plate_number)])
            .send()?
            .error_for_status()?
            .text()?;
        Ok(body)
    }
}

#[cfg(feature = "remote")]
impl RegistrationResolver for RemoteLookup {
    fn resolve(&self, plate_number: &str) -> RegistrationRecord {
        match self.fetch(plate_number) {
            Ok(body) => parse_remote_response(plate_number, &body),
            Err(e) => {
                tracing::warn!(plate = plate_number, error = %e, "remote registration lookup failed");
                RegistrationRecord::unresolved(plate_number, LookupSource::Remote)
            }
        }
    }

    fn source(&self) -> LookupSource {
        LookupSource::Remote
    }
}

// ============================================================================
// CACHE / MERGE POLICY
// ============================================================================

#[derive(Debug, Default)]
pub struct CacheOutcome {
    /// One record per plate that has one, prior or fresh.
    pub records: HashMap<String, RegistrationRecord>,
    /// Plates looked up this run, in first-seen order.
    pub looked_up: Vec<String>,
    /// Plates that needed a lookup but were over the limit and had no
    /// prior record at all.
    pub skipped: Vec<String>,
}

impl CacheOutcome {
    /// Fresh records only, for persisting back to the cache.
    pub fn fresh_records(&self) -> Vec<&RegistrationRecord> {
        self.looked_up
            .iter()
            .filter_map(|plate| self.records.get(plate))
            .collect()
    }
}

/// Merge prior resolutions with fresh lookups.
///
/// Plates with a resolved prior record are reused untouched. The rest are
/// looked up sequentially, at most `limit` of them; over the limit a prior
/// unresolved record is carried forward when there is one.
pub fn resolve_with_cache<'a, I>(
    plates: I,
    prior: &HashMap<String, RegistrationRecord>,
    resolver: &dyn RegistrationResolver,
    limit: Option<usize>,
) -> CacheOutcome
where
    I: IntoIterator<Item = &'a str>,
{
    let mut outcome = CacheOutcome::default();
    let mut seen = HashSet::new();

    for plate in plates {
        let plate = plate.trim();
        if plate.is_empty() || !seen.insert(plate.to_string()) {
            continue;
        }

        let previous = prior.get(plate);
        if let Some(record) = previous.filter(|r| r.is_resolved()) {
            outcome.records.insert(plate.to_string(), record.clone());
            continue;
        }

        if limit.map_or(false, |max| outcome.looked_up.len() >= max) {
            match previous {
                Some(record) => {
                    outcome.records.insert(plate.to_string(), record.clone());
                }
                None => outcome.skipped.push(plate.to_string()),
            }
            continue;
        }

        tracing::info!(plate, source = resolver.source().code(), "resolving registration");
        let record = resolver.resolve(plate);
        if !record.is_resolved() {
            tracing::debug!(plate, "registration unresolved");
        }
        outcome.looked_up.push(plate.to_string());
        outcome.records.insert(plate.to_string(), record);
    }

    tracing::info!(
        reused = outcome.records.len() - outcome.looked_up.len(),
        looked_up = outcome.looked_up.len(),
        skipped = outcome.skipped.len(),
        "registration cache merged"
    );
    outcome
}

/// Timestamp stored alongside fresh records.
pub fn resolved_at() -> String {
    Utc::now().to_rfc3339()
}

// ============================================================================
// TESTS
// ============================================================================
