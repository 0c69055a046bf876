// ⚖️ Reconciliation Engine - one row per stock item
//
// Left join: inventory is the spine, listings join on VIN and registrations
// join on plate number. A row exists for every inventory item whether or not
// anything else matched. Status is a set of independent flags; text only
// appears when the report is rendered.

use crate::parser::{InventoryRow, ListingRow};
use crate::registration::{ExpiryStatus, RegistrationIssue, RegistrationRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// STATUS FLAGS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    /// Registration is missing or held by someone other than the dealer.
    pub needs_registration_transfer: bool,
    /// No live listing was matched.
    pub needs_listing_created: bool,
    /// The inventory plate was blank or not a plate.
    pub needs_plate_check: bool,
}

impl StatusFlags {
    pub const TRANSFER_LABEL: &'static str = "Transfer registration";
    pub const LISTING_LABEL: &'static str = "Create listing";
    pub const PLATE_LABEL: &'static str = "Check plate number";

    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.needs_registration_transfer {
            labels.push(Self::TRANSFER_LABEL);
        }
        if self.needs_listing_created {
            labels.push(Self::LISTING_LABEL);
        }
        if self.needs_plate_check {
            labels.push(Self::PLATE_LABEL);
        }
        labels
    }

    pub fn is_clear(&self) -> bool {
        *self == StatusFlags::default()
    }

    /// Inverse of `Display`. Unknown fragments are ignored.
    pub fn parse(text: &str) -> Self {
        let mut flags = StatusFlags::default();
        for part in text.split(';').map(str::trim) {
            match part {
                Self::TRANSFER_LABEL => flags.needs_registration_transfer = true,
                Self::LISTING_LABEL => flags.needs_listing_created = true,
                Self::PLATE_LABEL => flags.needs_plate_check = true,
                _ => {}
            }
        }
        flags
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels().join("; "))
    }
}

// ============================================================================
// RECONCILED ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub stock_number: String,
    pub date_into_stock: Option<NaiveDate>,
    pub stock_type: String,
    pub make: String,
    pub model: String,
    pub vin: String,
    pub plate_number: String,

    // Registration overlay
    /// `None` when the plate was never looked up.
    pub learner_approved: Option<bool>,
    pub expiry_date: Option<NaiveDate>,
    pub registration_issue: Option<RegistrationIssue>,

    // Listing overlay
    pub date_listed: Option<NaiveDate>,
    pub listed_price: Option<f64>,

    pub status: StatusFlags,
}

impl ReconciledRow {
    pub fn expiry_status(&self, today: NaiveDate, warning_days: i64) -> ExpiryStatus {
        ExpiryStatus::classify(self.expiry_date, today, warning_days)
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Registered operator every stock registration should carry.
    pub expected_issuer: String,
}

impl ReconciliationEngine {
    pub fn new(expected_issuer: impl Into<String>) -> Self {
        ReconciliationEngine {
            expected_issuer: expected_issuer.into(),
        }
    }

    /// One row per inventory item, newest stock first. Ties keep input order.
    pub fn reconcile(
        &self,
        inventory: &[InventoryRow],
        listings: &[ListingRow],
        registrations: &HashMap<String, RegistrationRecord>,
    ) -> Vec<ReconciledRow> {
        let latest = latest_listing_by_vin(listings);

        let mut rows: Vec<ReconciledRow> = inventory
            .iter()
            .map(|item| {
                let listing = latest.get(item.vin.trim()).copied();
                let registration = if item.plate_number.is_empty() {
                    None
                } else {
                    registrations.get(&item.plate_number)
                };
                self.reconcile_one(item, listing, registration)
            })
            .collect();

        // Stable: equal dates keep input order; missing dates go last.
        rows.sort_by(|a, b| match (a.date_into_stock, b.date_into_stock) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        tracing::info!(
            rows = rows.len(),
            needs_transfer = rows.iter().filter(|r| r.status.needs_registration_transfer).count(),
            needs_listing = rows.iter().filter(|r| r.status.needs_listing_created).count(),
            "inventory reconciled"
        );
        rows
    }

    fn reconcile_one(
        &self,
        item: &InventoryRow,
        listing: Option<&ListingRow>,
        registration: Option<&RegistrationRecord>,
    ) -> ReconciledRow {
        let registration_issue = registration.and_then(|r| r.issue(&self.expected_issuer));
        let date_listed = listing.and_then(|l| l.date_listed);

        let status = StatusFlags {
            needs_registration_transfer: registration_issue.is_some(),
            needs_listing_created: date_listed.is_none(),
            needs_plate_check: item.plate_number.is_empty(),
        };

        ReconciledRow {
            stock_number: item.stock_number.clone(),
            date_into_stock: item.date_into_stock,
            stock_type: item.stock_type.clone(),
            make: item.make.clone(),
            model: item.model.clone(),
            vin: item.vin.clone(),
            plate_number: item.plate_number.clone(),
            learner_approved: registration.map(|r| r.is_learner_approved),
            expiry_date: registration.and_then(|r| r.expiry_date),
            registration_issue,
            date_listed,
            listed_price: listing.and_then(|l| l.listed_price),
            status,
        }
    }
}

/// Latest listing per VIN: most recent `date_listed`, later row on a tie.
/// Listings without a VIN cannot be joined and are ignored.
pub fn latest_listing_by_vin(listings: &[ListingRow]) -> HashMap<&str, &ListingRow> {
    let mut latest: HashMap<&str, &ListingRow> = HashMap::new();
    for listing in listings {
        let Some(vin) = listing.vin.as_deref() else {
            continue;
        };
        let keep_current = latest
            .get(vin)
            .map_or(false, |current| current.date_listed > listing.date_listed);
        if !keep_current {
            latest.insert(vin, listing);
        }
    }
    latest
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::LookupSource;

    const EXPECTED: &str = "MOTO DEALER PTY LTD";

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stock(stock_number: &str, date: Option<NaiveDate>, vin: &str, plate: &str) -> InventoryRow {
        InventoryRow {
            stock_number: stock_number.to_string(),
            date_into_stock: date,
            stock_type: "Used".to_string(),
            make: "BMW".to_string(),
            model: "R 1250 GS".to_string(),
            vin: vin.to_string(),
            plate_number: plate.to_string(),
        }
    }

    fn listing(vin: Option<&str>, listed: Option<NaiveDate>, price: Option<f64>) -> ListingRow {
        ListingRow {
            make: Some("BMW".to_string()),
            price_text: None,
            odometer: None,
            search_views: None,
            detailed_views: None,
            lead_count: None,
            contact_watchers: None,
            age_text: None,
            health: None,
            photos: None,
            details: String::new(),
            vin: vin.map(str::to_string),
            date_listed: listed,
            listed_price: price,
        }
    }

    fn registration(plate: &str, issuer: Option<&str>) -> RegistrationRecord {
        RegistrationRecord {
            plate_number: plate.to_string(),
            issuer_name: issuer.map(str::to_string),
            is_learner_approved: true,
            expiry_date: Some(day(2027, 5, 1)),
            source: LookupSource::Documents,
        }
    }

    #[test]
    fn test_every_inventory_row_is_kept() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![
            stock("U1", Some(day(2026, 10, 1)), "VIN1", "AAA11"),
            stock("U2", Some(day(2026, 9, 1)), "VIN2", ""),
            stock("U3", None, "VIN3", "CCC33"),
        ];

        let rows = engine.reconcile(&inventory, &[], &HashMap::new());

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status.needs_listing_created));
        assert!(rows.iter().all(|r| r.learner_approved.is_none()));
        assert!(rows.iter().all(|r| !r.status.needs_registration_transfer));
    }

    #[test]
    fn test_listing_and_registration_overlays() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![stock("U1", Some(day(2026, 10, 1)), "VIN1", "AAA11")];
        let listings = vec![listing(Some("VIN1"), Some(day(2026, 10, 5)), Some(24990.0))];
        let mut registrations = HashMap::new();
        registrations.insert("AAA11".to_string(), registration("AAA11", Some(EXPECTED)));

        let rows = engine.reconcile(&inventory, &listings, &registrations);
        let row = &rows[0];

        assert_eq!(row.date_listed, Some(day(2026, 10, 5)));
        assert_eq!(row.listed_price, Some(24990.0));
        assert_eq!(row.learner_approved, Some(true));
        assert_eq!(row.expiry_date, Some(day(2027, 5, 1)));
        assert_eq!(row.registration_issue, None);
        assert!(row.status.is_clear());
    }

    #[test]
    fn test_undated_listing_still_needs_listing_created() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![stock("U1", Some(day(2026, 10, 1)), "VIN1", "AAA11")];
        let listings = vec![listing(Some("VIN1"), None, Some(18500.0))];

        let rows = engine.reconcile(&inventory, &listings, &HashMap::new());
        let row = &rows[0];

        assert_eq!(row.date_listed, None);
        assert_eq!(row.listed_price, Some(18500.0));
        assert!(row.status.needs_listing_created);
        assert!(!row.status.needs_registration_transfer);
    }

    #[test]
    fn test_transfer_flag_follows_registration_issue() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![
            stock("U1", Some(day(2026, 10, 3)), "VIN1", "WRONG"),
            stock("U2", Some(day(2026, 10, 2)), "VIN2", "NONE1"),
        ];
        let mut registrations = HashMap::new();
        registrations.insert("WRONG".to_string(), registration("WRONG", Some("Other Co")));
        registrations.insert(
            "NONE1".to_string(),
            RegistrationRecord::unresolved("NONE1", LookupSource::Documents),
        );

        let rows = engine.reconcile(&inventory, &[], &registrations);

        assert_eq!(rows[0].registration_issue, Some(RegistrationIssue::NotUnderExpectedIssuer));
        assert_eq!(rows[1].registration_issue, Some(RegistrationIssue::NoRegistrationFound));
        assert!(rows.iter().all(|r| r.status.needs_registration_transfer));
        assert_eq!(rows[1].learner_approved, Some(false));
    }

    #[test]
    fn test_expiring_registration_alone_does_not_need_transfer() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![stock("U1", Some(day(2026, 10, 3)), "VIN1", "SOON1")];
        let mut record = registration("SOON1", Some(EXPECTED));
        record.expiry_date = Some(day(2026, 10, 20));
        let registrations = HashMap::from([("SOON1".to_string(), record)]);

        let rows = engine.reconcile(&inventory, &[], &registrations);

        assert!(!rows[0].status.needs_registration_transfer);
        assert_eq!(rows[0].expiry_status(day(2026, 10, 16), 30), ExpiryStatus::ExpiringSoon);
    }

    #[test]
    fn test_sorted_newest_first_with_stable_ties() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![
            stock("OLD", Some(day(2026, 1, 1)), "V1", ""),
            stock("NODATE", None, "V2", ""),
            stock("TIE-A", Some(day(2026, 6, 1)), "V3", ""),
            stock("TIE-B", Some(day(2026, 6, 1)), "V4", ""),
            stock("NEW", Some(day(2026, 9, 1)), "V5", ""),
        ];

        let rows = engine.reconcile(&inventory, &[], &HashMap::new());
        let order: Vec<&str> = rows.iter().map(|r| r.stock_number.as_str()).collect();

        assert_eq!(order, vec!["NEW", "TIE-A", "TIE-B", "OLD", "NODATE"]);
    }

    #[test]
    fn test_latest_listing_wins_per_vin() {
        let listings = vec![
            listing(Some("VIN1"), Some(day(2026, 9, 1)), Some(1.0)),
            listing(Some("VIN1"), Some(day(2026, 10, 1)), Some(2.0)),
            listing(Some("VIN1"), Some(day(2026, 8, 1)), Some(3.0)),
            listing(None, Some(day(2026, 10, 9)), Some(4.0)),
        ];

        let latest = latest_listing_by_vin(&listings);

        assert_eq!(latest.len(), 1);
        assert_eq!(latest["VIN1"].listed_price, Some(2.0));
    }

    #[test]
    fn test_blank_plate_is_flagged_and_not_joined() {
        let engine = ReconciliationEngine::new(EXPECTED);
        let inventory = vec![stock("U1", Some(day(2026, 10, 3)), "VIN1", "")];
        let registrations = HashMap::from([(String::new(), registration("", Some("Other Co")))]);

        let rows = engine.reconcile(&inventory, &[], &registrations);

        assert!(rows[0].status.needs_plate_check);
        assert!(!rows[0].status.needs_registration_transfer);
        assert_eq!(rows[0].learner_approved, None);
    }

    #[test]
    fn test_status_text_round_trip() {
        let flags = StatusFlags {
            needs_registration_transfer: true,
            needs_listing_created: true,
            needs_plate_check: false,
        };

        assert_eq!(flags.to_string(), "Transfer registration; Create listing");
        assert_eq!(StatusFlags::parse(&flags.to_string()), flags);
        assert_eq!(StatusFlags::default().to_string(), "");
        assert!(StatusFlags::parse("").is_clear());
    }
}
