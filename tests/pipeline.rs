use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use stock_status::{
    build_resolver, load_latest_report, read_report, run_pipeline, setup_database, Config,
    ExpiryStatus, RegistrationIssue,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn certificate(plate: &str, issuer: &str, expiry: &str, conditions: &str) -> String {
    let mut lines = vec![String::new(); 18];
    lines[0] = "CERTIFICATE OF REGISTRATION".to_string();
    lines[3] = format!("{plate} MOTORCYCLE");
    lines[7] = format!("{plate} {issuer}");
    lines[11] = format!("Expiry date {expiry}");
    lines[15] = conditions.to_string();
    lines.join("\n")
}

/// Workspace with one export set dated 16-Oct-2026.
fn workspace(dir: &Path) -> Config {
    let certs = dir.join("certificates");
    std::fs::create_dir(&certs).unwrap();

    std::fs::write(
        dir.join("Stock161026.dat"),
        "Stock No,Date In,Type,Make,Model,VIN,Rego,Status Desc.\n\
         U1001,01/10/26,Used,Kawasaki,Ninja 400,JKAEX8A10KDA00001,ABC12,For Sale\n\
         U1002,05/10/26,Consignment Stock,Honda,CBR500R,MLHPC6410K5000002,,For Sale\n\
         U1003,20/09/26,Used,BMW,G310R,WB10G2100K6000003,NOREG,For Sale\n\
         U1004,21/09/26,Used,KTM,390 Duke,VBKJPJ4000C000004,XYZ99,Sold\n",
    )
    .unwrap();

    // Each listing spills its details into a continuation row.
    std::fs::write(
        dir.join("listings_161026.csv"),
        "Honda CBR500R,\"$9,990\",1200 km,10,5,1,0,12 days,Good,8\n\
         MLHPC6410K5000002|Honda CBR500R 2019,,,,,,,,,\n\
         BMW G310R,\"$6,500.00\",8000 km,3,1,0,0,40 days,Fair,5\n\
         stray note without delimiter,,,,,,,,,\n\
         WB10G2100K6000003|BMW G310R 2019,,,,,,,,,\n",
    )
    .unwrap();

    std::fs::write(
        certs.join("ABC12_certificate.txt"),
        certificate("ABC12", "Other Co", "26-10-2026", ""),
    )
    .unwrap();

    let text = format!(
        r#"
        [inputs]
        inventory = "{dir}/Stock{{date}}.dat"
        listings = "{dir}/listings_{{date}}.csv"

        [output]
        report = "{dir}/used_stock_data.xlsx"
        database = "{dir}/stock_status.db"

        [registration]
        expected_issuer = "MOTO DEALER PTY LTD"
        certificate_folder = "{dir}/certificates"
        "#,
        dir = dir.display()
    );
    Config::from_toml_str(&text).unwrap()
}

fn open(config: &Config) -> Connection {
    let conn = Connection::open(&config.output.database).unwrap();
    setup_database(&conn).unwrap();
    conn
}

#[test]
fn test_end_to_end_flags_and_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let today = day(2026, 10, 16);
    let mut conn = open(&config);
    let resolver = build_resolver(&config.registration).unwrap();

    let summary = run_pipeline(&config, today, resolver.as_ref(), &mut conn, None).unwrap();

    assert_eq!(summary.inventory_rows, 3);
    assert_eq!(summary.listing_rows, 2);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.registrations_looked_up, 2);

    let (run, rows) = load_latest_report(&conn).unwrap().unwrap();
    assert_eq!(run.id, summary.run_id);
    assert_eq!(run.lookups, 2);

    // Newest stock first.
    let order: Vec<&str> = rows.iter().map(|r| r.stock_number.as_str()).collect();
    assert_eq!(order, vec!["U1002", "U1001", "U1003"]);

    let abc = &rows[1];
    assert_eq!(abc.plate_number, "ABC12");
    assert!(abc.status.needs_registration_transfer);
    assert!(abc.status.needs_listing_created);
    assert_eq!(abc.registration_issue, Some(RegistrationIssue::NotUnderExpectedIssuer));
    assert_eq!(abc.learner_approved, Some(false));
    assert_eq!(abc.expiry_date, Some(day(2026, 10, 26)));
    assert_eq!(abc.expiry_status(today, 30), ExpiryStatus::ExpiringSoon);

    let honda = &rows[0];
    assert_eq!(honda.stock_type, "Consignment");
    assert_eq!(honda.date_listed, Some(day(2026, 10, 4)));
    assert_eq!(honda.listed_price, Some(9990.0));
    assert!(!honda.status.needs_listing_created);
    assert!(!honda.status.needs_registration_transfer);
    assert!(honda.status.needs_plate_check);
    assert_eq!(honda.learner_approved, None);

    let bmw = &rows[2];
    assert_eq!(bmw.registration_issue, Some(RegistrationIssue::NoRegistrationFound));
    assert!(bmw.status.needs_registration_transfer);
    assert_eq!(bmw.date_listed, Some(day(2026, 9, 6)));
    assert_eq!(bmw.listed_price, Some(6500.0));

    // The spreadsheet carries the same table.
    let from_sheet = read_report(&summary.report_path).unwrap();
    assert_eq!(from_sheet.len(), 3);
    assert_eq!(from_sheet[1].status, abc.status);
    assert_eq!(from_sheet[1].expiry_date, abc.expiry_date);
}

#[test]
fn test_rerun_reuses_resolved_and_retries_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let today = day(2026, 10, 16);
    let mut conn = open(&config);
    let resolver = build_resolver(&config.registration).unwrap();

    let first = run_pipeline(&config, today, resolver.as_ref(), &mut conn, None).unwrap();
    let (_, first_rows) = load_latest_report(&conn).unwrap().unwrap();

    // Resolved certificate removed: the cached record must still be used.
    std::fs::remove_file(dir.path().join("certificates/ABC12_certificate.txt")).unwrap();

    let second = run_pipeline(&config, today, resolver.as_ref(), &mut conn, None).unwrap();
    let (latest, second_rows) = load_latest_report(&conn).unwrap().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(latest.id, second.run_id);
    assert_eq!(second.registrations_reused, 1);
    // Only the plate that never resolved is looked up again.
    assert_eq!(second.registrations_looked_up, 1);
    assert_eq!(second_rows, first_rows);
}

#[test]
fn test_lookup_limit_leaves_plates_without_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let mut conn = open(&config);
    let resolver = build_resolver(&config.registration).unwrap();

    let summary = run_pipeline(&config, day(2026, 10, 16), resolver.as_ref(), &mut conn, Some(0)).unwrap();

    assert_eq!(summary.registrations_looked_up, 0);
    assert_eq!(summary.registrations_skipped, 2);

    let (_, rows) = load_latest_report(&conn).unwrap().unwrap();
    assert!(rows.iter().all(|r| r.learner_approved.is_none()));
    assert!(rows.iter().all(|r| !r.status.needs_registration_transfer));
}
