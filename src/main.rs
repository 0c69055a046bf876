// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stock_status::{
    build_resolver, default_run_date, open_database, run_pipeline, Config, ExpiryStatus,
    PipelineError, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(
    name = "stock-status",
    version,
    about = "Reconcile dealership stock with listings and registrations"
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "STOCK_STATUS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Run date (YYYY-MM-DD). Defaults to today.
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile today's exports and write the report
    Run {
        /// Maximum number of new registration lookups this run
        #[arg(long)]
        lookup_limit: Option<usize>,
    },
    /// Browse the latest report in the terminal
    View {
        /// Read this report spreadsheet instead of the stored run
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Resolve one plate with the configured strategy (nothing is stored)
    Classify { plate: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = dispatch(&cli);

    // Fatal input problems get a plain operator message.
    if let Err(err) = &result {
        if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
            eprintln!("❌ {}", pipeline_err);
            std::process::exit(2);
        }
    }
    result
}

fn dispatch(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let today = cli.today.unwrap_or_else(default_run_date);

    match &cli.command {
        Command::Run { lookup_limit } => run_command(&config, today, *lookup_limit),
        Command::View { report } => run_ui_mode(&config, today, report.clone()),
        Command::Classify { plate } => classify_command(&config, today, plate),
    }
}

fn run_command(config: &Config, today: NaiveDate, lookup_limit: Option<usize>) -> Result<()> {
    println!("🏍️  Stock status run for {}", today.format("%d-%b-%Y"));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut conn = open_database(&config.output.database)?;
    let resolver = build_resolver(&config.registration)?;

    let summary = run_pipeline(config, today, resolver.as_ref(), &mut conn, lookup_limit)?;

    println!("✓ Inventory rows (for sale): {}", summary.inventory_rows);
    println!("✓ Listing rows:              {}", summary.listing_rows);
    println!(
        "✓ Registrations:             {} reused, {} looked up, {} skipped",
        summary.registrations_reused, summary.registrations_looked_up, summary.registrations_skipped
    );
    println!("✓ Needs registration transfer: {}", summary.needs_registration_transfer);
    println!("✓ Needs listing created:       {}", summary.needs_listing_created);
    println!(
        "\n✅ Wrote {} rows to {} (run {})",
        summary.rows_written,
        summary.report_path.display(),
        summary.run_id
    );

    Ok(())
}

fn classify_command(config: &Config, today: NaiveDate, plate: &str) -> Result<()> {
    let resolver = build_resolver(&config.registration)?;
    let record = resolver.resolve(plate.trim());

    println!("{}", serde_json::to_string_pretty(&record)?);

    let issue = record.issue(&config.registration.expected_issuer);
    let expiry = ExpiryStatus::classify(
        record.expiry_date,
        today,
        config.registration.expiry_warning_days,
    );
    println!(
        "Registration issue: {}",
        issue.map(|i| i.label()).unwrap_or("none")
    );
    println!("Expiry: {}", expiry.label());

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config, today: NaiveDate, report: Option<PathBuf>) -> Result<()> {
    let conn = open_database(&config.output.database)?;
    let rows = stock_status::load_view_rows(&conn, report.as_deref())?;

    let mut app = ui::App::new(
        rows,
        config.view.make_categories.clone(),
        today,
        config.registration.expiry_warning_days,
    );
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config, _today: NaiveDate, _report: Option<PathBuf>) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or serve the report: cargo run --bin stock-status-server --features server");
    std::process::exit(1);
}
