// Stock Status - Report Server
// Read-only JSON view of the latest reconciled run

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use stock_status::{
    default_run_date, format_date, format_price, load_latest_report, mask_vin, open_database,
    Config, MakeFilter, ReconciledRow, ReportFilter, ReportStats, SortKey, SortOrder,
    DEFAULT_CONFIG_FILE,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    categories: Arc<Vec<String>>,
    warning_days: i64,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// One stock row as shown to the user
#[derive(Serialize)]
struct StockResponse {
    stock_number: String,
    date_into_stock: String,
    stock_type: String,
    make: String,
    model: String,
    vin: String,
    plate_number: String,
    learner_approved: Option<bool>,
    expiry_date: String,
    expiry_status: &'static str,
    registration_issue: Option<&'static str>,
    date_listed: String,
    listed_price: String,
    status: Vec<&'static str>,
}

impl StockResponse {
    fn from_row(row: &ReconciledRow, state: &AppState) -> Self {
        let expiry = row.expiry_status(default_run_date(), state.warning_days);
        Self {
            stock_number: row.stock_number.clone(),
            date_into_stock: format_date(row.date_into_stock),
            stock_type: row.stock_type.clone(),
            make: row.make.clone(),
            model: row.model.clone(),
            vin: mask_vin(&row.vin),
            plate_number: row.plate_number.clone(),
            learner_approved: row.learner_approved,
            expiry_date: format_date(row.expiry_date),
            expiry_status: expiry.label(),
            registration_issue: row.registration_issue.map(|i| i.label()),
            date_listed: format_date(row.date_listed),
            listed_price: format_price(row.listed_price),
            status: row.status.labels(),
        }
    }
}

/// Query parameters for GET /api/stock
#[derive(Debug, Default, Deserialize)]
struct StockQuery {
    make: Option<String>,
    learner_only: Option<bool>,
    needs_listing: Option<bool>,
    needs_transfer: Option<bool>,
    stock: Option<String>,
    plate: Option<String>,
    sort: Option<SortKey>,
    order: Option<SortOrder>,
}

impl StockQuery {
    fn to_filter(&self) -> ReportFilter {
        let defaults = ReportFilter::default();
        ReportFilter {
            make: self
                .make
                .as_deref()
                .map(MakeFilter::parse)
                .unwrap_or(defaults.make),
            learner_only: self.learner_only.unwrap_or(false),
            needs_listing_only: self.needs_listing.unwrap_or(false),
            needs_transfer_only: self.needs_transfer.unwrap_or(false),
            stock_search: self.stock.clone().unwrap_or_default(),
            plate_search: self.plate.clone().unwrap_or_default(),
            sort_key: self.sort.unwrap_or(defaults.sort_key),
            sort_order: self.order.unwrap_or(defaults.sort_order),
        }
    }
}

fn latest_rows(state: &AppState) -> Result<Vec<ReconciledRow>, String> {
    let conn = state.db.lock().map_err(|_| "database lock poisoned".to_string())?;
    match load_latest_report(&conn) {
        Ok(Some((_, rows))) => Ok(rows),
        Ok(None) => Ok(Vec::new()),
        Err(e) => Err(e.to_string()),
    }
}

fn server_error<T: Serialize>(context: &str, message: String) -> axum::response::Response {
    tracing::error!(error = %message, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<T>::err(message)),
    )
        .into_response()
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/stock - Filtered, sorted stock rows
async fn get_stock(State(state): State<AppState>, Query(query): Query<StockQuery>) -> impl IntoResponse {
    match latest_rows(&state) {
        Ok(rows) => {
            let filter = query.to_filter();
            let response: Vec<StockResponse> = filter
                .apply(&rows, &state.categories)
                .into_iter()
                .map(|row| StockResponse::from_row(row, &state))
                .collect();

            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => server_error::<Vec<StockResponse>>("failed to load stock", e),
    }
}

/// GET /api/stock/:stock_number - One stock row
async fn get_stock_item(
    State(state): State<AppState>,
    Path(stock_number): Path<String>,
) -> impl IntoResponse {
    let decoded = urlencoding::decode(&stock_number)
        .unwrap_or_else(|_| stock_number.clone().into())
        .into_owned();

    match latest_rows(&state) {
        Ok(rows) => match rows.iter().find(|row| row.stock_number == decoded) {
            Some(row) => (
                StatusCode::OK,
                Json(ApiResponse::ok(StockResponse::from_row(row, &state))),
            )
                .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<StockResponse>::err(format!(
                    "stock number {decoded} not found"
                ))),
            )
                .into_response(),
        },
        Err(e) => server_error::<StockResponse>("failed to load stock item", e),
    }
}

/// GET /api/stats - Counts per flag, make category and expiry status
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match latest_rows(&state) {
        Ok(rows) => {
            let stats = ReportStats::compute(
                &rows,
                &state.categories,
                default_run_date(),
                state.warning_days,
            );
            (StatusCode::OK, Json(ApiResponse::ok(stats))).into_response()
        }
        Err(e) => server_error::<ReportStats>("failed to compute stats", e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 Stock Status - Report Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("STOCK_STATUS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let config = Config::load(std::path::Path::new(&config_path))?;

    let db_path = &config.output.database;
    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: stock-status run");
        eprintln!("   to produce a report first.");
        std::process::exit(1);
    }

    let conn = open_database(db_path)?;
    println!("✓ Database opened: {:?}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        categories: Arc::new(config.view.make_categories.clone()),
        warning_days: config.registration.expiry_warning_days,
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stock", get(get_stock))
        .route("/stock/:stock_number", get(get_stock_item))
        .route("/stats", get(get_stats))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = std::env::var("STOCK_STATUS_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    println!("\n🚀 Server running on http://{addr}");
    println!("   API: http://{addr}/api/stock");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
