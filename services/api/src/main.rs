//! API Service - Query API over the sales warehouse
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /filters - Years, countries and categories available for filtering
//! - GET /dashboard - KPIs and grouped aggregates for a filter selection
//! - POST /reload - Re-read the warehouse tables from disk

mod aggregate;
mod cache;
mod cube;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warehouse::{store, WarehouseTables};

use crate::aggregate::{Dashboard, FilterOptions, Filters};
use crate::cache::CubeCache;
use crate::cube::Cube;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
struct Config {
    warehouse_dir: PathBuf,
    bind: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            warehouse_dir: PathBuf::from(
                std::env::var("WAREHOUSE_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
            bind: std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
        }
    }
}

// ============================================================================
// State
// ============================================================================

struct AppState {
    warehouse_dir: PathBuf,
    tables: RwLock<Arc<WarehouseTables>>,
    cache: CubeCache,
}

impl AppState {
    fn open(warehouse_dir: PathBuf) -> warehouse::Result<Self> {
        let tables = store::load_tables(&warehouse_dir)?;
        Ok(Self {
            warehouse_dir,
            tables: RwLock::new(Arc::new(tables)),
            cache: CubeCache::new(),
        })
    }

    fn tables(&self) -> Arc<WarehouseTables> {
        Arc::clone(&self.tables.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn current_cube(&self) -> Arc<Cube> {
        self.cache.get_or_assemble(&self.tables())
    }

    /// Swap in freshly loaded tables. On error the loaded tables and the
    /// cached cube are left untouched.
    fn reload(&self) -> warehouse::Result<ReloadResponse> {
        let fresh = store::load_tables(&self.warehouse_dir)?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);

        let changed = tables.version != fresh.version;
        let version = fresh.version.to_string();
        if changed {
            *tables = Arc::new(fresh);
            self.cache.invalidate();
        }

        Ok(ReloadResponse { version, changed })
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct DashboardResponse {
    warehouse_version: String,
    #[serde(flatten)]
    dashboard: Dashboard,
}

#[derive(Serialize)]
struct ReloadResponse {
    version: String,
    changed: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Query params
// ============================================================================

/// Comma-separated lists. Absent means every observed value, present but
/// empty means nothing.
#[derive(Debug, Default, Deserialize)]
struct DashboardQuery {
    years: Option<String>,
    countries: Option<String>,
    categories: Option<String>,
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

impl DashboardQuery {
    fn resolve(&self, options: &FilterOptions) -> Result<Filters, String> {
        let mut filters = Filters::all(options);

        if let Some(raw) = &self.years {
            filters.years = split_list(raw)
                .map(|y| y.parse::<i32>().map_err(|_| format!("invalid year: {}", y)))
                .collect::<Result<BTreeSet<_>, _>>()?;
        }
        if let Some(raw) = &self.countries {
            filters.countries = split_list(raw).map(str::to_string).collect();
        }
        if let Some(raw) = &self.categories {
            filters.categories = split_list(raw).map(str::to_string).collect();
        }

        Ok(filters)
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn filters_handler(State(state): State<Arc<AppState>>) -> Json<FilterOptions> {
    let cube = state.current_cube();
    Json(aggregate::filter_options(&cube.rows))
}

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let cube = state.current_cube();
    let options = aggregate::filter_options(&cube.rows);

    let filters = match params.resolve(&options) {
        Ok(f) => f,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    Json(DashboardResponse {
        warehouse_version: cube.version.to_string(),
        dashboard: aggregate::query(&cube, &filters),
    })
    .into_response()
}

async fn reload_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.reload() {
        Ok(outcome) => {
            info!(version = %outcome.version, changed = outcome.changed, "warehouse reloaded");
            Json(outcome).into_response()
        }
        Err(e) => {
            warn!("Reload failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for the dashboard frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/filters", get(filters_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/reload", post(reload_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("api=info".parse()?)
                .add_directive("warehouse=info".parse()?),
        )
        .init();

    let config = Config::from_env();

    info!(dir = %config.warehouse_dir.display(), "loading warehouse");
    let state = AppState::open(config.warehouse_dir.clone()).with_context(|| {
        format!(
            "Failed to load warehouse from {} (run the etl first)",
            config.warehouse_dir.display()
        )
    })?;

    // Assemble eagerly so the first request is served from the cache
    let cube = state.current_cube();
    info!(version = %cube.version, rows = cube.rows.len(), "cube ready");

    let app = router(Arc::new(state));

    info!("API listening on http://{}", config.bind);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
