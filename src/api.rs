use crate::db::models::{StationYearStats, WeatherObservation};
use crate::db::repository::{StatsQueryFilter, WeatherQueryFilter};
use crate::db::Repository;
use crate::error::{AppError, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

pub struct AppState {
    pub repository: Arc<Repository>,
    pub page_size: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct WeatherQuery {
    #[serde(rename = "station-id")]
    pub station_id: Option<String>,
    /// Exact date in YYYYMMDD format; unparseable values are a 400.
    pub date: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StatsQuery {
    #[serde(rename = "station-id")]
    pub station_id: Option<String>,
    pub year: Option<i32>,
    pub page: Option<i64>,
}

/// Paginated response envelope shared by both list endpoints.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub results: Vec<T>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(AppError),
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Internal(e) => {
                error!("Request failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/weather", get(list_weather))
        .route("/weather/stats", get(list_stats))
        .with_state(state)
}

/// GET /weather - paginated weather observations, filterable by station
/// identifier substring and exact date.
pub async fn list_weather(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WeatherQuery>,
) -> std::result::Result<Json<Page<WeatherObservation>>, ApiError> {
    let date = params
        .date
        .as_deref()
        .map(crate::parser::parse_date)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let filter = WeatherQueryFilter {
        station_id: params.station_id,
        date,
    };
    let page = params.page.unwrap_or(1).max(1);

    let (results, total) = state
        .repository
        .list_weather(&filter, page, state.page_size)
        .await?;

    Ok(Json(Page {
        page,
        page_size: state.page_size,
        total,
        results,
    }))
}

/// GET /weather/stats - paginated station year statistics, filterable by
/// station identifier substring and exact year.
pub async fn list_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsQuery>,
) -> std::result::Result<Json<Page<StationYearStats>>, ApiError> {
    let filter = StatsQueryFilter {
        station_id: params.station_id,
        year: params.year,
    };
    let page = params.page.unwrap_or(1).max(1);

    let (results, total) = state
        .repository
        .list_stats(&filter, page, state.page_size)
        .await?;

    Ok(Json(Page {
        page,
        page_size: state.page_size,
        total,
        results,
    }))
}

/// Serve the read API until the shutdown future resolves.
pub async fn serve(
    state: Arc<AppState>,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Read API listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
