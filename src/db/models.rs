use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Actor recorded in audit columns by the weather ingestion pipeline.
pub const WEATHER_INGEST_ACTOR: &str = "ingest-weather";
/// Actor recorded in audit columns by the crop yield ingestion pipeline.
pub const CROP_INGEST_ACTOR: &str = "ingest-crops";

#[derive(Debug, Clone, FromRow)]
pub struct Station {
    pub station_id: String,
    pub station_name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// One candidate weather record parsed from a file line. The station it
/// belongs to is carried separately, once per file.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    pub date: NaiveDate,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub precipitation: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WeatherObservation {
    #[serde(skip)]
    pub id: i64,
    pub station_id: String,
    pub date: NaiveDate,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub precipitation: Option<f64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// One candidate crop yield record parsed from a file line.
#[derive(Debug, Clone, PartialEq)]
pub struct CropReading {
    pub year: i32,
    pub total_yield: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CropYieldRecord {
    #[serde(skip)]
    pub id: i64,
    pub year: i32,
    pub total_yield: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// One (station, year) aggregate produced by the stats recompute.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StationYearAggregate {
    pub station_id: String,
    pub year: i32,
    pub avg_max_temp: Option<f64>,
    pub avg_min_temp: Option<f64>,
    pub total_precipitation: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StationYearStats {
    #[serde(skip)]
    pub id: i64,
    pub station_id: String,
    pub year: i32,
    pub avg_max_temp: Option<f64>,
    pub avg_min_temp: Option<f64>,
    pub total_precipitation: Option<f64>,
}

/// Created/updated counts reported by one reconciled batch.
///
/// Under the ignore-conflicts policy, candidates whose natural key already
/// existed are counted in `skipped` rather than `updated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl ReconcileCounts {
    pub fn merge(&mut self, other: ReconcileCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}
