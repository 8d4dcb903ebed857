use crate::config::{ConflictPolicy, ReconcileStrategy};
use crate::db::models::{
    CropReading, ReconcileCounts, Station, StationYearAggregate, StationYearStats,
    WeatherObservation, WeatherReading,
};
use crate::error::Result;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashSet;
use tracing::{debug, info};

/// Rows per bulk statement, kept well under the Postgres bind limit.
const BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct WeatherQueryFilter {
    /// Substring match against the station identifier.
    pub station_id: Option<String>,
    /// Exact calendar date match.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct StatsQueryFilter {
    /// Substring match against the station identifier.
    pub station_id: Option<String>,
    /// Exact year match.
    pub year: Option<i32>,
}

pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Create the station row if it does not exist yet.
    ///
    /// Station identity is immutable once created: a repeat sighting leaves
    /// the existing row untouched, including its audit columns. Returns true
    /// if the row was created by this call.
    pub async fn ensure_station(&self, station_id: &str, actor: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO weather_station (station_id, station_name, created_by, updated_by)
            VALUES ($1, $1, $2, $2)
            ON CONFLICT (station_id) DO NOTHING
            "#,
        )
        .bind(station_id)
        .bind(actor)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_station(&self, station_id: &str) -> Result<Option<Station>> {
        let station = sqlx::query_as::<_, Station>(
            "SELECT * FROM weather_station WHERE station_id = $1",
        )
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(station)
    }

    /// Reconcile one file's weather readings against the store.
    ///
    /// The station row must already exist. Dispatches on the configured
    /// strategy; both strategies produce the same final rows.
    pub async fn write_weather_readings(
        &self,
        station_id: &str,
        readings: &[WeatherReading],
        strategy: ReconcileStrategy,
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        if readings.is_empty() {
            return Ok(ReconcileCounts::default());
        }

        match strategy {
            ReconcileStrategy::Upsert => {
                self.upsert_weather_readings(station_id, readings, policy, actor)
                    .await
            }
            ReconcileStrategy::SelectThenWrite => {
                self.select_then_write_weather(station_id, readings, policy, actor)
                    .await
            }
        }
    }

    /// Conflict-aware bulk upsert of weather readings.
    ///
    /// One INSERT per chunk with (station_id, date) as the conflict target.
    /// `RETURNING (xmax = 0)` distinguishes freshly created rows from
    /// refreshed ones.
    async fn upsert_weather_readings(
        &self,
        station_id: &str,
        readings: &[WeatherReading],
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        let mut counts = ReconcileCounts::default();
        let mut tx = self.pool.begin().await?;

        for (batch_idx, chunk) in readings.chunks(BATCH_SIZE).enumerate() {
            debug!(
                "Upserting weather batch {}/{} ({} readings) for station {}",
                batch_idx + 1,
                (readings.len() + BATCH_SIZE - 1) / BATCH_SIZE,
                chunk.len(),
                station_id
            );

            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO weather_observation \
                 (station_id, date, max_temp, min_temp, precipitation, created_by, updated_by) ",
            );

            query_builder.push_values(chunk, |mut b, reading| {
                b.push_bind(station_id)
                    .push_bind(reading.date)
                    .push_bind(reading.max_temp)
                    .push_bind(reading.min_temp)
                    .push_bind(reading.precipitation)
                    .push_bind(actor)
                    .push_bind(actor);
            });

            match policy {
                ConflictPolicy::Refresh => {
                    query_builder.push(
                        " ON CONFLICT (station_id, date) DO UPDATE SET \
                         max_temp = EXCLUDED.max_temp, \
                         min_temp = EXCLUDED.min_temp, \
                         precipitation = EXCLUDED.precipitation, \
                         updated_by = EXCLUDED.updated_by, \
                         updated_at = NOW() \
                         RETURNING (xmax = 0) AS created",
                    );

                    let created_flags: Vec<bool> = query_builder
                        .build_query_scalar()
                        .fetch_all(&mut *tx)
                        .await?;

                    let created = created_flags.iter().filter(|c| **c).count() as u64;
                    counts.created += created;
                    counts.updated += created_flags.len() as u64 - created;
                }
                ConflictPolicy::Ignore => {
                    query_builder
                        .push(" ON CONFLICT (station_id, date) DO NOTHING RETURNING true");

                    let created_flags: Vec<bool> = query_builder
                        .build_query_scalar()
                        .fetch_all(&mut *tx)
                        .await?;

                    counts.created += created_flags.len() as u64;
                    counts.skipped += (chunk.len() - created_flags.len()) as u64;
                }
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Select-then-write reconciliation of weather readings.
    ///
    /// One batched key lookup classifies the candidates, then the new rows
    /// go through one bulk INSERT and the existing rows through one
    /// array-driven bulk UPDATE, all inside a single transaction. Only the
    /// mutable columns are refreshed; key columns and creation audit fields
    /// are never rewritten.
    async fn select_then_write_weather(
        &self,
        station_id: &str,
        readings: &[WeatherReading],
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        let mut tx = self.pool.begin().await?;

        let dates: Vec<NaiveDate> = readings.iter().map(|r| r.date).collect();
        let existing: HashSet<NaiveDate> = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT date FROM weather_observation WHERE station_id = $1 AND date = ANY($2)",
        )
        .bind(station_id)
        .bind(&dates)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let (to_update, to_create): (Vec<&WeatherReading>, Vec<&WeatherReading>) =
            readings.iter().partition(|r| existing.contains(&r.date));

        for chunk in to_create.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO weather_observation \
                 (station_id, date, max_temp, min_temp, precipitation, created_by, updated_by) ",
            );

            query_builder.push_values(chunk, |mut b, reading| {
                b.push_bind(station_id)
                    .push_bind(reading.date)
                    .push_bind(reading.max_temp)
                    .push_bind(reading.min_temp)
                    .push_bind(reading.precipitation)
                    .push_bind(actor)
                    .push_bind(actor);
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        let mut counts = ReconcileCounts {
            created: to_create.len() as u64,
            ..Default::default()
        };

        match policy {
            ConflictPolicy::Refresh => {
                if !to_update.is_empty() {
                    Self::bulk_update_weather(&mut tx, station_id, &to_update, actor).await?;
                }
                counts.updated = to_update.len() as u64;
            }
            ConflictPolicy::Ignore => {
                counts.skipped = to_update.len() as u64;
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    async fn bulk_update_weather(
        tx: &mut Transaction<'_, Postgres>,
        station_id: &str,
        readings: &[&WeatherReading],
        actor: &str,
    ) -> Result<()> {
        let dates: Vec<NaiveDate> = readings.iter().map(|r| r.date).collect();
        let max_temps: Vec<Option<f64>> = readings.iter().map(|r| r.max_temp).collect();
        let min_temps: Vec<Option<f64>> = readings.iter().map(|r| r.min_temp).collect();
        let precipitations: Vec<Option<f64>> = readings.iter().map(|r| r.precipitation).collect();

        sqlx::query(
            r#"
            UPDATE weather_observation AS w SET
                max_temp = u.max_temp,
                min_temp = u.min_temp,
                precipitation = u.precipitation,
                updated_by = $2,
                updated_at = NOW()
            FROM UNNEST($3::date[], $4::float8[], $5::float8[], $6::float8[])
                AS u(date, max_temp, min_temp, precipitation)
            WHERE w.station_id = $1 AND w.date = u.date
            "#,
        )
        .bind(station_id)
        .bind(actor)
        .bind(&dates)
        .bind(&max_temps)
        .bind(&min_temps)
        .bind(&precipitations)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Reconcile crop yield readings against the store, keyed by year.
    pub async fn write_crop_readings(
        &self,
        readings: &[CropReading],
        strategy: ReconcileStrategy,
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        if readings.is_empty() {
            return Ok(ReconcileCounts::default());
        }

        match strategy {
            ReconcileStrategy::Upsert => self.upsert_crop_readings(readings, policy, actor).await,
            ReconcileStrategy::SelectThenWrite => {
                self.select_then_write_crop(readings, policy, actor).await
            }
        }
    }

    async fn upsert_crop_readings(
        &self,
        readings: &[CropReading],
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        let mut counts = ReconcileCounts::default();
        let mut tx = self.pool.begin().await?;

        for chunk in readings.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO crop_yield_record (year, total_yield, created_by, updated_by) ",
            );

            query_builder.push_values(chunk, |mut b, reading| {
                b.push_bind(reading.year)
                    .push_bind(reading.total_yield)
                    .push_bind(actor)
                    .push_bind(actor);
            });

            match policy {
                ConflictPolicy::Refresh => {
                    query_builder.push(
                        " ON CONFLICT (year) DO UPDATE SET \
                         total_yield = EXCLUDED.total_yield, \
                         updated_by = EXCLUDED.updated_by, \
                         updated_at = NOW() \
                         RETURNING (xmax = 0) AS created",
                    );

                    let created_flags: Vec<bool> = query_builder
                        .build_query_scalar()
                        .fetch_all(&mut *tx)
                        .await?;

                    let created = created_flags.iter().filter(|c| **c).count() as u64;
                    counts.created += created;
                    counts.updated += created_flags.len() as u64 - created;
                }
                ConflictPolicy::Ignore => {
                    query_builder.push(" ON CONFLICT (year) DO NOTHING RETURNING true");

                    let created_flags: Vec<bool> = query_builder
                        .build_query_scalar()
                        .fetch_all(&mut *tx)
                        .await?;

                    counts.created += created_flags.len() as u64;
                    counts.skipped += (chunk.len() - created_flags.len()) as u64;
                }
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    async fn select_then_write_crop(
        &self,
        readings: &[CropReading],
        policy: ConflictPolicy,
        actor: &str,
    ) -> Result<ReconcileCounts> {
        let mut tx = self.pool.begin().await?;

        let years: Vec<i32> = readings.iter().map(|r| r.year).collect();
        let existing: HashSet<i32> = sqlx::query_scalar::<_, i32>(
            "SELECT year FROM crop_yield_record WHERE year = ANY($1)",
        )
        .bind(&years)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let (to_update, to_create): (Vec<&CropReading>, Vec<&CropReading>) =
            readings.iter().partition(|r| existing.contains(&r.year));

        for chunk in to_create.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO crop_yield_record (year, total_yield, created_by, updated_by) ",
            );

            query_builder.push_values(chunk, |mut b, reading| {
                b.push_bind(reading.year)
                    .push_bind(reading.total_yield)
                    .push_bind(actor)
                    .push_bind(actor);
            });

            query_builder.build().execute(&mut *tx).await?;
        }

        let mut counts = ReconcileCounts {
            created: to_create.len() as u64,
            ..Default::default()
        };

        match policy {
            ConflictPolicy::Refresh => {
                if !to_update.is_empty() {
                    let years: Vec<i32> = to_update.iter().map(|r| r.year).collect();
                    let yields: Vec<i64> = to_update.iter().map(|r| r.total_yield).collect();

                    sqlx::query(
                        r#"
                        UPDATE crop_yield_record AS c SET
                            total_yield = u.total_yield,
                            updated_by = $1,
                            updated_at = NOW()
                        FROM UNNEST($2::int4[], $3::int8[]) AS u(year, total_yield)
                        WHERE c.year = u.year
                        "#,
                    )
                    .bind(actor)
                    .bind(&years)
                    .bind(&yields)
                    .execute(&mut *tx)
                    .await?;
                }
                counts.updated = to_update.len() as u64;
            }
            ConflictPolicy::Ignore => {
                counts.skipped = to_update.len() as u64;
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Compute yearly per-station aggregates from the raw observations.
    ///
    /// Each aggregate ignores NULL source fields independently; a
    /// (station, year) group with no non-null value in any of the three
    /// fields is excluded from the result entirely.
    pub async fn aggregate_station_years(&self) -> Result<Vec<StationYearAggregate>> {
        let aggregates = sqlx::query_as::<_, StationYearAggregate>(
            r#"
            SELECT station_id,
                   EXTRACT(YEAR FROM date)::INT4 AS year,
                   AVG(max_temp) AS avg_max_temp,
                   AVG(min_temp) AS avg_min_temp,
                   SUM(precipitation) AS total_precipitation
            FROM weather_observation
            GROUP BY station_id, EXTRACT(YEAR FROM date)
            HAVING COUNT(max_temp) + COUNT(min_temp) + COUNT(precipitation) > 0
            ORDER BY station_id, year
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(aggregates)
    }

    /// Reconcile recomputed aggregates into the stats table.
    ///
    /// Stats are derived state, so conflicts always refresh the aggregate
    /// columns regardless of the ingestion conflict policy.
    pub async fn upsert_station_year_stats(
        &self,
        aggregates: &[StationYearAggregate],
    ) -> Result<ReconcileCounts> {
        if aggregates.is_empty() {
            return Ok(ReconcileCounts::default());
        }

        let mut counts = ReconcileCounts::default();
        let mut tx = self.pool.begin().await?;

        for chunk in aggregates.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO station_year_stats \
                 (station_id, year, avg_max_temp, avg_min_temp, total_precipitation) ",
            );

            query_builder.push_values(chunk, |mut b, agg| {
                b.push_bind(&agg.station_id)
                    .push_bind(agg.year)
                    .push_bind(agg.avg_max_temp)
                    .push_bind(agg.avg_min_temp)
                    .push_bind(agg.total_precipitation);
            });

            query_builder.push(
                " ON CONFLICT (station_id, year) DO UPDATE SET \
                 avg_max_temp = EXCLUDED.avg_max_temp, \
                 avg_min_temp = EXCLUDED.avg_min_temp, \
                 total_precipitation = EXCLUDED.total_precipitation \
                 RETURNING (xmax = 0) AS created",
            );

            let created_flags: Vec<bool> = query_builder
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await?;

            let created = created_flags.iter().filter(|c| **c).count() as u64;
            counts.created += created;
            counts.updated += created_flags.len() as u64 - created;
        }

        tx.commit().await?;
        Ok(counts)
    }

    /// Paginated, filtered weather observations plus the total row count for
    /// the filter.
    pub async fn list_weather(
        &self,
        filter: &WeatherQueryFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<WeatherObservation>, i64)> {
        let offset = (page.max(1) - 1) * page_size;

        let rows = sqlx::query_as::<_, WeatherObservation>(
            r#"
            SELECT * FROM weather_observation
            WHERE ($1::TEXT IS NULL OR position($1 IN station_id) > 0)
              AND ($2::DATE IS NULL OR date = $2)
            ORDER BY station_id, date
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&filter.station_id)
        .bind(filter.date)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM weather_observation
            WHERE ($1::TEXT IS NULL OR position($1 IN station_id) > 0)
              AND ($2::DATE IS NULL OR date = $2)
            "#,
        )
        .bind(&filter.station_id)
        .bind(filter.date)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Paginated, filtered station year stats plus the total row count for
    /// the filter.
    pub async fn list_stats(
        &self,
        filter: &StatsQueryFilter,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<StationYearStats>, i64)> {
        let offset = (page.max(1) - 1) * page_size;

        let rows = sqlx::query_as::<_, StationYearStats>(
            r#"
            SELECT * FROM station_year_stats
            WHERE ($1::TEXT IS NULL OR position($1 IN station_id) > 0)
              AND ($2::INT4 IS NULL OR year = $2)
            ORDER BY station_id, year
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&filter.station_id)
        .bind(filter.year)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM station_year_stats
            WHERE ($1::TEXT IS NULL OR position($1 IN station_id) > 0)
              AND ($2::INT4 IS NULL OR year = $2)
            "#,
        )
        .bind(&filter.station_id)
        .bind(filter.year)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }
}
