use agriclime::config::{ConflictPolicy, ReconcileStrategy};
use agriclime::db::models::{WeatherReading, WEATHER_INGEST_ACTOR};
use agriclime::db::Repository;
use agriclime::stats::recompute_stats;
use chrono::NaiveDate;
use sqlx::PgPool;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn seed_station(repo: &Repository, station_id: &str, readings: &[WeatherReading]) {
    repo.ensure_station(station_id, WEATHER_INGEST_ACTOR)
        .await
        .expect("Station upsert failed");
    repo.write_weather_readings(
        station_id,
        readings,
        ReconcileStrategy::Upsert,
        ConflictPolicy::Refresh,
        WEATHER_INGEST_ACTOR,
    )
    .await
    .expect("Seed write failed");
}

/// Two January 1985 observations aggregate to the year's mean temperatures
/// and summed precipitation.
#[sqlx::test]
async fn test_yearly_aggregates(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    seed_station(
        &repo,
        "USC00110072",
        &[
            WeatherReading {
                date: date(1985, 1, 1),
                max_temp: Some(-22.0),
                min_temp: Some(-128.0),
                precipitation: Some(94.0),
            },
            WeatherReading {
                date: date(1985, 1, 2),
                max_temp: Some(-122.0),
                min_temp: Some(-217.0),
                precipitation: Some(0.0),
            },
        ],
    )
    .await;

    let counts = recompute_stats(&repo).await.expect("Recompute failed");
    assert_eq!(counts.created, 1);
    assert_eq!(counts.updated, 0);

    let (year, avg_max, avg_min, total_precip) =
        sqlx::query_as::<_, (i32, Option<f64>, Option<f64>, Option<f64>)>(
            "SELECT year, avg_max_temp, avg_min_temp, total_precipitation \
             FROM station_year_stats WHERE station_id = $1",
        )
        .bind("USC00110072")
        .fetch_one(&pool)
        .await
        .expect("Stats query failed");

    assert_eq!(year, 1985);
    assert_eq!(avg_max, Some(-72.0));
    assert_eq!(avg_min, Some(-172.5));
    assert_eq!(total_precip, Some(94.0));
}

/// Each aggregate ignores NULLs independently: a row missing precipitation
/// still contributes to the temperature means.
#[sqlx::test]
async fn test_aggregates_are_null_aware_per_field(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    seed_station(
        &repo,
        "USC00110072",
        &[
            WeatherReading {
                date: date(1990, 6, 1),
                max_temp: Some(10.0),
                min_temp: Some(0.0),
                precipitation: None,
            },
            WeatherReading {
                date: date(1990, 6, 2),
                max_temp: Some(20.0),
                min_temp: Some(10.0),
                precipitation: Some(5.0),
            },
            WeatherReading {
                date: date(1990, 6, 3),
                max_temp: None,
                min_temp: None,
                precipitation: Some(3.0),
            },
        ],
    )
    .await;

    recompute_stats(&repo).await.expect("Recompute failed");

    let (avg_max, avg_min, total_precip) =
        sqlx::query_as::<_, (Option<f64>, Option<f64>, Option<f64>)>(
            "SELECT avg_max_temp, avg_min_temp, total_precipitation \
             FROM station_year_stats WHERE station_id = $1 AND year = 1990",
        )
        .bind("USC00110072")
        .fetch_one(&pool)
        .await
        .expect("Stats query failed");

    assert_eq!(avg_max, Some(15.0));
    assert_eq!(avg_min, Some(5.0));
    assert_eq!(total_precip, Some(8.0));
}

/// A (station, year) group where every observation has all three fields
/// null produces no stats row at all.
#[sqlx::test]
async fn test_all_null_group_is_excluded(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    seed_station(
        &repo,
        "USC00119999",
        &[
            WeatherReading {
                date: date(1985, 1, 1),
                max_temp: None,
                min_temp: None,
                precipitation: None,
            },
            WeatherReading {
                date: date(1985, 1, 2),
                max_temp: None,
                min_temp: None,
                precipitation: None,
            },
            // A later year with data must still be aggregated
            WeatherReading {
                date: date(1986, 1, 1),
                max_temp: Some(4.0),
                min_temp: Some(-4.0),
                precipitation: None,
            },
        ],
    )
    .await;

    recompute_stats(&repo).await.expect("Recompute failed");

    let years = sqlx::query_scalar::<_, i32>(
        "SELECT year FROM station_year_stats WHERE station_id = $1 ORDER BY year",
    )
    .bind("USC00119999")
    .fetch_all(&pool)
    .await
    .expect("Stats query failed");

    assert_eq!(years, vec![1986]);

    let (avg_max, total_precip) = sqlx::query_as::<_, (Option<f64>, Option<f64>)>(
        "SELECT avg_max_temp, total_precipitation \
         FROM station_year_stats WHERE station_id = $1 AND year = 1986",
    )
    .bind("USC00119999")
    .fetch_one(&pool)
    .await
    .expect("Stats query failed");

    assert_eq!(avg_max, Some(4.0));
    assert_eq!(total_precip, None);
}

/// Recomputing against unchanged observations is idempotent: the second run
/// refreshes every group with identical values and creates nothing.
#[sqlx::test]
async fn test_recompute_is_idempotent(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    seed_station(
        &repo,
        "USC00110072",
        &[
            WeatherReading {
                date: date(1985, 1, 1),
                max_temp: Some(-22.0),
                min_temp: Some(-128.0),
                precipitation: Some(94.0),
            },
            WeatherReading {
                date: date(1986, 1, 1),
                max_temp: Some(12.0),
                min_temp: Some(-8.0),
                precipitation: Some(2.0),
            },
        ],
    )
    .await;

    let first = recompute_stats(&repo).await.expect("First recompute failed");
    assert_eq!(first.created, 2);
    assert_eq!(first.updated, 0);

    let before = sqlx::query_as::<_, (String, i32, Option<f64>, Option<f64>, Option<f64>)>(
        "SELECT station_id, year, avg_max_temp, avg_min_temp, total_precipitation \
         FROM station_year_stats ORDER BY station_id, year",
    )
    .fetch_all(&pool)
    .await
    .expect("Stats query failed");

    let second = recompute_stats(&repo)
        .await
        .expect("Second recompute failed");
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 2);

    let after = sqlx::query_as::<_, (String, i32, Option<f64>, Option<f64>, Option<f64>)>(
        "SELECT station_id, year, avg_max_temp, avg_min_temp, total_precipitation \
         FROM station_year_stats ORDER BY station_id, year",
    )
    .fetch_all(&pool)
    .await
    .expect("Stats query failed");

    assert_eq!(before, after);
}

/// No observations at all is not an error; the recompute reports zeros.
#[sqlx::test]
async fn test_recompute_with_no_observations(pool: PgPool) {
    let repo = Repository::new(pool);

    let counts = recompute_stats(&repo).await.expect("Recompute failed");
    assert_eq!(counts.created, 0);
    assert_eq!(counts.updated, 0);
}

/// Groups are per station and per year: two stations and two years produce
/// four independent stats rows.
#[sqlx::test]
async fn test_groups_are_per_station_and_year(pool: PgPool) {
    let repo = Repository::new(pool.clone());

    for station in ["USC00110001", "USC00110002"] {
        seed_station(
            &repo,
            station,
            &[
                WeatherReading {
                    date: date(1985, 7, 1),
                    max_temp: Some(30.0),
                    min_temp: Some(15.0),
                    precipitation: Some(1.0),
                },
                WeatherReading {
                    date: date(1986, 7, 1),
                    max_temp: Some(31.0),
                    min_temp: Some(16.0),
                    precipitation: Some(2.0),
                },
            ],
        )
        .await;
    }

    let counts = recompute_stats(&repo).await.expect("Recompute failed");
    assert_eq!(counts.created, 4);

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM station_year_stats")
        .fetch_one(&pool)
        .await
        .expect("Count query failed");
    assert_eq!(count, 4);
}
