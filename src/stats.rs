use crate::db::models::ReconcileCounts;
use crate::db::Repository;
use crate::error::Result;
use tracing::info;

/// Recompute yearly per-station statistics from the raw observations and
/// reconcile them into the stats table.
///
/// This is a full recomputation, not an incremental update: running it twice
/// against unchanged observations produces identical stats rows. An empty
/// observation table is not an error and reports zero counts.
pub async fn recompute_stats(repository: &Repository) -> Result<ReconcileCounts> {
    let aggregates = repository.aggregate_station_years().await?;

    if aggregates.is_empty() {
        info!("No weather observations to aggregate");
        return Ok(ReconcileCounts::default());
    }

    info!(
        "Aggregated {} station-year groups, reconciling into stats",
        aggregates.len()
    );

    let counts = repository.upsert_station_year_stats(&aggregates).await?;

    info!(
        "Stats reconciliation complete: {} created, {} updated",
        counts.created, counts.updated
    );

    Ok(counts)
}
