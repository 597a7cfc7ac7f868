use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::BookingEngine;
use crate::store::{JournaledStore, StoreError};

const COMPACT_INTERVAL: Duration = Duration::from_secs(30);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Compact the journal once it has taken `threshold` appends since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_needed(store: &JournaledStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!(appends, "compacted journal");
    Ok(true)
}

/// Background task that keeps the journal short.
pub async fn run_compactor(store: Arc<JournaledStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            tracing::error!("compaction failed: {e}");
        }
    }
}

/// Background task that drops idle per-key lock entries.
pub async fn run_lock_pruner(engine: Arc<BookingEngine>) {
    let mut interval = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        interval.tick().await;
        let pruned = engine.prune_locks();
        if pruned > 0 {
            debug!(pruned, "pruned idle locks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::TrainCatalog;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatline_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = JournaledStore::open(&path).unwrap();
        let day = NaiveDate::from_ymd_opt(2031, 1, 1).unwrap();
        let stops = vec![
            Stop::new("X", day.and_hms_opt(1, 0, 0).unwrap()),
            Stop::new("Y", day.and_hms_opt(2, 0, 0).unwrap()),
        ];
        for i in 0..3 {
            let train = Train::new(format!("T{i}"), "Local").with_run(day, stops.clone(), 1, 2);
            TrainCatalog::save(&store, train).await.unwrap();
        }

        assert!(!compact_if_needed(&store, 4).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 3);

        assert!(compact_if_needed(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(store.find_all().await.unwrap().len(), 3);
    }
}
