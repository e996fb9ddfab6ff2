use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compactor pass. Returns true if a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewBooking;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn new_booking(slot: &str) -> NewBooking {
        NewBooking {
            room: "E101".into(),
            date: "2024-05-01".into(),
            slot: slot.into(),
            course_code: "COMM 101".into(),
            booked_by: "Sarah".into(),
            notes: String::new(),
            user_id: "u1".into(),
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        for _ in 0..3 {
            let mut txn = engine.begin_transaction("churn", "u1").unwrap();
            txn.get().await.unwrap();
            txn.set(new_booking("07:00 - 09:00"));
            txn.commit().await.unwrap();
            assert!(engine.delete_document("churn", "u1").await.unwrap());
        }
        let mut txn = engine.begin_transaction("kept", "u1").unwrap();
        txn.set(new_booking("09:00 - 11:00"));
        txn.commit().await.unwrap();

        assert!(!compact_if_due(&engine, 100).await);
        assert_eq!(engine.wal_appends_since_compact().await, 7);

        assert!(compact_if_due(&engine, 7).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].doc_id(), "kept");
    }
}
