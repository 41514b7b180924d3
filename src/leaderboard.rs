use std::sync::Arc;

use tracing::debug;

use crate::models::LeaderboardEntry;
use crate::store::{collections, ChangeListener, Record, RecordStore, StoreError, Unsubscribe};

/// Receives a freshly recomputed, fully sorted snapshot (never a delta).
pub type LeaderboardCallback = Arc<dyn Fn(Vec<LeaderboardEntry>) + Send + Sync>;

fn entries_from_records(records: &[Record]) -> Vec<LeaderboardEntry> {
    records.iter().filter_map(LeaderboardEntry::from_record).collect()
}

/// Descending by points with ranks 1..=N; equal totals keep the order the
/// store returned them in, so an unchanged dataset ranks identically on
/// every pass.
fn rank_entries(mut entries: Vec<LeaderboardEntry>, limit: usize) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| b.total_points.cmp(&a.total_points));
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.rank = idx + 1;
    }
    entries.truncate(limit);
    entries
}

/// Snapshot fetch of the top `limit` scoring families. Badge counts and
/// last-activity timestamps pass through from the source records unmodified.
pub async fn get_leaderboard(
    store: &dyn RecordStore,
    limit: usize,
) -> Result<Vec<LeaderboardEntry>, StoreError> {
    let records = store.query(collections::FAMILIES, &[]).await?;
    Ok(rank_entries(entries_from_records(&records), limit))
}

/// Live handle to a leaderboard subscription. Disposal releases the
/// store-side listener, stops further callbacks, and is idempotent; the
/// handle also disposes on drop.
pub struct LeaderboardSubscription {
    inner: Unsubscribe,
}

impl LeaderboardSubscription {
    pub fn dispose(&mut self) {
        self.inner.dispose();
    }
}

/// Combines an initial snapshot with a live channel: the callback fires
/// once with the current standings, then again with a full re-sorted
/// snapshot every time the backing collection changes.
pub async fn subscribe_leaderboard(
    store: &dyn RecordStore,
    limit: usize,
    callback: LeaderboardCallback,
) -> Result<LeaderboardSubscription, StoreError> {
    let initial = get_leaderboard(store, limit).await?;

    let listener: ChangeListener = {
        let callback = Arc::clone(&callback);
        Arc::new(move |records: Vec<Record>| {
            let snapshot = rank_entries(entries_from_records(&records), limit);
            debug!(entries = snapshot.len(), "leaderboard snapshot pushed");
            callback(snapshot);
        })
    };
    let inner = store.subscribe(collections::FAMILIES, &[], listener).await?;

    callback(initial);
    Ok(LeaderboardSubscription { inner })
}
