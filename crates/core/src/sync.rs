//! Initial-list sync flags and the aggregate wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-unit "initial list received" flag. Only ever goes false -> true.
#[derive(Debug, Clone, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub fn all_synced(flags: &[SyncFlag]) -> bool {
    flags.iter().all(SyncFlag::is_synced)
}

/// Poll until every flag is set (true) or `cancel` fires first (false).
pub async fn wait_for_sync(flags: &[SyncFlag], cancel: &CancellationToken, poll: Duration) -> bool {
    let mut ticker = tokio::time::interval(poll);
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if all_synced(flags) {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {}
        }
    }
}
