use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// How long a pending entry waits for confirmation before it is dropped
    pub pending_expiry: Duration,
    pub dedup_skew: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            pending_expiry: Duration::from_secs(5),
            dedup_skew: Duration::from_secs(60),
        }
    }
}

impl SyncSettings {
    pub(crate) fn dedup_skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.dedup_skew).unwrap_or(chrono::Duration::zero())
    }

    pub(crate) fn pending_expiry(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.pending_expiry).unwrap_or(chrono::Duration::zero())
    }
}
