use std::time::Duration;

/// Tunables for the sharding core.
///
/// Defaults mirror production settings; tests shrink the batch size and
/// intervals to drive deterministic schedules.
#[derive(Debug, Clone)]
pub struct ShardingConfig {
    /// Maximum number of orphaned documents deleted per range-deleter batch.
    pub range_deleter_batch_size: usize,

    /// Sleep between range-deleter worker passes when no task is ready.
    pub range_deleter_interval: Duration,

    /// Number of documents moved per clone batch during migration.
    pub clone_batch_size: usize,

    /// Upper bound on how long the commit-time critical section may be held.
    pub critical_section_timeout: Duration,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            range_deleter_batch_size: 128,
            range_deleter_interval: Duration::from_millis(50),
            clone_batch_size: 256,
            critical_section_timeout: Duration::from_secs(5),
        }
    }
}

impl ShardingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the range-deleter batch size.
    pub fn range_deleter_batch_size(mut self, size: usize) -> Self {
        self.range_deleter_batch_size = size.max(1);
        self
    }

    /// Set the range-deleter worker interval.
    pub fn range_deleter_interval(mut self, interval: Duration) -> Self {
        self.range_deleter_interval = interval;
        self
    }

    /// Set the clone batch size.
    pub fn clone_batch_size(mut self, size: usize) -> Self {
        self.clone_batch_size = size.max(1);
        self
    }

    /// Set the critical-section timeout.
    pub fn critical_section_timeout(mut self, timeout: Duration) -> Self {
        self.critical_section_timeout = timeout;
        self
    }
}
