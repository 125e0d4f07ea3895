//! Session configuration.

use std::time::Duration;

use sluice::{BlockWait, SpinBlockWait, SpinWait, WaitStrategy, YieldWait};

/// Which build pipeline the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildMode {
    /// Aligned inputs, round-robin event building.
    #[default]
    Triggered,
    /// Time-framed inputs, sort-then-slice building.
    Streaming,
}

/// Wait strategy applied to every ring the session creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitKind {
    /// Busy-spin.
    Spin,
    /// Spin briefly, then yield.
    Yield,
    /// Park on a condvar.
    Block,
    /// Spin briefly, then park.
    #[default]
    SpinBlock,
}

impl WaitKind {
    /// Instantiate the strategy.
    #[must_use]
    pub fn strategy(self) -> Box<dyn WaitStrategy> {
        match self {
            WaitKind::Spin => Box::new(SpinWait::new()),
            WaitKind::Yield => Box::new(YieldWait::new()),
            WaitKind::Block => Box::new(BlockWait::new()),
            WaitKind::SpinBlock => Box::new(SpinBlockWait::new()),
        }
    }
}

/// Configuration for an [`AggregatorSession`](crate::AggregatorSession).
///
/// Start from `SessionConfig::default()` and override with the chained
/// setters:
///
/// ```
/// use confluence_core::{BuildMode, SessionConfig};
///
/// let config = SessionConfig::default()
///     .with_mode(BuildMode::Streaming)
///     .with_workers(4);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Session name, used as the worker thread name prefix.
    pub name: String,
    /// Source id stamped on composite records.
    pub id: u32,
    /// Build pipeline.
    pub mode: BuildMode,
    /// Number of build workers.
    pub workers: usize,
    /// Capacity of each per-worker slice queue (streaming mode).
    pub sorter_ring_size: usize,
    /// Pre-allocated payload buffers.
    pub pool_buffers: usize,
    /// Capacity of each payload buffer in bytes.
    pub pool_buffer_capacity: usize,
    /// Per-channel bound on the END search.
    pub end_timeout: Duration,
    /// Poll interval while searching for END.
    pub end_poll: Duration,
    /// Settle delay before the END search starts.
    pub end_settle: Duration,
    /// Per-channel bound on waiting for peer workers before cross-ring END
    /// writes.
    pub catchup_timeout: Duration,
    /// Wait strategy for every ring the session creates.
    pub wait: WaitKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "aggregator".to_string(),
            id: 0,
            mode: BuildMode::default(),
            workers: 2,
            sorter_ring_size: 4096,
            pool_buffers: 64,
            pool_buffer_capacity: 4096,
            end_timeout: Duration::from_secs(5),
            end_poll: Duration::from_millis(200),
            end_settle: Duration::from_millis(500),
            catchup_timeout: Duration::from_secs(2),
            wait: WaitKind::default(),
        }
    }
}

impl SessionConfig {
    /// Set the session name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the source id stamped on composites.
    #[must_use]
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    /// Set the build pipeline.
    #[must_use]
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of build workers.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-worker slice queue capacity.
    #[must_use]
    pub fn with_sorter_ring_size(mut self, size: usize) -> Self {
        self.sorter_ring_size = size;
        self
    }

    /// Set the payload pool dimensions.
    #[must_use]
    pub fn with_payload_pool(mut self, buffers: usize, buffer_capacity: usize) -> Self {
        self.pool_buffers = buffers;
        self.pool_buffer_capacity = buffer_capacity;
        self
    }

    /// Set the END search bound and poll interval.
    #[must_use]
    pub fn with_end_search(mut self, timeout: Duration, poll: Duration) -> Self {
        self.end_timeout = timeout;
        self.end_poll = poll;
        self
    }

    /// Set the settle delay before the END search.
    #[must_use]
    pub fn with_end_settle(mut self, settle: Duration) -> Self {
        self.end_settle = settle;
        self
    }

    /// Set the peer catch-up bound before cross-ring END writes.
    #[must_use]
    pub fn with_catchup_timeout(mut self, timeout: Duration) -> Self {
        self.catchup_timeout = timeout;
        self
    }

    /// Set the wait strategy.
    #[must_use]
    pub fn with_wait(mut self, wait: WaitKind) -> Self {
        self.wait = wait;
        self
    }
}
