use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the TTL reaper wakes. `None` disables it.
    pub ttl_sweep_interval: Option<Duration>,
    /// Maximum number of events retained in the oplog.
    pub oplog_size: usize,
    /// Upper bound on waiting for the writer token in `begin`. `None` waits
    /// until the context is canceled.
    pub begin_timeout: Option<Duration>,
    /// Concurrent write transactions.
    pub max_transactions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl_sweep_interval: Some(Duration::from_millis(100)),
            oplog_size: 1000,
            begin_timeout: None,
            max_transactions: 1,
        }
    }
}
