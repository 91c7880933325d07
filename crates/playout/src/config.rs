use std::time::Duration;

use crate::position::ResolveOptions;

/// Configurable options shared by the manager and every channel stream
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Per-client queue capacity, in chunks
    pub client_queue_capacity: usize,

    /// How long a client read waits before synthesizing keep-alive padding
    pub client_read_timeout: Duration,

    /// Consecutive timed-out reads after which a client connection ends
    pub max_silent_reads: u32,

    /// Null packets per keep-alive burst
    pub keepalive_packets: usize,

    /// Base delay for supervisory restart backoff
    pub restart_backoff_base: Duration,

    /// Ceiling for the exponential restart backoff
    pub restart_backoff_cap: Duration,

    /// Restarts after which a channel stops permanently
    pub max_restarts: u32,

    /// Consecutive item failures that escalate to a supervisory restart
    pub max_consecutive_item_failures: u32,

    /// Pause after a single item fails before moving to the next
    pub item_error_pause: Duration,

    /// Sleep between retries when neither schedule nor filler has content
    pub idle_retry_delay: Duration,

    /// Bounded wait for the producer task to exit on `stop()`
    pub stop_grace: Duration,

    /// Position-resolution tunables
    pub resolve: ResolveOptions,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            client_queue_capacity: 100,
            client_read_timeout: Duration::from_secs(30),
            max_silent_reads: 10,
            keepalive_packets: 7,
            restart_backoff_base: Duration::from_secs(1),
            restart_backoff_cap: Duration::from_secs(60),
            max_restarts: 5,
            max_consecutive_item_failures: 10,
            item_error_pause: Duration::from_secs(1),
            idle_retry_delay: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            resolve: ResolveOptions::default(),
        }
    }
}

impl PlayoutConfig {
    pub fn builder() -> PlayoutConfigBuilder {
        PlayoutConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayoutConfigBuilder {
    config: PlayoutConfig,
}

impl PlayoutConfigBuilder {
    pub fn client_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.client_queue_capacity = capacity;
        self
    }

    pub fn client_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.client_read_timeout = timeout;
        self
    }

    pub fn max_silent_reads(mut self, reads: u32) -> Self {
        self.config.max_silent_reads = reads;
        self
    }

    pub fn restart_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.restart_backoff_base = base;
        self.config.restart_backoff_cap = cap;
        self
    }

    pub fn max_restarts(mut self, restarts: u32) -> Self {
        self.config.max_restarts = restarts;
        self
    }

    pub fn max_consecutive_item_failures(mut self, failures: u32) -> Self {
        self.config.max_consecutive_item_failures = failures;
        self
    }

    pub fn item_error_pause(mut self, pause: Duration) -> Self {
        self.config.item_error_pause = pause;
        self
    }

    pub fn idle_retry_delay(mut self, delay: Duration) -> Self {
        self.config.idle_retry_delay = delay;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    pub fn resolve_options(mut self, resolve: ResolveOptions) -> Self {
        self.config.resolve = resolve;
        self
    }

    pub fn build(self) -> PlayoutConfig {
        self.config
    }
}
