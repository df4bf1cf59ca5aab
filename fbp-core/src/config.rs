//! Network configuration
//!
//! `NetworkOptions` collects the tunables a graph is built and run with:
//! default connection capacity, shutdown grace period, and suspension
//! warning threshold. Built with a fluent `with_*` API, mirroring the
//! option builders used elsewhere in this runtime.

use std::time::Duration;

/// Configuration for a [`Network`](crate::network::Network).
///
/// Construct with [`NetworkOptions::new`] and customize with the `with_*`
/// methods, then pass to [`NetworkBuilder::with_options`](crate::network::NetworkBuilder::with_options).
#[derive(Debug, Clone)]
pub struct NetworkOptions {
    /// Capacity used for connections that don't specify their own.
    pub(crate) default_capacity: usize,
    /// How long `stop()` waits for threads to notice cancellation before
    /// the report is returned with unterminated components still listed.
    pub(crate) shutdown_timeout: Duration,
    /// If a component sits in `SuspendedSend` or `SuspendedReceive` longer
    /// than this, a warning is logged. `None` disables the warning.
    pub(crate) suspension_warn_after: Option<Duration>,
    /// Prefix used when naming the OS threads spawned for components.
    pub(crate) thread_name_prefix: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            default_capacity: 10,
            shutdown_timeout: Duration::from_secs(5),
            suspension_warn_after: Some(Duration::from_secs(5)),
            thread_name_prefix: "fbp-component".to_string(),
        }
    }
}

impl NetworkOptions {
    /// Create a new options value with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default bounded-connection capacity (must be non-zero).
    #[must_use]
    pub fn with_default_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "connection capacity must be non-zero");
        self.default_capacity = capacity;
        self
    }

    /// Set how long `stop()` waits for components to unwind.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the suspension-warning threshold, or disable it with `None`.
    #[must_use]
    pub fn with_suspension_warn_after(mut self, warn_after: Option<Duration>) -> Self {
        self.suspension_warn_after = warn_after;
        self
    }

    /// Set the thread name prefix used for component worker threads.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[must_use]
    pub fn suspension_warn_after(&self) -> Option<Duration> {
        self.suspension_warn_after
    }

    #[must_use]
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }
}
