use core::time::Duration;

/// Runtime-wide configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Display name of the initial thread
    pub main_thread_name: String,
    /// Maximum number of live threads, main included
    pub max_threads: usize,
    /// How long the run loop parks when every thread waits on I/O
    pub idle_park_interval: Duration,
    /// Enable scheduler metrics collection
    pub enable_metrics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            main_thread_name: String::from("main"),
            max_threads: 1024,
            idle_park_interval: Duration::from_millis(10),
            enable_metrics: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn main_thread_name(mut self, name: impl Into<String>) -> Self {
        self.main_thread_name = name.into();
        self
    }

    /// Set the live thread limit (at least 1, the main thread).
    pub fn max_threads(mut self, max: usize) -> Self {
        self.max_threads = max.max(1);
        self
    }

    pub fn idle_park_interval(mut self, interval: Duration) -> Self {
        self.idle_park_interval = interval;
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_threads_never_drops_below_one() {
        let config = RuntimeConfig::new().max_threads(0);
        assert_eq!(config.max_threads, 1);
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.main_thread_name, "main");
        assert!(config.enable_metrics);
    }
}
