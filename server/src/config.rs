//! Explicit configuration values for the I/O module and the tick driver

use shared::DEFAULT_BACKLOG;
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound on one readiness wait, so interest sets are rebuilt promptly.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// 30 Hz.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_micros(33_333);

#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Address to accept players on; `None` for an I/O module that only
    /// carries attached or outbound sessions.
    pub listen: Option<SocketAddr>,
    pub backlog: i32,
    pub poll_timeout: Duration,
}

impl IoConfig {
    pub fn listening(addr: SocketAddr) -> Self {
        Self {
            listen: Some(addr),
            ..Self::default()
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            listen: None,
            backlog: DEFAULT_BACKLOG,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_period: Duration,
    pub io: IoConfig,
}

impl ServerConfig {
    pub fn listening(addr: SocketAddr) -> Self {
        Self {
            io: IoConfig::listening(addr),
            ..Self::default()
        }
    }

    /// Sets the tick period from a rate in ticks per second. Zero is treated
    /// as one tick per second.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_period = Duration::from_secs_f64(1.0 / hz.max(1) as f64);
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            io: IoConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_rate_conversion() {
        let config = ServerConfig::default().with_tick_rate(100);
        assert_eq!(config.tick_period, Duration::from_millis(10));

        let config = ServerConfig::default().with_tick_rate(0);
        assert_eq!(config.tick_period, Duration::from_secs(1));
    }

    #[test]
    fn test_listening_keeps_defaults() {
        let addr: SocketAddr = "127.0.0.1:27010".parse().unwrap();
        let config = ServerConfig::listening(addr);

        assert_eq!(config.io.listen, Some(addr));
        assert_eq!(config.io.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.io.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert_eq!(config.tick_period, DEFAULT_TICK_PERIOD);
    }
}
