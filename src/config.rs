//! Server Configuration
//!
//! Every tunable of the server with its default. The binary maps its
//! command-line flags onto [`ServerConfig::builder`].

use crate::persistence::{
    AofConfig, FsyncPolicy, DEFAULT_REWRITE_MIN_SIZE, DEFAULT_REWRITE_PERCENTAGE,
};
use crate::protocol::ProtocolLimits;
use std::path::PathBuf;
use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default file name of the append-only log.
pub const DEFAULT_AOF_FILENAME: &str = "appendonly.aof";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Network
    // -------------------------------------------------------------------------
    pub host: String,
    pub port: u16,

    /// Connections past this count are refused with an error reply
    pub max_clients: usize,

    /// Size ceilings of the request decoder
    pub limits: ProtocolLimits,

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------
    /// Log write commands to `aof_path` and replay it at startup
    pub appendonly: bool,
    pub aof_path: PathBuf,
    pub fsync: FsyncPolicy,

    /// No automatic rewrite below this size (bytes)
    pub rewrite_min_size: u64,

    /// Growth since the last rewrite (percent) that triggers a rewrite
    pub rewrite_percentage: u64,

    // -------------------------------------------------------------------------
    // Background work
    // -------------------------------------------------------------------------
    /// Server cron runs per second
    pub hz: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_clients: 10_000,
            limits: ProtocolLimits::default(),
            appendonly: false,
            aof_path: PathBuf::from(DEFAULT_AOF_FILENAME),
            fsync: FsyncPolicy::EverySec,
            rewrite_min_size: DEFAULT_REWRITE_MIN_SIZE,
            rewrite_percentage: DEFAULT_REWRITE_PERCENTAGE,
            hz: 10,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Interval of the server cron timer.
    pub fn cron_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.hz.clamp(1, 1000)))
    }

    pub fn aof_config(&self) -> AofConfig {
        AofConfig {
            path: self.aof_path.clone(),
            fsync: self.fsync,
            rewrite_min_size: self.rewrite_min_size,
            rewrite_percentage: self.rewrite_percentage,
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Port 0 picks a free port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn max_clients(mut self, count: usize) -> Self {
        self.config.max_clients = count;
        self
    }

    pub fn limits(mut self, limits: ProtocolLimits) -> Self {
        self.config.limits = limits;
        self
    }

    pub fn appendonly(mut self, enabled: bool) -> Self {
        self.config.appendonly = enabled;
        self
    }

    pub fn aof_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.aof_path = path.into();
        self
    }

    pub fn fsync(mut self, policy: FsyncPolicy) -> Self {
        self.config.fsync = policy;
        self
    }

    pub fn rewrite_min_size(mut self, bytes: u64) -> Self {
        self.config.rewrite_min_size = bytes;
        self
    }

    pub fn rewrite_percentage(mut self, percent: u64) -> Self {
        self.config.rewrite_percentage = percent;
        self
    }

    pub fn hz(mut self, hz: u32) -> Self {
        self.config.hz = hz;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert!(!config.appendonly);
        assert_eq!(config.rewrite_min_size, 32 * 1024 * 1024);
        assert_eq!(config.rewrite_percentage, 80);
        assert_eq!(config.cron_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::builder()
            .host("0.0.0.0")
            .port(7000)
            .appendonly(true)
            .aof_path("/tmp/x.aof")
            .fsync(FsyncPolicy::Always)
            .hz(0)
            .build();
        assert_eq!(config.bind_address(), "0.0.0.0:7000");
        // hz is clamped to at least one run per second.
        assert_eq!(config.cron_interval(), Duration::from_secs(1));

        let aof = config.aof_config();
        assert_eq!(aof.path, PathBuf::from("/tmp/x.aof"));
        assert_eq!(aof.fsync, FsyncPolicy::Always);
    }

    #[test]
    fn test_fsync_policy_parse() {
        assert_eq!("always".parse::<FsyncPolicy>(), Ok(FsyncPolicy::Always));
        assert_eq!("EverySec".parse::<FsyncPolicy>(), Ok(FsyncPolicy::EverySec));
        assert_eq!("no".parse::<FsyncPolicy>(), Ok(FsyncPolicy::No));
        assert!("sometimes".parse::<FsyncPolicy>().is_err());
    }
}
