// crates/server/src/config.rs
//! Command-line and environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use reel_jobs::ManagerConfig;
use reel_observability::LogConfig;

/// Every flag can also be set through its `REEL_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "reel", version)]
#[command(about = "Media library job server with live event streaming")]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "REEL_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "REEL_PORT", default_value_t = 9999)]
    pub port: u16,

    /// Log filter directives (`tracing_subscriber::EnvFilter` syntax)
    #[arg(long = "log-filter", env = "REEL_LOG", default_value = "info")]
    pub log_filter: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "REEL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Finished, failed and cancelled jobs kept queryable before eviction
    #[arg(long, env = "REEL_RETAINED_JOBS", default_value_t = 10)]
    pub retained_jobs: usize,

    /// Events buffered per SSE client before further events are dropped
    #[arg(long, env = "REEL_SSE_BUFFER", default_value_t = 64,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub sse_buffer: u16,

    /// Seconds to wait for running jobs to stop on shutdown
    #[arg(long, env = "REEL_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            retained_jobs: self.retained_jobs,
            ..ManagerConfig::default()
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            filter: self.log_filter.clone(),
            json: self.log_json,
        }
    }

    pub fn sse_buffer(&self) -> usize {
        usize::from(self.sse_buffer)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["reel"]).unwrap();
        assert_eq!(config.socket_addr(), "127.0.0.1:9999".parse().unwrap());
        assert_eq!(config.log_config().filter, "info");
        assert!(!config.log_json);
        assert_eq!(config.manager_config().retained_jobs, 10);
        assert_eq!(config.sse_buffer(), 64);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "reel",
            "--host",
            "0.0.0.0",
            "-p",
            "8080",
            "--log-filter",
            "debug,tower_http=warn",
            "--log-json",
            "--retained-jobs",
            "3",
            "--sse-buffer",
            "8",
        ])
        .unwrap();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080".parse().unwrap());
        assert!(config.log_config().json);
        assert_eq!(config.manager_config().retained_jobs, 3);
        assert_eq!(config.sse_buffer(), 8);
    }

    #[test]
    fn test_zero_sse_buffer_rejected() {
        assert!(ServerConfig::try_parse_from(["reel", "--sse-buffer", "0"]).is_err());
    }

    #[test]
    fn test_command_is_well_formed() {
        use clap::CommandFactory;
        ServerConfig::command().debug_assert();
    }
}
