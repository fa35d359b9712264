//! Configuration for Agora
//!
//! CLI arguments with environment variable fallbacks, using clap.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::snowflake::MAX_NODE_ID;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Agora - social network backend
#[derive(Parser, Debug, Clone)]
#[command(name = "agora")]
#[command(about = "Accounts, posts, comments, likes and follows over HTTP")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "agora.db")]
    pub database_path: PathBuf,

    /// Snowflake node id, unique per running instance (0-1023)
    #[arg(long, env = "NODE_ID", default_value_t = 0)]
    pub node_id: u16,

    /// Session token lifetime in seconds
    #[arg(long, env = "SESSION_TTL_SECONDS", default_value_t = 86_400)]
    pub session_ttl_seconds: u64,

    /// How long a writer waits for the database lock before failing
    #[arg(long, env = "LOCK_WAIT_TIMEOUT_MS", default_value_t = 5_000)]
    pub lock_wait_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// Rotate the token signing key this often (disabled when unset)
    #[arg(long, env = "KEY_ROTATION_INTERVAL_SECONDS")]
    pub key_rotation_interval_seconds: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn key_rotation_interval(&self) -> Option<Duration> {
        self.key_rotation_interval_seconds.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id > MAX_NODE_ID {
            return Err(format!("NODE_ID must be at most {}", MAX_NODE_ID));
        }

        if self.session_ttl_seconds == 0 {
            return Err("SESSION_TTL_SECONDS must be positive".to_string());
        }

        if self.lock_wait_timeout_ms == 0 {
            return Err("LOCK_WAIT_TIMEOUT_MS must be positive".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be positive".to_string());
        }

        if self.key_rotation_interval_seconds == Some(0) {
            return Err("KEY_ROTATION_INTERVAL_SECONDS must be positive when set".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["agora"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert_eq!(args.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(args.lock_wait_timeout(), Duration::from_secs(5));
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(args.key_rotation_interval().is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&[
            "--node-id",
            "17",
            "--key-rotation-interval-seconds",
            "600",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.node_id, 17);
        assert_eq!(args.key_rotation_interval(), Some(Duration::from_secs(600)));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(parse(&["--node-id", "1024"]).validate().is_err());
        assert!(parse(&["--session-ttl-seconds", "0"]).validate().is_err());
        assert!(parse(&["--lock-wait-timeout-ms", "0"]).validate().is_err());
        assert!(parse(&["--request-timeout-ms", "0"]).validate().is_err());
        assert!(parse(&["--key-rotation-interval-seconds", "0"]).validate().is_err());
    }
}
