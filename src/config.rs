//! Server configuration
//!
//! Defaults, optionally overridden by a JSON file (`--config <path>`),
//! then by the `--ip` and `--port` flags.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::DEFAULT_MAX_LINE_BYTES;
use crate::error::AppError;
use crate::mailbox;
use crate::room::DEFAULT_QUEUE_CAPACITY;

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address to listen on
    pub ip: String,
    /// Port to listen on
    pub port: u16,
    /// Seconds without inbound bytes before a connection is dropped
    pub idle_timeout_secs: u64,
    /// Longest accepted line, excluding `\r\n`
    pub max_line_bytes: usize,
    /// Lines buffered per user before senders wait
    pub mailbox_capacity: usize,
    /// Envelopes buffered per room before senders wait
    pub room_queue_capacity: usize,
    /// Milliseconds allowed to flush final lines after disconnect
    pub linger_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "0.0.0.0".to_string(),
            port: 9399,
            idle_timeout_secs: 600,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            mailbox_capacity: mailbox::DEFAULT_CAPACITY,
            room_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            linger_ms: 2000,
        }
    }
}

impl Config {
    /// Build a config from command-line arguments (program name excluded)
    pub fn from_args<I>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut config_path = None;
        let mut ip = None;
        let mut port = None;

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| AppError::Config(format!("{} needs a value", flag)))
            };
            match arg.as_str() {
                "--config" => config_path = Some(value("--config")?),
                "--ip" => ip = Some(value("--ip")?),
                "--port" => {
                    let raw = value("--port")?;
                    let parsed = raw
                        .parse::<u16>()
                        .map_err(|_| AppError::Config(format!("bad port: {}", raw)))?;
                    port = Some(parsed);
                }
                other => return Err(AppError::Config(format!("unknown argument: {}", other))),
            }
        }

        let mut config = match config_path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(ip) = ip {
            config.ip = ip;
        }
        if let Some(port) = port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, AppError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.idle_timeout_secs == 0 {
            return Err(AppError::Config("idle_timeout_secs must be positive".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(AppError::Config("max_line_bytes must be positive".into()));
        }
        if self.mailbox_capacity == 0 || self.room_queue_capacity == 0 {
            return Err(AppError::Config("queue capacities must be positive".into()));
        }
        Ok(())
    }

    /// `ip:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(Vec::new()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_addr(), "0.0.0.0:9399");
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.max_line_bytes, 1024);
        assert_eq!(config.mailbox_capacity, 128);
    }

    #[test]
    fn test_flags_override() {
        let config = Config::from_args(args(&["--ip", "127.0.0.1", "--port", "4000"])).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:4000");
    }

    #[test]
    fn test_bad_flags() {
        assert!(matches!(
            Config::from_args(args(&["--port", "banana"])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_args(args(&["--port"])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_args(args(&["--verbose"])),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_json_partial_override() {
        let config = Config::from_json(r#"{"port": 7000, "idle_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.idle_timeout_secs, 30);
        assert_eq!(config.ip, "0.0.0.0");
    }

    #[test]
    fn test_json_rejects_bad_values() {
        assert!(matches!(
            Config::from_json(r#"{"mailbox_capacity": 0}"#),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"colour": "blue"}"#),
            Err(AppError::Json(_))
        ));
    }
}
