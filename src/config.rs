//! Configuration for the Parley terminal client
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::ReconnectPolicy;
use crate::types::{ParleyError, Result};

/// Parley - collaboration session client for agreement negotiation
#[derive(Parser, Debug, Clone)]
#[command(name = "parley")]
#[command(about = "Join a real-time agreement negotiation session")]
pub struct Args {
    /// Agreement to open a session for
    #[arg(long, env = "PARLEY_AGREEMENT_ID")]
    pub agreement_id: String,

    /// REST base URL of the agreement backend
    #[arg(long, env = "PARLEY_API_URL", default_value = "http://localhost:3000")]
    pub api_url: String,

    /// WebSocket URL of the collaboration server
    #[arg(long, env = "PARLEY_CHANNEL_URL", default_value = "ws://localhost:3001/ws")]
    pub channel_url: String,

    /// Path to the session context file (identity + bearer credential)
    #[arg(long, env = "PARLEY_CONTEXT", default_value = "parley-context.json")]
    pub context: PathBuf,

    /// Backend request timeout in milliseconds
    #[arg(long, env = "PARLEY_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Channel connect timeout in milliseconds
    #[arg(long, env = "PARLEY_CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Maximum channel reconnect attempts before giving up
    #[arg(long, env = "PARLEY_RECONNECT_ATTEMPTS", default_value = "8")]
    pub reconnect_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration before anything connects.
    pub fn validate(&self) -> Result<()> {
        if self.agreement_id.trim().is_empty() {
            return Err(ParleyError::Config("agreement id is empty".into()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ParleyError::Config(format!(
                "api url must be http(s): {}",
                self.api_url
            )));
        }
        if !self.channel_url.starts_with("ws://") && !self.channel_url.starts_with("wss://") {
            return Err(ParleyError::Config(format!(
                "channel url must be ws(s): {}",
                self.channel_url
            )));
        }
        if self.reconnect_attempts == 0 {
            return Err(ParleyError::Config(
                "reconnect attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            ..ReconnectPolicy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(agreement: &str, api: &str, channel: &str) -> Args {
        Args {
            agreement_id: agreement.into(),
            api_url: api.into(),
            channel_url: channel.into(),
            context: PathBuf::from("parley-context.json"),
            request_timeout_ms: 30000,
            connect_timeout_ms: 10000,
            reconnect_attempts: 8,
            log_level: "info".into(),
        }
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        assert!(args("agr-1", "http://localhost:3000", "ws://localhost:3001/ws")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(args("agr-1", "localhost:3000", "ws://x/ws").validate().is_err());
        assert!(args("agr-1", "http://x", "http://x/ws").validate().is_err());
        assert!(args("", "http://x", "ws://x/ws").validate().is_err());
    }
}
