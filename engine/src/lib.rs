//! Client-side reconciliation engine for a crash betting game.
//!
//! A [session::Session] keeps the push channel connected through the
//! [supervisor::Supervisor], issues player actions through a
//! [gateway::Gateway], and folds every push event, gateway result and timer
//! into the [state_machine::Machine], publishing a [state_machine::View]
//! after each change.

use crashline_client::Client;
use crashline_types::Amount;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;
use url::Url;

pub mod backoff;
pub mod defaults;
pub mod gateway;
pub mod round;
pub mod session;
pub mod stake;
pub mod state_machine;
pub mod supervisor;
pub mod ticket;

#[cfg(test)]
pub(crate) mod mocks;

pub use backoff::ReconnectPolicy;
pub use gateway::{Gateway, GatewayError};
pub use round::{Phase, RoundSnapshot};
pub use session::{Mailbox, Session, Update};
pub use state_machine::{Notice, View};
pub use supervisor::{ConnectionState, ConnectionStatus, PushChannel};
pub use ticket::BetTicket;

/// Why a player action was not carried out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("server unavailable: {0}")]
    Unavailable(String),
    #[error("push channel not connected")]
    ConnectionLost,
    #[error("stake exceeds balance")]
    InsufficientBalance,
    #[error("stake out of range")]
    OutOfRange,
    #[error("not permitted in the current round state")]
    NotPermitted,
    #[error("session closed")]
    Closed,
}

impl From<GatewayError> for ActionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(reason) => Self::Rejected(reason),
            GatewayError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

/// Configuration of the `crashline` binary.
#[derive(Deserialize, Serialize)]
pub struct Config {
    pub api_base_url: String,
    pub hub_url: String,
    #[serde(default)]
    pub session_token: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
    /// Initial stake editor value, in currency units.
    #[serde(default = "default_stake")]
    pub default_stake: f64,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_worker_threads() -> usize {
    defaults::DEFAULT_WORKER_THREADS
}

fn default_mailbox_size() -> usize {
    defaults::DEFAULT_MAILBOX_SIZE
}

fn default_stake() -> f64 {
    defaults::DEFAULT_STAKE
}

fn default_reconnect_max_attempts() -> u32 {
    defaults::DEFAULT_RECONNECT_MAX_ATTEMPTS
}

fn default_reconnect_base_delay_ms() -> u64 {
    defaults::DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_reconnect_max_delay_ms() -> u64 {
    defaults::DEFAULT_RECONNECT_MAX_DELAY_MS
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
    #[error("{field} must be a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} URL scheme must be one of {allowed}: {value}")]
    InvalidUrlScheme {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },
    #[error("default_stake must be a valid stake: {value}")]
    InvalidStake { value: f64 },
    #[error("reconnect_base_delay_ms ({base}) exceeds reconnect_max_delay_ms ({max})")]
    DelayConflict { base: u64, max: u64 },
}

pub struct ValidatedConfig {
    pub api_base_url: String,
    pub hub_url: String,
    pub session_token: Option<String>,
    pub log_level: Level,
    pub json_logs: bool,
    pub worker_threads: usize,
    pub mailbox_size: usize,
    pub default_stake: Amount,
    pub reconnect: ReconnectPolicy,
}

impl ValidatedConfig {
    /// Build the transport client the gateway and push channel share.
    pub fn client(&self) -> Result<Client, crashline_client::Error> {
        let client = Client::new(&self.api_base_url, &self.hub_url)?;
        Ok(match &self.session_token {
            Some(token) => client.with_session_token(token.clone()),
            None => client,
        })
    }
}

struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        f.debug_struct("Config")
            .field("api_base_url", &cfg.api_base_url)
            .field("hub_url", &cfg.hub_url)
            .field(
                "session_token",
                &cfg.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("log_level", &cfg.log_level)
            .field("json_logs", &cfg.json_logs)
            .field("worker_threads", &cfg.worker_threads)
            .field("mailbox_size", &cfg.mailbox_size)
            .field("default_stake", &cfg.default_stake)
            .field("reconnect_max_attempts", &cfg.reconnect_max_attempts)
            .field("reconnect_base_delay_ms", &cfg.reconnect_base_delay_ms)
            .field("reconnect_max_delay_ms", &cfg.reconnect_max_delay_ms)
            .finish()
    }
}

fn ensure_nonzero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn validate_url(
    field: &'static str,
    value: &str,
    schemes: &[&str],
    allowed: &'static str,
) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrlScheme {
            field,
            value: value.to_string(),
            allowed,
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl Config {
    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        validate_url(
            "api_base_url",
            &self.api_base_url,
            &["http", "https"],
            "http or https",
        )?;
        validate_url(
            "hub_url",
            &self.hub_url,
            &["ws", "wss", "http", "https"],
            "ws, wss, http or https",
        )?;
        ensure_nonzero("worker_threads", self.worker_threads)?;
        ensure_nonzero("mailbox_size", self.mailbox_size)?;
        ensure_nonzero(
            "reconnect_base_delay_ms",
            self.reconnect_base_delay_ms as usize,
        )?;
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::DelayConflict {
                base: self.reconnect_base_delay_ms,
                max: self.reconnect_max_delay_ms,
            });
        }

        let default_stake = Amount::from_f64(self.default_stake)
            .filter(|amount| stake::in_range(*amount))
            .ok_or(ConfigError::InvalidStake {
                value: self.default_stake,
            })?;

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        Ok(ValidatedConfig {
            api_base_url: self.api_base_url,
            hub_url: self.hub_url,
            session_token: self.session_token.filter(|token| !token.is_empty()),
            log_level,
            json_logs: self.json_logs,
            worker_threads: self.worker_threads,
            mailbox_size: self.mailbox_size,
            default_stake,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts,
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
api_base_url: "https://api.example.com/api"
hub_url: "wss://hub.example.com/hub"
session_token: "secret-token"
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    #[test]
    fn config_defaults_applied() {
        let config = parse(MINIMAL).validate().expect("config should validate");
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json_logs);
        assert_eq!(config.worker_threads, defaults::DEFAULT_WORKER_THREADS);
        assert_eq!(config.mailbox_size, defaults::DEFAULT_MAILBOX_SIZE);
        assert_eq!(config.default_stake, Amount::from_cents(1_000));
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.session_token.as_deref(), Some("secret-token"));
    }

    #[test]
    fn config_redacted_debug_does_not_leak_secrets() {
        let config = parse(MINIMAL);
        let rendered = format!("{:?}", config.redacted_debug());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("wss://hub.example.com/hub"));
    }

    #[test]
    fn config_rejects_bad_urls() {
        let mut config = parse(MINIMAL);
        config.api_base_url = "ftp://api.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrlScheme {
                field: "api_base_url",
                ..
            })
        ));

        let mut config = parse(MINIMAL);
        config.hub_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl {
                field: "hub_url",
                ..
            })
        ));

        let mut config = parse(MINIMAL);
        config.hub_url = "http://hub.example.com/hub".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_invalid_values() {
        let mut config = parse(MINIMAL);
        config.mailbox_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "mailbox_size",
                ..
            })
        ));

        let mut config = parse(MINIMAL);
        config.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let mut config = parse(MINIMAL);
        config.default_stake = 5_000.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStake { .. })
        ));

        let mut config = parse(MINIMAL);
        config.reconnect_base_delay_ms = 60_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayConflict { .. })
        ));
    }

    #[test]
    fn empty_session_token_is_dropped() {
        let mut config = parse(MINIMAL);
        config.session_token = Some(String::new());
        let config = config.validate().unwrap();
        assert!(config.session_token.is_none());
        assert!(config.client().is_ok());
    }

    #[test]
    fn gateway_errors_map_to_action_errors() {
        assert_eq!(
            ActionError::from(GatewayError::Rejected("closed".to_string())),
            ActionError::Rejected("closed".to_string())
        );
        assert_eq!(
            ActionError::from(GatewayError::Unavailable("timeout".to_string())),
            ActionError::Unavailable("timeout".to_string())
        );
    }
}
