//! Default values for optional configuration fields.

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_WORKER_THREADS: usize = 2;
pub const DEFAULT_MAILBOX_SIZE: usize = 64;

/// Stake pre-filled in the stake editor, in currency units.
pub const DEFAULT_STAKE: f64 = 10.0;

pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Environment variable overriding `session_token`.
pub const SESSION_TOKEN_ENV: &str = "CRASHLINE_SESSION_TOKEN";
