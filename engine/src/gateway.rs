//! Request/response boundary for player actions and resynchronization queries.

use crashline_client::Client;
use crashline_types::{Amount, CrashState};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The backend understood the request and declined it.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The outcome is unknown (transport failure, server error, bad body).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// The four operations the engine issues against the backend. None of them retry.
pub trait Gateway: Clone + Send + Sync + 'static {
    /// Place a bet, returning the backend's reference id for it.
    fn place_bet(
        &self,
        round_id: u64,
        amount: Amount,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;

    fn cash_out(
        &self,
        reference_id: String,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn fetch_balance(&self) -> impl Future<Output = Result<Amount, GatewayError>> + Send;

    fn fetch_round_snapshot(&self)
        -> impl Future<Output = Result<CrashState, GatewayError>> + Send;
}

fn classify(err: crashline_client::Error) -> GatewayError {
    if err.is_rejection() {
        GatewayError::Rejected(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

impl Gateway for Client {
    async fn place_bet(&self, round_id: u64, amount: Amount) -> Result<String, GatewayError> {
        debug!(round_id, %amount, "placing bet");
        Client::place_bet(self, round_id, amount)
            .await
            .map_err(classify)
    }

    async fn cash_out(&self, reference_id: String) -> Result<(), GatewayError> {
        debug!(reference_id, "cashing out");
        Client::cash_out(self, &reference_id).await.map_err(classify)
    }

    async fn fetch_balance(&self) -> Result<Amount, GatewayError> {
        self.balance()
            .await
            .map_err(|err| GatewayError::Unavailable(err.to_string()))
    }

    async fn fetch_round_snapshot(&self) -> Result<CrashState, GatewayError> {
        self.crash_state()
            .await
            .map_err(|err| GatewayError::Unavailable(err.to_string()))
    }
}
