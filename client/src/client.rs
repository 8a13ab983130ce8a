use crate::{events::Stream, hub, Error, Result};
use crashline_types::{
    Amount, CashOutRequest, CrashState, Envelope, PlaceBetRequest, PlaceBetResponse,
};
use futures_util::SinkExt;
use reqwest::{header::AUTHORIZATION, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use url::Url;

/// Maximum time spent opening the hub websocket.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time spent on any REST request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const PLACE_BET_PATH: &str = "crash-games/request-place-bet";
const CASH_OUT_PATH: &str = "crash-games/request-cashout-bet";
const BALANCE_PATH: &str = "players/me/balance";
const CRASH_STATE_PATH: &str = "crash-games/crash-state";

/// SDK for the crash game backend: REST actions and the push hub.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub hub_url: Url,
    http_client: reqwest::Client,
    session_token: Option<String>,
    dial_timeout: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("hub_url", &self.hub_url.as_str())
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Client {
    /// Create a client for the REST backend at `base_url` and the hub at `hub_url`.
    ///
    /// The REST URL must be `http` or `https`. The hub URL may be given as
    /// `ws`/`wss` or `http`/`https` (mapped to the websocket scheme).
    pub fn new(base_url: &str, hub_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        }
        // Relative joins replace the last path segment unless it ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut hub_url = Url::parse(hub_url)?;
        let ws_scheme = match hub_url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            scheme => return Err(Error::InvalidScheme(scheme.to_string())),
        };
        hub_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url,
            hub_url,
            http_client,
            session_token: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        })
    }

    /// Attach the session token sent with every request.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.session_token {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let url = self.base_url.join(path)?;
        debug!(%url, "POST");
        let response = self
            .authorize(self.http_client.post(url))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.base_url.join(path)?;
        debug!(%url, "GET");
        let response = self.authorize(self.http_client.get(url)).send().await?;
        read_json(response).await
    }

    /// Place a bet of `amount` on round `round_id`, returning its reference id.
    pub async fn place_bet(&self, round_id: u64, amount: Amount) -> Result<String> {
        let body = PlaceBetRequest::new(round_id, amount);
        let value = self.post_json(PLACE_BET_PATH, &body).await?;
        check_declined(&value)?;

        // The reference id is returned either bare or inside the envelope data
        let payload = match value.get("data") {
            Some(data) if data.is_object() => data.clone(),
            _ => value,
        };
        let response: PlaceBetResponse =
            serde_json::from_value(payload).map_err(|_| Error::UnexpectedResponse)?;
        Ok(response.bet_reference_id)
    }

    /// Cash out the live bet identified by `bet_reference_id`.
    pub async fn cash_out(&self, bet_reference_id: &str) -> Result<()> {
        let body = CashOutRequest::new(bet_reference_id);
        let value = self.post_json(CASH_OUT_PATH, &body).await?;
        check_declined(&value)
    }

    /// Current wallet balance.
    pub async fn balance(&self) -> Result<Amount> {
        let value = self.get_json(BALANCE_PATH).await?;
        open_envelope(value)
    }

    /// Full snapshot of the current round.
    pub async fn crash_state(&self) -> Result<CrashState> {
        let value = self.post_json(CRASH_STATE_PATH, &serde_json::json!({})).await?;
        open_envelope(value)
    }

    /// Open the push hub and complete the protocol handshake.
    pub async fn connect_hub(&self) -> Result<Stream> {
        let mut url = self.hub_url.clone();
        if let Some(token) = &self.session_token {
            url.query_pairs_mut().append_pair("access_token", token);
        }

        let (mut ws, _) = tokio::time::timeout(self.dial_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        ws.send(Message::Text(hub::HANDSHAKE.to_string())).await?;
        info!(hub = %self.hub_url, "hub connected");

        Ok(Stream::new(ws))
    }
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_client_error() {
        return Err(Error::Rejected { status, body });
    }
    if !status.is_success() {
        if body.is_empty() {
            return Err(Error::Failed(status));
        }
        return Err(Error::FailedWithBody { status, body });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(Error::InvalidJson)
}

fn check_declined(value: &Value) -> Result<()> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("declined")
            .to_string();
        return Err(Error::Declined { reason });
    }
    Ok(())
}

fn open_envelope<T: DeserializeOwned>(value: Value) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_value(value).map_err(Error::InvalidJson)?;
    if !envelope.success {
        return Err(Error::Declined {
            reason: envelope.error.unwrap_or_else(|| "declined".to_string()),
        });
    }
    envelope.data.ok_or(Error::UnexpectedResponse)
}
