//! Lifecycle of the push channel.
//!
//! The [Supervisor] owns a background task that connects, forwards inbound
//! events and reconnects with exponential backoff. Status transitions and
//! events share one ordered stream so a consumer never sees an event from a
//! connection before the transition that opened it.

use crate::backoff::ReconnectPolicy;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use crashline_client::Client;
use crashline_types::Inbound;
use futures::{channel::mpsc, Stream, StreamExt};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use serde::Serialize;
use std::{
    future::Future,
    pin::Pin,
    sync::atomic::AtomicU64,
    task::{Context, Poll},
};
use tracing::{debug, error, info, warn};

/// Source of push-channel connections.
pub trait PushChannel: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection, yielding its inbound events until it drops.
    fn connect(
        &self,
    ) -> impl Future<
        Output = Result<impl Stream<Item = Result<Inbound, Self::Error>> + Send, Self::Error>,
    > + Send;
}

impl PushChannel for Client {
    type Error = crashline_client::Error;

    async fn connect(
        &self,
    ) -> Result<impl Stream<Item = Result<Inbound, Self::Error>> + Send, Self::Error> {
        self.connect_hub().await
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    #[default]
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connection.
    pub attempt: u32,
}

impl ConnectionStatus {
    pub const fn new(state: ConnectionState, attempt: u32) -> Self {
        Self { state, attempt }
    }

    /// Whether player actions that need a live channel may proceed.
    pub fn is_usable(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Output of the supervisor, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Status(ConnectionStatus),
    Inbound(Inbound),
}

#[derive(Clone, Default)]
struct SupervisorMetrics {
    connect_attempts: Counter<u64, AtomicU64>,
    connect_failures: Counter<u64, AtomicU64>,
    connect_success: Counter<u64, AtomicU64>,
    stream_failures: Counter<u64, AtomicU64>,
    connected: Gauge,
    reconnect_attempt: Gauge,
}

impl SupervisorMetrics {
    fn register(context: &impl Metrics) -> Self {
        let metrics = Self::default();
        context.register(
            "connect_attempts_total",
            "Number of attempts to open the push channel",
            metrics.connect_attempts.clone(),
        );
        context.register(
            "connect_failures_total",
            "Number of failures while opening the push channel",
            metrics.connect_failures.clone(),
        );
        context.register(
            "connect_success_total",
            "Number of successful push channel connections",
            metrics.connect_success.clone(),
        );
        context.register(
            "stream_failures_total",
            "Number of read errors on an open push channel",
            metrics.stream_failures.clone(),
        );
        context.register(
            "connected",
            "Whether the push channel is currently open (1=open, 0=not open)",
            metrics.connected.clone(),
        );
        context.register(
            "reconnect_attempt",
            "Consecutive failed push channel attempts since the last success",
            metrics.reconnect_attempt.clone(),
        );
        metrics
    }
}

/// Keeps the push channel connected and reports its lifecycle.
pub struct Supervisor<E, P>
where
    E: Spawner + Clock + Metrics,
    P: PushChannel,
{
    context: E,
    channel: P,
    policy: ReconnectPolicy,
    metrics: SupervisorMetrics,
    tx: mpsc::UnboundedSender<Signal>,
    rx: mpsc::UnboundedReceiver<Signal>,
    handle: Option<Handle<()>>,
}

impl<E, P> Supervisor<E, P>
where
    E: Spawner + Clock + Metrics,
    P: PushChannel,
{
    /// Create a supervisor in the closed state. Nothing happens until [Self::connect].
    pub fn new(context: E, channel: P, policy: ReconnectPolicy) -> Self {
        let context = context.with_label("push_channel");
        let metrics = SupervisorMetrics::register(&context);
        let (tx, rx) = mpsc::unbounded();
        Self {
            context,
            channel,
            policy,
            metrics,
            tx,
            rx,
            handle: None,
        }
    }

    /// Start (or restart) the connection task.
    ///
    /// Any previous task, including a pending reconnection delay, is aborted
    /// first so at most one attempt is ever outstanding.
    pub fn connect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }

        let channel = self.channel.clone();
        let policy = self.policy;
        let metrics = self.metrics.clone();
        let tx = self.tx.clone();
        let handle = self
            .context
            .with_label("connection")
            .spawn(move |context| async move {
                let emit = |state, attempt| {
                    tx.unbounded_send(Signal::Status(ConnectionStatus::new(state, attempt)))
                        .is_ok()
                };

                let mut attempt = 0u32;
                if !emit(ConnectionState::Connecting, attempt) {
                    return;
                }
                loop {
                    metrics.connect_attempts.inc();
                    match channel.connect().await {
                        Ok(stream) => {
                            metrics.connect_success.inc();
                            metrics.connected.set(1);
                            metrics.reconnect_attempt.set(0);
                            attempt = 0;
                            info!("push channel open");
                            if !emit(ConnectionState::Open, attempt) {
                                return;
                            }

                            let mut stream = Box::pin(stream);
                            while let Some(result) = stream.next().await {
                                match result {
                                    Ok(event) => {
                                        if tx.unbounded_send(Signal::Inbound(event)).is_err() {
                                            debug!("receiver dropped");
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        metrics.stream_failures.inc();
                                        warn!(?e, "push channel error");
                                    }
                                }
                            }

                            warn!("push channel closed");
                            metrics.connected.set(0);
                        }
                        Err(e) => {
                            metrics.connect_failures.inc();
                            error!(?e, attempt, "failed to open push channel");
                        }
                    }

                    if !policy.allows(attempt) {
                        info!(attempt, "giving up on push channel");
                        emit(ConnectionState::Closed, attempt);
                        return;
                    }
                    let delay = policy.delay(attempt);
                    attempt += 1;
                    metrics.reconnect_attempt.set(attempt as i64);
                    if !emit(ConnectionState::Reconnecting, attempt) {
                        return;
                    }
                    debug!(?delay, attempt, "scheduling push channel reconnect");
                    context.sleep(delay).await;
                }
            });
        self.handle = Some(handle);
    }

    /// Tear the channel down and cancel any pending reconnection.
    ///
    /// Emits a terminal closed status the first time; later calls do nothing.
    pub fn disconnect(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        handle.abort();
        self.metrics.connected.set(0);
        let _ = self
            .tx
            .unbounded_send(Signal::Status(ConnectionStatus::default()));
        info!("push channel disconnected");
    }
}

impl<E, P> Drop for Supervisor<E, P>
where
    E: Spawner + Clock + Metrics,
    P: PushChannel,
{
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// No field is structurally pinned.
impl<E, P> Unpin for Supervisor<E, P>
where
    E: Spawner + Clock + Metrics,
    P: PushChannel,
{
}

impl<E, P> Stream for Supervisor<E, P>
where
    E: Spawner + Clock + Metrics,
    P: PushChannel,
{
    type Item = Signal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
