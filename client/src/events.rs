use crate::{
    hub::{self, Frame},
    Error, Result,
};
use crashline_types::Inbound;
use futures_util::{SinkExt, Stream as FutStream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, trace, warn};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Stream of typed events from the hub connection.
///
/// The websocket is read on a background task which is aborted when the
/// stream is dropped. A server close (or a hub close record) yields
/// [Error::ConnectionClosed] and then ends the stream.
pub struct Stream {
    receiver: mpsc::Receiver<Result<Inbound>>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Drop for Stream {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Forward every record of a text message. Returns `false` once the reader
/// should stop.
async fn forward_records<S>(
    ws: &mut WebSocketStream<S>,
    tx: &mpsc::Sender<Result<Inbound>>,
    text: &str,
) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    for record in hub::records(text) {
        trace!(len = record.len(), "received hub record");
        match hub::decode(record) {
            Ok(Frame::Event(event)) => {
                if tx.send(Ok(event)).await.is_err() {
                    return false; // Receiver dropped
                }
            }
            Ok(Frame::Handshake { error: None }) => debug!("hub handshake accepted"),
            Ok(Frame::Handshake { error: Some(reason) }) => {
                warn!(%reason, "hub handshake refused");
                let _ = tx.send(Err(Error::Handshake(reason))).await;
                return false;
            }
            Ok(Frame::Ping) => {
                if let Err(e) = ws.send(Message::Text(hub::PING.to_string())).await {
                    error!("failed to answer hub ping: {}", e);
                    let _ = tx.send(Err(e.into())).await;
                    return false;
                }
            }
            Ok(Frame::Close { error }) => {
                debug!(?error, "hub closed connection");
                let _ = tx.send(Err(Error::ConnectionClosed)).await;
                return false;
            }
            Ok(Frame::Ignored) => {}
            Err(err) => {
                warn!(error = %err, "failed to decode hub record");
                if tx.send(Err(err)).await.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

impl Stream {
    fn spawn_reader<S>(
        ws: WebSocketStream<S>,
        tx: mpsc::Sender<Result<Inbound>>,
    ) -> tokio::task::JoinHandle<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ws = ws;
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if !forward_records(&mut ws, &tx, &text).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        let Ok(text) = std::str::from_utf8(&data) else {
                            warn!(len = data.len(), "ignoring non-utf8 hub message");
                            continue;
                        };
                        if !forward_records(&mut ws, &tx, text).await {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket closed");
                        let _ = tx.send(Err(Error::ConnectionClosed)).await;
                        break;
                    }
                    Ok(_) => {} // Ignore other message types
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        let _ = tx.send(Err(e.into())).await;
                        break;
                    }
                }
            }
        })
    }

    pub(crate) fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        let handle = Self::spawn_reader(ws, tx);
        Self {
            receiver: rx,
            _handle: handle,
        }
    }

    /// Receive the next event from the stream
    pub async fn next(&mut self) -> Option<Result<Inbound>> {
        self.receiver.recv().await
    }
}

impl FutStream for Stream {
    type Item = Result<Inbound>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
