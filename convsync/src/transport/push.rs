//! WebSocket push transport.
//!
//! Implements the [`Transport`] trait over a WebSocket connection carrying
//! JSON text frames `{"event": ..., "data": ...}`. A background supervisor
//! task owns the socket: it connects, rejoins subscribed conversations,
//! forwards frames in both directions, and reconnects with exponential
//! backoff when the connection drops. Every state change is reported as a
//! [`TransportEvent::Connection`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use convsync_proto::codec;
use convsync_proto::event::{ClientFrame, OutgoingMessage};
use convsync_proto::message::ConversationId;
use convsync_proto::typing::TypingSignal;

use super::{ConnectionState, Transport, TransportError, TransportEvent, TransportType, TypingPhase};
use crate::config::ReconnectConfig;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of the frame queues between the transport and its supervisor.
const CHANNEL_CAPACITY: usize = 256;

/// WebSocket push transport implementing the [`Transport`] trait.
///
/// Created via [`PushTransport::spawn`]. Dropping the transport stops the
/// supervisor and closes the socket.
pub struct PushTransport {
    url: String,
    /// Frames for the supervisor to write.
    outbound: mpsc::Sender<ClientFrame>,
    /// Events produced by the supervisor.
    incoming: Mutex<mpsc::Receiver<TransportEvent>>,
    /// Whether a socket is currently open.
    connected: Arc<AtomicBool>,
    /// Conversations to (re)join on every new socket.
    subscriptions: Arc<parking_lot::Mutex<HashSet<ConversationId>>>,
    supervisor: JoinHandle<()>,
}

impl PushTransport {
    /// Start the push channel for `url` (`ws://` or `wss://`).
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background and its outcome arrives as a connection event.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if `url` is not a WebSocket URL.
    pub fn spawn(url: &str, reconnect: ReconnectConfig) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "expected ws:// or wss://, got {url}"
            )));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let supervisor = tokio::spawn(supervise(Supervisor {
            url: parsed.to_string(),
            config: reconnect,
            outbound: outbound_rx,
            events: events_tx,
            connected: Arc::clone(&connected),
            subscriptions: Arc::clone(&subscriptions),
        }));

        Ok(Self {
            url: parsed.to_string(),
            outbound: outbound_tx,
            incoming: Mutex::new(events_rx),
            connected,
            subscriptions,
            supervisor,
        })
    }

    /// The push endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a socket is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl Drop for PushTransport {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl Transport for PushTransport {
    /// Record the subscription and join right away when connected.
    ///
    /// A subscription made while disconnected is joined as soon as the
    /// socket comes back.
    async fn subscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        self.subscriptions.lock().insert(conversation.clone());
        if !self.is_connected() {
            tracing::debug!(conversation_id = %conversation, "push channel down, join deferred");
            return Ok(());
        }
        self.emit(ClientFrame::JoinConversation {
            conversation_id: conversation.clone(),
        })
        .await
    }

    async fn unsubscribe(&self, conversation: &ConversationId) -> Result<(), TransportError> {
        self.subscriptions.lock().remove(conversation);
        if !self.is_connected() {
            return Ok(());
        }
        self.emit(ClientFrame::LeaveConversation {
            conversation_id: conversation.clone(),
        })
        .await
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.emit(ClientFrame::SendMessage(message.clone())).await
    }

    async fn signal_typing(
        &self,
        signal: &TypingSignal,
        phase: TypingPhase,
    ) -> Result<(), TransportError> {
        let frame = match phase {
            TypingPhase::Start => ClientFrame::TypingStart(signal.clone()),
            TypingPhase::Stop => ClientFrame::TypingStop(signal.clone()),
        };
        self.emit(frame).await
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Push
    }
}

/// Delay before reconnect attempt number `attempt` (0-based).
///
/// Grows as `initial * multiplier^attempt`, capped at `max_delay`, plus a
/// random jitter of up to `config.jitter`.
#[must_use]
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let factor = config.multiplier.max(1.0).powi(exponent);
    let max = config.max_delay.as_secs_f64();
    // NaN (0 * inf) and inf both collapse to the cap.
    let secs = (config.initial_delay.as_secs_f64() * factor).min(max);
    let base = Duration::from_secs_f64(secs.max(0.0));

    let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

/// Everything the background task owns.
struct Supervisor {
    url: String,
    config: ReconnectConfig,
    outbound: mpsc::Receiver<ClientFrame>,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<parking_lot::Mutex<HashSet<ConversationId>>>,
}

/// How a socket session ended.
enum SessionEnd {
    /// The socket failed or was closed by the server.
    Lost,
    /// The transport was dropped.
    ClientGone,
}

impl Supervisor {
    async fn report(&self, state: ConnectionState) -> bool {
        self.events
            .send(TransportEvent::Connection(state))
            .await
            .is_ok()
    }
}

/// Connect, serve, and reconnect until the transport is dropped.
async fn supervise(mut sup: Supervisor) {
    let mut attempt: u32 = 0;
    loop {
        match connect(&sup.url, sup.config.connect_timeout).await {
            Ok(ws) => {
                attempt = 0;
                sup.connected.store(true, Ordering::Relaxed);
                tracing::info!(url = %sup.url, "push channel connected");
                if !sup.report(ConnectionState::Connected).await {
                    return;
                }

                let end = run_session(ws, &mut sup).await;
                sup.connected.store(false, Ordering::Relaxed);
                if matches!(end, SessionEnd::ClientGone) {
                    return;
                }
                if !sup.report(ConnectionState::Disconnected).await {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(url = %sup.url, err = %e, attempt, "push channel connect failed");
            }
        }

        let delay = backoff_delay(&sup.config, attempt);
        attempt = attempt.saturating_add(1);
        if !sup.report(ConnectionState::Reconnecting).await {
            return;
        }
        tracing::debug!(delay_ms = delay.as_millis(), attempt, "reconnecting push channel");
        tokio::time::sleep(delay).await;
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_connect_error)?;
    Ok(ws)
}

/// Pump frames until the socket drops or the transport goes away.
///
/// Malformed inbound frames are logged and skipped; they never end the
/// session.
async fn run_session(ws: WsStream, sup: &mut Supervisor) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    let joins: Vec<ConversationId> = sup.subscriptions.lock().iter().cloned().collect();
    for conversation_id in joins {
        tracing::debug!(%conversation_id, "rejoining conversation");
        if let Err(e) = write_frame(&mut sink, &ClientFrame::JoinConversation { conversation_id }).await {
            tracing::warn!(err = %e, "push rejoin failed");
            return SessionEnd::Lost;
        }
    }

    loop {
        tokio::select! {
            frame = sup.outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return SessionEnd::ClientGone;
                };
                if let Err(e) = write_frame(&mut sink, &frame).await {
                    tracing::warn!(err = %e, "push send failed");
                    return SessionEnd::Lost;
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(WsMessage::Binary(data))) => {
                        if let Ok(text) = std::str::from_utf8(&data) {
                            text.to_owned()
                        } else {
                            tracing::warn!(len = data.len(), "non-UTF-8 push frame, skipping");
                            continue;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!("push channel closed by server");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "push channel read error");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                };

                match codec::decode_event(&text) {
                    Ok(event) => {
                        tracing::trace!(event = event.name(), "push event");
                        if sup.events.send(TransportEvent::Server(event)).await.is_err() {
                            return SessionEnd::ClientGone;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "malformed push frame, skipping");
                    }
                }
            }
        }
    }
}

async fn write_frame<S>(sink: &mut S, frame: &ClientFrame) -> Result<(), TransportError>
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = codec::encode_frame(frame)?;
    sink.send(WsMessage::text(text))
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Io(io_err),
        WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "push endpoint HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "push connection error: {other}"
        ))),
    }
}
