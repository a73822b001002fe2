// crates/core/src/live/channel.rs
//! Live channel connector.
//!
//! One supervisor task per `connect()` owns the WebSocket: it authenticates
//! the handshake with the current access credential, answers keepalive
//! pings, dispatches every other message to the registry, and reconnects
//! with exponential backoff until the session ends or the channel is torn
//! down.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fedwatch_types::{AuthState, ConnectionStatus, LiveMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::registry::{Handler, Registry, Subscription, Topic};
use crate::auth::{Session, TokenManager};
use crate::config::ClientConfig;
use crate::error::ChannelError;

/// Close code the backend uses for a rejected stream credential.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// How long a deliberate close waits for the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// State shared with the supervisor task.
struct ChannelCore {
    config: ClientConfig,
    tokens: TokenManager,
    registry: Arc<Registry>,
    status: watch::Sender<ConnectionStatus>,
}

impl ChannelCore {
    /// Publish `status` unless this generation has been torn down.
    /// The check and the write happen under the watch lock, so a teardown's
    /// `Closed` is never overwritten by a late supervisor update.
    fn publish(&self, gate: &CancellationToken, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if gate.is_cancelled() || *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

/// A running supervisor. Dropping it cancels the supervisor.
struct Run {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

#[derive(Default)]
struct RunSlot {
    generation: u64,
    current: Option<Run>,
}

/// Handle to the live stream. Cheap to clone; all clones drive the same
/// connection and registry.
#[derive(Clone)]
pub struct LiveChannel {
    core: Arc<ChannelCore>,
    run: Arc<Mutex<RunSlot>>,
}

impl LiveChannel {
    pub fn new(config: &ClientConfig, tokens: TokenManager) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            core: Arc::new(ChannelCore {
                config: config.clone(),
                tokens,
                registry: Arc::new(Registry::default()),
                status,
            }),
            run: Arc::new(Mutex::new(RunSlot::default())),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the supervisor. No-op while one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut slot = self.lock_run();
        if let Some(run) = &slot.current {
            if !run.task.is_finished() {
                debug!(generation = run.generation, "live channel already running");
                return;
            }
        }
        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(self.core.clone(), cancel.clone(), generation));
        slot.current = Some(Run {
            generation,
            cancel: cancel.clone(),
            task,
            _guard: cancel.drop_guard(),
        });
    }

    /// Stop the connection and any pending reconnect. Handlers stay
    /// registered for a later [`connect`](Self::connect).
    ///
    /// Once this returns no further message is dispatched, including
    /// messages already buffered on the socket. A handler already running on
    /// the supervisor task when this is called from elsewhere is not waited
    /// for.
    pub fn disconnect(&self) {
        let run = self.lock_run().current.take();
        if let Some(run) = run {
            run.cancel.cancel();
            info!(generation = run.generation, "live channel disconnected");
        }
        self.core.status.send_if_modified(|current| {
            if matches!(
                current,
                ConnectionStatus::Idle | ConnectionStatus::Closed | ConnectionStatus::Unauthorized
            ) {
                return false;
            }
            *current = ConnectionStatus::Closed;
            true
        });
    }

    /// Disconnect and drop every handler. Safe to call repeatedly, and from
    /// inside a handler.
    pub fn shutdown(&self) {
        self.disconnect();
        self.core.registry.clear();
    }

    /// Register `handler` for `topic` (a tag, or `"*"` / [`Topic::Wildcard`]).
    /// Works whether or not the channel is connected.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&LiveMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.core.registry.insert(topic.into(), handler)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.core.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.core.status.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    pub fn handler_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.core.tokens
    }
}

// =============================================================================
// Supervisor
// =============================================================================

async fn supervise(core: Arc<ChannelCore>, cancel: CancellationToken, generation: u64) {
    let mut backoff = Backoff::new(core.config.reconnect);
    let mut session = core.tokens.subscribe();
    info!(generation, url = %core.config.ws_url, "live channel starting");

    loop {
        core.publish(&cancel, ConnectionStatus::Connecting);

        let err = match connect_once(&core, &cancel, &mut session, &mut backoff).await {
            Ok(()) => {
                debug!(generation, "live channel stopped");
                return;
            }
            Err(e) => e,
        };

        match err {
            ChannelError::Unauthorized => {
                warn!(generation, "stream credential rejected, logging out");
                core.publish(&cancel, ConnectionStatus::Unauthorized);
                core.tokens.force_logout("stream credential rejected");
                return;
            }
            ChannelError::NoCredential => {
                info!(generation, "session ended, live channel closed");
                core.publish(&cancel, ConnectionStatus::Closed);
                return;
            }
            transient => {
                let (attempt, delay) = backoff.fail();
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(generation, attempt, delay_ms, error = %transient, "live stream dropped, reconnecting");
                core.publish(&cancel, ConnectionStatus::Reconnecting { attempt, delay_ms });

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = session_ended(&mut session) => {
                        info!(generation, "session ended while waiting to reconnect");
                        core.publish(&cancel, ConnectionStatus::Closed);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// One connection from handshake to close.
///
/// `Ok(())` means the channel was torn down deliberately; every other ending
/// is an error the supervisor classifies.
async fn connect_once(
    core: &ChannelCore,
    cancel: &CancellationToken,
    session: &mut watch::Receiver<Session>,
    backoff: &mut Backoff,
) -> Result<(), ChannelError> {
    let token = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        token = core.tokens.stream_credential() => token.ok_or(ChannelError::NoCredential)?,
    };

    let url = stream_url(&core.config.ws_url, &token);
    let (ws, _) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        result = connect_async(url.as_str()) => result.map_err(handshake_error)?,
    };

    backoff.reset();
    core.publish(cancel, ConnectionStatus::Live);
    info!("live stream connected");

    let (mut sink, mut stream) = ws.split();
    let idle = core.config.idle_timeout;

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                return Ok(());
            }
            _ = session_ended(session) => {
                let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                return Err(ChannelError::NoCredential);
            }
            frame = next_frame(&mut stream, idle) => frame?,
        };

        match frame {
            Message::Text(text) => on_text(core, cancel, &mut sink, text.as_str()).await?,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => on_text(core, cancel, &mut sink, text).await?,
                Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
            },
            Message::Close(frame) => return Err(close_error(frame)),
            // Protocol pings are answered by tungstenite itself.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

/// Handle one text frame: answer keepalive, drop garbage, dispatch the rest.
async fn on_text<S>(
    core: &ChannelCore,
    cancel: &CancellationToken,
    sink: &mut S,
    text: &str,
) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let msg = match LiveMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "dropping malformed live message");
            return Ok(());
        }
    };

    if msg.is_ping() {
        sink.send(Message::Text(LiveMessage::pong_frame().into()))
            .await
            .map_err(|e| ChannelError::Dropped(format!("pong send failed: {e}")))?;
        return Ok(());
    }

    if cancel.is_cancelled() {
        return Ok(());
    }
    core.registry.dispatch(&msg, cancel);
    Ok(())
}

async fn next_frame<S>(stream: &mut S, idle: Option<Duration>) -> Result<Message, ChannelError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let next = match idle {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| ChannelError::IdleTimeout(limit))?,
        None => stream.next().await,
    };
    match next {
        Some(Ok(message)) => Ok(message),
        Some(Err(e)) => Err(ChannelError::Dropped(e.to_string())),
        None => Err(ChannelError::Dropped("stream ended".into())),
    }
}

/// Resolves once the session is logged out.
async fn session_ended(session: &mut watch::Receiver<Session>) {
    let _ = session.wait_for(|s| s.state() == AuthState::LoggedOut).await;
}

/// `<ws_url>?token=<access>`; the credential travels only in the handshake.
fn stream_url(ws_url: &str, token: &str) -> String {
    let sep = if ws_url.contains('?') { '&' } else { '?' };
    format!("{ws_url}{sep}token={}", urlencoding::encode(token))
}

fn handshake_error(e: WsError) -> ChannelError {
    match e {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            ChannelError::Unauthorized
        }
        other => ChannelError::Handshake(other.to_string()),
    }
}

fn close_error(frame: Option<CloseFrame>) -> ChannelError {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            if code == CLOSE_UNAUTHORIZED {
                ChannelError::Unauthorized
            } else {
                ChannelError::Closed {
                    code,
                    reason: frame.reason.as_str().to_owned(),
                }
            }
        }
        None => ChannelError::Closed {
            code: 1005,
            reason: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_stream_url_encodes_token() {
        assert_eq!(
            stream_url("ws://h/api/v1/ws", "a.b+c/d"),
            "ws://h/api/v1/ws?token=a.b%2Bc%2Fd"
        );
        assert_eq!(stream_url("ws://h/ws?v=2", "t"), "ws://h/ws?v=2&token=t");
    }

    #[test]
    fn test_close_4001_is_terminal() {
        let err = close_error(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "Invalid token".into(),
        }));
        assert!(matches!(err, ChannelError::Unauthorized));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_other_close_is_transient() {
        let err = close_error(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "restart".into(),
        }));
        assert!(matches!(err, ChannelError::Closed { code: 1011, .. }));
        assert!(!err.is_terminal());
        assert!(!close_error(None).is_terminal());
    }
}
