//! Telemetry stream client.
//!
//! Keeps one WebSocket connection to the telemetry service open for the
//! life of the daemon:
//!
//! 1. Connect, send the `auth` handshake
//! 2. Read frames, hand them to the [`FrameHandler`]
//! 3. On any failure wait (exponential backoff) and go back to 1
//!
//! The client returns only when the cancellation token fires; it then
//! sends a close frame and stops reading. Bad frames are logged and
//! skipped without dropping the connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tripwire_domain::{Credentials, PositionEvent, Snapshot};

use crate::frames::{parse_frame, InboundFrame};

/// Type alias for the WebSocket stream (with auto TLS).
type WsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// First reconnect delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Errors that end one connection attempt. None of them is fatal.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Failed to connect to WebSocket.
    #[error("Failed to connect to WebSocket: {0}")]
    ConnectionFailed(String),

    /// Failed to send message.
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Failed to receive message.
    #[error("Failed to receive message: {0}")]
    ReceiveError(String),

    /// Server closed the connection.
    #[error("Connection closed by server")]
    ChannelClosed,
}

// =============================================================================
// Backoff
// =============================================================================

/// Doubling delay with a ceiling. Never resets during a run, so a flapping
/// upstream is not hammered.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// Delay to wait now; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

// =============================================================================
// Frame handler
// =============================================================================

/// Receives parsed frames. Called from the single read loop, so calls are
/// never concurrent with each other.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_snapshot(&self, snapshot: Snapshot);

    async fn on_position_events(&self, positions: Vec<PositionEvent>);

    async fn on_hello(&self, hello: Value) {
        info!(%hello, "Stream hello");
    }
}

// =============================================================================
// Stream client
// =============================================================================

enum SessionEnd {
    Cancelled,
    Closed,
}

/// Reconnecting telemetry stream client.
pub struct StreamClient {
    url: String,
    credentials: Credentials,
    handler: Arc<dyn FrameHandler>,
    backoff: Backoff,
}

impl StreamClient {
    pub fn new(url: impl Into<String>, credentials: Credentials, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            url: url.into(),
            credentials,
            handler,
            backoff: Backoff::default(),
        }
    }

    /// Replace the reconnect policy (tests use short delays).
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            info!(url = %self.url, "Connecting to telemetry stream");
            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _)) => match self.session(ws_stream, &cancel).await {
                    Ok(SessionEnd::Cancelled) => {
                        info!("Telemetry stream stopped");
                        return;
                    }
                    Ok(SessionEnd::Closed) => warn!("Telemetry stream closed by server"),
                    Err(e) => warn!(error = %e, "Telemetry stream failed"),
                },
                Err(e) => {
                    let e = StreamError::ConnectionFailed(e.to_string());
                    warn!(error = %e, "Telemetry stream connect failed");
                }
            }

            let delay = self.backoff.next_delay();
            info!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection: handshake, then read until close, error or cancel.
    async fn session(
        &self,
        mut ws_stream: WsStream,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, StreamError> {
        let auth = json!({ "type": "auth", "token": self.credentials.token() });
        ws_stream
            .send(WebSocketMessage::Text(auth.to_string()))
            .await
            .map_err(|e| StreamError::SendFailed(e.to_string()))?;
        info!(user = %self.credentials.user, "Telemetry stream connected");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = ws_stream.close(None).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    return Ok(SessionEnd::Cancelled);
                }
                next = ws_stream.next() => next,
            };

            match next {
                Some(Ok(WebSocketMessage::Text(text))) => self.dispatch(&text).await,
                Some(Ok(WebSocketMessage::Ping(_))) => debug!("Received ping"),
                Some(Ok(WebSocketMessage::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket error");
                    return Err(StreamError::ReceiveError(e.to_string()));
                }
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Ok(InboundFrame::Hello(hello)) => self.handler.on_hello(hello).await,
            Ok(InboundFrame::Snapshot(snapshot)) => {
                debug!(kpis = snapshot.len(), source = %snapshot.source, "Snapshot received");
                self.handler.on_snapshot(snapshot).await;
            }
            Ok(InboundFrame::PositionEvents(positions)) => {
                debug!(count = positions.len(), "Position events received");
                self.handler.on_position_events(positions).await;
            }
            Err(e) => warn!(error = %e, "Frame skipped"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_ceiling_without_reset() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..10).map(|_| backoff.next_delay().as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120, 120]);
    }
}
