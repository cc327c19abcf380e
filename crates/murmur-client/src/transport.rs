//! WebSocket transport for the push channel.
//!
//! Provides [`Channel`], a thin layer that moves text frames between a
//! WebSocket and tokio channels. Parsing and lifecycle decisions stay in the
//! Sans-IO [`SyncClient`](crate::SyncClient).

use futures_util::{SinkExt, StreamExt};
use murmur_core::CloseEvent;
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, Message as WsMessage,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

use crate::event::ClientEvent;

/// Frames buffered in each direction before senders wait.
const CHANNEL_CAPACITY: usize = 64;

/// Normal closure code.
const CLOSE_NORMAL: u16 = 1000;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server refused the handshake with HTTP 401 or 403.
    #[error("handshake rejected with status {status}")]
    Rejected {
        /// HTTP status
        status: u16,
    },

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Channel tasks have stopped.
    #[error("channel closed")]
    Closed,
}

/// Something that happened on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Text frame from the server.
    Text(String),
    /// Channel ended.
    Closed(CloseEvent),
    /// Read failed; the channel is unusable.
    Error(String),
}

impl<I> From<ChannelEvent> for ClientEvent<I> {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Text(text) => Self::TextReceived(text),
            ChannelEvent::Closed(close) => Self::ChannelClosed(close),
            ChannelEvent::Error(reason) => Self::ChannelError { reason },
        }
    }
}

enum Outbound {
    Text(String),
    Close(String),
}

/// Handle to an open WebSocket.
///
/// A writer task and a reader task do the I/O. Dropping the handle stops
/// both.
pub struct Channel {
    outbound: mpsc::Sender<Outbound>,
    inbound: mpsc::Receiver<ChannelEvent>,
    writer: AbortHandle,
    reader: AbortHandle,
}

impl Channel {
    /// Queue a text frame.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(Outbound::Text(text)).await.map_err(|_| TransportError::Closed)
    }

    /// Start the close handshake. Later sends fail.
    pub async fn close(&self, reason: String) {
        if self.outbound.send(Outbound::Close(reason)).await.is_err() {
            tracing::debug!("close on stopped channel");
        }
    }

    /// Next event from the server. `None` once the reader has stopped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Open a WebSocket to `url`.
///
/// HTTP 401/403 during the handshake maps to [`TransportError::Rejected`].
pub async fn open(url: &str) -> Result<Channel, TransportError> {
    let (stream, _response) = connect_async(url).await.map_err(handshake_error)?;
    let (mut sink, mut source) = stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ChannelEvent>(CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let (message, closing) = match outbound {
                Outbound::Text(text) => (WsMessage::Text(text.into()), false),
                Outbound::Close(reason) => {
                    let frame = CloseFrame { code: CloseCode::Normal, reason: reason.into() };
                    (WsMessage::Close(Some(frame)), true)
                },
            };

            if let Err(e) = sink.send(message).await {
                tracing::debug!(error = %e, "channel write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let event = loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    if inbound_tx.send(ChannelEvent::Text(text.to_string())).await.is_err() {
                        return;
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => break ChannelEvent::Closed(close_event(frame)),
                // Control frames are answered by tungstenite; binary is not part of the protocol
                Some(Ok(_)) => {},
                Some(Err(e)) => break ChannelEvent::Error(e.to_string()),
                None => break ChannelEvent::Closed(CloseEvent::abnormal("stream ended")),
            }
        };

        if inbound_tx.send(event).await.is_err() {
            tracing::debug!("channel event dropped, receiver gone");
        }
    });

    tracing::info!(host = %redacted(url), "channel open");

    Ok(Channel {
        outbound: outbound_tx,
        inbound: inbound_rx,
        writer: writer.abort_handle(),
        reader: reader.abort_handle(),
    })
}

fn handshake_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            TransportError::Rejected { status: response.status().as_u16() }
        },
        other => TransportError::Connection(other.to_string()),
    }
}

fn close_event(frame: Option<CloseFrame>) -> CloseEvent {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            CloseEvent { clean: code == CLOSE_NORMAL, code: Some(code), reason: frame.reason.to_string() }
        },
        None => CloseEvent { clean: true, code: None, reason: String::new() },
    }
}

/// URL without its query string, which carries the credential.
fn redacted(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_codes() {
        let normal = close_event(Some(CloseFrame { code: CloseCode::Normal, reason: "bye".into() }));
        assert!(normal.clean);
        assert_eq!(normal.code, Some(1000));
        assert_eq!(normal.reason, "bye");

        let away = close_event(Some(CloseFrame { code: CloseCode::Away, reason: "".into() }));
        assert!(!away.clean);
        assert_eq!(away.code, Some(1001));

        let policy = close_event(Some(CloseFrame { code: CloseCode::Policy, reason: "".into() }));
        assert!(policy.is_auth_rejection());
    }

    #[test]
    fn bare_close_is_clean() {
        assert!(close_event(None).clean);
    }

    #[test]
    fn credential_is_not_logged() {
        assert_eq!(redacted("wss://chat.test/ws?token=secret"), "wss://chat.test/ws");
        assert_eq!(redacted("ws://localhost/ws"), "ws://localhost/ws");
    }

    #[test]
    fn channel_events_map_to_client_events() {
        let event: ClientEvent = ChannelEvent::Text("{}".to_string()).into();
        assert!(matches!(event, ClientEvent::TextReceived(t) if t == "{}"));

        let event: ClientEvent = ChannelEvent::Error("reset".to_string()).into();
        assert!(matches!(event, ClientEvent::ChannelError { reason } if reason == "reset"));
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        let result = open("ws://127.0.0.1:9/ws").await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
