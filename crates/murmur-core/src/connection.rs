//! Push-channel lifecycle state machine.
//!
//! Owns one socket connection's lifecycle: connect, keepalive, abnormal-close
//! detection, backoff reconnect, and explicit disconnect. Uses the action
//! pattern: methods take time as input and return actions for the driver to
//! execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//!                 connect            open
//! ┌──────────────┐──────>┌────────────┐─────>┌───────────┐
//! │ Disconnected │       │ Connecting │      │ Connected │
//! └──────────────┘<──────└────────────┘<─┐   └───────────┘
//!        ^     disconnect /   │ rejected  │ deadline   │ abnormal close,
//!        │     clean close    v           │            │ error, idle
//!        │               ┌────────┐  ┌──────────────┐  │
//!        └───────────────│ Failed │<─│ Reconnecting │<─┘
//!          disconnect    └────────┘  └──────────────┘
//!                         attempts exhausted
//! ```
//!
//! `disconnect()` is the only path that suppresses reconnection.

use std::{fmt, time::Duration};

use murmur_proto::Frame;
use url::Url;

use crate::{env::Moment, error::ConnectionError};

/// Interval between client `PING` frames while connected.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Time without inbound traffic after which a connected channel is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Base delay of the reconnect schedule.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(3000);

/// Upper bound on any single reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Close codes meaning the server refused the credential.
///
/// 1008 is the standard policy-violation code; the 4xxx codes mirror HTTP
/// 401/403 in the application range.
pub const AUTH_REJECTION_CODES: [u16; 5] = [1008, 4001, 4003, 4401, 4403];

/// Query parameter carrying the credential on the channel URL.
const TOKEN_PARAM: &str = "token";

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a channel to this URL (credential included)
    Open {
        /// Full channel URL
        url: String,
    },

    /// Send this frame over the open channel
    Send(Frame),

    /// Close the current channel
    Close {
        /// Reason for closing
        reason: String,
    },

    /// The manager reached [`ConnectionState::Failed`]
    Failed(ConnectionError),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel, nothing scheduled
    Disconnected,
    /// Channel open requested, waiting for the open event
    Connecting,
    /// Channel open
    Connected,
    /// Channel lost, reconnect deadline armed
    Reconnecting,
    /// Terminal until the next explicit `connect`
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reconnect delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `base * attempt`
    #[default]
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1-based), capped at `max`.
    pub fn delay(self, base: Duration, attempt: u32, max: Duration) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self {
            Self::Linear => base.saturating_mul(attempt),
            Self::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(max)
    }
}

/// How a channel ended, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// Close handshake completed with a normal code
    pub clean: bool,
    /// Close code, if the peer sent one
    pub code: Option<u16>,
    /// Close reason text
    pub reason: String,
}

impl CloseEvent {
    /// Normal closure (code 1000).
    pub fn normal() -> Self {
        Self { clean: true, code: Some(1000), reason: String::new() }
    }

    /// Connection dropped without a close frame (code 1006).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self { clean: false, code: Some(1006), reason: reason.into() }
    }

    /// Whether the code signals a refused credential.
    pub fn is_auth_rejection(&self) -> bool {
        self.code.is_some_and(|code| AUTH_REJECTION_CODES.contains(&code))
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.reason.is_empty()) {
            (Some(code), true) => write!(f, "code {code}"),
            (Some(code), false) => write!(f, "code {code}: {}", self.reason),
            (None, true) => f.write_str("no close code"),
            (None, false) => f.write_str(&self.reason),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Interval between keepalive pings
    pub keepalive_interval: Duration,
    /// Inbound silence tolerated while connected
    pub idle_timeout: Duration,
    /// Base delay of the reconnect schedule
    pub reconnect_base_delay: Duration,
    /// Cap on a single reconnect delay
    pub reconnect_max_delay: Duration,
    /// Attempts before entering [`ConnectionState::Failed`]
    pub max_reconnect_attempts: u32,
    /// Delay growth
    pub backoff: Backoff,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            backoff: Backoff::Linear,
        }
    }
}

/// Push-channel state machine.
///
/// Generic over the instant type so the simulation harness can drive it with
/// virtual time.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I = std::time::Instant>
where
    I: Moment,
{
    state: ConnectionState,
    config: ConnectionConfig,
    endpoint: Url,
    token: Option<String>,
    reconnect_attempt: u32,
    last_error: Option<ConnectionError>,
    keepalive_deadline: Option<I>,
    reconnect_deadline: Option<I>,
    last_inbound: Option<I>,
}

impl<I> ConnectionManager<I>
where
    I: Moment,
{
    /// Create a manager in [`ConnectionState::Disconnected`].
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidEndpoint` if `endpoint` is not a `ws://` or
    ///   `wss://` URL
    pub fn new(endpoint: &str, config: ConnectionConfig) -> Result<Self, ConnectionError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ConnectionError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "{endpoint}: scheme must be ws or wss"
            )));
        }

        Ok(Self {
            state: ConnectionState::Disconnected,
            config,
            endpoint,
            token: None,
            reconnect_attempt: 0,
            last_error: None,
            keepalive_deadline: None,
            reconnect_deadline: None,
            last_inbound: None,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while a channel is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Most recent failure, cleared by a successful open.
    #[must_use]
    pub fn last_error(&self) -> Option<&ConnectionError> {
        self.last_error.as_ref()
    }

    /// Channel endpoint without credentials.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Earliest armed timer: keepalive, liveness, or reconnect.
    ///
    /// Drivers sleep until this instant and then call [`Self::tick`].
    #[must_use]
    pub fn next_deadline(&self) -> Option<I> {
        let idle_deadline = match self.state {
            ConnectionState::Connected => {
                self.last_inbound.map(|last| last + self.config.idle_timeout)
            },
            _ => None,
        };

        [self.keepalive_deadline, self.reconnect_deadline, idle_deadline].into_iter().flatten().min()
    }

    /// Open a channel with `token`.
    ///
    /// No-op while connecting or connected. From `Reconnecting` or `Failed`
    /// the pending schedule is dropped and the attempt counter starts over.
    pub fn connect(&mut self, token: &str, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                tracing::debug!(state = %self.state, "connect ignored");
                return Vec::new();
            },
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => {},
        }

        tracing::info!(endpoint = %self.endpoint, "connecting");

        self.token = Some(token.to_string());
        self.reconnect_attempt = 0;
        self.last_error = None;
        self.reconnect_deadline = None;
        self.open(now)
    }

    /// Close the channel and stop reconnecting. Valid from any state.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let channel_live =
            matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected);

        if self.state != ConnectionState::Disconnected {
            tracing::info!(from = %self.state, "disconnecting");
        }

        self.state = ConnectionState::Disconnected;
        self.token = None;
        self.reconnect_attempt = 0;
        self.cancel_timers();

        if channel_live {
            vec![ConnectionAction::Close { reason: "client disconnect".to_string() }]
        } else {
            Vec::new()
        }
    }

    /// Transport reported the channel open.
    pub fn handle_open(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "stale open event ignored");
            return Vec::new();
        }

        if self.reconnect_attempt > 0 {
            tracing::info!(attempt = self.reconnect_attempt, "reconnected");
        } else {
            tracing::info!("connected");
        }

        self.state = ConnectionState::Connected;
        self.reconnect_attempt = 0;
        self.last_error = None;
        self.last_inbound = Some(now);
        self.keepalive_deadline = Some(now + self.config.keepalive_interval);
        Vec::new()
    }

    /// Validate an inbound text frame.
    ///
    /// Any inbound text counts as liveness. Malformed input is logged and
    /// dropped and never changes the connection state.
    pub fn handle_text(&mut self, text: &str, now: I) -> Option<Frame> {
        if self.state != ConnectionState::Connected {
            tracing::debug!(state = %self.state, "inbound text while not connected dropped");
            return None;
        }

        self.last_inbound = Some(now);

        match Frame::decode(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(error = %e, len = text.len(), "dropping malformed frame");
                None
            },
        }
    }

    /// Transport reported the channel closed.
    pub fn handle_close(&mut self, close: &CloseEvent, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {},
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => {
                tracing::debug!(state = %self.state, %close, "close for dead channel ignored");
                return Vec::new();
            },
        }

        if self.state == ConnectionState::Connecting && close.is_auth_rejection() {
            return self.fail(ConnectionError::Rejected { reason: close.to_string() });
        }

        if close.clean {
            tracing::info!(%close, "server closed channel");
            self.state = ConnectionState::Disconnected;
            self.cancel_timers();
            return Vec::new();
        }

        self.schedule_reconnect(ConnectionError::Abnormal { reason: close.to_string() }, now)
    }

    /// Transport reported an error on the live channel.
    ///
    /// Counted once: a close that follows the error finds no live channel.
    pub fn handle_error(&mut self, reason: &str, now: I) -> Vec<ConnectionAction> {
        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            tracing::debug!(state = %self.state, reason, "transport error for dead channel ignored");
            return Vec::new();
        }

        let mut actions = vec![ConnectionAction::Close { reason: format!("transport error: {reason}") }];
        actions.extend(
            self.schedule_reconnect(ConnectionError::Abnormal { reason: reason.to_string() }, now),
        );
        actions
    }

    /// Server refused the handshake (HTTP 401/403).
    pub fn handle_rejected(&mut self, reason: &str) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, reason, "rejection for dead channel ignored");
            return Vec::new();
        }

        self.fail(ConnectionError::Rejected { reason: reason.to_string() })
    }

    /// Send a frame on the open channel.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::NotConnected` unless [`ConnectionState::Connected`]
    pub fn send(&self, frame: Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }

        Ok(vec![ConnectionAction::Send(frame)])
    }

    /// Fire whichever timers are due.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Reconnecting => {
                match self.reconnect_deadline {
                    Some(deadline) if now >= deadline => {
                        tracing::info!(attempt = self.reconnect_attempt, "reconnect attempt");
                        self.reconnect_deadline = None;
                        self.open(now)
                    },
                    _ => Vec::new(),
                }
            },
            ConnectionState::Connected => self.tick_connected(now),
            ConnectionState::Disconnected | ConnectionState::Connecting | ConnectionState::Failed => {
                Vec::new()
            },
        }
    }

    fn tick_connected(&mut self, now: I) -> Vec<ConnectionAction> {
        let Some(last_inbound) = self.last_inbound else {
            return Vec::new();
        };

        let silent_for = now - last_inbound;
        if silent_for >= self.config.idle_timeout {
            tracing::warn!(?silent_for, "no inbound traffic, dropping channel");

            let mut actions = vec![ConnectionAction::Close { reason: "idle timeout".to_string() }];
            actions.extend(
                self.schedule_reconnect(ConnectionError::IdleTimeout { elapsed: silent_for }, now),
            );
            return actions;
        }

        match self.keepalive_deadline {
            Some(deadline) if now >= deadline => {
                self.keepalive_deadline = Some(now + self.config.keepalive_interval);
                vec![ConnectionAction::Send(Frame::Ping)]
            },
            _ => Vec::new(),
        }
    }

    fn open(&mut self, now: I) -> Vec<ConnectionAction> {
        let Some(token) = self.token.as_deref() else {
            // Reconnect deadline armed without a credential: nothing to open with.
            return self.fail(ConnectionError::NotConnected);
        };

        let url = self.channel_url(token);
        self.state = ConnectionState::Connecting;
        self.keepalive_deadline = None;
        self.last_inbound = Some(now);
        vec![ConnectionAction::Open { url }]
    }

    fn channel_url(&self, token: &str) -> String {
        let mut url = self.endpoint.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != TOKEN_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut().clear().extend_pairs(retained).append_pair(TOKEN_PARAM, token);
        url.to_string()
    }

    fn schedule_reconnect(&mut self, error: ConnectionError, now: I) -> Vec<ConnectionAction> {
        self.cancel_timers();

        if self.reconnect_attempt >= self.config.max_reconnect_attempts {
            tracing::error!(
                attempts = self.reconnect_attempt,
                last_error = %error,
                "reconnect attempts exhausted"
            );
            return self.fail(ConnectionError::AttemptsExhausted {
                attempts: self.reconnect_attempt,
            });
        }

        self.reconnect_attempt += 1;
        let delay = self.config.backoff.delay(
            self.config.reconnect_base_delay,
            self.reconnect_attempt,
            self.config.reconnect_max_delay,
        );

        tracing::warn!(
            error = %error,
            attempt = self.reconnect_attempt,
            max_attempts = self.config.max_reconnect_attempts,
            ?delay,
            "channel lost, reconnect scheduled"
        );

        self.state = ConnectionState::Reconnecting;
        self.last_error = Some(error);
        self.reconnect_deadline = Some(now + delay);
        Vec::new()
    }

    fn fail(&mut self, error: ConnectionError) -> Vec<ConnectionAction> {
        tracing::error!(error = %error, "connection failed");

        self.state = ConnectionState::Failed;
        self.cancel_timers();
        self.last_error = Some(error.clone());
        vec![ConnectionAction::Failed(error)]
    }

    fn cancel_timers(&mut self) {
        self.keepalive_deadline = None;
        self.reconnect_deadline = None;
        self.last_inbound = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const ENDPOINT: &str = "ws://chat.test/ws";

    fn manager() -> (ConnectionManager<Instant>, Instant) {
        let manager = ConnectionManager::new(ENDPOINT, ConnectionConfig::default()).unwrap();
        (manager, Instant::now())
    }

    fn connected() -> (ConnectionManager<Instant>, Instant) {
        let (mut conn, t0) = manager();
        conn.connect("secret", t0);
        conn.handle_open(t0);
        (conn, t0)
    }

    #[test]
    fn connect_emits_open_with_token() {
        let (mut conn, t0) = manager();

        let actions = conn.connect("a b&c", t0);

        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![ConnectionAction::Open {
            url: "ws://chat.test/ws?token=a+b%26c".to_string()
        }]);
    }

    #[test]
    fn token_replaces_existing_token_param() {
        let mut conn: ConnectionManager<Instant> =
            ConnectionManager::new("wss://chat.test/ws?v=2&token=old", ConnectionConfig::default())
                .unwrap();

        let actions = conn.connect("new", Instant::now());

        assert_eq!(actions, vec![ConnectionAction::Open {
            url: "wss://chat.test/ws?v=2&token=new".to_string()
        }]);
    }

    #[test]
    fn rejects_non_websocket_endpoints() {
        let result = ConnectionManager::<Instant>::new("http://chat.test", ConnectionConfig::default());
        assert!(matches!(result, Err(ConnectionError::InvalidEndpoint(_))));

        let result = ConnectionManager::<Instant>::new("not a url", ConnectionConfig::default());
        assert!(matches!(result, Err(ConnectionError::InvalidEndpoint(_))));
    }

    #[test]
    fn connect_is_noop_while_connecting_or_connected() {
        let (mut conn, t0) = manager();
        conn.connect("t", t0);
        assert!(conn.connect("t", t0).is_empty());

        conn.handle_open(t0);
        assert!(conn.connect("t", t0).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn keepalive_pings_on_schedule() {
        let (mut conn, t0) = connected();

        assert!(conn.tick(t0 + Duration::from_secs(29)).is_empty());

        let t1 = t0 + Duration::from_secs(30);
        conn.handle_text(r#"{"type":"PONG"}"#, t1);
        assert_eq!(conn.tick(t1), vec![ConnectionAction::Send(Frame::Ping)]);
        assert_eq!(conn.next_deadline(), Some(t1 + DEFAULT_KEEPALIVE_INTERVAL));
    }

    #[test]
    fn send_requires_connection() {
        let (conn, _) = manager();
        assert_eq!(conn.send(Frame::Ping), Err(ConnectionError::NotConnected));

        let (conn, _) = connected();
        assert_eq!(conn.send(Frame::Ping).unwrap(), vec![ConnectionAction::Send(Frame::Ping)]);
    }

    #[test]
    fn abnormal_close_schedules_reconnect() {
        let (mut conn, t0) = connected();

        let actions = conn.handle_close(&CloseEvent::abnormal("reset"), t0);

        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.reconnect_attempt(), 1);
        assert_eq!(conn.next_deadline(), Some(t0 + Duration::from_millis(3000)));
        assert!(conn.last_error().is_some_and(ConnectionError::is_transient));

        assert!(conn.tick(t0 + Duration::from_millis(2999)).is_empty());
        let actions = conn.tick(t0 + Duration::from_millis(3000));
        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { .. }]));
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn clean_server_close_does_not_reconnect() {
        let (mut conn, t0) = connected();

        conn.handle_close(&CloseEvent::normal(), t0);

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn error_then_close_counts_once() {
        let (mut conn, t0) = connected();

        let actions = conn.handle_error("broken pipe", t0);
        assert!(matches!(actions.as_slice(), [ConnectionAction::Close { .. }]));
        conn.handle_close(&CloseEvent::abnormal("broken pipe"), t0);

        assert_eq!(conn.reconnect_attempt(), 1);
    }

    #[test]
    fn disconnect_cancels_pending_reconnect() {
        let (mut conn, t0) = connected();
        conn.handle_close(&CloseEvent::abnormal("reset"), t0);

        let actions = conn.disconnect();

        assert!(actions.is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.next_deadline(), None);
        assert!(conn.tick(t0 + Duration::from_secs(600)).is_empty());
    }

    #[test]
    fn disconnect_closes_live_channel() {
        let (mut conn, _) = connected();
        assert!(matches!(conn.disconnect().as_slice(), [ConnectionAction::Close { .. }]));
    }

    #[test]
    fn auth_close_while_connecting_fails_without_retry() {
        let (mut conn, t0) = manager();
        conn.connect("bad", t0);

        let close = CloseEvent { clean: false, code: Some(4401), reason: "unauthorized".into() };
        let actions = conn.handle_close(&close, t0);

        assert!(matches!(actions.as_slice(), [ConnectionAction::Failed(ConnectionError::Rejected {
            ..
        })]));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.next_deadline(), None);
    }

    #[test]
    fn handshake_rejection_fails() {
        let (mut conn, t0) = manager();
        conn.connect("bad", t0);

        conn.handle_rejected("HTTP 401");

        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(matches!(conn.last_error(), Some(ConnectionError::Rejected { .. })));
    }

    #[test]
    fn connect_after_failure_starts_over() {
        let (mut conn, t0) = manager();
        conn.connect("bad", t0);
        conn.handle_rejected("HTTP 403");

        let actions = conn.connect("good", t0);

        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { .. }]));
        assert_eq!(conn.reconnect_attempt(), 0);
        assert_eq!(conn.last_error(), None);
    }

    #[test]
    fn idle_channel_is_dropped() {
        let (mut conn, t0) = connected();
        let t1 = t0 + DEFAULT_IDLE_TIMEOUT;

        let actions = conn.tick(t1);

        assert!(matches!(actions.as_slice(), [ConnectionAction::Close { .. }]));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert!(matches!(conn.last_error(), Some(ConnectionError::IdleTimeout { .. })));
    }

    #[test]
    fn inbound_traffic_defers_idle_timeout() {
        let (mut conn, t0) = connected();
        let t1 = t0 + Duration::from_secs(60);
        conn.handle_text(r#"{"type":"PONG"}"#, t1);

        conn.tick(t0 + DEFAULT_IDLE_TIMEOUT);

        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn malformed_text_is_dropped_without_state_change() {
        let (mut conn, t0) = connected();

        assert_eq!(conn.handle_text("{not json", t0), None);
        assert_eq!(conn.handle_text(r#"{"type":"TYPING"}"#, t0), None);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.handle_text(r#"{"type":"PING"}"#, t0), Some(Frame::Ping));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);

        assert_eq!(Backoff::Exponential.delay(base, 1, max), Duration::from_secs(1));
        assert_eq!(Backoff::Exponential.delay(base, 3, max), Duration::from_secs(4));
        assert_eq!(Backoff::Exponential.delay(base, 5, max), max);
        assert_eq!(Backoff::Exponential.delay(base, 40, max), max);
        assert_eq!(Backoff::Linear.delay(base, 4, max), Duration::from_secs(4));
    }
}
