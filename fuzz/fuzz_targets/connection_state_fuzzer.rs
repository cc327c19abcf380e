//! Fuzz target for the ConnectionManager state machine
//!
//! # Strategy
//!
//! - Arbitrary interleavings of connect, disconnect, transport events,
//!   inbound text and clock advances
//! - Close codes drawn from the policy range and arbitrary values
//!
//! # Invariants
//!
//! - Inbound text never changes the state
//! - `Failed` is left only through `connect`
//! - `disconnect` always lands in `Disconnected` with no armed timer
//! - The reconnect attempt counter never exceeds the configured maximum
//! - `Open` is only emitted on the way into `Connecting`

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_core::{
    CloseEvent, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
};

#[derive(Debug, Clone, Arbitrary)]
enum ConnOp {
    Connect,
    Disconnect,
    Open,
    Close { code: CloseCode, clean: bool },
    Error,
    Rejected,
    Text(String),
    Advance { millis: u16 },
    Tick,
}

#[derive(Debug, Clone, Arbitrary)]
enum CloseCode {
    Normal,
    Policy,
    Auth,
    Other(u16),
}

impl CloseCode {
    fn value(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Policy => 1008,
            Self::Auth => 4401,
            Self::Other(code) => *code,
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    max_attempts: u8,
    ops: Vec<ConnOp>,
}

fuzz_target!(|input: Input| {
    let config = ConnectionConfig {
        reconnect_base_delay: Duration::from_millis(100),
        reconnect_max_delay: Duration::from_secs(5),
        max_reconnect_attempts: u32::from(input.max_attempts % 8),
        ..ConnectionConfig::default()
    };
    let mut conn: ConnectionManager =
        ConnectionManager::new("wss://fuzz.test/ws", config.clone()).expect("valid endpoint");

    let mut now = Instant::now();

    for op in input.ops {
        let before = conn.state();
        let leaves_failed = matches!(op, ConnOp::Connect | ConnOp::Disconnect);

        let actions = match op {
            ConnOp::Connect => conn.connect("token", now),
            ConnOp::Disconnect => {
                let actions = conn.disconnect();
                assert_eq!(conn.state(), ConnectionState::Disconnected);
                assert_eq!(conn.next_deadline(), None);
                actions
            },
            ConnOp::Open => conn.handle_open(now),
            ConnOp::Close { code, clean } => {
                let close = CloseEvent { code: Some(code.value()), reason: String::new(), clean };
                conn.handle_close(&close, now)
            },
            ConnOp::Error => conn.handle_error("fuzz", now),
            ConnOp::Rejected => conn.handle_rejected("fuzz"),
            ConnOp::Text(text) => {
                let _ = conn.handle_text(&text, now);
                assert_eq!(conn.state(), before, "inbound text moved the state");
                Vec::new()
            },
            ConnOp::Advance { millis } => {
                now += Duration::from_millis(u64::from(millis));
                Vec::new()
            },
            ConnOp::Tick => conn.tick(now),
        };

        if before == ConnectionState::Failed && !leaves_failed {
            assert_eq!(conn.state(), ConnectionState::Failed, "left Failed without connect");
        }

        for action in &actions {
            if let ConnectionAction::Open { .. } = action {
                assert_eq!(conn.state(), ConnectionState::Connecting);
            }
        }

        assert!(conn.reconnect_attempt() <= config.max_reconnect_attempts);
    }
});
