//! Property-based tests for ConnectionManager.
//!
//! Covers the reconnect schedule, the terminal Failed state, and the rule
//! that inbound garbage never moves the state machine.

use std::time::{Duration, Instant};

use murmur_core::{
    Backoff, CloseEvent, ConnectionAction, ConnectionConfig, ConnectionError, ConnectionManager,
    ConnectionState,
};
use proptest::prelude::*;

const ENDPOINT: &str = "wss://chat.test/ws";

fn config(base_ms: u64, max_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        reconnect_base_delay: Duration::from_millis(base_ms),
        reconnect_max_delay: Duration::from_secs(3600),
        max_reconnect_attempts: max_attempts,
        backoff: Backoff::Linear,
        ..ConnectionConfig::default()
    }
}

/// Attempt `k` fires `base * k` after the failure that scheduled it, and the
/// manager fails for good after the last attempt also fails.
#[test]
fn linear_schedule_then_failed() {
    let t0 = Instant::now();
    let mut conn: ConnectionManager = ConnectionManager::new(ENDPOINT, config(3000, 5)).unwrap();
    conn.connect("token", t0);
    conn.handle_open(t0);

    let mut now = t0;
    conn.handle_close(&CloseEvent::abnormal("reset"), now);

    for attempt in 1..=5u32 {
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(conn.reconnect_attempt(), attempt);

        let delay = Duration::from_millis(3000 * u64::from(attempt));
        assert_eq!(conn.next_deadline(), Some(now + delay));
        assert!(conn.tick(now + delay - Duration::from_millis(1)).is_empty());

        now += delay;
        let actions = conn.tick(now);
        assert!(matches!(actions.as_slice(), [ConnectionAction::Open { .. }]));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.handle_close(&CloseEvent::abnormal("refused"), now);
        if attempt == 5 {
            assert_eq!(actions, vec![ConnectionAction::Failed(ConnectionError::AttemptsExhausted {
                attempts: 5
            })]);
        }
    }

    assert_eq!(conn.state(), ConnectionState::Failed);
    assert_eq!(conn.next_deadline(), None);
    assert!(conn.tick(now + Duration::from_secs(3600)).is_empty());
}

#[test]
fn successful_reconnect_resets_attempts() {
    let t0 = Instant::now();
    let mut conn: ConnectionManager = ConnectionManager::new(ENDPOINT, config(1000, 5)).unwrap();
    conn.connect("token", t0);
    conn.handle_open(t0);

    conn.handle_close(&CloseEvent::abnormal("reset"), t0);
    let t1 = t0 + Duration::from_secs(1);
    conn.tick(t1);
    conn.handle_close(&CloseEvent::abnormal("refused"), t1);
    assert_eq!(conn.reconnect_attempt(), 2);

    let t2 = t1 + Duration::from_secs(2);
    conn.tick(t2);
    conn.handle_open(t2);

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.reconnect_attempt(), 0);
    assert_eq!(conn.last_error(), None);
}

proptest! {
    #[test]
    fn prop_garbage_never_changes_state(
        frames in prop::collection::vec("\\PC{0,64}", 0..32),
    ) {
        let t0 = Instant::now();
        let mut conn: ConnectionManager = ConnectionManager::new(ENDPOINT, ConnectionConfig::default()).unwrap();
        conn.connect("token", t0);
        conn.handle_open(t0);

        for text in &frames {
            let _ = conn.handle_text(text, t0);
            prop_assert_eq!(conn.state(), ConnectionState::Connected);
            prop_assert_eq!(conn.reconnect_attempt(), 0);
        }
    }

    #[test]
    fn prop_attempts_never_exceed_max(
        base_ms in 1u64..5000,
        max_attempts in 0u32..8,
        failures in 0usize..20,
    ) {
        let mut now = Instant::now();
        let mut conn: ConnectionManager = ConnectionManager::new(ENDPOINT, config(base_ms, max_attempts)).unwrap();
        conn.connect("token", now);
        conn.handle_open(now);
        conn.handle_close(&CloseEvent::abnormal("reset"), now);

        for _ in 0..failures {
            let Some(deadline) = conn.next_deadline() else { break };
            now = deadline;
            conn.tick(now);
            conn.handle_error("refused", now);
        }

        prop_assert!(conn.reconnect_attempt() <= max_attempts);
        if conn.state() == ConnectionState::Failed {
            prop_assert_eq!(conn.next_deadline(), None);
        }
    }

    #[test]
    fn prop_disconnect_always_lands_disconnected(steps in prop::collection::vec(0u8..5, 0..20)) {
        let mut now = Instant::now();
        let mut conn: ConnectionManager = ConnectionManager::new(ENDPOINT, ConnectionConfig::default()).unwrap();

        for step in steps {
            now += Duration::from_secs(5);
            match step {
                0 => { conn.connect("token", now); },
                1 => { conn.handle_open(now); },
                2 => { conn.handle_close(&CloseEvent::abnormal("x"), now); },
                3 => { conn.handle_error("x", now); },
                _ => { conn.tick(now + Duration::from_secs(60)); },
            }
        }

        conn.disconnect();
        prop_assert_eq!(conn.state(), ConnectionState::Disconnected);
        prop_assert_eq!(conn.next_deadline(), None);
    }
}
