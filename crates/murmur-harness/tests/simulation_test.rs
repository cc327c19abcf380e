//! End-to-end simulation tests.
//!
//! Each test runs the real runtime and client against the simulated backend.
//! Invariants are checked after every published change; convergence checks
//! compare every open view with the server once the run has settled.
//!
//! # Oracle Pattern
//!
//! Tests end with oracle checks that verify:
//! - Every confirmed server message appears exactly once, in server order
//! - No optimistic entry is left pending

use murmur_core::{ConnectionState, Environment};
use murmur_harness::{
    Invariant, InvariantRegistry, InvariantResult, Operation, SimDriver, SimEnv, Simulation,
    SystemSnapshot, Violation,
    scenario::{LOCAL_USER, conversation},
};
use murmur_proto::DeliveryStatus;
use proptest::prelude::*;

const ROOM: u8 = 0;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

#[tokio::test]
async fn paged_history_and_pushes_converge() {
    for seed in 0..20 {
        let mut sim = Simulation::new(seed, 5).unwrap();
        for _ in 0..12 {
            sim.apply(&Operation::RemotePost { conversation: ROOM }).await.unwrap();
        }

        sim.apply(&Operation::Connect).await.unwrap();
        sim.apply(&Operation::SetActive { conversation: ROOM }).await.unwrap();
        // Channel up first: a post nobody pushed could slip between pages.
        sim.settle().await.unwrap();
        for _ in 0..6 {
            sim.apply(&Operation::RemotePost { conversation: ROOM }).await.unwrap();
            sim.apply(&Operation::LoadMore { conversation: ROOM }).await.unwrap();
        }

        sim.converge().await.unwrap();
        sim.check_converged().unwrap();

        let timeline = sim.client().timeline(conversation(ROOM)).unwrap();
        assert_eq!(timeline.len(), 18, "seed {seed}");
        assert!(!sim.client().has_more(conversation(ROOM)));
    }
}

#[tokio::test]
async fn own_sends_reconcile_under_reordering() {
    for seed in 0..20 {
        let mut sim = Simulation::new(seed, 30).unwrap();
        sim.apply(&Operation::Connect).await.unwrap();
        sim.apply(&Operation::SetActive { conversation: ROOM }).await.unwrap();
        sim.settle().await.unwrap();

        for n in 0..5 {
            let text = format!("hello {n}");
            sim.apply(&Operation::SendText { conversation: ROOM, text }).await.unwrap();
            sim.apply(&Operation::RemotePost { conversation: ROOM }).await.unwrap();
        }
        sim.settle().await.unwrap();

        let timeline = sim.client().timeline(conversation(ROOM)).unwrap();
        assert_eq!(timeline.len(), 10, "seed {seed}");
        assert_eq!(timeline.pending_count(), 0, "seed {seed}");
        assert!(timeline.messages().iter().all(|m| !m.id.is_local()), "seed {seed}");
        sim.check_converged().unwrap();
    }
}

#[tokio::test]
async fn dropped_channel_recovers_missed_messages() {
    let mut sim = Simulation::new(7, 30).unwrap();
    sim.apply(&Operation::Connect).await.unwrap();
    sim.apply(&Operation::SetActive { conversation: ROOM }).await.unwrap();
    sim.settle().await.unwrap();
    assert_eq!(sim.client().connection_state(), ConnectionState::Connected);

    sim.driver_mut().drop_channel();
    sim.settle().await.unwrap();
    assert_eq!(sim.client().connection_state(), ConnectionState::Reconnecting);

    for _ in 0..3 {
        sim.apply(&Operation::RemotePost { conversation: ROOM }).await.unwrap();
    }
    let before = sim.env().now();
    sim.wait_for_deadline().await.unwrap();
    sim.settle().await.unwrap();

    assert!(sim.env().now() > before);
    assert_eq!(sim.client().connection_state(), ConnectionState::Connected);
    assert_eq!(sim.client().timeline(conversation(ROOM)).unwrap().len(), 3);
    sim.check_converged().unwrap();
}

#[tokio::test]
async fn rejected_connect_is_terminal() {
    let mut sim = Simulation::new(1, 30).unwrap();
    sim.driver_mut().server_mut().reject_next_connects(1);

    sim.apply(&Operation::Connect).await.unwrap();
    sim.settle().await.unwrap();

    assert_eq!(sim.client().connection_state(), ConnectionState::Failed);
    assert!(sim.client().next_deadline().is_none());
    assert!(!sim.driver().is_channel_open());
}

#[tokio::test]
async fn failed_send_can_be_resent() {
    let mut sim = Simulation::new(3, 30).unwrap();
    sim.apply(&Operation::Connect).await.unwrap();
    sim.apply(&Operation::SetActive { conversation: ROOM }).await.unwrap();
    sim.settle().await.unwrap();

    sim.driver_mut().server_mut().fail_next_sends(1);
    sim.apply(&Operation::SendText { conversation: ROOM, text: "retry me".to_string() })
        .await
        .unwrap();
    sim.settle().await.unwrap();

    let timeline = sim.client().timeline(conversation(ROOM)).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.messages()[0].status, DeliveryStatus::Failed);
    assert!(sim.driver().server().messages(conversation(ROOM)).is_empty());

    sim.apply(&Operation::Resend { conversation: ROOM }).await.unwrap();
    sim.settle().await.unwrap();

    let timeline = sim.client().timeline(conversation(ROOM)).unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline.pending_count(), 0);
    assert_eq!(timeline.messages()[0].sender_id, LOCAL_USER);
    assert_eq!(timeline.messages()[0].text(), "retry me");
    sim.check_converged().unwrap();
}

#[tokio::test]
async fn background_posts_count_as_unread() {
    let mut sim = Simulation::new(5, 30).unwrap();
    sim.apply(&Operation::Connect).await.unwrap();
    sim.apply(&Operation::SetActive { conversation: 0 }).await.unwrap();
    sim.settle().await.unwrap();

    for _ in 0..2 {
        sim.apply(&Operation::RemotePost { conversation: 1 }).await.unwrap();
    }
    sim.apply(&Operation::RemotePost { conversation: 0 }).await.unwrap();
    sim.settle().await.unwrap();

    assert_eq!(sim.client().unread().count(conversation(1)), 2);
    assert_eq!(sim.client().unread().count(conversation(0)), 0);

    sim.apply(&Operation::SetActive { conversation: 1 }).await.unwrap();
    sim.settle().await.unwrap();

    assert_eq!(sim.client().unread().count(conversation(1)), 0);
    assert_eq!(sim.client().timeline(conversation(1)).unwrap().len(), 2);
}

struct NeverHolds;

impl Invariant for NeverHolds {
    fn name(&self) -> &'static str {
        "never_holds"
    }

    fn check(&self, _state: &SystemSnapshot) -> InvariantResult {
        Err(Violation { invariant: self.name(), message: "always fails".to_string() })
    }
}

#[tokio::test]
async fn violation_stops_the_run() {
    let env = SimEnv::with_seed(9);
    let mut registry = InvariantRegistry::new();
    registry.add(NeverHolds);
    let driver = SimDriver::new(env.clone(), LOCAL_USER).with_invariants(registry);
    let mut sim = Simulation::with_driver(env, driver, 30).unwrap();

    sim.apply(&Operation::Connect).await.unwrap_or(());
    let err = sim.settle().await.unwrap_err();

    assert!(err.0.contains("never_holds"), "{err}");
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    let conversation = 0u8..3;
    prop_oneof![
        2 => Just(Operation::Connect),
        1 => Just(Operation::Disconnect),
        3 => conversation.clone().prop_map(|conversation| Operation::SetActive { conversation }),
        2 => conversation.clone().prop_map(|conversation| Operation::Open { conversation }),
        1 => conversation.clone().prop_map(|conversation| Operation::Close { conversation }),
        2 => conversation.clone().prop_map(|conversation| Operation::LoadMore { conversation }),
        4 => (conversation.clone(), "[a-z ]{0,8}")
            .prop_map(|(conversation, text)| Operation::SendText { conversation, text }),
        1 => conversation.clone().prop_map(|conversation| Operation::Resend { conversation }),
        4 => conversation.prop_map(|conversation| Operation::RemotePost { conversation }),
        1 => Just(Operation::DropChannel),
        1 => (0u8..3).prop_map(|count| Operation::RejectConnects { count }),
        1 => (0u8..3).prop_map(|count| Operation::FailFetches { count }),
        1 => (0u8..3).prop_map(|count| Operation::FailSends { count }),
        2 => Just(Operation::Wait),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any sequence of commands, server activity and failures leaves every
    /// open view matching the server once the client reconnects and pages
    /// to the end.
    #[test]
    fn prop_random_operations_converge(
        seed in any::<u64>(),
        operations in prop::collection::vec(operation_strategy(), 0..40),
    ) {
        let result: Result<(), String> = block_on(async {
            let mut sim = Simulation::new(seed, 100).map_err(|e| e.to_string())?;
            for operation in &operations {
                sim.apply(operation).await.map_err(|e| format!("{operation:?}: {e}"))?;
            }
            sim.converge().await.map_err(|e| e.to_string())?;
            sim.check_converged().map_err(|e| e.to_string())
        });

        prop_assert!(result.is_ok(), "{:?}", result);
    }
}
