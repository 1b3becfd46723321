//! Restart policy of the connection lifecycle, driven on a paused clock.

use proptest::prelude::*;
use skycast::config::{HealthConfig, LifecycleConfig};
use skycast::lifecycle::{ConnectionLifecycleManager, RestartBudget};
use skycast::media::SessionSlot;
use skycast::signaling::{BusPeer, MessageBus, SignalingClient};
use skycast::testing::MockSessionFactory;
use skycast::webrtc::TransportEvent;
use skycast::ConnectionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Rig {
    factory: Arc<MockSessionFactory>,
    manager: ConnectionLifecycleManager,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    bus: MessageBus,
    _peer: BusPeer,
}

fn rig(lifecycle: LifecycleConfig) -> Rig {
    let factory = Arc::new(MockSessionFactory::new());
    let (manager, events) = ConnectionLifecycleManager::new(
        factory.clone(),
        SessionSlot::new(),
        SignalingClient::new("drone-007", Duration::from_millis(5), true),
        &lifecycle,
        &HealthConfig::default(),
    );
    let (bus, peer) = MessageBus::in_memory();
    peer.connect();
    Rig {
        factory,
        manager,
        events,
        bus,
        _peer: peer,
    }
}

impl Rig {
    async fn settle(&mut self) {
        let bus = self.bus.handle();
        while let Ok(event) = self.events.try_recv() {
            self.manager.handle_event(event, &bus).await;
        }
    }

    async fn fail_latest(&mut self) {
        self.factory
            .latest()
            .expect("a session exists")
            .emit_state(ConnectionState::Failed);
        self.settle().await;
    }
}

#[tokio::test(start_paused = true)]
async fn four_quick_failures_enter_cooldown() {
    let mut rig = rig(LifecycleConfig::default());
    rig.manager.connect(&rig.bus.handle()).await;

    for expected in 1..=3 {
        rig.fail_latest().await;
        assert_eq!(rig.manager.restart_count(), expected);
        assert!(rig.manager.cooldown_deadline().is_none());
    }
    assert_eq!(rig.factory.created(), 4);

    rig.fail_latest().await;
    let deadline = rig.manager.cooldown_deadline().expect("cooling down");
    assert_eq!(rig.factory.created(), 4);
    assert!(rig.manager.session().is_none());

    tokio::time::sleep_until(deadline).await;
    rig.manager.on_cooldown_elapsed(&rig.bus.handle()).await;

    assert_eq!(rig.manager.restart_count(), 0);
    assert!(rig.manager.cooldown_deadline().is_none());
    assert_eq!(rig.factory.created(), 5);
    assert_eq!(rig.manager.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn spaced_failures_stay_within_budget() {
    let mut rig = rig(LifecycleConfig::default());
    rig.manager.connect(&rig.bus.handle()).await;

    for _ in 0..6 {
        rig.fail_latest().await;
        assert!(rig.manager.cooldown_deadline().is_none());
        tokio::time::advance(Duration::from_secs(11)).await;
    }
    assert_eq!(rig.factory.created(), 7);
}

#[tokio::test(start_paused = true)]
async fn restart_count_clears_when_window_elapses() {
    let mut rig = rig(LifecycleConfig::default());
    rig.manager.connect(&rig.bus.handle()).await;
    for _ in 0..3 {
        rig.fail_latest().await;
    }
    assert_eq!(rig.manager.restart_count(), 3);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(rig.manager.restart_count(), 0);
    assert_eq!(rig.manager.total_restarts(), 3);
}

#[tokio::test(start_paused = true)]
async fn stable_connection_resets_budget() {
    let mut rig = rig(LifecycleConfig {
        restart_window_secs: 120,
        ..LifecycleConfig::default()
    });
    rig.manager.connect(&rig.bus.handle()).await;
    rig.fail_latest().await;
    rig.fail_latest().await;
    assert_eq!(rig.manager.restart_count(), 2);

    rig.factory
        .latest()
        .expect("a session exists")
        .emit_state(ConnectionState::Connected);
    rig.settle().await;

    tokio::time::advance(Duration::from_secs(21)).await;
    rig.manager.keepalive(&rig.bus.handle()).await;
    assert_eq!(rig.manager.restart_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn operator_stop_is_never_undone() {
    let mut rig = rig(LifecycleConfig::default());
    rig.manager.connect(&rig.bus.handle()).await;
    let session = rig.factory.latest().expect("a session exists");

    rig.manager.stop().await;
    assert!(session.is_closed());
    assert_eq!(rig.manager.state(), ConnectionState::Closed);

    session.emit_state(ConnectionState::Failed);
    rig.settle().await;
    rig.manager.connect(&rig.bus.handle()).await;
    tokio::time::advance(Duration::from_secs(120)).await;
    rig.manager.keepalive(&rig.bus.handle()).await;

    assert_eq!(rig.factory.created(), 1);
    assert!(rig.manager.is_stopped());

    rig.manager.start(&rig.bus.handle()).await;
    assert_eq!(rig.factory.created(), 2);
    assert!(!rig.manager.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn session_creation_failures_do_not_recurse() {
    let mut rig = rig(LifecycleConfig {
        max_restarts: 2,
        ..LifecycleConfig::default()
    });
    rig.factory.fail_next(10);
    rig.manager.connect(&rig.bus.handle()).await;

    assert!(rig.manager.cooldown_deadline().is_some());
    assert_eq!(rig.factory.created(), 0);
    assert_eq!(rig.manager.total_restarts(), 2);
}

proptest! {
    /// The count never passes the maximum, and since windows are fixed any
    /// 10 s span holds at most two windows' worth of restarts.
    #[test]
    fn budget_never_exceeds_max_per_window(
        max in 1u32..6,
        gaps_ms in prop::collection::vec(0u64..4000, 1..40),
    ) {
        let window = Duration::from_secs(10);
        let mut budget = RestartBudget::new(max, window);
        let origin = tokio::time::Instant::now();
        let mut offset = Duration::ZERO;
        let mut granted: Vec<Duration> = Vec::new();

        for gap in gaps_ms {
            offset += Duration::from_millis(gap);
            if budget.try_acquire(origin + offset) {
                granted.push(offset);
            }
            prop_assert!(budget.count_at(origin + offset) <= max);
        }

        for (i, start) in granted.iter().enumerate() {
            let in_window = granted[i..]
                .iter()
                .take_while(|t| **t - *start < window)
                .count();
            prop_assert!(in_window as u32 <= max * 2);
        }
    }
}
