use super::budget::RestartBudget;
use crate::config::{HealthConfig, LifecycleConfig};
use crate::errors::StreamError;
use crate::health::{HealthMonitor, HealthSignal, StatsReport};
use crate::media::SessionSlot;
use crate::signaling::{BusHandle, SignalingClient};
use crate::webrtc::{
    ConnectionState, IceCandidate, PeerSession, SessionEvents, SessionFactory, TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Owns the peer session and decides when to rebuild it.
///
/// Every session is created with a fresh generation number. Tearing a
/// session down bumps the generation first, so anything the old session
/// reports afterwards is recognised as stale and dropped.
pub struct ConnectionLifecycleManager {
    factory: Arc<dyn SessionFactory>,
    slot: SessionSlot,
    signaling: SignalingClient,
    budget: RestartBudget,
    health: HealthMonitor,
    cooldown: Duration,
    stable_dwell: Duration,
    generation: u64,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    cooldown_until: Option<Instant>,
    connected_since: Option<Instant>,
    stopped: bool,
    restarts: u64,
}

impl ConnectionLifecycleManager {
    /// Build a manager and the receiver its sessions report into.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        slot: SessionSlot,
        signaling: SignalingClient,
        lifecycle: &LifecycleConfig,
        health: &HealthConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::New);

        let manager = Self {
            factory,
            slot,
            signaling,
            budget: RestartBudget::new(lifecycle.max_restarts, lifecycle.restart_window()),
            health: HealthMonitor::new(health),
            cooldown: lifecycle.cooldown(),
            stable_dwell: lifecycle.stable_dwell(),
            generation: 0,
            state_tx,
            events_tx,
            cooldown_until: None,
            connected_since: None,
            stopped: false,
            restarts: 0,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Restarts counted in the current budget window.
    pub fn restart_count(&self) -> u32 {
        self.budget.count_at(Instant::now())
    }

    /// Restarts performed since construction, deferred ones included.
    pub fn total_restarts(&self) -> u64 {
        self.restarts
    }

    pub fn cooldown_deadline(&self) -> Option<Instant> {
        self.cooldown_until
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn signaling(&self) -> &SignalingClient {
        &self.signaling
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn session(&self) -> Option<Arc<dyn PeerSession>> {
        self.slot.current()
    }

    /// Negotiate a fresh session after the bus (re)connects.
    pub async fn connect(&mut self, bus: &BusHandle) {
        if self.stopped {
            log::info!("Streaming is stopped by operator, not negotiating");
            return;
        }
        if self.cooldown_until.is_some() {
            log::info!("Restart cool-down in progress, negotiation deferred");
            return;
        }
        if let Err(e) = self.establish(bus).await {
            self.recover(bus, e.to_string()).await;
        }
    }

    /// Operator `start_webrtc`: leave the stopped state and negotiate.
    pub async fn start(&mut self, bus: &BusHandle) {
        log::info!("Starting WebRTC stream on request");
        self.stopped = false;
        self.cooldown_until = None;
        self.budget.reset();
        if let Err(e) = self.establish(bus).await {
            self.recover(bus, e.to_string()).await;
        }
    }

    /// Operator `stop_webrtc`: close the session and stay closed.
    pub async fn stop(&mut self) {
        log::info!("Stopping WebRTC stream on request");
        self.stopped = true;
        self.cooldown_until = None;
        self.teardown().await;
        self.set_state(ConnectionState::Closed);
    }

    /// Feed one event from a session.
    pub async fn handle_event(&mut self, event: TransportEvent, bus: &BusHandle) {
        if event.generation() != self.generation {
            log::debug!(
                "Ignoring event from stale session generation {} (current {})",
                event.generation(),
                self.generation
            );
            return;
        }

        match event {
            TransportEvent::LocalCandidate { candidate, .. } => {
                self.signaling.on_local_candidate(bus, candidate);
            }
            TransportEvent::ConnectionState { state, .. } => {
                self.on_connection_state(state, bus).await;
            }
        }
    }

    pub async fn on_answer(&mut self, sdp: String, bus: &BusHandle) {
        let Some(session) = self.slot.current() else {
            log::warn!("Ignoring answer, no session is active");
            return;
        };
        if let Err(e) = self.signaling.on_answer(session.as_ref(), sdp).await {
            log::error!("{}", e);
            self.on_connection_state(ConnectionState::Failed, bus).await;
        }
    }

    pub async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.slot.current() else {
            log::debug!("Dropping remote candidate, no session is active");
            return;
        };
        self.signaling.on_candidate(session.as_ref(), candidate).await;
    }

    /// Keepalive tick: dwell check plus the ICE sub-state check.
    pub async fn keepalive(&mut self, bus: &BusHandle) {
        self.check_stable(Instant::now());

        if !self.health.is_active() {
            return;
        }
        let Some(session) = self.slot.current() else {
            return;
        };
        match self.health.keepalive(session.as_ref()).await {
            Some(HealthSignal::Failed) => {
                self.on_connection_state(ConnectionState::Failed, bus).await;
            }
            Some(HealthSignal::Disconnected) => {
                self.on_connection_state(ConnectionState::Disconnected, bus).await;
            }
            Some(HealthSignal::Healthy) | None => {}
        }
    }

    /// Stats tick. `None` unless connected.
    pub async fn sample_stats(&mut self) -> Option<StatsReport> {
        let session = self.slot.current()?;
        self.health.sample(session.as_ref(), Instant::now()).await
    }

    /// Reset the budget once the connection has held for the dwell time.
    pub fn check_stable(&mut self, now: Instant) {
        let Some(since) = self.connected_since else {
            return;
        };
        if self.budget.count_at(now) > 0 && now.saturating_duration_since(since) >= self.stable_dwell {
            log::info!(
                "Connection stable for {:?}, restart budget reset",
                self.stable_dwell
            );
            self.budget.reset();
        }
    }

    /// Cool-down is over: reset the budget and run the deferred restart,
    /// which does not count against the new window.
    pub async fn on_cooldown_elapsed(&mut self, bus: &BusHandle) {
        if self.cooldown_until.take().is_none() {
            return;
        }
        self.budget.reset();
        if self.stopped {
            return;
        }

        log::info!("Restart cool-down over, rebuilding peer session");
        self.restarts += 1;
        if let Err(e) = self.establish(bus).await {
            self.recover(bus, e.to_string()).await;
        }
    }

    /// Close everything for good.
    pub async fn shutdown(&mut self) {
        self.stopped = true;
        self.cooldown_until = None;
        self.teardown().await;
        self.set_state(ConnectionState::Closed);
    }

    async fn on_connection_state(&mut self, state: ConnectionState, bus: &BusHandle) {
        if self.stopped {
            self.set_state(state);
            return;
        }

        match state {
            ConnectionState::Connected => {
                if self.state() != ConnectionState::Connected {
                    let now = Instant::now();
                    self.connected_since = Some(now);
                    self.health.start(now);
                }
                self.set_state(state);
            }
            ConnectionState::Disconnected => {
                self.connected_since = None;
                self.health.stop();
                self.set_state(state);
            }
            ConnectionState::Failed | ConnectionState::Closed => {
                self.connected_since = None;
                self.health.stop();
                self.set_state(state);
                self.recover(bus, format!("connection {}", state)).await;
            }
            ConnectionState::New | ConnectionState::Connecting => {
                self.set_state(state);
            }
        }
    }

    /// Restart under the budget. Failures while restarting loop back here
    /// instead of recursing.
    async fn recover(&mut self, bus: &BusHandle, reason: String) {
        let mut reason = reason;
        loop {
            if self.stopped {
                return;
            }
            if self.cooldown_until.is_some() {
                log::debug!("Already cooling down, ignoring failure: {}", reason);
                return;
            }
            if !bus.is_connected() {
                log::info!("Message bus offline, negotiation resumes on reconnect ({})", reason);
                self.teardown().await;
                return;
            }

            let now = Instant::now();
            if !self.budget.try_acquire(now) {
                log::warn!(
                    "Restart budget exhausted ({} restarts in {:?}), cooling down for {:?}: {}",
                    self.budget.max_restarts(),
                    self.budget.window(),
                    self.cooldown,
                    reason
                );
                self.teardown().await;
                self.cooldown_until = Some(now + self.cooldown);
                return;
            }

            self.restarts += 1;
            log::info!(
                "Restarting peer session ({}/{} in window): {}",
                self.budget.count_at(now),
                self.budget.max_restarts(),
                reason
            );
            match self.establish(bus).await {
                Ok(()) => return,
                Err(e) => {
                    log::warn!("Restart failed: {}", e);
                    reason = e.to_string();
                }
            }
        }
    }

    async fn establish(&mut self, bus: &BusHandle) -> Result<(), StreamError> {
        self.teardown().await;

        let events = SessionEvents::new(self.generation, self.events_tx.clone());
        let session = self.factory.create(events).await?;
        self.slot.replace(Some(session.clone()));
        self.set_state(ConnectionState::New);

        self.signaling.begin(session.as_ref(), bus).await?;
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn teardown(&mut self) {
        self.health.stop();
        self.connected_since = None;
        self.signaling.reset();
        self.generation += 1;

        if let Some(old) = self.slot.replace(None) {
            if let Err(e) = old.close().await {
                log::debug!("Error closing peer session: {}", e);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::info!("Connection state: {} -> {}", previous, state);
        }
    }
}
