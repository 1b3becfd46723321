//! Connection health while a peer is connected
//!
//! The keepalive check reads the ICE sub-state and turns trouble into a
//! [`HealthSignal`] for the lifecycle manager. Stats sampling only reports:
//! a stalled sender is logged, never restarted from here.

use crate::config::HealthConfig;
use crate::webrtc::{IceState, PeerSession, TransportStats};
use std::time::Duration;
use tokio::time::Instant;

/// What a keepalive check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    Healthy,
    Disconnected,
    Failed,
}

impl HealthSignal {
    pub fn from_ice(state: IceState) -> Self {
        match state {
            IceState::Disconnected => HealthSignal::Disconnected,
            IceState::Failed | IceState::Closed => HealthSignal::Failed,
            IceState::New | IceState::Checking | IceState::Connected | IceState::Completed => {
                HealthSignal::Healthy
            }
        }
    }
}

/// One stats interval worth of outbound traffic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub elapsed: Duration,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub bitrate_bps: f64,
    /// Lost over sent+lost for the interval, 0.0 when nothing moved
    pub loss_ratio: f64,
    pub stalled: bool,
}

pub struct HealthMonitor {
    keepalive_interval: Duration,
    stats_interval: Duration,
    active: bool,
    baseline: Option<(Instant, TransportStats)>,
    stalls: u64,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs.max(1)),
            stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
            active: false,
            baseline: None,
            stalls: 0,
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    pub fn stats_interval(&self) -> Duration {
        self.stats_interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    pub fn start(&mut self, now: Instant) {
        if !self.active {
            log::debug!("Health monitor started");
        }
        self.active = true;
        self.baseline = Some((now, TransportStats::default()));
    }

    pub fn stop(&mut self) {
        if self.active {
            log::debug!("Health monitor stopped");
        }
        self.active = false;
        self.baseline = None;
    }

    /// Read the ICE sub-state. `None` while inactive.
    pub async fn keepalive(&self, session: &dyn PeerSession) -> Option<HealthSignal> {
        if !self.active {
            return None;
        }
        let state = session.ice_state().await;
        let signal = HealthSignal::from_ice(state);
        if signal != HealthSignal::Healthy {
            log::warn!("Keepalive: ICE connection is {:?}", state);
        }
        Some(signal)
    }

    /// Sample cumulative counters and report the delta. `None` while inactive.
    pub async fn sample(&mut self, session: &dyn PeerSession, now: Instant) -> Option<StatsReport> {
        if !self.active {
            return None;
        }
        let stats = session.stats().await;
        Some(self.record(stats, now))
    }

    /// Fold a counter reading into the running baseline.
    pub fn record(&mut self, stats: TransportStats, now: Instant) -> StatsReport {
        let (since, previous) = self
            .baseline
            .unwrap_or((now, TransportStats::default()));
        self.baseline = Some((now, stats));

        let elapsed = now.saturating_duration_since(since);
        let bytes_sent = stats.bytes_sent.saturating_sub(previous.bytes_sent);
        let packets_sent = stats.packets_sent.saturating_sub(previous.packets_sent);
        let packets_lost = stats.packets_lost.saturating_sub(previous.packets_lost);

        let secs = elapsed.as_secs_f64();
        let bitrate_bps = if secs > 0.0 {
            bytes_sent as f64 * 8.0 / secs
        } else {
            0.0
        };
        let attempted = packets_sent + packets_lost;
        let loss_ratio = if attempted > 0 {
            packets_lost as f64 / attempted as f64
        } else {
            0.0
        };

        let stalled = self.active && bytes_sent == 0;
        if stalled {
            self.stalls += 1;
            log::warn!("No video bytes sent in the last {:?}, possible stall", elapsed);
        } else {
            log::info!(
                "Uplink: {:.0} kbps, {} packets, loss {:.1}%",
                bitrate_bps / 1000.0,
                packets_sent,
                loss_ratio * 100.0
            );
        }

        StatsReport {
            elapsed,
            bytes_sent,
            packets_sent,
            packets_lost,
            bitrate_bps,
            loss_ratio,
            stalled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&HealthConfig::default())
    }

    #[test]
    fn test_ice_mapping() {
        assert_eq!(HealthSignal::from_ice(IceState::Connected), HealthSignal::Healthy);
        assert_eq!(HealthSignal::from_ice(IceState::Checking), HealthSignal::Healthy);
        assert_eq!(
            HealthSignal::from_ice(IceState::Disconnected),
            HealthSignal::Disconnected
        );
        assert_eq!(HealthSignal::from_ice(IceState::Failed), HealthSignal::Failed);
    }

    #[test]
    fn test_deltas_and_bitrate() {
        let start = Instant::now();
        let mut health = monitor();
        health.start(start);

        let report = health.record(
            TransportStats {
                bytes_sent: 125_000,
                packets_sent: 100,
                packets_lost: 0,
            },
            start + Duration::from_secs(10),
        );
        assert_eq!(report.bytes_sent, 125_000);
        assert!((report.bitrate_bps - 100_000.0).abs() < 1e-6);
        assert!(!report.stalled);

        let report = health.record(
            TransportStats {
                bytes_sent: 250_000,
                packets_sent: 190,
                packets_lost: 10,
            },
            start + Duration::from_secs(20),
        );
        assert_eq!(report.packets_sent, 90);
        assert_eq!(report.packets_lost, 10);
        assert!((report.loss_ratio - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_zero_bytes_is_stall() {
        let start = Instant::now();
        let mut health = monitor();
        health.start(start);
        let report = health.record(TransportStats::default(), start + Duration::from_secs(10));
        assert!(report.stalled);
        assert_eq!(health.stalls(), 1);
    }

    #[test]
    fn test_intervals_from_config() {
        let health = monitor();
        assert_eq!(health.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(health.stats_interval(), Duration::from_secs(10));
        assert!(!health.is_active());
    }
}
