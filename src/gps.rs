//! Latest position fix, attached to detection reports and stills

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub heading: f64,
    pub accuracy: f64,
    /// RFC 3339
    pub timestamp: String,
}

/// Single-slot holder of the most recent fix.
#[derive(Debug, Clone, Default)]
pub struct GpsSlot {
    inner: Arc<RwLock<Option<GpsFix>>>,
}

impl GpsSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<GpsFix> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, fix: GpsFix) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Some(fix),
            Err(poisoned) => *poisoned.into_inner() = Some(fix),
        }
    }
}

/// A producer of position fixes.
pub trait GpsSource: Send {
    /// Next fix, or `None` when no position is known right now.
    fn next_fix(&mut self) -> Option<GpsFix>;
}

/// Drifts slowly around a start position. For bench runs without a receiver.
#[derive(Debug, Clone)]
pub struct SimulatedGps {
    latitude: f64,
    longitude: f64,
    step: u64,
}

impl SimulatedGps {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            step: 0,
        }
    }
}

impl GpsSource for SimulatedGps {
    fn next_fix(&mut self) -> Option<GpsFix> {
        let t = self.step as f64;
        self.step += 1;

        self.latitude += (t * 0.7).sin() * 0.00005;
        self.longitude += (t * 0.3).cos() * 0.00005;

        Some(GpsFix {
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: 12.5 + (t * 0.2).sin() * 2.5,
            speed: 10.0 + (t * 0.1).cos() * 5.0,
            heading: (t * 7.0) % 360.0,
            accuracy: 3.5,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Poll `source` every `interval` into `slot` until shutdown.
pub fn spawn_gps_task(
    mut source: Box<dyn GpsSource>,
    slot: GpsSlot,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(fix) = source.next_fix() {
                        slot.update(fix);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("GPS task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_starts_empty() {
        let slot = GpsSlot::new();
        assert!(slot.latest().is_none());

        let mut gps = SimulatedGps::new(10.762622, 106.660172);
        let fix = gps.next_fix().unwrap();
        slot.update(fix.clone());
        assert_eq!(slot.latest(), Some(fix));
    }

    #[test]
    fn test_simulated_stays_near_start() {
        let mut gps = SimulatedGps::new(10.762622, 106.660172);
        for _ in 0..1000 {
            let fix = gps.next_fix().unwrap();
            assert!((fix.latitude - 10.762622).abs() < 0.01);
            assert!((fix.longitude - 106.660172).abs() < 0.1);
            assert!((0.0..360.0).contains(&fix.heading));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_fills_slot() {
        let slot = GpsSlot::new();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_gps_task(
            Box::new(SimulatedGps::new(1.0, 2.0)),
            slot.clone(),
            Duration::from_secs(1),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(slot.latest().is_some());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
