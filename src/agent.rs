//! The field-unit agent
//!
//! [`StreamingAgent`] owns every component explicitly: capture, detection,
//! GPS, the bus connection, the lifecycle manager and the reporters. It is
//! driven by one `select!` loop; the media pump runs as a sibling task on
//! the same runtime.

use crate::capture::{CaptureSource, FrameSource};
use crate::config::SkycastConfig;
use crate::detection::{
    detection_queue, DetectionCache, DetectionParams, DetectionWorker, InferenceEngine,
    DETECTION_QUEUE_CAPACITY,
};
use crate::errors::StreamError;
use crate::gps::{spawn_gps_task, GpsSlot, GpsSource};
use crate::lifecycle::ConnectionLifecycleManager;
use crate::media::{FrameProducer, MediaPump, SessionSlot};
use crate::platform::{BackendOpener, CaptureSettings};
use crate::publisher::{DetectionPublisher, SnapshotReporter};
use crate::signaling::message::{Capabilities, Outbound, RegisterDevice};
use crate::signaling::{
    decode_inbound, BusEvent, BusHandle, InboundMessage, MessageBus, SignalingClient,
    SignalingMessage,
};
use crate::still::{StillCapture, StillSink};
use crate::webrtc::{ConnectionState, SessionFactory, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Pluggable pieces the agent is built from.
pub struct AgentServices {
    /// Camera backends, tried in order
    pub openers: Vec<Arc<dyn BackendOpener>>,
    pub engine: Box<dyn InferenceEngine>,
    pub sessions: Arc<dyn SessionFactory>,
    pub gps: Option<Box<dyn GpsSource>>,
    /// Defaults to a local store under `still.output_directory`
    pub still_sink: Option<Arc<dyn StillSink>>,
}

/// Counters collected at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSummary {
    pub frames_captured: u64,
    pub frames_written: u64,
    pub detections_processed: u64,
    pub restarts: u64,
}

pub struct StreamingAgent {
    config: SkycastConfig,
    capture: Arc<CaptureSource>,
    worker: Option<DetectionWorker>,
    cache: DetectionCache,
    gps: GpsSlot,
    gps_task: Option<JoinHandle<()>>,
    slot: SessionSlot,
    pump: Option<JoinHandle<MediaPump>>,
    tasks_shutdown: watch::Sender<bool>,
    bus: MessageBus,
    manager: ConnectionLifecycleManager,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    publisher: DetectionPublisher,
    snapshots: SnapshotReporter,
    still: StillCapture,
}

impl StreamingAgent {
    /// Bring up the camera first, then everything else.
    ///
    /// `connect` is only called once the camera is running, so a camera
    /// that never opens produces no bus traffic at all.
    pub async fn start<F>(
        config: SkycastConfig,
        services: AgentServices,
        connect: F,
    ) -> Result<Self, StreamError>
    where
        F: FnOnce() -> MessageBus,
    {
        config.validate().map_err(StreamError::Config)?;

        let settings = CaptureSettings::from(&config.camera);
        let capture = CaptureSource::start_with_retries(
            services.openers,
            settings,
            config.camera.setup_attempts,
            Duration::from_millis(config.camera.setup_retry_delay_ms),
        )
        .await?;
        let capture = Arc::new(capture);

        let cache = DetectionCache::new();
        let (worker, queue) = if config.detection.enabled {
            let (queue, frames) = detection_queue(DETECTION_QUEUE_CAPACITY);
            let worker = DetectionWorker::spawn(
                services.engine,
                frames,
                cache.clone(),
                DetectionParams::from(&config.detection),
            )?;
            (Some(worker), Some(queue))
        } else {
            log::info!("Object detection disabled");
            (None, None)
        };

        let (tasks_shutdown, tasks_rx) = watch::channel(false);

        let gps = GpsSlot::new();
        let gps_task = services.gps.map(|source| {
            spawn_gps_task(
                source,
                gps.clone(),
                Duration::from_millis(config.gps.update_interval_ms.max(1)),
                tasks_rx.clone(),
            )
        });

        let fps = config.camera.fps;
        let stride = config.detection.stride(fps);
        let source: Arc<dyn FrameSource> = capture.clone();
        let producer = FrameProducer::new(
            source,
            queue,
            cache.clone(),
            fps,
            stride,
            (config.camera.width, config.camera.height),
        )
        .with_overlay(config.stream.overlay);
        log::info!("Producing {} fps, detection every {} frame(s)", fps, stride);

        let slot = SessionSlot::new();
        let pump = tokio::spawn(MediaPump::new(producer, slot.clone()).run(tasks_rx));

        let signaling = SignalingClient::new(
            config.device.id.clone(),
            Duration::from_millis(config.signaling.ice_gathering_timeout_ms),
            config.signaling.trickle_local_candidates,
        );
        let (manager, transport_events) = ConnectionLifecycleManager::new(
            services.sessions,
            slot.clone(),
            signaling,
            &config.lifecycle,
            &config.health,
        );

        let publisher = DetectionPublisher::new(config.device.id.clone(), &config.publisher);
        let snapshots = SnapshotReporter::new(
            config.device.id.clone(),
            config.device.name.clone(),
            &config.publisher,
        );
        let still = match services.still_sink {
            Some(sink) => StillCapture::new(config.device.id.clone(), &config.still, sink),
            None => StillCapture::local(config.device.id.clone(), &config.still),
        };

        let bus = connect();

        Ok(Self {
            config,
            capture,
            worker,
            cache,
            gps,
            gps_task,
            slot,
            pump: Some(pump),
            tasks_shutdown,
            bus,
            manager,
            transport_events,
            publisher,
            snapshots,
            still,
        })
    }

    pub fn config(&self) -> &SkycastConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }

    pub fn detection_cache(&self) -> DetectionCache {
        self.cache.clone()
    }

    pub fn gps(&self) -> GpsSlot {
        self.gps.clone()
    }

    pub fn session_slot(&self) -> SessionSlot {
        self.slot.clone()
    }

    /// Event loop. Returns after `shutdown` flips to `true` and every
    /// component has been stopped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentSummary {
        let bus = self.bus.handle();

        let mut keepalive = tokio::time::interval(self.manager.health().keepalive_interval());
        let mut stats = tokio::time::interval(self.manager.health().stats_interval());
        let mut publish = tokio::time::interval(self.publisher.interval());
        let mut snapshot = snapshot_timer(self.snapshots.interval());
        for timer in [&mut keepalive, &mut stats, &mut publish] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let mut bus_open = true;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let cooldown = self.manager.cooldown_deadline();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.bus.recv(), if bus_open => match event {
                    Some(BusEvent::Connected) => self.on_bus_connected(&bus).await,
                    Some(BusEvent::Disconnected) => {
                        log::warn!("Message bus disconnected");
                    }
                    Some(BusEvent::Message(text)) => {
                        if self.on_message(&text, &bus).await {
                            snapshot = snapshot_timer(self.snapshots.interval());
                        }
                    }
                    None => {
                        log::error!("Message bus is gone, continuing without it");
                        bus_open = false;
                    }
                },
                Some(event) = self.transport_events.recv() => {
                    self.manager.handle_event(event, &bus).await;
                }
                _ = keepalive.tick() => {
                    self.manager.keepalive(&bus).await;
                }
                _ = stats.tick() => {
                    self.manager.sample_stats().await;
                }
                _ = publish.tick() => {
                    self.publish_detections(&bus);
                }
                _ = snapshot.tick() => {
                    if self.snapshots.is_enabled() {
                        self.send_snapshot(&bus);
                    }
                }
                _ = tokio::time::sleep_until(cooldown.unwrap_or_else(Instant::now)), if cooldown.is_some() => {
                    self.manager.on_cooldown_elapsed(&bus).await;
                }
            }
        }

        self.shutdown().await
    }

    async fn on_bus_connected(&mut self, bus: &BusHandle) {
        log::info!("Registering device {}", self.config.device.id);
        let register = Outbound::RegisterDevice(RegisterDevice {
            device_id: self.config.device.id.clone(),
            device_name: self.config.device.name.clone(),
            capabilities: Capabilities {
                width: self.config.camera.width,
                height: self.config.camera.height,
                fps: self.config.camera.fps,
            },
        });
        if let Err(e) = bus.send(&register) {
            log::warn!("Device registration failed: {}", e);
            return;
        }
        self.manager.connect(bus).await;
    }

    /// Handle one inbound frame. Returns `true` when the snapshot timer
    /// needs to be rearmed.
    async fn on_message(&mut self, text: &str, bus: &BusHandle) -> bool {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping inbound message: {}", e);
                return false;
            }
        };

        let device_id = self.config.device.id.as_str();
        match message {
            InboundMessage::Signaling(signal) => {
                if signal.device_id() != device_id {
                    log::debug!("Ignoring signaling for {}", signal.device_id());
                    return false;
                }
                match signal {
                    SignalingMessage::Offer { .. } => {
                        log::warn!("Ignoring inbound offer, this device always offers");
                    }
                    SignalingMessage::Answer { sdp, .. } => self.manager.on_answer(sdp, bus).await,
                    SignalingMessage::IceCandidate { candidate, .. } => {
                        self.manager.on_remote_candidate(candidate).await
                    }
                    SignalingMessage::Start { .. } => self.manager.start(bus).await,
                    SignalingMessage::Stop { .. } => self.manager.stop().await,
                }
                false
            }
            InboundMessage::Capture(command) => {
                if command.device_id == device_id {
                    let result = self
                        .still
                        .capture(self.capture.get_frame(), &command, self.gps.latest())
                        .await;
                    if let Err(e) = bus.send(&Outbound::CaptureResult(result)) {
                        log::warn!("Could not send capture result: {}", e);
                    }
                }
                false
            }
            InboundMessage::ReportConfig(report) => {
                report.device_id == device_id && self.snapshots.apply_config(&report)
            }
            InboundMessage::RequestSnapshot { device_id: target } => {
                if target == device_id {
                    self.send_snapshot(bus);
                }
                false
            }
            InboundMessage::Unknown(event) => {
                log::debug!("Ignoring unknown event {}", event);
                false
            }
        }
    }

    fn publish_detections(&mut self, bus: &BusHandle) {
        let set = self.cache.latest();
        if let Err(e) = self.publisher.publish(bus, &set, self.gps.latest()) {
            log::debug!("Detection report not sent: {}", e);
        }
    }

    fn send_snapshot(&mut self, bus: &BusHandle) {
        let frame = self.capture.get_frame();
        let set = self.cache.has_result().then(|| self.cache.latest());
        if let Err(e) = self.snapshots.report(bus, frame.as_ref(), set.as_deref()) {
            log::warn!("Snapshot failed: {}", e);
        }
    }

    async fn shutdown(mut self) -> AgentSummary {
        log::info!("Shutting down streaming agent");
        let mut summary = AgentSummary {
            restarts: self.manager.total_restarts(),
            ..AgentSummary::default()
        };

        self.manager.shutdown().await;
        let _ = self.tasks_shutdown.send(true);

        let camera_timeout = Duration::from_millis(self.config.camera.join_timeout_ms);
        if let Some(pump) = self.pump.take() {
            match tokio::time::timeout(camera_timeout, pump).await {
                Ok(Ok(pump)) => summary.frames_written = pump.written(),
                Ok(Err(e)) => log::warn!("Media pump task failed: {}", e),
                Err(_) => log::warn!("Media pump did not stop within {:?}", camera_timeout),
            }
        }
        if let Some(task) = self.gps_task.take() {
            if tokio::time::timeout(camera_timeout, task).await.is_err() {
                log::warn!("GPS task did not stop within {:?}", camera_timeout);
            }
        }

        if let Some(worker) = self.worker.take() {
            summary.detections_processed = worker.processed();
            let timeout = Duration::from_millis(self.config.detection.join_timeout_ms);
            if let Err(e) = worker.stop(timeout) {
                log::warn!("{}", e);
            }
        }

        summary.frames_captured = self.capture.stats().frames_captured;
        if let Err(e) = self.capture.stop(camera_timeout) {
            log::warn!("{}", e);
        }

        self.bus.close();
        log::info!(
            "Agent stopped: {} frames captured, {} sent, {} detections, {} restarts",
            summary.frames_captured,
            summary.frames_written,
            summary.detections_processed,
            summary.restarts
        );
        summary
    }
}

fn snapshot_timer(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::NullEngine;
    use crate::testing::{MockSessionFactory, SyntheticOpener, UnavailableOpener};

    fn small_config() -> SkycastConfig {
        let mut config = SkycastConfig::default();
        config.camera.width = 64;
        config.camera.height = 48;
        config.camera.setup_attempts = 2;
        config.camera.setup_retry_delay_ms = 5;
        config.signaling.ice_gathering_timeout_ms = 10;
        config
    }

    fn services(opener: Arc<dyn BackendOpener>, sessions: Arc<MockSessionFactory>) -> AgentServices {
        AgentServices {
            openers: vec![opener],
            engine: Box::new(NullEngine),
            sessions,
            gps: None,
            still_sink: None,
        }
    }

    #[tokio::test]
    async fn test_camera_failure_means_no_bus() {
        let factory = Arc::new(MockSessionFactory::new());
        let mut connected = false;
        let result = StreamingAgent::start(
            small_config(),
            services(Arc::new(UnavailableOpener::new()), factory.clone()),
            || {
                connected = true;
                MessageBus::in_memory().0
            },
        )
        .await;

        match result {
            Err(StreamError::CameraUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("expected CameraUnavailable"),
        }
        assert!(!connected);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = small_config();
        config.camera.fps = 0;
        let result = StreamingAgent::start(
            config,
            services(Arc::new(SyntheticOpener::new()), Arc::new(MockSessionFactory::new())),
            || MessageBus::in_memory().0,
        )
        .await;
        assert!(matches!(result, Err(StreamError::Config(_))));
    }

    #[tokio::test]
    async fn test_registers_and_offers_on_connect() {
        let factory = Arc::new(MockSessionFactory::new());
        let (bus, mut peer) = MessageBus::in_memory();
        let agent = StreamingAgent::start(
            small_config(),
            services(Arc::new(SyntheticOpener::new()), factory.clone()),
            move || bus,
        )
        .await
        .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(agent.run(stop_rx));

        peer.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let sent = peer.drain_sent();
        let events: Vec<_> = sent.iter().map(|m| m["event"].as_str().unwrap_or("")).collect();
        let register = events.iter().position(|e| *e == "register_device").unwrap();
        let offer = events.iter().position(|e| *e == "webrtc_offer").unwrap();
        assert!(register < offer);
        assert_eq!(factory.created(), 1);

        stop_tx.send(true).unwrap();
        let summary = run.await.unwrap();
        assert!(summary.frames_captured > 0);
        assert!(factory.latest().unwrap().is_closed());
    }
}
