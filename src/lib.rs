//! skycast: live camera uplink for field units
//!
//! A field unit (typically a drone) captures video from a local camera,
//! runs person detection on a sampled subset of frames and streams the
//! annotated video to a ground station over WebRTC. Offers, answers and
//! ICE candidates travel over a JSON message bus, which also carries
//! detection reports, snapshots and still-capture requests.
//!
//! # Features
//! - Camera capture with backend fallback and bounded shutdown
//! - Sampled detection on a dedicated worker thread, never blocking video
//! - Offer/answer signaling with early ICE candidate buffering
//! - Connection restarts governed by a sliding-window budget and cooldown
//! - Periodic detection reports, snapshots and on-demand stills
//!
//! # Usage
//! ```toml
//! [dependencies]
//! skycast = { version = "0.3", features = ["webrtc"] }
//! ```
//!
//! ```rust,ignore
//! let config = skycast::SkycastConfig::load_layered("skycast.toml")?;
//! let agent = skycast::StreamingAgent::start(config, services, || {
//!     skycast::signaling::connect_websocket(url, policy)
//! })
//! .await?;
//! let summary = agent.run(shutdown_rx).await;
//! ```
pub mod agent;
pub mod capture;
pub mod config;
pub mod detection;
pub mod errors;
pub mod gps;
pub mod health;
pub mod lifecycle;
pub mod media;
pub mod overlay;
pub mod platform;
pub mod publisher;
pub mod signaling;
pub mod still;
pub mod timing;
pub mod types;
pub mod webrtc;

// Testing utilities - synthetic sources and session doubles
pub mod testing;

// Re-exports for convenience
pub use agent::{AgentServices, AgentSummary, StreamingAgent};
pub use config::SkycastConfig;
pub use errors::StreamError;
pub use types::{ClassCounts, Detection, DetectionClass, DetectionSet, Frame, PixelLayout};
pub use webrtc::{ConnectionState, PeerSession, SessionFactory};

#[cfg(feature = "webrtc")]
pub use webrtc::{RtcPeerSession, RtcSessionFactory};

/// Initialize logging for the agent
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "skycast=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        webrtc: cfg!(feature = "webrtc"),
        hardware: cfg!(feature = "hardware"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with the webrtc-rs transport
    pub webrtc: bool,
    /// Built with camera hardware backends
    pub hardware: bool,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "skycast");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.webrtc, cfg!(feature = "webrtc"));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        log::info!("logging initialized");
    }
}
