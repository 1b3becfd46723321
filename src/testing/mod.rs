//! Test doubles and synthetic inputs
//!
//! Synthetic camera backends stand in for hardware; the mock session stands
//! in for a WebRTC peer. Both are used by the crate's own tests and by the
//! agent's `--synthetic` mode.

pub mod mock;
pub mod synthetic_data;

pub use mock::{MockFailure, MockPeerSession, MockSessionFactory};
pub use synthetic_data::{
    synthetic_video_frame, FlakyOpener, SyntheticOpener, UnavailableOpener,
};
