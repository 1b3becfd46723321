//! Bus messages and offer/answer negotiation

pub mod bus;
pub mod candidates;
pub mod client;
pub mod message;

pub use bus::{connect_websocket, BusEvent, BusHandle, BusPeer, MessageBus, ReconnectPolicy};
pub use candidates::PendingCandidateBuffer;
pub use client::{NegotiationState, SignalingClient};
pub use message::{decode_inbound, InboundMessage, Outbound, SignalingMessage};
