//! Offer/answer signaling
//!
//! [`description`] holds the session description types and their JSON
//! shapes. [`coordinator`] runs the publish and subscribe flows on top of a
//! connectivity engine.

pub mod coordinator;
pub mod description;

pub use coordinator::{
    Negotiated, SignalingCoordinator, DEFAULT_CONNECT_TIMEOUT, DEFAULT_NEGOTIATION_TIMEOUT,
};
pub use description::{
    DescriptionError, ErrorResponse, OfferBody, SdpType, SessionDescription, SignalingRequest,
    SignalingResponse,
};
