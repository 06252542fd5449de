//! # airplay-rtsp
//!
//! RTSP control channel for RAOP receivers.
//!
//! This crate provides:
//! - Request/response formatting
//! - Plaintext RTSP connection management
//! - A per-connection task that runs one request at a time
//! - SDP bodies for ANNOUNCE
//! - The RAOP session state machine

mod connection;
pub mod driver;
mod request;
mod response;
pub mod raop_session;
pub mod sdp;
mod traits;

pub use connection::{RtspConnection, DEFAULT_TIMEOUT};
pub use driver::{ConnectionEvent, ConnectionHandle};
pub use raop_session::{
    parse_transport_header, Outgoing, RaopPorts, RaopSession, RequestKind, SessionParams,
    SessionState, StartMode, Transition,
};
pub use request::{RtspMethod, RtspRequest};
pub use response::RtspResponse;
pub use sdp::SdpBuilder;
pub use traits::RtspTransport;
