//! # airplay-core
//!
//! Core types and error definitions shared across the RAOP sender crates.
//!
//! This crate provides:
//! - Device representation and identification
//! - Audio format definitions
//! - Sender and per-device configuration
//! - Common error types

pub mod codec;
pub mod config;
pub mod device;
pub mod error;

pub use codec::{AudioFormat, ALAC_PAYLOAD_TYPE, FRAMES_PER_PACKET};
pub use config::{DeviceConfig, SenderConfig, MAX_VOLUME_CAP};
pub use device::{Device, DeviceId, DEFAULT_RAOP_PORT};
pub use error::{
    AuthError, CryptoError, Error, ParseError, Result, RtspError, StreamingError,
};
