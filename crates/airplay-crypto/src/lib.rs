//! # airplay-crypto
//!
//! Cryptographic primitives for RAOP session setup and audio streaming.
//!
//! This crate provides:
//! - AES-128-CBC with the RAOP clear-tail rule
//! - RSA-OAEP (SHA-1) wrapping of the stream key
//! - Digest authentication for password-protected receivers
//! - Process-wide stream key material
//!
//! Secret key material is zeroized on drop.

pub mod aes;
pub mod digest;
pub mod keys;
pub mod rsa;

pub use aes::AesCbcCipher;
pub use digest::DigestChallenge;
pub use keys::StreamKeys;
