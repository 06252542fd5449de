//! Error types for the RAOP sender.

use thiserror::Error;

/// Primary error type for all sender operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("RTSP error: {0}")]
    Rtsp(#[from] RtspError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Sender reactor is no longer running")]
    SenderClosed,
}

/// Errors during RTSP communication.
#[derive(Error, Debug)]
pub enum RtspError {
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    #[error("Invalid transport: {0}")]
    InvalidTransport(String),

    #[error("Session not established")]
    NoSession,

    #[error("Request already in flight (CSeq {0})")]
    RequestInFlight(u32),

    #[error("Connection closed by device")]
    ConnectionClosed,
}

/// Digest authentication failures.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Device sent 401 without a WWW-Authenticate header")]
    MissingChallenge,

    #[error("Malformed digest challenge: {0}")]
    MalformedChallenge(String),
}

/// Errors during audio streaming.
#[derive(Error, Debug)]
pub enum StreamingError {
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("Audio socket send failed: {0}")]
    SendFailed(String),

    #[error("Sequence range {start}+{count} outside retained window")]
    OutOfWindow { start: u16, count: u16 },
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Parsing errors for wire formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Datagram too short: expected {expected}, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let auth_err = Error::Auth(AuthError::MissingChallenge);
        assert!(auth_err.to_string().contains("Authentication error"));
        assert!(auth_err.to_string().contains("WWW-Authenticate"));

        let status_err = Error::Rtsp(RtspError::UnexpectedStatus(453));
        assert!(status_err.to_string().contains("453"));

        let window_err = Error::Streaming(StreamingError::OutOfWindow {
            start: 10,
            count: 4,
        });
        assert!(window_err.to_string().contains("10+4"));

        let timeout_err = Error::Timeout;
        assert!(timeout_err.to_string().contains("timed out"));

        let config_err = Error::Config("bad client_instance".to_string());
        assert!(config_err.to_string().contains("client_instance"));
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error as StdError;

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let conn_err = Error::Connection(io_err);
        assert!(conn_err.source().is_some());

        let err = Error::Rtsp(RtspError::MissingHeader("Session".to_string()));
        assert!(err.source().is_some());
    }

    #[test]
    fn error_conversions() {
        let err: Error = RtspError::ConnectionClosed.into();
        assert!(matches!(err, Error::Rtsp(_)));

        let err: Error = AuthError::MalformedChallenge("no nonce".to_string()).into();
        assert!(matches!(err, Error::Auth(_)));

        let err: Error = StreamingError::Encoding("x".to_string()).into();
        assert!(matches!(err, Error::Streaming(_)));

        let err: Error = CryptoError::Encryption("x".to_string()).into();
        assert!(matches!(err, Error::Crypto(_)));

        let err: Error = ParseError::InvalidFormat("RTP version 1".to_string()).into();
        assert!(matches!(err, Error::Parse(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Connection(_)));
    }
}
