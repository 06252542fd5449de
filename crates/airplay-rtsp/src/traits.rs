//! Traits for RTSP transport abstraction.

use crate::{RtspRequest, RtspResponse};
use airplay_core::error::Result;
use async_trait::async_trait;

/// RTSP transport trait for testability.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait RtspTransport: Send {
    /// Send a request stamped with `cseq` and receive its response.
    async fn send(&mut self, cseq: u32, request: RtspRequest) -> Result<RtspResponse>;

    /// Resolve once the peer closes the connection while no request is
    /// outstanding.
    async fn closed(&mut self);

    /// Check if connected.
    fn is_connected(&self) -> bool;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_returns_configured_response() {
        let mut mock = MockRtspTransport::new();

        mock.expect_send()
            .returning(|_cseq, _request| Box::pin(async { Ok(RtspResponse::new(200, "OK")) }));
        mock.expect_is_connected().returning(|| true);

        let response = mock.send(1, RtspRequest::options()).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_text, "OK");
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_can_simulate_error() {
        let mut mock = MockRtspTransport::new();

        mock.expect_send().returning(|_cseq, _request| {
            Box::pin(async { Err(airplay_core::error::RtspError::ConnectionClosed.into()) })
        });

        let result = mock.send(1, RtspRequest::options()).await;
        assert!(result.is_err());
    }
}
