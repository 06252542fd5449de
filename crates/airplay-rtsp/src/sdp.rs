//! SDP builder for RAOP ANNOUNCE requests.
//!
//! Constructs an SDP body declaring ALAC codec parameters and, for
//! encrypted sessions, the wrapped AES key and IV.

use airplay_core::AudioFormat;
use std::net::IpAddr;

/// Builder for RAOP ANNOUNCE SDP bodies.
pub struct SdpBuilder {
    session_id: u32,
    local_ip: IpAddr,
    remote_ip: IpAddr,
    audio_format: AudioFormat,
    /// Base64 (unpadded) RSA-wrapped AES key and IV
    encryption: Option<(String, String)>,
}

impl SdpBuilder {
    pub fn new(session_id: u32, local_ip: IpAddr, remote_ip: IpAddr, audio_format: AudioFormat) -> Self {
        Self {
            session_id,
            local_ip,
            remote_ip,
            audio_format,
            encryption: None,
        }
    }

    /// Add `a=rsaaeskey`/`a=aesiv`. Both values are already base64
    /// encoded without padding.
    pub fn with_encryption(mut self, rsa_aes_key: impl Into<String>, aes_iv: impl Into<String>) -> Self {
        self.encryption = Some((rsa_aes_key.into(), aes_iv.into()));
        self
    }

    /// Build the complete SDP body.
    pub fn build(&self) -> String {
        let mut sdp = format!(
            "v=0\r\n\
             o=iTunes {} 0 IN {} {}\r\n\
             s=iTunes\r\n\
             c=IN {} {}\r\n\
             t=0 0\r\n\
             m=audio 0 RTP/AVP 96\r\n\
             a=rtpmap:96 AppleLossless\r\n\
             a=fmtp:96 {}\r\n",
            self.session_id,
            family(&self.local_ip),
            self.local_ip,
            family(&self.remote_ip),
            self.remote_ip,
            self.audio_format.alac_fmtp(),
        );

        if let Some((key, iv)) = &self.encryption {
            sdp.push_str(&format!("a=rsaaeskey:{}\r\n", key));
            sdp.push_str(&format!("a=aesiv:{}\r\n", iv));
        }

        tracing::trace!("ANNOUNCE SDP:\n{}", sdp);
        sdp
    }
}

fn family(ip: &IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}
