//! RTSP request formatting.

use std::collections::HashMap;

/// RTSP methods spoken to RAOP receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtspMethod {
    Options,
    Announce,
    Setup,
    Record,
    SetParameter,
    Flush,
    Teardown,
}

/// RTSP request builder.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl RtspRequest {
    pub fn new(method: RtspMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a header on an already built request.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize to wire format.
    ///
    /// Format:
    /// ```text
    /// METHOD URI RTSP/1.0\r\n
    /// CSeq: N\r\n
    /// Content-Length: M\r\n  (if body present)
    /// Header: Value\r\n
    /// ...
    /// \r\n
    /// [body]
    /// ```
    pub fn serialize(&self, cseq: u32) -> Vec<u8> {
        let mut head = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", self.method.as_str(), self.uri, cseq);

        if let Some(ref body) = self.body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }

        // Sorted for stable output
        let mut sorted_headers: Vec<_> = self.headers.iter().collect();
        sorted_headers.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in sorted_headers {
            head.push_str(&format!("{}: {}\r\n", key, value));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        if let Some(ref body) = self.body {
            out.extend_from_slice(body);
        }
        out
    }

    // Factory methods for the RAOP request set

    pub fn options() -> Self {
        Self::new(RtspMethod::Options, "*")
    }

    pub fn announce(uri: impl Into<String>, sdp: impl Into<Vec<u8>>) -> Self {
        Self::new(RtspMethod::Announce, uri)
            .header("Content-Type", "application/sdp")
            .body(sdp)
    }

    /// SETUP with a `Transport` header negotiating UDP ports:
    /// `RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port=N;timing_port=M`
    pub fn setup(uri: impl Into<String>, transport: impl Into<String>) -> Self {
        Self::new(RtspMethod::Setup, uri).header("Transport", transport)
    }

    pub fn record(uri: impl Into<String>, seq: u16, rtptime: u32) -> Self {
        Self::new(RtspMethod::Record, uri)
            .header("Range", "npt=0-")
            .header("RTP-Info", format!("seq={};rtptime={}", seq, rtptime))
    }

    pub fn set_parameter_text(uri: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(RtspMethod::SetParameter, uri)
            .header("Content-Type", "text/parameters")
            .body(body)
    }

    /// Volume in the receiver's attenuation domain (-144.0 is mute).
    pub fn set_volume(uri: impl Into<String>, attenuation: f32) -> Self {
        Self::set_parameter_text(uri, format!("volume: {:.6}\r\n", attenuation))
    }

    /// DMAP-tagged song metadata.
    pub fn set_metadata(uri: impl Into<String>, rtptime: u32, tags: impl Into<Vec<u8>>) -> Self {
        Self::new(RtspMethod::SetParameter, uri)
            .header("Content-Type", "application/x-dmap-tagged")
            .header("RTP-Info", format!("rtptime={}", rtptime))
            .body(tags)
    }

    pub fn set_artwork(
        uri: impl Into<String>,
        rtptime: u32,
        content_type: &str,
        image: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(RtspMethod::SetParameter, uri)
            .header("Content-Type", content_type)
            .header("RTP-Info", format!("rtptime={}", rtptime))
            .body(image)
    }

    /// `progress: start/current/end`, all in RTP time.
    pub fn set_progress(uri: impl Into<String>, rtptime: u32, start: u32, current: u32, end: u32) -> Self {
        Self::set_parameter_text(uri, format!("progress: {}/{}/{}\r\n", start, current, end))
            .header("RTP-Info", format!("rtptime={}", rtptime))
    }

    pub fn flush(uri: impl Into<String>, seq: u16, rtptime: u32) -> Self {
        Self::new(RtspMethod::Flush, uri)
            .header("RTP-Info", format!("seq={};rtptime={}", seq, rtptime))
    }

    pub fn teardown(uri: impl Into<String>) -> Self {
        Self::new(RtspMethod::Teardown, uri)
    }
}

impl RtspMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::SetParameter => "SET_PARAMETER",
            Self::Flush => "FLUSH",
            Self::Teardown => "TEARDOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(req: &RtspRequest, cseq: u32) -> String {
        String::from_utf8(req.serialize(cseq)).unwrap()
    }

    mod request_building {
        use super::*;

        #[test]
        fn new_creates_request_with_method_and_uri() {
            let req = RtspRequest::new(RtspMethod::Options, "*");
            assert_eq!(req.method, RtspMethod::Options);
            assert_eq!(req.uri, "*");
            assert!(req.headers.is_empty());
            assert!(req.body.is_none());
        }

        #[test]
        fn set_header_overwrites() {
            let mut req = RtspRequest::options().header("Session", "1");
            req.set_header("Session", "2");
            assert_eq!(req.headers.get("Session"), Some(&"2".to_string()));
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn serialize_includes_request_line_and_cseq() {
            let out = text(&RtspRequest::options(), 42);
            assert!(out.starts_with("OPTIONS * RTSP/1.0\r\nCSeq: 42\r\n"));
        }

        #[test]
        fn serialize_includes_content_length_and_body() {
            let req = RtspRequest::set_parameter_text("rtsp://h/1", "volume: -20.000000\r\n");
            let data = req.serialize(3);
            let out = String::from_utf8_lossy(&data);
            assert!(out.contains("Content-Length: 20\r\n"));
            assert!(out.ends_with("\r\n\r\nvolume: -20.000000\r\n"));
        }

        #[test]
        fn serialize_uses_crlf_line_endings() {
            let data = RtspRequest::record("rtsp://h/1", 1, 2).serialize(1);
            for (i, &byte) in data.iter().enumerate() {
                if byte == b'\n' {
                    assert!(i > 0 && data[i - 1] == b'\r', "bare LF at position {}", i);
                }
            }
        }

        #[test]
        fn serialize_ends_with_double_crlf_when_no_body() {
            assert!(RtspRequest::teardown("rtsp://h/1").serialize(1).ends_with(b"\r\n\r\n"));
        }
    }

    mod factory_methods {
        use super::*;

        #[test]
        fn announce_is_sdp() {
            let req = RtspRequest::announce("rtsp://h/1", "v=0\r\n");
            assert_eq!(req.method, RtspMethod::Announce);
            assert_eq!(req.headers.get("Content-Type").unwrap(), "application/sdp");
        }

        #[test]
        fn record_carries_range_and_rtp_info() {
            let req = RtspRequest::record("rtsp://h/1", 513, 88200);
            assert_eq!(req.headers.get("Range").unwrap(), "npt=0-");
            assert_eq!(req.headers.get("RTP-Info").unwrap(), "seq=513;rtptime=88200");
        }

        #[test]
        fn volume_uses_six_decimals() {
            let req = RtspRequest::set_volume("rtsp://h/1", -144.0);
            assert_eq!(req.body.unwrap(), b"volume: -144.000000\r\n".to_vec());
        }

        #[test]
        fn metadata_requests_carry_rtptime() {
            let req = RtspRequest::set_metadata("rtsp://h/1", 1000, vec![1, 2, 3]);
            assert_eq!(req.headers.get("Content-Type").unwrap(), "application/x-dmap-tagged");
            assert_eq!(req.headers.get("RTP-Info").unwrap(), "rtptime=1000");

            let req = RtspRequest::set_artwork("rtsp://h/1", 1000, "image/png", vec![0x89]);
            assert_eq!(req.headers.get("Content-Type").unwrap(), "image/png");

            let req = RtspRequest::set_progress("rtsp://h/1", 1000, 10, 20, 30);
            assert_eq!(req.headers.get("Content-Type").unwrap(), "text/parameters");
            assert_eq!(req.body.unwrap(), b"progress: 10/20/30\r\n".to_vec());
        }

        #[test]
        fn flush_carries_rtp_info() {
            let req = RtspRequest::flush("rtsp://h/1", 7, 99);
            assert_eq!(req.method, RtspMethod::Flush);
            assert_eq!(req.headers.get("RTP-Info").unwrap(), "seq=7;rtptime=99");
        }
    }

    #[test]
    fn all_methods_have_correct_string() {
        assert_eq!(RtspMethod::Options.as_str(), "OPTIONS");
        assert_eq!(RtspMethod::Announce.as_str(), "ANNOUNCE");
        assert_eq!(RtspMethod::Setup.as_str(), "SETUP");
        assert_eq!(RtspMethod::Record.as_str(), "RECORD");
        assert_eq!(RtspMethod::SetParameter.as_str(), "SET_PARAMETER");
        assert_eq!(RtspMethod::Flush.as_str(), "FLUSH");
        assert_eq!(RtspMethod::Teardown.as_str(), "TEARDOWN");
    }
}
