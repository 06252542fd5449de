//! RTSP response parsing.
//!
//! Responses arrive in two steps on the wire: a head terminated by an
//! empty line, then `Content-Length` bytes of body. The connection reads
//! them separately, so parsing is split the same way.

use airplay_core::error::{Result, RtspError};
use std::collections::HashMap;

/// Parsed RTSP response.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: impl Into<String>) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Parse the status line and headers, without the blank line.
    pub fn parse_head(head: &str) -> Result<Self> {
        let mut lines = head.lines().map(str::trim_end).filter(|l| !l.is_empty());
        let status_line = lines
            .next()
            .ok_or_else(|| invalid("empty response head"))?;

        let (version, rest) = status_line
            .split_once(' ')
            .ok_or_else(|| invalid(format!("malformed status line: {}", status_line)))?;
        if !version.starts_with("RTSP/") {
            return Err(invalid(format!("not an RTSP response: {}", version)));
        }
        let (code, text) = rest.split_once(' ').unwrap_or((rest, ""));
        let status_code = code
            .parse()
            .map_err(|_| invalid(format!("invalid status code: {}", code)))?;

        let mut response = Self::new(status_code, text);
        for line in lines {
            match line.split_once(':') {
                Some((key, value)) => {
                    response
                        .headers
                        .insert(key.trim().to_string(), value.trim().to_string());
                }
                None => return Err(invalid(format!("malformed header: {}", line))),
            }
        }
        Ok(response)
    }

    /// Parse a complete response held in one buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let head_end = data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| invalid("missing header terminator"))?;
        let head = std::str::from_utf8(&data[..head_end])
            .map_err(|_| invalid("invalid UTF-8 in headers"))?;

        let mut response = Self::parse_head(head)?;
        let body = &data[head_end + 4..];
        let length = response.content_length().unwrap_or(0);
        if body.len() < length {
            return Err(invalid(format!(
                "body too short: expected {} bytes, got {}",
                length,
                body.len()
            )));
        }
        if length > 0 {
            response.body = Some(body[..length].to_vec());
        }
        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// 401, the receiver wants digest credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.parse().ok())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("Content-Length").and_then(|v| v.parse().ok())
    }

    /// Session id without any `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
            .filter(|v| !v.is_empty())
    }

    pub fn www_authenticate(&self) -> Option<&str> {
        self.header("WWW-Authenticate")
    }

    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(RtspError::UnexpectedStatus(self.status_code).into())
        }
    }
}

fn invalid(message: impl Into<String>) -> airplay_core::Error {
    RtspError::InvalidResponse(message.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod head {
        use super::*;

        #[test]
        fn setup_reply_headers() {
            let head = "RTSP/1.0 200 OK\r\n\
                        CSeq: 3\r\n\
                        Session: 1A2B;timeout=60\r\n\
                        Transport: RTP/AVP/UDP;unicast;mode=record;server_port=6000;control_port=6001;timing_port=6002\r\n\
                        Audio-Jack-Status: connected; type=analog\r\n";
            let response = RtspResponse::parse_head(head).unwrap();
            assert_eq!(response.status_code, 200);
            assert_eq!(response.cseq(), Some(3));
            assert_eq!(response.session_id(), Some("1A2B"));
            assert!(response.header("transport").unwrap().contains("control_port=6001"));
            assert_eq!(response.header("Audio-Jack-Status"), Some("connected; type=analog"));
            assert!(response.body.is_none());
        }

        #[test]
        fn status_text_is_optional() {
            let response = RtspResponse::parse_head("RTSP/1.0 200").unwrap();
            assert_eq!(response.status_code, 200);
            assert_eq!(response.status_text, "");
        }

        #[test]
        fn multiword_status_text() {
            let response = RtspResponse::parse_head("RTSP/1.0 453 Not Enough Bandwidth").unwrap();
            assert_eq!(response.status_text, "Not Enough Bandwidth");
            assert!(!response.is_success());
        }

        #[test]
        fn rejects_other_protocols() {
            assert!(RtspResponse::parse_head("HTTP/1.1 200 OK").is_err());
            assert!(RtspResponse::parse_head("RTSP/1.0 abc OK").is_err());
            assert!(RtspResponse::parse_head("").is_err());
        }

        #[test]
        fn rejects_header_without_colon() {
            assert!(RtspResponse::parse_head("RTSP/1.0 200 OK\r\nGarbage\r\n").is_err());
        }

        #[test]
        fn digest_challenge() {
            let head = "RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\nWWW-Authenticate: Digest realm=\"raop\", nonce=\"abc\"";
            let response = RtspResponse::parse_head(head).unwrap();
            assert!(response.is_unauthorized());
            assert_eq!(
                response.www_authenticate(),
                Some("Digest realm=\"raop\", nonce=\"abc\"")
            );
        }
    }

    mod buffer {
        use super::*;

        #[test]
        fn body_sized_by_content_length() {
            let response =
                RtspResponse::parse(b"RTSP/1.0 200 OK\r\nContent-Length: 2\r\n\r\nokEXTRA").unwrap();
            assert_eq!(response.body, Some(b"ok".to_vec()));
        }

        #[test]
        fn truncated_body_is_an_error() {
            assert!(RtspResponse::parse(b"RTSP/1.0 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
        }

        #[test]
        fn unterminated_head_is_an_error() {
            assert!(RtspResponse::parse(b"RTSP/1.0 200 OK\r\nCSeq: 1").is_err());
        }
    }

    mod status {
        use super::*;

        #[test]
        fn success_is_2xx_only() {
            for (code, ok) in [(199, false), (200, true), (299, true), (300, false), (401, false)] {
                assert_eq!(RtspResponse::new(code, "").is_success(), ok, "status {}", code);
            }
        }

        #[test]
        fn ensure_success_reports_code() {
            let err = RtspResponse::new(453, "Not Enough Bandwidth")
                .ensure_success()
                .unwrap_err();
            assert!(matches!(
                err,
                airplay_core::Error::Rtsp(RtspError::UnexpectedStatus(453))
            ));
        }

        #[test]
        fn blank_session_is_none() {
            let response = RtspResponse::new(200, "OK").with_header("Session", " ;timeout=30");
            assert_eq!(response.session_id(), None);
        }
    }
}
