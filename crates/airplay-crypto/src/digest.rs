//! Digest authentication (RFC 2617) for password-protected RAOP receivers.
//!
//! The scheme uses MD5:
//!   HA1 = MD5(username:realm:password)
//!   HA2 = MD5(method:uri)
//!   response = MD5(HA1:nonce:HA2)
//!
//! AirPort Express class receivers expect uppercase hex and the username
//! `iTunes`; everything else expects lowercase hex and an empty username.

use airplay_core::error::AuthError;
use md5::{Digest, Md5};

/// Username sent to receivers that need the legacy digest variant.
pub const LEGACY_USERNAME: &str = "iTunes";

/// Realm and nonce taken from a `WWW-Authenticate: Digest ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header.
    pub fn parse(www_authenticate: &str) -> Result<Self, AuthError> {
        let params = www_authenticate
            .trim()
            .strip_prefix("Digest ")
            .ok_or_else(|| AuthError::MalformedChallenge(www_authenticate.to_string()))?;

        let realm = extract_field(params, "realm")
            .ok_or_else(|| AuthError::MalformedChallenge("missing realm".to_string()))?;
        let nonce = extract_field(params, "nonce")
            .ok_or_else(|| AuthError::MalformedChallenge("missing nonce".to_string()))?;

        Ok(Self {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
        })
    }

    /// Build the `Authorization` header value for one request.
    pub fn authorization(&self, password: &str, method: &str, uri: &str, legacy: bool) -> String {
        let username = if legacy { LEGACY_USERNAME } else { "" };
        let response = self.response(username, password, method, uri, legacy);

        format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            username, self.realm, self.nonce, uri, response
        )
    }

    fn response(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        uppercase: bool,
    ) -> String {
        let ha1 = md5_hex(&format!("{}:{}:{}", username, self.realm, password), uppercase);
        let ha2 = md5_hex(&format!("{}:{}", method, uri), uppercase);
        md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2), uppercase)
    }
}

/// Extract a quoted field value from a Digest challenge header.
///
/// Looks for `field="value"` in the header string.
fn extract_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let pattern = format!("{}=\"", field);
    let start = header.find(&pattern)? + pattern.len();
    let rest = &header[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn md5_hex(input: &str, uppercase: bool) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    if uppercase {
        hex::encode_upper(digest)
    } else {
        hex::encode(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_produces_correct_output() {
        assert_eq!(md5_hex("", false), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc", false), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_hex("abc", true), "900150983CD24FB0D6963F7D28E17F72");
    }

    mod challenge_parsing {
        use super::*;

        #[test]
        fn parses_realm_and_nonce() {
            let challenge =
                DigestChallenge::parse(r#"Digest realm="raop", nonce="abc123""#).unwrap();
            assert_eq!(challenge.realm, "raop");
            assert_eq!(challenge.nonce, "abc123");
        }

        #[test]
        fn rejects_basic_scheme() {
            let result = DigestChallenge::parse(r#"Basic realm="raop""#);
            assert!(matches!(result, Err(AuthError::MalformedChallenge(_))));
        }

        #[test]
        fn rejects_missing_nonce() {
            let result = DigestChallenge::parse(r#"Digest realm="raop""#);
            assert!(matches!(result, Err(AuthError::MalformedChallenge(_))));
        }
    }

    mod response_computation {
        use super::*;

        #[test]
        fn rfc2617_test_vector() {
            // RFC 2617 Section 3.5 example, without qop
            let challenge = DigestChallenge {
                realm: "testrealm@host.com".to_string(),
                nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".to_string(),
            };
            let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life", false);
            let ha2 = md5_hex("GET:/dir/index.html", false);
            let expected = md5_hex(
                &format!("{}:dcd98b7102dd2f0e8b11d0f600bfb0c093:{}", ha1, ha2),
                false,
            );

            let response = challenge.response(
                "Mufasa",
                "Circle Of Life",
                "GET",
                "/dir/index.html",
                false,
            );
            assert_eq!(response, expected);
        }

        #[test]
        fn modern_receivers_get_empty_username_and_lowercase() {
            let challenge = DigestChallenge {
                realm: "r".to_string(),
                nonce: "n".to_string(),
            };
            let header = challenge.authorization("pw", "OPTIONS", "*", false);

            let ha1 = md5_hex(":r:pw", false);
            let ha2 = md5_hex("OPTIONS:*", false);
            let expected = md5_hex(&format!("{}:n:{}", ha1, ha2), false);

            assert!(header.starts_with("Digest username=\"\""));
            assert!(header.contains("uri=\"*\""));
            assert!(header.contains(&format!("response=\"{}\"", expected)));
        }

        #[test]
        fn legacy_receivers_get_itunes_and_uppercase() {
            let challenge = DigestChallenge {
                realm: "r".to_string(),
                nonce: "n".to_string(),
            };
            let header = challenge.authorization("pw", "OPTIONS", "*", true);

            let ha1 = md5_hex("iTunes:r:pw", true);
            let ha2 = md5_hex("OPTIONS:*", true);
            let expected = md5_hex(&format!("{}:n:{}", ha1, ha2), true);

            assert!(header.contains("username=\"iTunes\""));
            assert!(header.contains(&format!("response=\"{}\"", expected)));
            assert!(expected.chars().all(|c| !c.is_ascii_lowercase()));
        }
    }
}
