//! Process-wide stream key material.
//!
//! RAOP receivers are all handed the same AES key and IV for the lifetime
//! of the sender.

use crate::aes::AesCbcCipher;
use crate::rsa;
use airplay_core::error::CryptoError;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use once_cell::sync::OnceCell;
use rand::Rng;
use zeroize::ZeroizeOnDrop;

/// AES key/IV shared by every session, plus the cached SDP encodings.
#[derive(ZeroizeOnDrop)]
pub struct StreamKeys {
    key: [u8; 16],
    #[zeroize(skip)]
    iv: [u8; 16],
    #[zeroize(skip)]
    wrapped_key: OnceCell<String>,
}

impl StreamKeys {
    /// Generate a fresh random key and IV.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self::from_parts(rng.gen(), rng.gen())
    }

    pub fn from_parts(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            key,
            iv,
            wrapped_key: OnceCell::new(),
        }
    }

    /// Packet cipher keyed with this material.
    pub fn cipher(&self) -> AesCbcCipher {
        AesCbcCipher::new(self.key, self.iv)
    }

    /// RSA-wrapped key, base64 without padding. Computed on first use and
    /// reused by every later session.
    pub fn wrapped_key_base64(&self) -> Result<&str, CryptoError> {
        self.wrapped_key
            .get_or_try_init(|| {
                let wrapped = rsa::encrypt_aes_key(&self.key)?;
                Ok(STANDARD_NO_PAD.encode(wrapped))
            })
            .map(String::as_str)
    }

    /// IV as base64 without padding.
    pub fn iv_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.iv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = StreamKeys::generate();
        let b = StreamKeys::generate();
        assert_ne!(a.cipher().key(), b.cipher().key());
    }

    #[test]
    fn wrapped_key_is_cached() {
        let keys = StreamKeys::from_parts([1u8; 16], [2u8; 16]);
        let first = keys.wrapped_key_base64().unwrap().to_string();
        let second = keys.wrapped_key_base64().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn encodings_have_no_padding() {
        let keys = StreamKeys::from_parts([1u8; 16], [2u8; 16]);
        let wrapped = keys.wrapped_key_base64().unwrap();
        // 256 bytes of ciphertext encode to 342 unpadded characters
        assert_eq!(wrapped.len(), 342);
        assert!(!wrapped.ends_with('='));

        let iv = keys.iv_base64();
        assert_eq!(iv.len(), 22);
        assert!(!iv.contains('='));
    }

    #[test]
    fn cipher_uses_shared_iv() {
        let keys = StreamKeys::from_parts([1u8; 16], [2u8; 16]);
        assert_eq!(keys.cipher().iv(), &[2u8; 16]);
    }
}
