//! RSA-OAEP wrapping of the stream AES key.
//!
//! Receivers embed the private half of a well-known 2048-bit key pair
//! (published with the AirPort Express). The sender wraps its AES key
//! with the public half using OAEP over SHA-1 with an empty label.

use airplay_core::error::CryptoError;
use rand::rngs::ThreadRng;
use rsa::{BigUint, Oaep, RsaPublicKey};
use sha1::Sha1;

/// Public modulus shared by every RAOP receiver, big-endian.
pub const RAOP_MODULUS: [u8; 256] = [
    0xe7, 0xd7, 0x44, 0xf2, 0xa2, 0xe2, 0x78, 0x8b, 0x6c, 0x1f, 0x55, 0xa0, 0x8e, 0xb7, 0x05, 0x44,
    0xa8, 0xfa, 0x79, 0x45, 0xaa, 0x8b, 0xe6, 0xc6, 0x2c, 0xe5, 0xf5, 0x1c, 0xbd, 0xd4, 0xdc, 0x68,
    0x42, 0xfe, 0x3d, 0x10, 0x83, 0xdd, 0x2e, 0xde, 0xc1, 0xbf, 0xd4, 0x25, 0x2d, 0xc0, 0x2e, 0x6f,
    0x39, 0x8b, 0xdf, 0x0e, 0x61, 0x48, 0xea, 0x84, 0x85, 0x5e, 0x2e, 0x44, 0x2d, 0xa6, 0xd6, 0x26,
    0x64, 0xf6, 0x74, 0xa1, 0xf3, 0x04, 0x92, 0x9a, 0xde, 0x4f, 0x68, 0x93, 0xef, 0x2d, 0xf6, 0xe7,
    0x11, 0xa8, 0xc7, 0x7a, 0x0d, 0x91, 0xc9, 0xd9, 0x80, 0x82, 0x2e, 0x50, 0xd1, 0x29, 0x22, 0xaf,
    0xea, 0x40, 0xea, 0x9f, 0x0e, 0x14, 0xc0, 0xf7, 0x69, 0x38, 0xc5, 0xf3, 0x88, 0x2f, 0xc0, 0x32,
    0x3d, 0xd9, 0xfe, 0x55, 0x15, 0x5f, 0x51, 0xbb, 0x59, 0x21, 0xc2, 0x01, 0x62, 0x9f, 0xd7, 0x33,
    0x52, 0xd5, 0xe2, 0xef, 0xaa, 0xbf, 0x9b, 0xa0, 0x48, 0xd7, 0xb8, 0x13, 0xa2, 0xb6, 0x76, 0x7f,
    0x6c, 0x3c, 0xcf, 0x1e, 0xb4, 0xce, 0x67, 0x3d, 0x03, 0x7b, 0x0d, 0x2e, 0xa3, 0x0c, 0x5f, 0xff,
    0xeb, 0x06, 0xf8, 0xd0, 0x8a, 0xdd, 0xe4, 0x09, 0x57, 0x1a, 0x9c, 0x68, 0x9f, 0xef, 0x10, 0x72,
    0x88, 0x55, 0xdd, 0x8c, 0xfb, 0x9a, 0x8b, 0xef, 0x5c, 0x89, 0x43, 0xef, 0x3b, 0x5f, 0xaa, 0x15,
    0xdd, 0xe6, 0x98, 0xbe, 0xdd, 0xf3, 0x59, 0x96, 0x03, 0xeb, 0x3e, 0x6f, 0x61, 0x37, 0x2b, 0xb6,
    0x28, 0xf6, 0x55, 0x9f, 0x59, 0x9a, 0x78, 0xbf, 0x50, 0x06, 0x87, 0xaa, 0x7f, 0x49, 0x76, 0xc0,
    0x56, 0x2d, 0x41, 0x29, 0x56, 0xf8, 0x98, 0x9e, 0x18, 0xa6, 0x35, 0x5b, 0xd8, 0x15, 0x97, 0x82,
    0x5e, 0x0f, 0xc8, 0x75, 0x34, 0x3e, 0xc7, 0x82, 0x11, 0x76, 0x25, 0xcd, 0xbf, 0x98, 0x44, 0x7b,
];

/// Public exponent (65537), big-endian.
pub const RAOP_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// The receiver public key.
pub fn raop_public_key() -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::new(
        BigUint::from_bytes_be(&RAOP_MODULUS),
        BigUint::from_bytes_be(&RAOP_EXPONENT),
    )
    .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Wrap an AES key for the `a=rsaaeskey` SDP attribute.
pub fn encrypt_aes_key(key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt_aes_key_with(&raop_public_key()?, key, &mut rand::thread_rng())
}

/// Wrap `key` with an arbitrary public key.
pub fn encrypt_aes_key_with(
    public_key: &RsaPublicKey,
    key: &[u8],
    rng: &mut ThreadRng,
) -> Result<Vec<u8>, CryptoError> {
    public_key
        .encrypt(rng, Oaep::new::<Sha1>(), key)
        .map_err(|e| CryptoError::Encryption(format!("RSA-OAEP: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;

    #[test]
    fn receiver_key_is_2048_bits() {
        let key = raop_public_key().unwrap();
        assert_eq!(key.size(), 256);
        assert_eq!(key.e(), &BigUint::from(65537u32));
    }

    #[test]
    fn wrapped_key_fills_modulus() {
        let wrapped = encrypt_aes_key(&[0x42u8; 16]).unwrap();
        assert_eq!(wrapped.len(), 256);
    }

    #[test]
    fn wrapping_is_randomized() {
        let a = encrypt_aes_key(&[0x42u8; 16]).unwrap();
        let b = encrypt_aes_key(&[0x42u8; 16]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oaep_sha1_round_trip() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let aes_key = [0xABu8; 16];
        let wrapped = encrypt_aes_key_with(&public_key, &aes_key, &mut rng).unwrap();
        let unwrapped = private_key.decrypt(Oaep::new::<Sha1>(), &wrapped).unwrap();
        assert_eq!(unwrapped, aes_key);
    }
}
