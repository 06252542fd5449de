//! AES-128-CBC encryption for RAOP audio.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use airplay_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// AES-128-CBC cipher for RAOP audio payloads.
///
/// Every packet is encrypted independently: the chain restarts from the
/// fixed IV on each call, and trailing bytes that do not fill a block are
/// left in the clear.
#[derive(ZeroizeOnDrop)]
pub struct AesCbcCipher {
    key: [u8; 16],
    #[zeroize(skip)]
    iv: [u8; 16],
    #[zeroize(skip)]
    cipher: Aes128,
}

impl AesCbcCipher {
    /// Create cipher with 16-byte key and IV.
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        let cipher = Aes128::new(&key.into());
        Self { key, iv, cipher }
    }

    /// Build from slices, checking lengths.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; 16] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 16,
            actual: key.len(),
        })?;
        let iv: [u8; 16] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 16,
            actual: iv.len(),
        })?;
        Ok(Self::new(key, iv))
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    /// Length of the block-aligned prefix of a payload of `len` bytes.
    pub fn encrypted_len(len: usize) -> usize {
        len / BLOCK_SIZE * BLOCK_SIZE
    }

    /// RAOP encryption in place: only full 16-byte blocks are encrypted,
    /// trailing bytes are untouched. The chain starts from the stored IV.
    pub fn encrypt_raop_in_place(&self, payload: &mut [u8]) {
        let full_len = Self::encrypted_len(payload.len());
        let mut prev = self.iv;

        for chunk in payload[..full_len].chunks_exact_mut(BLOCK_SIZE) {
            for (byte, p) in chunk.iter_mut().zip(prev.iter()) {
                *byte ^= p;
            }
            self.cipher.encrypt_block(Block::from_mut_slice(chunk));
            prev.copy_from_slice(chunk);
        }
    }

    /// Encrypt a copy of `payload` with the RAOP tail rule.
    pub fn encrypt_raop(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        self.encrypt_raop_in_place(&mut out);
        out
    }

    /// Inverse of [`encrypt_raop_in_place`](Self::encrypt_raop_in_place),
    /// as a receiver would apply it.
    pub fn decrypt_raop_in_place(&self, payload: &mut [u8]) {
        let full_len = Self::encrypted_len(payload.len());
        let mut prev = self.iv;

        for chunk in payload[..full_len].chunks_exact_mut(BLOCK_SIZE) {
            let mut saved = [0u8; BLOCK_SIZE];
            saved.copy_from_slice(chunk);
            self.cipher.decrypt_block(Block::from_mut_slice(chunk));
            for (byte, p) in chunk.iter_mut().zip(prev.iter()) {
                *byte ^= p;
            }
            prev = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nist_cipher() -> AesCbcCipher {
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        AesCbcCipher::from_slices(&key, &iv).unwrap()
    }

    #[test]
    fn rejects_bad_key_length() {
        let result = AesCbcCipher::from_slices(&[0u8; 15], &[0u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 15
            })
        ));
        assert!(AesCbcCipher::from_slices(&[0u8; 16], &[0u8; 8]).is_err());
    }

    #[test]
    fn nist_test_vector_multiple_blocks() {
        // NIST SP 800-38A - F.2.1 CBC-AES128.Encrypt (4 blocks)
        let plaintext = hex::decode(concat!(
            "6bc1bee22e409f96e93d7e117393172a",
            "ae2d8a571e03ac9c9eb76fac45af8e51",
            "30c81c46a35ce411e5fbc1191a0a52ef",
            "f69f2445df4f9b17ad2b417be66c3710"
        ))
        .unwrap();
        let expected = hex::decode(concat!(
            "7649abac8119b246cee98e9b12e9197d",
            "5086cb9b507219ee95db113a917678b2",
            "73bed6b8e3c1743b7116e69e22229516",
            "3ff1caa1681fac09120eca307586e1a7"
        ))
        .unwrap();

        let cipher = nist_cipher();
        let ciphertext = cipher.encrypt_raop(&plaintext);
        assert_eq!(ciphertext, expected);

        let mut decrypted = ciphertext.clone();
        cipher.decrypt_raop_in_place(&mut decrypted);
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn partial_block_passes_through() {
        let cipher = AesCbcCipher::new([0x42u8; 16], [0x24u8; 16]);

        let mut payload = [0xABu8; 20];
        payload[16..].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let encrypted = cipher.encrypt_raop(&payload);
        assert_eq!(encrypted.len(), 20);
        assert_ne!(&encrypted[..16], &payload[..16]);
        assert_eq!(&encrypted[16..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn less_than_one_block_is_unchanged() {
        let cipher = AesCbcCipher::new([0u8; 16], [0u8; 16]);
        let payload = [0x42u8; 10];
        assert_eq!(cipher.encrypt_raop(&payload), payload);
        assert!(cipher.encrypt_raop(&[]).is_empty());
    }

    #[test]
    fn every_call_restarts_from_fixed_iv() {
        let cipher = AesCbcCipher::new([0x42u8; 16], [0x24u8; 16]);
        let payload = [0xABu8; 1411];
        assert_eq!(cipher.encrypt_raop(&payload), cipher.encrypt_raop(&payload));
    }

    #[test]
    fn tail_matches_cleartext_for_any_key() {
        for seed in 0u8..8 {
            let cipher = AesCbcCipher::new([seed; 16], [seed.wrapping_mul(31); 16]);
            let payload: Vec<u8> = (0..1411u32).map(|i| (i as u8) ^ seed).collect();
            let encrypted = cipher.encrypt_raop(&payload);
            let tail = AesCbcCipher::encrypted_len(payload.len());
            assert_eq!(tail, 1408);
            assert_eq!(&encrypted[tail..], &payload[tail..]);
        }
    }
}
