//! Audio payload cipher seam.

use airplay_crypto::aes::AesCbcCipher;

/// Encrypts the payload of one audio packet in place.
///
/// Implementations leave any bytes past the last full cipher block
/// untouched; receivers expect that tail in the clear.
pub trait PacketCipher: Send {
    fn encrypt_payload(&self, payload: &mut [u8]);
}

impl PacketCipher for AesCbcCipher {
    fn encrypt_payload(&self, payload: &mut [u8]) {
        // Chain restarts from the stream IV for every packet
        self.encrypt_raop_in_place(payload);
    }
}

/// Pass-through cipher for streams nobody decrypts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCipher;

impl PacketCipher for NullCipher {
    fn encrypt_payload(&self, _payload: &mut [u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_cipher_is_restarted_per_packet() {
        let cipher = AesCbcCipher::new([0x11; 16], [0x22; 16]);
        let mut a = [0xAB; 40];
        let mut b = [0xAB; 40];
        cipher.encrypt_payload(&mut a);
        cipher.encrypt_payload(&mut b);
        assert_eq!(a, b);
        assert_ne!(&a[..32], &[0xAB; 32][..]);
        assert_eq!(&a[32..], &[0xAB; 8][..]);
    }

    #[test]
    fn null_cipher_leaves_payload() {
        let mut data = [7u8; 20];
        NullCipher.encrypt_payload(&mut data);
        assert_eq!(data, [7u8; 20]);
    }
}
