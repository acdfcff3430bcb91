//! Per-device key derivation and the Gen3 dual-chunk packet cipher.
//!
//! The cube does not chain CBC across the whole packet. Instead the first
//! 16 bytes and the last 16 bytes are each run through AES-128-CBC as a
//! single block under the same key and IV; bytes strictly between the two
//! chunks (possible only above 32 bytes) pass through untouched. Decryption
//! must process the trailing chunk before the leading one to match the
//! firmware when the chunks overlap.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::constants::{BASE_IV, BASE_KEY, BLOCK_SIZE};
use crate::error::CubeError;

/// Derive the per-device AES key and IV from a MAC address or a 32-hex-digit
/// platform identifier (macOS hides the real address behind a UUID).
///
/// The salt is the first 6 identifier bytes in reversed byte order, added to
/// the first 6 bytes of the shared base key/IV modulo 255. The modulus is
/// 255, not 256; the hardware rejects keys derived any other way.
pub fn derive_key_iv(identifier: &str) -> Result<([u8; 16], [u8; 16]), CubeError> {
    let hex: String = identifier
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let salt_hex = match hex.len() {
        12 => hex.as_str(),
        32 => &hex[..12],
        _ => return Err(CubeError::InvalidIdentifier(identifier.to_string())),
    };

    let mut salt = [0u8; 6];
    for (i, byte) in salt.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&salt_hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| CubeError::InvalidIdentifier(identifier.to_string()))?;
    }
    // The on-wire representation is byte-reversed relative to the printed MAC.
    salt.reverse();

    let mut key = BASE_KEY;
    let mut iv = BASE_IV;
    for i in 0..6 {
        key[i] = ((u16::from(key[i]) + u16::from(salt[i])) % 255) as u8;
        iv[i] = ((u16::from(iv[i]) + u16::from(salt[i])) % 255) as u8;
    }
    Ok((key, iv))
}

fn encrypt_chunk(cipher: &Aes128, iv: &[u8; 16], buf: &mut [u8], offset: usize) {
    for i in 0..BLOCK_SIZE {
        buf[offset + i] ^= iv[i];
    }
    let block = GenericArray::from_mut_slice(&mut buf[offset..offset + BLOCK_SIZE]);
    cipher.encrypt_block(block);
}

fn decrypt_chunk(cipher: &Aes128, iv: &[u8; 16], buf: &mut [u8], offset: usize) {
    let block = GenericArray::from_mut_slice(&mut buf[offset..offset + BLOCK_SIZE]);
    cipher.decrypt_block(block);
    for i in 0..BLOCK_SIZE {
        buf[offset + i] ^= iv[i];
    }
}

/// Encrypt an outbound frame: leading 16-byte chunk first, then the trailing
/// chunk when the frame is longer than one block.
pub fn encrypt_packet(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>, CubeError> {
    if plain.len() < BLOCK_SIZE {
        return Err(CubeError::InvalidLength {
            expected: BLOCK_SIZE,
            actual: plain.len(),
        });
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = plain.to_vec();
    encrypt_chunk(&cipher, iv, &mut out, 0);
    if out.len() > BLOCK_SIZE {
        let offset = out.len() - BLOCK_SIZE;
        encrypt_chunk(&cipher, iv, &mut out, offset);
    }
    Ok(out)
}

/// Decrypt an inbound notification: trailing 16-byte chunk first, then the
/// leading chunk.
pub fn decrypt_packet(raw: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>, CubeError> {
    if raw.len() < BLOCK_SIZE {
        return Err(CubeError::Decrypt(format!(
            "ciphertext too short: {} bytes",
            raw.len()
        )));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = raw.to_vec();
    if out.len() > BLOCK_SIZE {
        let offset = out.len() - BLOCK_SIZE;
        decrypt_chunk(&cipher, iv, &mut out, offset);
    }
    decrypt_chunk(&cipher, iv, &mut out, 0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_touches_first_six_bytes_only() {
        let (key_a, iv_a) = derive_key_iv("AB:12:34:5C:DE:F0").unwrap();
        let (key_b, iv_b) = derive_key_iv("AB:12:34:5C:DE:F0").unwrap();
        assert_eq!(key_a, key_b);
        assert_eq!(iv_a, iv_b);
        assert_eq!(key_a[6..], BASE_KEY[6..]);
        assert_eq!(iv_a[6..], BASE_IV[6..]);
        assert_ne!(key_a[..6], BASE_KEY[..6]);
    }

    #[test]
    fn salt_is_byte_reversed_and_wraps_mod_255() {
        // Salt = reversed MAC bytes, so salt[0] = 0xF0.
        let (key, _) = derive_key_iv("AB:12:34:5C:DE:F0").unwrap();
        assert_eq!(key[0], 0xF1); // 0x01 + 0xF0
        assert_eq!(key[5], 0x3D); // (0x91 + 0xAB) % 255 = 316 % 255

        // 0x01 + 0xFE = 255, which the protocol wraps to 0, not 255.
        let (key, _) = derive_key_iv("00:00:00:00:00:FE").unwrap();
        assert_eq!(key[0], 0x00);
    }

    #[test]
    fn uuid_identifier_uses_leading_twelve_hex_digits() {
        let from_mac = derive_key_iv("12:34:56:78:90:AB").unwrap();
        let from_uuid = derive_key_iv("12345678-90ab-cdef-1234-567890abcdef").unwrap();
        assert_eq!(from_mac, from_uuid);
    }

    #[test]
    fn malformed_identifier_is_rejected() {
        assert!(matches!(
            derive_key_iv("AB:12:34"),
            Err(CubeError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            derive_key_iv(""),
            Err(CubeError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn round_trip_at_protocol_lengths() {
        let (key, iv) = derive_key_iv("CF:AA:79:C9:96:9C").unwrap();
        for len in [16usize, 18, 19, 20, 33] {
            let plain: Vec<u8> = (0..len as u8).collect();
            let cipher_text = encrypt_packet(&plain, &key, &iv).unwrap();
            assert_ne!(cipher_text, plain);
            assert_eq!(decrypt_packet(&cipher_text, &key, &iv).unwrap(), plain);
        }
    }

    #[test]
    fn middle_bytes_pass_through_untouched() {
        let (key, iv) = derive_key_iv("CF:AA:79:C9:96:9C").unwrap();
        let plain = [0x5Au8; 40];
        let cipher_text = encrypt_packet(&plain, &key, &iv).unwrap();
        assert_eq!(cipher_text[16..24], plain[16..24]);
    }

    #[test]
    fn short_packet_is_rejected() {
        let (key, iv) = derive_key_iv("CF:AA:79:C9:96:9C").unwrap();
        assert!(matches!(
            decrypt_packet(&[0u8; 15], &key, &iv),
            Err(CubeError::Decrypt(_))
        ));
        assert!(matches!(
            encrypt_packet(&[0u8; 15], &key, &iv),
            Err(CubeError::InvalidLength { .. })
        ));
    }
}
