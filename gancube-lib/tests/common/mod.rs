//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use gancube_lib::constants::{GEN3_MAGIC, SOLVED_FACELETS};
#[allow(unused_imports)]
pub use gancube_lib::crypto::{decrypt_packet, derive_key_iv, encrypt_packet};
#[allow(unused_imports)]
pub use gancube_lib::error::CubeError;
#[allow(unused_imports)]
pub use gancube_lib::message::{Command, Direction, Face, Gen3Message};
#[allow(unused_imports)]
pub use hex;

/// A plausible cube hardware address for key derivation in tests.
#[allow(dead_code)]
pub const TEST_IDENTIFIER: &str = "CF:AA:79:C9:96:9C";

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Vec<u8> {
    hex::decode(hex_data).expect("Failed to decode hex")
}

/// Write `value` into `buf` MSB-first at the given bit offset.
#[allow(dead_code)]
pub fn set_bits(buf: &mut [u8], start_bit: usize, bit_len: usize, value: u32) {
    for i in 0..bit_len {
        let bit = (value >> (bit_len - 1 - i)) & 1;
        let pos = start_bit + i;
        let byte = pos / 8;
        let shift = 7 - (pos % 8);
        if bit == 1 {
            buf[byte] |= 1 << shift;
        } else {
            buf[byte] &= !(1 << shift);
        }
    }
}

/// Build a plaintext Gen3 move frame with the given fields.
#[allow(dead_code)]
pub fn move_frame(len: usize, serial: u16, direction: u8, face_code: u8, clock: u32) -> Vec<u8> {
    let mut frame = vec![0u8; len];
    frame[0] = GEN3_MAGIC;
    frame[1] = 0x01;
    frame[3..7].copy_from_slice(&clock.to_le_bytes());
    frame[7..9].copy_from_slice(&serial.to_le_bytes());
    frame[9] = (direction << 6) | face_code;
    frame
}

/// Build a plaintext Gen3 facelets frame from the seven explicit corners
/// and eleven explicit edges.
#[allow(dead_code)]
pub fn facelets_frame(serial: u16, cp: [u8; 7], co: [u8; 7], ep: [u8; 11], eo: [u8; 11]) -> Vec<u8> {
    let mut frame = vec![0u8; 19];
    frame[0] = GEN3_MAGIC;
    frame[1] = 0x02;
    frame[3..5].copy_from_slice(&serial.to_le_bytes());
    for (i, &v) in cp.iter().enumerate() {
        set_bits(&mut frame, 40 + i * 3, 3, u32::from(v));
    }
    for (i, &v) in co.iter().enumerate() {
        set_bits(&mut frame, 61 + i * 2, 2, u32::from(v));
    }
    for (i, &v) in ep.iter().enumerate() {
        set_bits(&mut frame, 77 + i * 4, 4, u32::from(v));
    }
    for (i, &v) in eo.iter().enumerate() {
        set_bits(&mut frame, 121 + i, 1, u32::from(v));
    }
    frame
}
