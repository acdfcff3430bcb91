//! Outbound command frame encoding and the encrypt side of the codec.

mod common;

use common::*;

#[test]
fn request_frames_are_opcode_plus_zero_padding() {
    assert_eq!(Command::RequestHardware.to_frame(), {
        let mut f = [0u8; 16];
        f[0] = 0x01;
        f
    });
    assert_eq!(Command::RequestFacelets.to_frame()[0], 0x02);
    assert_eq!(Command::RequestBattery.to_frame()[0], 0x03);
    assert!(Command::RequestFacelets.to_frame()[1..].iter().all(|&b| b == 0));
}

#[test]
fn history_frame_carries_start_and_count() {
    let frame = Command::RequestMoveHistory {
        start_serial: 0xF0,
        count: 10,
    }
    .to_frame();
    assert_eq!(frame[0], 0x05);
    assert_eq!(frame[1], 0xF0);
    assert_eq!(frame[2], 10);
    assert!(frame[3..].iter().all(|&b| b == 0));
}

#[test]
fn reset_frame_matches_vendor_sequence() {
    let frame = Command::Reset.to_frame();
    assert_eq!(frame[0], 0x04);
    assert_eq!(&frame[..12], &hex_to_bytes("0405397700000123456789ab")[..]);
    assert!(frame[12..].iter().all(|&b| b == 0));
}

#[test]
fn command_frames_survive_the_codec() {
    let (key, iv) = derive_key_iv(TEST_IDENTIFIER).expect("derive failed");
    let frame = Command::RequestMoveHistory {
        start_serial: 7,
        count: 3,
    }
    .to_frame();

    let cipher = encrypt_packet(&frame, &key, &iv).expect("encrypt failed");
    assert_eq!(cipher.len(), frame.len());
    assert_ne!(cipher.as_slice(), frame.as_slice());
    assert_eq!(decrypt_packet(&cipher, &key, &iv).expect("decrypt failed"), frame);
}
