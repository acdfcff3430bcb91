//! End-to-end tests for move notifications: encrypt a known plaintext frame
//! under a derived key, then run it through the receive pipeline.

mod common;

use common::*;

#[test]
fn encrypted_move_frame_decodes_to_expected_move() {
    let (key, iv) = derive_key_iv(TEST_IDENTIFIER).expect("derive failed");

    // R' at serial 0x42, face code 32 maps to R.
    let plain = move_frame(20, 0x0042, 1, 32, 987_654);
    let cipher = encrypt_packet(&plain, &key, &iv).expect("encrypt failed");
    assert_ne!(cipher, plain);

    let decrypted = decrypt_packet(&cipher, &key, &iv).expect("decrypt failed");
    assert_eq!(decrypted, plain);

    let message = Gen3Message::parse(&decrypted).expect("parse failed");
    let Gen3Message::Move(mv) = message else {
        panic!("expected a move, got {message:?}");
    };
    assert_eq!(mv.face, Face::R);
    assert_eq!(mv.direction, Direction::CounterClockwise);
    assert_eq!(mv.serial, 0x42);
    assert_eq!(mv.device_clock, 987_654);
    assert_eq!(mv.notation(), "R'");
}

#[test]
fn all_faces_decode_across_frame_lengths() {
    let (key, iv) = derive_key_iv(TEST_IDENTIFIER).expect("derive failed");
    let cases = [(2u8, Face::U), (32, Face::R), (8, Face::F), (1, Face::D), (16, Face::L), (4, Face::B)];

    for (i, &(code, face)) in cases.iter().enumerate() {
        for len in [16usize, 18, 20] {
            let plain = move_frame(len, i as u16, 0, code, 1000 + i as u32);
            let cipher = encrypt_packet(&plain, &key, &iv).expect("encrypt failed");
            let decrypted = decrypt_packet(&cipher, &key, &iv).expect("decrypt failed");
            let message = Gen3Message::parse(&decrypted).expect("parse failed");
            let Gen3Message::Move(mv) = message else {
                panic!("expected a move for face code {code}");
            };
            assert_eq!(mv.face, face);
            assert_eq!(mv.direction, Direction::Clockwise);
            assert_eq!(mv.serial, i as u8);
        }
    }
}

#[test]
fn move_serial_keeps_low_byte_of_wire_field() {
    let (key, iv) = derive_key_iv(TEST_IDENTIFIER).expect("derive failed");
    let plain = move_frame(20, 0x0142, 0, 2, 0);
    let cipher = encrypt_packet(&plain, &key, &iv).expect("encrypt failed");
    let decrypted = decrypt_packet(&cipher, &key, &iv).expect("decrypt failed");
    let Gen3Message::Move(mv) = Gen3Message::parse(&decrypted).expect("parse failed") else {
        panic!("expected a move");
    };
    assert_eq!(mv.serial, 0x42);
}

#[test]
fn bad_face_code_is_a_parse_error() {
    let plain = move_frame(20, 7, 0, 63, 0);
    assert!(matches!(
        Gen3Message::parse(&plain),
        Err(CubeError::UnknownFaceCode(63))
    ));
}

#[test]
fn wrong_magic_is_unknown_not_fatal() {
    let mut plain = move_frame(20, 7, 0, 2, 0);
    plain[0] = 0xAA;
    let message = Gen3Message::parse(&plain).expect("parse failed");
    assert!(matches!(message, Gen3Message::Unknown { event_type: 0x01, .. }));
}

#[test]
fn ciphertext_under_wrong_key_does_not_decode_to_the_same_move() {
    let (key, iv) = derive_key_iv(TEST_IDENTIFIER).expect("derive failed");
    let (other_key, other_iv) = derive_key_iv("AB:12:34:5C:DE:F0").expect("derive failed");

    let plain = move_frame(20, 9, 0, 2, 0);
    let cipher = encrypt_packet(&plain, &key, &iv).expect("encrypt failed");
    let garbled = decrypt_packet(&cipher, &other_key, &other_iv).expect("decrypt failed");
    assert_ne!(garbled, plain);
}
