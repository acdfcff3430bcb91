//! Typed Gen3 messages: classification of decrypted frames into domain
//! events and construction of outbound command frames.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::bitreader::BitReader;
use crate::constants::{
    COMMAND_FRAME_SIZE, FACE_WIRE_CODES, GEN3_MAGIC, MIN_FACELETS_FRAME_SIZE, RESET_FRAME,
};
use crate::error::CubeError;
use crate::facelets::CubeState;

/// Event-type codes carried in byte 1 of a decrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum EventType {
    Move = 0x01,
    Facelets = 0x02,
    Battery = 0x04,
    Hardware = 0x05,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// One face of the cube, in the URFDLB order used throughout the protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive, Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Face {
    U = 0,
    R = 1,
    F = 2,
    D = 3,
    L = 4,
    B = 5,
}

impl Face {
    /// Map a wire face code to its face. The cube transmits a one-hot-ish
    /// code set rather than an index.
    pub fn from_wire_code(code: u8) -> Result<Self, CubeError> {
        FACE_WIRE_CODES
            .iter()
            .position(|&c| c == code)
            .and_then(|i| Face::try_from(i as u8).ok())
            .ok_or(CubeError::UnknownFaceCode(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Clockwise = 0,
    CounterClockwise = 1,
}

/// A single quarter-turn reported by the cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeMove {
    pub face: Face,
    pub direction: Direction,
    /// Circular mod-256 move counter used for ordering and gap detection.
    pub serial: u8,
    /// The cube's internal clock at the time of the move.
    pub device_clock: u32,
    /// Host receive time.
    pub received_at: DateTime<Utc>,
}

impl CubeMove {
    /// Standard notation: face letter, primed for counter-clockwise.
    pub fn notation(&self) -> String {
        match self.direction {
            Direction::Clockwise => self.face.to_string(),
            Direction::CounterClockwise => format!("{}'", self.face),
        }
    }
}

/// A full cube-state report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceletsData {
    pub serial: u8,
    pub state: CubeState,
    /// 54-character facelet encoding of `state`.
    pub facelets: String,
}

/// Hardware metadata, filled best-effort; absent fields stay `None` rather
/// than failing the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub hardware_name: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
    pub gyro_supported: Option<bool>,
}

/// A decrypted notification classified by (magic, event type, length).
#[derive(Debug, Clone, PartialEq)]
pub enum Gen3Message {
    Move(CubeMove),
    Facelets(FaceletsData),
    /// Battery percentage, clamped to 0..=100.
    Battery(u8),
    Hardware(HardwareInfo),
    /// Anything we do not classify; logged and dropped, never fatal.
    Unknown { event_type: u8, payload: Bytes },
}

impl Gen3Message {
    /// Classify and decode one decrypted frame.
    pub fn parse(plain: &[u8]) -> Result<Self, CubeError> {
        if plain.len() < 2 {
            return Err(CubeError::InvalidLength {
                expected: 2,
                actual: plain.len(),
            });
        }
        if plain[0] != GEN3_MAGIC {
            return Ok(Gen3Message::Unknown {
                event_type: plain[1],
                payload: Bytes::copy_from_slice(plain),
            });
        }

        match (EventType::from_primitive(plain[1]), plain.len()) {
            (EventType::Move, 16 | 18 | 20) => parse_move(plain).map(Gen3Message::Move),
            (EventType::Facelets, len) if len >= MIN_FACELETS_FRAME_SIZE => {
                parse_facelets(plain).map(Gen3Message::Facelets)
            }
            (EventType::Battery, len) if len >= 4 => Ok(Gen3Message::Battery(parse_battery(plain))),
            (EventType::Hardware, _) => Ok(Gen3Message::Hardware(parse_hardware(plain))),
            _ => Ok(Gen3Message::Unknown {
                event_type: plain[1],
                payload: Bytes::copy_from_slice(plain),
            }),
        }
    }
}

fn parse_move(plain: &[u8]) -> Result<CubeMove, CubeError> {
    let view = BitReader::new(plain);
    let device_clock = view.get_bits_le(24, 32)?;
    let serial = (view.get_bits_le(56, 16)? & 0xFF) as u8;
    let direction_bits = view.get_bits(72, 2)?;
    let face_code = view.get_bits(74, 6)?;

    let direction = Direction::try_from(direction_bits as u8)
        .map_err(|_| CubeError::Parse(format!("invalid move direction {direction_bits}")))?;
    let face = Face::from_wire_code(face_code as u8)?;

    Ok(CubeMove {
        face,
        direction,
        serial,
        device_clock,
        received_at: Utc::now(),
    })
}

fn parse_facelets(plain: &[u8]) -> Result<FaceletsData, CubeError> {
    let view = BitReader::new(plain);
    let serial = (view.get_bits_le(24, 16)? & 0xFF) as u8;

    let mut cp = [0u8; 7];
    let mut co = [0u8; 7];
    for i in 0..7 {
        cp[i] = view.get_bits(40 + i * 3, 3)? as u8;
        co[i] = view.get_bits(61 + i * 2, 2)? as u8;
    }
    let mut ep = [0u8; 11];
    let mut eo = [0u8; 11];
    for i in 0..11 {
        ep[i] = view.get_bits(77 + i * 4, 4)? as u8;
        if ep[i] >= 12 {
            return Err(CubeError::Parse(format!(
                "edge permutation {} out of range",
                ep[i]
            )));
        }
        eo[i] = view.get_bits(121 + i, 1)? as u8;
    }

    let state = CubeState::from_partial(cp, co, ep, eo);
    let facelets = state.to_facelets();
    Ok(FaceletsData {
        serial,
        state,
        facelets,
    })
}

fn parse_battery(plain: &[u8]) -> u8 {
    // Firmware variants place the level in byte 2 or 3; take whichever is
    // plausible and clamp.
    let level = if plain[2] <= 100 { plain[2] } else { plain[3] };
    level.min(100)
}

fn parse_hardware(plain: &[u8]) -> HardwareInfo {
    let mut info = HardwareInfo::default();
    if plain.len() >= 5 {
        info.software_version = Some(format!("{}.{}", plain[3] >> 4, plain[3] & 0x0F));
        info.hardware_version = Some(format!("{}.{}", plain[4] >> 4, plain[4] & 0x0F));
    }
    if plain.len() > 5 {
        let name: String = plain[5..]
            .iter()
            .take_while(|&&b| b.is_ascii_graphic() || b == b' ')
            .map(|&b| b as char)
            .collect();
        if !name.is_empty() {
            info.hardware_name = Some(name);
        }
    }
    if let Some(&flags) = plain.last() {
        info.gyro_supported = Some(flags & 0x01 != 0);
    }
    info
}

/// Outbound cube commands. Each encodes to a fixed 16-byte frame that is
/// encrypted before transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RequestHardware,
    RequestFacelets,
    RequestBattery,
    Reset,
    /// Ask the cube to replay `count` historical moves starting at
    /// `start_serial`.
    RequestMoveHistory { start_serial: u8, count: u8 },
}

impl Command {
    pub fn to_frame(self) -> [u8; COMMAND_FRAME_SIZE] {
        let mut frame = [0u8; COMMAND_FRAME_SIZE];
        match self {
            Command::RequestHardware => frame[0] = 0x01,
            Command::RequestFacelets => frame[0] = 0x02,
            Command::RequestBattery => frame[0] = 0x03,
            Command::Reset => frame = RESET_FRAME,
            Command::RequestMoveHistory {
                start_serial,
                count,
            } => {
                frame[0] = 0x05;
                frame[1] = start_serial;
                frame[2] = count;
            }
        }
        frame
    }
}

/// Domain events delivered to registered callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CubeEvent {
    Move(CubeMove),
    Facelets(FaceletsData),
    Battery(u8),
    Hardware(HardwareInfo),
    Solved,
    ConnectionChanged(bool),
}
