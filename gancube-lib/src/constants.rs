// Protocol constants for GAN Gen3 smart cubes (GAN356 i Carry 2 family)

use uuid::{uuid, Uuid};

/// Primary GATT service exposed by Gen3 cubes
pub const SERVICE_UUID: Uuid = uuid!("8653000a-43e6-47b7-9cb0-5fc21d4ae340");

/// Notify characteristic carrying encrypted state packets
pub const STATE_CHAR_UUID: Uuid = uuid!("8653000b-43e6-47b7-9cb0-5fc21d4ae340");

/// Write characteristic accepting encrypted command frames
pub const COMMAND_CHAR_UUID: Uuid = uuid!("8653000c-43e6-47b7-9cb0-5fc21d4ae340");

/// Advertised-name fragments that identify a supported cube
pub const DEVICE_NAME_FRAGMENTS: &[&str] = &["GAN", "MG", "AICUBE"];

/// Bluetooth SIG company identifier under which GAN cubes publish
/// their real hardware address in manufacturer data
pub const GAN_COMPANY_ID: u16 = 0x0001;

/// Shared base AES key; per-device keys are salted from this
pub const BASE_KEY: [u8; 16] = [
    0x01, 0x02, 0x42, 0x28, 0x31, 0x91, 0x16, 0x07, 0x20, 0x05, 0x18, 0x54, 0x42, 0x11, 0x12, 0x53,
];

/// Shared base AES IV, salted the same way as the key
pub const BASE_IV: [u8; 16] = [
    0x11, 0x03, 0x32, 0x28, 0x21, 0x01, 0x76, 0x27, 0x20, 0x95, 0x78, 0x14, 0x32, 0x12, 0x02, 0x43,
];

/// First byte of every decrypted Gen3 frame
pub const GEN3_MAGIC: u8 = 0x55;

/// AES block size and minimum packet length (bytes)
pub const BLOCK_SIZE: usize = 16;

/// Outbound command frames are always this long before encryption
pub const COMMAND_FRAME_SIZE: usize = 16;

/// Facelets frames carry 132 bits of state and need at least this many bytes
pub const MIN_FACELETS_FRAME_SIZE: usize = 19;

/// Facelet string for a cube in the factory solved state
pub const SOLVED_FACELETS: &str = "UUUUUUUUURRRRRRRRRFFFFFFFFFDDDDDDDDDLLLLLLLLLBBBBBBBBB";

/// Face letters in home-face order; facelet index / 9 indexes this string
pub const FACE_ORDER: &str = "URFDLB";

/// Wire face codes as transmitted in move frames, positionally
/// mapped to U, R, F, D, L, B
pub const FACE_WIRE_CODES: [u8; 6] = [2, 32, 8, 1, 16, 4];

/// Facelet indices of the three stickers of each corner cubie (URF, UFL,
/// ULB, UBR, DFR, DLF, DBL, DRB)
pub const CORNER_FACELET_MAP: [[usize; 3]; 8] = [
    [8, 9, 20],
    [6, 18, 38],
    [0, 36, 47],
    [2, 45, 11],
    [29, 26, 15],
    [27, 44, 24],
    [33, 53, 42],
    [35, 17, 51],
];

/// Facelet indices of the two stickers of each edge cubie (UR, UF, UL, UB,
/// DR, DF, DL, DB, FR, FL, BL, BR)
pub const EDGE_FACELET_MAP: [[usize; 2]; 12] = [
    [5, 10],
    [7, 19],
    [3, 37],
    [1, 46],
    [32, 16],
    [28, 25],
    [30, 43],
    [34, 52],
    [23, 12],
    [21, 41],
    [50, 39],
    [48, 14],
];

/// Vendor reset payload; trailing bytes encode the solved state
pub const RESET_FRAME: [u8; 16] = [
    0x04, 0x05, 0x39, 0x77, 0x00, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0x00, 0x00, 0x00, 0x00,
];
