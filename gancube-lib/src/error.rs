use thiserror::Error;

/// The primary error type for the `gancube-lib` library.
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("Invalid device identifier: {0} (expected 12 or 32 hex digits)")]
    InvalidIdentifier(String),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("Timeout during Bluetooth operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Decrypt error: {0}")]
    Decrypt(String),

    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown face code: 0x{0:02x}")]
    UnknownFaceCode(u8),

    #[error("Bit range {start_bit}+{bit_len} exceeds buffer of {buffer_bits} bits")]
    OutOfRange {
        start_bit: usize,
        bit_len: usize,
        buffer_bits: usize,
    },

    #[error("No cube found during scan")]
    DeviceNotFound,

    #[error("Expected GATT service not present on device")]
    ServiceNotFound,

    #[error("Connection failed after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    #[error("Not connected to a cube")]
    NotConnected,
}
