pub mod bitreader;
pub mod constants;
pub mod crypto;
pub mod device;
pub mod error;
pub mod facelets;
pub mod message;
pub mod sequencer;
pub mod tracker;

// Re-export the main entry points for easy access
pub use device::{CubeManager, DeviceIdentity, ManagerConfig};
pub use error::CubeError;
pub use message::{Command, CubeEvent, CubeMove};
