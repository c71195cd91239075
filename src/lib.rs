pub mod calibration;
pub mod controller;
pub mod dimmer;
pub mod error;
pub mod executor;
pub mod interlock;
pub mod profile;
pub mod protocol;
pub mod storage;
pub mod system;
pub mod types;

#[cfg(target_os = "espidf")]
pub mod hardware;
#[cfg(target_os = "espidf")]
pub mod nvs_storage;
#[cfg(target_os = "espidf")]
pub mod serial;

pub use controller::*;
pub use error::*;
pub use types::*;
