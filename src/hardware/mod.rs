//! ESP32 peripherals behind the hardware traits of the core.

pub mod dimmer;
pub mod switches;

pub use dimmer::{EspFiringAlarm, EspGate, EtsDelay, ZeroCrossInput};
pub use switches::{StatusLed, SwitchInputs};
