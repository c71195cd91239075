use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::sys::EspError;
use log::info;

/// The two front panel toggle switches.
pub struct SwitchInputs {
    pins: [PinDriver<'static, AnyIOPin, Input>; 2],
    active_low: bool,
}

impl SwitchInputs {
    pub fn new(gpios: [i32; 2], active_low: bool) -> Result<Self, EspError> {
        let [first, second] = gpios;
        let pins = [Self::input(first, active_low)?, Self::input(second, active_low)?];
        info!("Switch inputs on GPIO{} and GPIO{}", first, second);
        Ok(Self { pins, active_low })
    }

    fn input(gpio: i32, active_low: bool) -> Result<PinDriver<'static, AnyIOPin, Input>, EspError> {
        // SAFETY: each switch GPIO is claimed only here.
        let mut pin = PinDriver::input(unsafe { AnyIOPin::new(gpio) })?;
        pin.set_pull(if active_low { Pull::Up } else { Pull::Down })?;
        Ok(pin)
    }

    /// Raw pressed state of both switches, undebounced.
    pub fn read(&self) -> [bool; 2] {
        self.pins.each_ref().map(|pin| pin.is_high() != self.active_low)
    }
}

pub struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    lit: bool,
}

impl StatusLed {
    pub fn new(gpio: i32) -> Result<Self, EspError> {
        // SAFETY: the LED GPIO is claimed only here.
        let mut pin = PinDriver::output(unsafe { AnyOutputPin::new(gpio) })?;
        pin.set_low()?;
        Ok(Self { pin, lit: false })
    }

    pub fn set(&mut self, lit: bool) -> Result<(), EspError> {
        if lit != self.lit {
            if lit {
                self.pin.set_high()?;
            } else {
                self.pin.set_low()?;
            }
            self.lit = lit;
        }
        Ok(())
    }
}
