use crate::dimmer::{DimmerShared, FiringAlarm, GateOutput};
use embedded_hal::blocking::delay::DelayUs;
use esp_idf_svc::hal::delay::Ets;
use esp_idf_svc::hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
use esp_idf_svc::sys::{self, esp, EspError};
use esp_idf_svc::timer::{EspISRTimerService, EspTimer};
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// TRIAC gate pin.
///
/// Driven through the raw GPIO API: the alarm callback only holds a shared
/// reference, while `PinDriver` needs `&mut self` to change the level.
pub struct EspGate {
    gpio: i32,
}

impl EspGate {
    pub fn new(gpio: i32) -> Result<Self, EspError> {
        esp!(unsafe { sys::gpio_reset_pin(gpio) })?;
        esp!(unsafe { sys::gpio_set_direction(gpio, sys::gpio_mode_t_GPIO_MODE_OUTPUT) })?;
        esp!(unsafe { sys::gpio_set_level(gpio, 0) })?;
        info!("TRIAC gate on GPIO{} (active high)", gpio);
        Ok(Self { gpio })
    }
}

impl GateOutput for EspGate {
    fn set_gate(&self, high: bool) {
        unsafe {
            sys::gpio_set_level(self.gpio, high as u32);
        }
    }
}

/// Busy-wait delay usable from interrupt context.
pub struct EtsDelay;

impl DelayUs<u32> for EtsDelay {
    fn delay_us(&mut self, us: u32) {
        Ets::delay_us(us);
    }
}

/// One-shot esp_timer alarm dispatched from ISR context.
///
/// Requires `CONFIG_ESP_TIMER_SUPPORTS_ISR_DISPATCH_METHOD=y` in sdkconfig.
pub struct EspFiringAlarm {
    timer: EspTimer<'static>,
}

impl EspFiringAlarm {
    pub fn new(shared: Arc<DimmerShared>, gate: Arc<EspGate>) -> Result<Self, EspError> {
        let service = unsafe { EspISRTimerService::new()? };
        let timer = service.timer(move || {
            let mut delay = EtsDelay;
            shared.on_timer_fire(gate.as_ref(), &mut delay);
        })?;
        Ok(Self { timer })
    }
}

impl FiringAlarm for EspFiringAlarm {
    type Error = EspError;

    fn arm_after_us(&mut self, delay_us: u32) -> Result<(), Self::Error> {
        self.timer.after(Duration::from_micros(delay_us as u64))
    }

    fn cancel(&mut self) -> Result<(), Self::Error> {
        self.timer.cancel().map(|_| ())
    }
}

/// Zero-cross detector input. The edge ISR only timestamps the crossing.
pub struct ZeroCrossInput {
    pin: PinDriver<'static, AnyIOPin, Input>,
}

impl ZeroCrossInput {
    pub fn new(gpio: i32, shared: Arc<DimmerShared>) -> Result<Self, EspError> {
        // SAFETY: the zero-cross GPIO is claimed only here.
        let mut pin = PinDriver::input(unsafe { AnyIOPin::new(gpio) })?;
        pin.set_pull(Pull::Up)?;
        pin.set_interrupt_type(InterruptType::PosEdge)?;
        unsafe {
            pin.subscribe(move || {
                shared.on_zero_cross(sys::esp_timer_get_time() as u32);
            })?;
        }
        pin.enable_interrupt()?;
        info!("Zero-cross detector on GPIO{} (rising edge)", gpio);
        Ok(Self { pin })
    }

    /// The driver disables the interrupt after each edge; call once per loop tick.
    pub fn rearm(&mut self) -> Result<(), EspError> {
        self.pin.enable_interrupt()
    }
}
