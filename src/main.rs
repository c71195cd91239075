#[cfg(target_os = "espidf")]
use {
    embassy_executor::Spawner,
    embassy_sync::channel::Channel,
    embassy_time::{Instant, Ticker},
    log::{error, info, warn},
    pressure_profiler::{
        controller::{publish, CommandChannel, ProfilerController, ResponseChannel},
        dimmer::{DimmerShared, PhaseFiringEngine},
        hardware::{EspFiringAlarm, EspGate, StatusLed, SwitchInputs, ZeroCrossInput},
        nvs_storage::ProfilerStorage,
        serial,
        system::config::FirmwareConfig,
    },
    std::sync::Arc,
};

#[cfg(target_os = "espidf")]
static COMMANDS: CommandChannel = Channel::new();

#[cfg(target_os = "espidf")]
static RESPONSES: ResponseChannel = Channel::new();

#[cfg(target_os = "espidf")]
#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting Espresso Pressure Profiler");

    if let Err(e) = run().await {
        error!("Firmware bring-up failed: {:?}", e);
    }
}

#[cfg(target_os = "espidf")]
async fn run() -> anyhow::Result<()> {
    let config = FirmwareConfig::default();
    let timing = config.dimmer_timing();

    // Output stage first, so the gate is held low before anything else runs.
    let shared = Arc::new(DimmerShared::new(&timing));
    let gate = Arc::new(EspGate::new(config.gate_gpio)?);
    let alarm = EspFiringAlarm::new(Arc::clone(&shared), Arc::clone(&gate))?;
    let engine = PhaseFiringEngine::new(Arc::clone(&shared), gate, alarm, timing);

    let mut zero_cross = ZeroCrossInput::new(config.zero_cross_gpio, Arc::clone(&shared))?;
    let switches = SwitchInputs::new(config.switch_gpios, config.switch_active_low)?;
    let mut led = StatusLed::new(config.status_led_gpio)?;

    let storage = ProfilerStorage::open();
    let tick_period = config.tick_period;
    let mut controller = ProfilerController::new(config, engine, storage, Instant::now());

    serial::spawn(&COMMANDS, &RESPONSES)?;

    info!("Starting main control loop, tick every {} ms", tick_period.as_millis());
    let mut ticker = Ticker::every(tick_period);
    loop {
        ticker.next().await;

        while let Ok(command) = COMMANDS.try_receive() {
            publish(controller.handle_command(command, Instant::now()), &RESPONSES);
        }

        if let Err(e) = zero_cross.rearm() {
            warn!("Failed to re-enable zero-cross interrupt: {:?}", e);
        }
        publish(controller.tick(Instant::now(), switches.read()), &RESPONSES);
        if let Err(e) = led.set(controller.is_running()) {
            warn!("Failed to drive status LED: {:?}", e);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("pressure-profiler is firmware for the ESP32 (target_os = \"espidf\"); run the library tests on the host.");
}
