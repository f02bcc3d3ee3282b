#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys;
    use ina219_telemetry::{MqttClient, NodeConfig, WifiManager};

    // Initialize ESP-IDF system services
    sys::link_patches();

    // Initialize logging
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("🚀 INA219 telemetry node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_features()?;
    log::info!(
        "Node '{}': {} zone(s), broker {}",
        config.telemetry.node_id,
        config.telemetry.zones.len(),
        config.mqtt.broker_url()
    );

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let wifi = WifiManager::new(peripherals.modem, sysloop, nvs)?;
    let mqtt = MqttClient::new(&config.mqtt.broker_url());

    #[cfg(feature = "simulated-sensors")]
    {
        use ina219_telemetry::SimulatedSensor;

        log::warn!("⚠️ Simulated sensors, no INA219 is read");
        let sensors = config
            .telemetry
            .zones
            .iter()
            .map(|zone| SimulatedSensor::from_entropy(zone.address))
            .collect();
        firmware::run(config, wifi, mqtt, sensors)
    }

    #[cfg(not(feature = "simulated-sensors"))]
    {
        use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
        use esp_idf_hal::prelude::*;
        use ina219_telemetry::Ina219;

        // All sensors share I2C0 (SDA=GPIO21, SCL=GPIO22)
        let i2c_config = I2cConfig::new().baudrate(100.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio21,
            peripherals.pins.gpio22,
            &i2c_config,
        )?;
        let bus = shared_bus::BusManagerSimple::new(i2c);

        let sensors = config
            .telemetry
            .zones
            .iter()
            .map(|zone| Ina219::new(bus.acquire_i2c(), zone.address, config.telemetry.calibration))
            .collect();
        firmware::run(config, wifi, mqtt, sensors)
    }
}

#[cfg(target_os = "espidf")]
mod firmware {
    use esp_idf_hal::delay::FreeRtos;
    use ina219_telemetry::{
        MqttClient, NodeConfig, SensorReader, SystemClock, TelemetryError, TelemetryLoop,
        WifiManager,
    };

    /// Runs the telemetry loop until a fatal error, which never returns
    pub fn run<S: SensorReader>(
        config: NodeConfig,
        wifi: WifiManager,
        mqtt: MqttClient,
        sensors: Vec<S>,
    ) -> anyhow::Result<()> {
        let mut telemetry = TelemetryLoop::new(config, wifi, mqtt, sensors, SystemClock::new())?;

        match telemetry.run() {
            Ok(never) => match never {},
            Err(e @ TelemetryError::SensorInit { .. }) => {
                // Readings would be meaningless, wait for a power cycle
                log::error!("❌ Fatal: {}. Halting until reset", e);
                loop {
                    FreeRtos::delay_ms(1000);
                }
            }
            Err(e) => {
                log::error!("❌ Telemetry loop stopped: {}. Restarting", e);
                esp_idf_hal::reset::restart();
            }
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("telemetry_node runs on ESP-IDF only, build with --target xtensa-esp32-espidf");
}
