use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::info;
use std::net::Ipv4Addr;

use crate::config::WifiConfig;
use crate::link::{NetworkError, NetworkSession};

pub struct WifiManager {
    wifi: Box<BlockingWifi<EspWifi<'static>>>,
}

impl WifiManager {
    /// Brings up the driver without joining a network
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self> {
        info!("🌐 WiFi: Creating EspWifi instance...");
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        info!("✅ WiFi: Driver ready");

        Ok(Self {
            wifi: Box::new(wifi),
        })
    }

    pub fn get_ip(&self) -> Result<Ipv4Addr> {
        let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
        Ok(ip_info.ip)
    }

    fn configure(&mut self, credentials: &WifiConfig) -> Result<()> {
        let wifi_configuration = Configuration::Client(ClientConfiguration {
            ssid: credentials.ssid.clone(),
            auth_method: AuthMethod::WPA2Personal,
            password: credentials.password.clone(),
            ..Default::default()
        });

        // Drop a half-open association before switching networks
        if self.wifi.is_connected().unwrap_or(false) {
            let _ = self.wifi.disconnect();
        }

        self.wifi.set_configuration(&wifi_configuration)?;
        if !self.wifi.is_started()? {
            info!("🌐 WiFi: Starting...");
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl NetworkSession for WifiManager {
    fn connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), NetworkError> {
        self.configure(credentials)
            .map_err(|e| NetworkError::JoinFailed(format!("{:#}", e)))?;

        info!("🌐 WiFi: Connecting to '{}'...", credentials.ssid);
        self.wifi
            .connect()
            .map_err(|e| NetworkError::JoinFailed(format!("{:?}", e)))?;

        self.wifi
            .wait_netif_up()
            .map_err(|e| NetworkError::InterfaceDown(format!("{:?}", e)))?;

        match self.get_ip() {
            Ok(ip) => info!("✅ WiFi: Connected, IP address {}", ip),
            Err(e) => info!("✅ WiFi: Connected, IP unavailable: {:#}", e),
        }
        Ok(())
    }
}
