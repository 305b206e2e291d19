use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::common::{descriptors, uart, DEFAULT_NAME_FILTER, DEFAULT_SCAN_TIMEOUT};
use crate::scanner::ScanConfig;
use crate::session::UartProfile;
use crate::Result;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Index of the Bluetooth adapter to use.
    pub adapter_index: usize,
    /// Case-insensitive substring a device name must contain.
    pub name_filter: String,
    pub scan_timeout_secs: u64,
    /// Path of the SQLite message log.
    pub database: PathBuf,
    pub uart: UartConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            name_filter: DEFAULT_NAME_FILTER.to_owned(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT.as_secs(),
            database: PathBuf::from("blelog.db"),
            uart: UartConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UartConfig {
    pub service: Uuid,
    /// Characteristic the peripheral pushes data on.
    pub characteristic: Uuid,
    pub subscription: Subscription,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            service: uart::SERVICE,
            characteristic: uart::TX_CHARACTERISTIC,
            subscription: Subscription::Indication,
        }
    }
}

/// Value written to the client characteristic configuration descriptor.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    Notification,
    Indication,
}

impl Subscription {
    pub fn descriptor_value(self) -> [u8; 2] {
        match self {
            Subscription::Notification => descriptors::ENABLE_NOTIFICATION_VALUE,
            Subscription::Indication => descriptors::ENABLE_INDICATION_VALUE,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path.as_ref()) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!(
                    "No config at {}, using defaults",
                    path.as_ref().display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig::default()
            .filter_by_name(&self.name_filter)
            .stop_after_timeout(Duration::from_secs(self.scan_timeout_secs))
    }

    pub fn profile(&self) -> UartProfile {
        UartProfile {
            service: self.uart.service,
            characteristic: self.uart.characteristic,
            descriptor: descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
            descriptor_value: self.uart.subscription.descriptor_value(),
        }
    }
}
