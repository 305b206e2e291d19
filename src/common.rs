use std::time::Duration;

/// Name pattern advertised by the target firmware.
pub const DEFAULT_NAME_FILTER: &str = "micro:bit";

/// Shown for peripherals that do not advertise a local name.
pub const UNKNOWN_NAME: &str = "Unknown";

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

pub mod uart {
    use uuid::Uuid;

    pub const SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
    /// The characteristic the micro:bit pushes data on.
    pub const TX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
    pub const RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
}

pub mod descriptors {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = uuid_from_u16(0x2902);

    pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
    pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
}
