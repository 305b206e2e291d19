use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    #[error("Could not connect: {0}")]
    ConnectionFailed(String),

    /// The expected service, characteristic or descriptor is not exposed by the peripheral.
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    #[error("Could not enable notifications: {0}")]
    SubscriptionFailed(String),

    /// Another connection attempt or teardown is still in flight.
    #[error("Another connection attempt is in progress")]
    Busy,

    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Controller has stopped")]
    ControllerStopped,
}

/// Tag reported to the presentation surface together with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    RadioDisabled,
    PermissionDenied,
    ConnectionFailed,
    MissingCapability,
    SubscriptionFailed,
    UnsolicitedDisconnect,
    StorageFailure,
    Busy,
    UnknownPeripheral,
    Other,
}

impl Error {
    pub fn reason(&self) -> FailureReason {
        match self {
            Error::RadioDisabled => FailureReason::RadioDisabled,
            Error::ConnectionFailed(_) => FailureReason::ConnectionFailed,
            Error::MissingCapability(_) => FailureReason::MissingCapability,
            Error::SubscriptionFailed(_) => FailureReason::SubscriptionFailed,
            Error::Busy => FailureReason::Busy,
            Error::UnknownPeripheral(_) => FailureReason::UnknownPeripheral,
            Error::Storage(_) => FailureReason::StorageFailure,
            Error::Btle(btleplug::Error::PermissionDenied) => FailureReason::PermissionDenied,
            Error::Btle(btleplug::Error::NotConnected) => FailureReason::UnsolicitedDisconnect,
            Error::Btle(_) => FailureReason::ConnectionFailed,
            Error::Config(_) | Error::Io(_) | Error::ControllerStopped => FailureReason::Other,
        }
    }
}
