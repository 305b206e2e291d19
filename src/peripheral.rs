use std::fmt;

use crate::common::UNKNOWN_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    /// Whether a session currently holds (or is acquiring) a link to the peripheral.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Discovered => "discovered",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    address: String,
    name: Option<String>,
    status: ConnectionStatus,
}

impl Peripheral {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name: name.filter(|name| !name.is_empty()),
            status: ConnectionStatus::Discovered,
        }
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Local name of the device, if it advertised one
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Local name of the device, or "Unknown"
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or(UNKNOWN_NAME)
    }

    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)?;
        if self.status.is_live() {
            write!(f, " [{}]", self.status)?;
        }
        Ok(())
    }
}
