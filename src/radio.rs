//! Seams between the core and the Bluetooth stack.
//!
//! [`Radio`] stands for the local adapter and [`Link`] for an open connection
//! to one peripheral. The production implementation lives in [`crate::btle`];
//! tests drive the core through in-memory implementations.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::{Result, Service};

/// A discovery event reported by the adapter while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
}

impl Advertisement {
    pub fn new(address: impl Into<String>, local_name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            local_name: local_name.map(str::to_owned),
        }
    }
}

/// A value pushed by the peripheral on a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Radio: Send + Sync + 'static {
    type Link: Link;

    async fn is_enabled(&self) -> Result<bool>;

    /// Asks for the radio to be switched on. Resolves to `true` once it is.
    async fn request_enable(&self) -> Result<bool>;

    async fn start_discovery(&self) -> Result<BoxStream<'static, Advertisement>>;

    async fn stop_discovery(&self) -> Result<()>;

    /// Resolves once the physical link to the peripheral is up.
    async fn open_connection(&self, address: &str) -> Result<Self::Link>;

    /// Addresses of peripherals whose link went down, for the lifetime of the adapter.
    async fn disconnections(&self) -> Result<BoxStream<'static, String>>;
}

/// An open connection to one peripheral.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    fn address(&self) -> &str;

    async fn discover_services(&self) -> Result<Vec<Service>>;

    /// Turns on local delivery of notifications for the characteristic.
    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()>;

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>>;

    async fn close(&self) -> Result<()>;
}
