//! [`Radio`] and [`Link`] on top of btleplug.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic as BtleCharacteristic,
    Descriptor, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::common::descriptors;
use crate::radio::{Advertisement, Link, Notification, Radio};
use crate::{Error, Result, Service};

/// How long [`BtleRadio::request_enable`] waits for the adapter to power on.
const ENABLE_WAIT: Duration = Duration::from_secs(3);
const ENABLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct BtleRadio {
    _manager: Manager,
    adapter: Adapter,
}

impl BtleRadio {
    /// Opens the Bluetooth adapter at the given index. The first found adapter is index 0.
    pub async fn new(adapter_index: usize) -> Result<Self> {
        let manager = Manager::new().await?;
        let mut adapters = manager.adapters().await?;

        if adapter_index >= adapters.len() {
            return Err(btleplug::Error::DeviceNotFound.into());
        }

        let adapter = adapters.swap_remove(adapter_index);

        log::trace!("Using adapter: {:?}", adapter);

        Ok(Self {
            _manager: manager,
            adapter,
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|peripheral| peripheral.address().to_string() == address)
            .ok_or_else(|| Error::UnknownPeripheral(address.to_owned()))
    }
}

async fn advertisement(adapter: &Adapter, peripheral_id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(peripheral_id).await.ok()?;
    let local_name = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|props| props.local_name);

    log::trace!("Device discovered: {:?}", peripheral);

    Some(Advertisement {
        address: peripheral.address().to_string(),
        local_name,
    })
}

#[async_trait]
impl Radio for BtleRadio {
    type Link = BtleLink;

    async fn is_enabled(&self) -> Result<bool> {
        let state = self.adapter.adapter_state().await?;
        Ok(matches!(state, CentralState::PoweredOn))
    }

    /// Desktop stacks offer no prompt to switch the radio on, so this only
    /// gives the adapter a moment to report `PoweredOn`.
    async fn request_enable(&self) -> Result<bool> {
        let deadline = Instant::now() + ENABLE_WAIT;

        loop {
            if self.is_enabled().await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                log::warn!("Adapter did not power on within {:?}", ENABLE_WAIT);
                return Ok(false);
            }
            sleep(ENABLE_POLL_INTERVAL).await;
        }
    }

    async fn start_discovery(&self) -> Result<BoxStream<'static, Advertisement>> {
        let events = self.adapter.events().await?;

        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(peripheral_id)
                    | CentralEvent::DeviceUpdated(peripheral_id) => {
                        advertisement(&adapter, &peripheral_id).await
                    }
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn stop_discovery(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn open_connection(&self, address: &str) -> Result<BtleLink> {
        let peripheral = self.find_peripheral(address).await?;

        if !peripheral.is_connected().await? {
            log::debug!("Connecting to device {}", address);
            peripheral.connect().await?;
        }

        Ok(BtleLink {
            address: address.to_owned(),
            peripheral,
        })
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, String>> {
        let events = self.adapter.events().await?;

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDisconnected(peripheral_id) => adapter
                        .peripheral(&peripheral_id)
                        .await
                        .ok()
                        .map(|peripheral| peripheral.address().to_string()),
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// How a descriptor write reaches the peripheral.
#[derive(Debug, PartialEq, Eq)]
enum DescriptorWrite {
    /// Platform stacks write the CCCD themselves on subscribe and refuse direct writes to it.
    DoneBySubscribe,
    Raw(Descriptor),
}

fn descriptor_write(characteristic: &BtleCharacteristic, uuid: Uuid) -> Result<DescriptorWrite> {
    let descriptor = characteristic
        .descriptors
        .iter()
        .find(|d| d.uuid == uuid)
        .cloned()
        .ok_or_else(|| Error::MissingCapability(format!("descriptor {}", uuid)))?;

    if uuid != descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION {
        return Ok(DescriptorWrite::Raw(descriptor));
    }

    if characteristic
        .properties
        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    {
        Ok(DescriptorWrite::DoneBySubscribe)
    } else {
        Err(Error::SubscriptionFailed(format!(
            "characteristic {} neither notifies nor indicates",
            characteristic.uuid
        )))
    }
}

pub struct BtleLink {
    address: String,
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<BtleCharacteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| Error::MissingCapability(format!("characteristic {}", uuid)))
    }
}

#[async_trait]
impl Link for BtleLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_services(&self) -> Result<Vec<Service>> {
        log::debug!("Discovering services for {}", self.address);

        self.peripheral.discover_services().await?;

        Ok(self
            .peripheral
            .services()
            .iter()
            .map(Service::from)
            .collect())
    }

    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        match descriptor_write(&self.characteristic(characteristic)?, descriptor)? {
            DescriptorWrite::DoneBySubscribe => {
                log::debug!(
                    "Client configuration of {} was written by the subscription",
                    characteristic
                );
            }
            DescriptorWrite::Raw(descriptor) => {
                self.peripheral.write_descriptor(&descriptor, value).await?;
            }
        }
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>> {
        let stream = self.peripheral.notifications().await?;

        Ok(stream
            .map(|notification| Notification {
                uuid: notification.uuid,
                value: notification.value,
            })
            .boxed())
    }

    async fn close(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::uart;

    fn tx_characteristic(properties: CharPropFlags, descriptors: &[Uuid]) -> BtleCharacteristic {
        BtleCharacteristic {
            uuid: uart::TX_CHARACTERISTIC,
            service_uuid: uart::SERVICE,
            properties,
            descriptors: descriptors
                .iter()
                .map(|&uuid| Descriptor {
                    uuid,
                    service_uuid: uart::SERVICE,
                    characteristic_uuid: uart::TX_CHARACTERISTIC,
                })
                .collect(),
        }
    }

    #[test]
    fn client_configuration_is_left_to_the_subscription() {
        let characteristic = tx_characteristic(
            CharPropFlags::INDICATE,
            &[descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION],
        );

        let write = descriptor_write(
            &characteristic,
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
        )
        .unwrap();
        assert_eq!(write, DescriptorWrite::DoneBySubscribe);
    }

    #[test]
    fn client_configuration_needs_notify_or_indicate() {
        let characteristic = tx_characteristic(
            CharPropFlags::READ,
            &[descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION],
        );

        let err = descriptor_write(
            &characteristic,
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SubscriptionFailed(_)));
    }

    #[test]
    fn other_descriptors_are_written_directly() {
        let user_description = btleplug::api::bleuuid::uuid_from_u16(0x2901);
        let characteristic = tx_characteristic(CharPropFlags::NOTIFY, &[user_description]);

        match descriptor_write(&characteristic, user_description).unwrap() {
            DescriptorWrite::Raw(descriptor) => assert_eq!(descriptor.uuid, user_description),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_descriptor_is_a_missing_capability() {
        let characteristic = tx_characteristic(CharPropFlags::NOTIFY, &[]);

        let err = descriptor_write(
            &characteristic,
            descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingCapability(_)));
    }
}
