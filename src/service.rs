use crate::Characteristic;
use btleplug::api::Service as BtleService;
use uuid::Uuid;

/// A discovered GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub(crate) uuid: Uuid,
    pub(crate) characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, characteristics: Vec<Characteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    /// Get characteristic by UUID
    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl From<&BtleService> for Service {
    fn from(service: &BtleService) -> Self {
        Self {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .iter()
                .map(Characteristic::from)
                .collect(),
        }
    }
}
