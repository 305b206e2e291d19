use btleplug::api::Characteristic as BtleCharacteristic;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub(crate) uuid: Uuid,
    pub(crate) descriptors: Vec<Uuid>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn descriptors(&self) -> &[Uuid] {
        &self.descriptors
    }

    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

impl From<&BtleCharacteristic> for Characteristic {
    fn from(characteristic: &BtleCharacteristic) -> Self {
        Self {
            uuid: characteristic.uuid,
            descriptors: characteristic
                .descriptors
                .iter()
                .map(|descriptor| descriptor.uuid)
                .collect(),
        }
    }
}
