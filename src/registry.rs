use crate::peripheral::{ConnectionStatus, Peripheral};

/// Discovered peripherals, in discovery order, unique by address.
#[derive(Debug, Default)]
pub struct PeripheralRegistry {
    peripherals: Vec<Peripheral>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the peripheral unless one with the same address is already known.
    ///
    /// Returns `true` if the registry changed.
    pub fn insert(&mut self, peripheral: Peripheral) -> bool {
        if self.contains(peripheral.address()) {
            return false;
        }

        self.peripherals.push(peripheral);
        true
    }

    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    pub fn get(&self, address: &str) -> Option<&Peripheral> {
        self.peripherals.iter().find(|p| p.address() == address)
    }

    /// Peripheral at the given list position.
    pub fn at(&self, index: usize) -> Option<&Peripheral> {
        self.peripherals.get(index)
    }

    /// Updates the status tag of a known peripheral and returns the updated entry.
    pub fn set_status(&mut self, address: &str, status: ConnectionStatus) -> Option<&Peripheral> {
        let peripheral = self
            .peripherals
            .iter_mut()
            .find(|p| p.address() == address)?;
        peripheral.set_status(status);
        Some(peripheral)
    }

    /// Drops every entry except the ones a session is holding on to.
    pub fn reset_for_rescan(&mut self) {
        self.peripherals.retain(|p| p.status().is_live());
    }

    pub fn peripherals(&self) -> &[Peripheral] {
        &self.peripherals
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}
