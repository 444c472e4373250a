//! Bounded registry of attached devices.
//!
//! The registry owns the [`Backend`] and hands out [`Device`] handles for
//! the slots it manages. A slot is either empty or holds one opened
//! device; opening an already-open slot is rejected rather than aliased,
//! and closing a slot invalidates every handle cloned from it.

use std::sync::{Arc, Mutex};

use crate::{
    bus::{Backend, Reg},
    calibration::CalTable,
    device::{Shared, MAX_DEVICES},
    util::lock,
    Device, Error, Result,
};

/// Identity strings reported by an attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    serial: String,
    model: String,
}

impl DeviceIdentity {
    /// Build an identity from the strings a backend read off the device.
    #[must_use]
    pub fn new(serial: &str, model: &str) -> Self {
        Self {
            serial: serial.to_owned(),
            model: model.to_owned(),
        }
    }

    /// Factory-programmed serial number.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Model designation, e.g. `USB5121`.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Entry point of the crate: enumerates slots and opens devices.
pub struct Registry {
    backend: Box<dyn Backend>,
    slots: Mutex<Vec<Option<Arc<Shared>>>>,
}

impl Registry {
    /// Build a registry over a transport backend.
    #[must_use]
    pub fn new(backend: Box<dyn Backend>) -> Self {
        let mut slots = Vec::with_capacity(MAX_DEVICES);
        slots.resize_with(MAX_DEVICES, || None);
        Self {
            backend,
            slots: Mutex::new(slots),
        }
    }

    /// Number of devices currently attached.
    #[must_use]
    pub fn discover(&self) -> usize {
        self.backend.enumerate()
    }

    /// Open the device in `slot` and return a handle to it.
    ///
    /// The firmware version is read as part of opening; a blank or
    /// all-ones version word means the FPGA never configured and the open
    /// fails with [`Error::BadFirmware`]. Calibration coefficients are
    /// loaded from flash once here and shared by every handle.
    pub fn open(&self, slot: usize) -> Result<Device> {
        if slot >= MAX_DEVICES {
            return Err(Error::DeviceIndexOverflow);
        }
        let mut slots = lock(&self.slots);
        if let Some(existing) = &slots[slot] {
            if existing.is_open() {
                return Err(Error::NotReading);
            }
        }
        let (identity, bus) = self.backend.probe(slot)?.ok_or(Error::NoDevice)?;
        let firmware = bus.read_reg(Reg::FirmwareVersion)?;
        if firmware == 0 || firmware == u32::MAX {
            return Err(Error::BadFirmware);
        }
        let cal = CalTable::load(bus.as_ref())?;
        log::debug!(
            "opened {} ({}) in slot {slot}, firmware {firmware:#010x}",
            identity.serial(),
            identity.model()
        );
        let shared = Arc::new(Shared::new(slot, identity, firmware, bus, cal));
        slots[slot] = Some(Arc::clone(&shared));
        Ok(Device { shared })
    }

    /// Close the device in `slot`.
    ///
    /// Every outstanding handle for the slot observes the close: later
    /// calls through those handles fail with [`Error::DeviceClosed`].
    pub fn close(&self, slot: usize) -> Result<()> {
        if slot >= MAX_DEVICES {
            return Err(Error::DeviceIndexOverflow);
        }
        let mut slots = lock(&self.slots);
        let shared = slots[slot].take().ok_or(Error::DeviceClosed)?;
        if !shared.is_open() {
            return Err(Error::DeviceClosed);
        }
        shared.close();
        log::debug!("closed slot {slot}");
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open: Vec<usize> = lock(&self.slots)
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().filter(|s| s.is_open()).map(|_| i))
            .collect();
        f.debug_struct("Registry").field("open_slots", &open).finish()
    }
}
