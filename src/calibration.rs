//! Factory calibration: flash access and per-channel gain/offset pairs.
//!
//! Calibration runs as an explicit session that locks the device out of
//! normal-mode configuration. The coefficients written here are the same
//! `K`/`B` values applied by analog input count-to-voltage conversion and
//! analog output scaling in normal mode; the in-memory table is reloaded
//! from flash when the session ends, so both modes always agree on the
//! active coefficients.
//!
//! Flash layout: 8 bytes per channel (`K` then `B`, little-endian `f32`),
//! analog input channels at [`AI_KB_BASE`], analog output channels at
//! [`AO_KB_BASE`]. Blank flash (erased bytes) decodes to the identity
//! transform.

use std::sync::Arc;

use crate::{
    bus::DeviceBus,
    device::{Mode, Shared, AI_CHANNELS, AO_CHANNELS},
    util::{lock, write_lock},
    Error, Result,
};

/// Size of the calibration store in bytes.
pub const FLASH_SIZE: usize = 4096;
/// Flash offset of the analog input coefficient block.
pub const AI_KB_BASE: u16 = 0x0000;
/// Flash offset of the analog output coefficient block.
pub const AO_KB_BASE: u16 = 0x0100;

const KB_STRIDE: u16 = 8;

/// Linear gain/offset pair mapping raw device counts to physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kb {
    /// Gain.
    pub k: f32,
    /// Offset.
    pub b: f32,
}

impl Kb {
    /// The no-op transform used for uncalibrated channels.
    pub const IDENTITY: Self = Self { k: 1.0, b: 0.0 };

    /// Apply the documented linear transform `k * raw + b`.
    #[must_use]
    pub fn apply(self, raw: f32) -> f32 {
        self.k * raw + self.b
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        // a short flash read is treated like erased flash, not panicked on
        let Some(bytes) = bytes.get(..8) else {
            return Self::IDENTITY;
        };
        let k = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let b = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        // erased or corrupt flash falls back to the identity transform
        if !k.is_finite() || k == 0.0 || !b.is_finite() {
            Self::IDENTITY
        } else {
            Self { k, b }
        }
    }

    fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.k.to_le_bytes());
        out[4..].copy_from_slice(&self.b.to_le_bytes());
        out
    }
}

/// In-memory copy of the per-channel coefficients.
///
/// Conversion paths read this table concurrently; it is only replaced
/// wholesale when a calibration session ends.
#[derive(Debug, Clone)]
pub(crate) struct CalTable {
    pub ai: [Kb; AI_CHANNELS],
    pub ao: [Kb; AO_CHANNELS],
}

impl CalTable {
    pub fn load(bus: &dyn DeviceBus) -> Result<Self> {
        let mut table = Self {
            ai: [Kb::IDENTITY; AI_CHANNELS],
            ao: [Kb::IDENTITY; AO_CHANNELS],
        };
        let ai_bytes = bus.read_flash(AI_KB_BASE, AI_CHANNELS * KB_STRIDE as usize)?;
        for (chan, chunk) in ai_bytes.chunks_exact(KB_STRIDE as usize).enumerate() {
            table.ai[chan] = Kb::from_bytes(chunk);
        }
        let ao_bytes = bus.read_flash(AO_KB_BASE, AO_CHANNELS * KB_STRIDE as usize)?;
        for (chan, chunk) in ao_bytes.chunks_exact(KB_STRIDE as usize).enumerate() {
            table.ao[chan] = Kb::from_bytes(chunk);
        }
        Ok(table)
    }
}

/// Exclusive calibration mode on one device.
///
/// While a session is active, every normal-mode configuration call on the
/// same device fails with [`Error::NotReading`]. The session ends through
/// [`exit`](Self::exit) (or drop, best-effort), which reloads the
/// coefficient table so normal mode sees what was written.
///
/// ```no_run
/// # fn demo(device: &usb5000::Device) -> usb5000::Result<()> {
/// use usb5000::Kb;
///
/// let session = device.calibrate()?;
/// session.write_ai_kb(0, Kb { k: 1.002, b: -0.013 })?;
/// let kb = session.read_ai_kb(0)?;
/// session.exit()?;
/// # assert_eq!(kb.k, 1.002);
/// # Ok(())
/// # }
/// ```
pub struct CalibrationSession {
    shared: Arc<Shared>,
    exited: bool,
}

impl CalibrationSession {
    pub(crate) fn enter(shared: Arc<Shared>) -> Result<Self> {
        shared.ensure_open()?;
        {
            let mut mode = lock(&shared.mode);
            if *mode == Mode::Calibrating {
                return Err(Error::NotReading);
            }
            shared.ensure_settled()?;
            *mode = Mode::Calibrating;
        }
        log::debug!("slot {}: entered calibration mode", shared.slot);
        Ok(Self {
            shared,
            exited: false,
        })
    }

    /// Write raw bytes to the calibration store.
    pub fn write_flash(&self, addr: u16, data: &[u8]) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.bus.write_flash(addr, data)
    }

    /// Read raw bytes back from the calibration store.
    pub fn read_flash(&self, addr: u16, len: usize) -> Result<Vec<u8>> {
        self.shared.ensure_open()?;
        self.shared.bus.read_flash(addr, len)
    }

    /// Read the analog input coefficients for `chan`.
    pub fn read_ai_kb(&self, chan: u8) -> Result<Kb> {
        self.read_kb(AI_KB_BASE, chan, AI_CHANNELS)
    }

    /// Read the analog output coefficients for `chan`.
    pub fn read_ao_kb(&self, chan: u8) -> Result<Kb> {
        self.read_kb(AO_KB_BASE, chan, AO_CHANNELS)
    }

    /// Write the analog input coefficients for `chan`.
    pub fn write_ai_kb(&self, chan: u8, kb: Kb) -> Result<()> {
        self.write_kb(AI_KB_BASE, chan, AI_CHANNELS, kb)
    }

    /// Write the analog output coefficients for `chan`.
    pub fn write_ao_kb(&self, chan: u8, kb: Kb) -> Result<()> {
        self.write_kb(AO_KB_BASE, chan, AO_CHANNELS, kb)
    }

    /// Leave calibration mode, making the written coefficients visible to
    /// normal-mode conversion.
    pub fn exit(mut self) -> Result<()> {
        self.leave()
    }

    fn read_kb(&self, base: u16, chan: u8, count: usize) -> Result<Kb> {
        self.shared.ensure_open()?;
        if usize::from(chan) >= count {
            return Err(Error::ChanIndexOverflow);
        }
        let addr = base + u16::from(chan) * KB_STRIDE;
        let bytes = self.shared.bus.read_flash(addr, KB_STRIDE as usize)?;
        Ok(Kb::from_bytes(&bytes))
    }

    fn write_kb(&self, base: u16, chan: u8, count: usize, kb: Kb) -> Result<()> {
        self.shared.ensure_open()?;
        if usize::from(chan) >= count {
            return Err(Error::ChanIndexOverflow);
        }
        let addr = base + u16::from(chan) * KB_STRIDE;
        self.shared.bus.write_flash(addr, &kb.to_bytes())
    }

    fn leave(&mut self) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;
        if self.shared.is_open() {
            let table = CalTable::load(self.shared.bus.as_ref())?;
            *write_lock(&self.shared.cal) = table;
        }
        *lock(&self.shared.mode) = Mode::Normal;
        log::debug!("slot {}: left calibration mode", self.shared.slot);
        Ok(())
    }
}

impl Drop for CalibrationSession {
    fn drop(&mut self) {
        if let Err(err) = self.leave() {
            log::warn!(
                "slot {}: calibration exit failed: {err}",
                self.shared.slot
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Kb, AI_KB_BASE};
    use crate::{bus::testing::open_device, Error};

    #[test]
    fn kb_roundtrip_through_flash() {
        let (device, _bus, _registry) = open_device();
        let session = device.calibrate().unwrap();
        let written = Kb { k: 1.25, b: -0.5 };
        session.write_ai_kb(3, written).unwrap();
        session.write_ao_kb(1, Kb { k: 0.99, b: 0.01 }).unwrap();
        assert_eq!(session.read_ai_kb(3).unwrap(), written);
        assert_eq!(session.read_ao_kb(1).unwrap(), Kb { k: 0.99, b: 0.01 });
        // untouched channels decode as identity
        assert_eq!(session.read_ai_kb(0).unwrap(), Kb::IDENTITY);
        session.exit().unwrap();
    }

    #[test]
    fn kb_applies_the_linear_transform() {
        let kb = Kb { k: 2.0, b: 0.5 };
        assert!((kb.apply(3.0) - 6.5).abs() < f32::EPSILON);
        assert!((Kb::IDENTITY.apply(7.25) - 7.25).abs() < f32::EPSILON);
    }

    #[test]
    fn raw_flash_writes_are_visible_to_kb_reads() {
        let (device, _bus, _registry) = open_device();
        let session = device.calibrate().unwrap();
        let kb = Kb { k: 1.5, b: 2.0 };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&kb.k.to_le_bytes());
        bytes.extend_from_slice(&kb.b.to_le_bytes());
        session.write_flash(AI_KB_BASE + 8, &bytes).unwrap();
        assert_eq!(session.read_ai_kb(1).unwrap(), kb);
    }

    #[test]
    fn short_coefficient_blocks_decode_as_identity() {
        assert_eq!(Kb::from_bytes(&[]), Kb::IDENTITY);
        assert_eq!(Kb::from_bytes(&[0x00, 0x00, 0x80, 0x3F]), Kb::IDENTITY);
        let written = Kb { k: 2.0, b: 1.0 };
        assert_eq!(Kb::from_bytes(&written.to_bytes()), written);
    }

    #[test]
    fn session_excludes_normal_mode_configuration() {
        let (device, _bus, _registry) = open_device();
        let session = device.calibrate().unwrap();
        assert_eq!(
            device.analog_in().set_sample_period(1_000_000),
            Err(Error::NotReading)
        );
        // only one session at a time
        assert!(device.calibrate().is_err());
        session.exit().unwrap();
        assert!(device.analog_in().set_sample_period(1_000_000).is_ok());
    }

    #[test]
    fn exit_publishes_coefficients_to_conversion() {
        let (device, bus, _registry) = open_device();
        let session = device.calibrate().unwrap();
        session.write_ai_kb(0, Kb { k: 2.0, b: 1.0 }).unwrap();
        session.exit().unwrap();

        // leave only channel 0 enabled so every sample uses its KB
        let ai = device.analog_in();
        for chan in 1..16 {
            ai.set_channel_enabled(chan, false).unwrap();
        }
        bus.feed(crate::bus::SubsystemId::Ai, &[1, 2, 3]);
        let acq = ai.read(3, crate::Wait::from_millis(100)).unwrap();
        assert_eq!(acq.samples, vec![3.0, 5.0, 7.0]);
    }

    #[test]
    fn channel_bounds_are_checked() {
        let (device, _bus, _registry) = open_device();
        let session = device.calibrate().unwrap();
        assert_eq!(session.read_ai_kb(16), Err(Error::ChanIndexOverflow));
        assert_eq!(session.read_ao_kb(4), Err(Error::ChanIndexOverflow));
        assert_eq!(
            session.write_ao_kb(9, Kb::IDENTITY),
            Err(Error::ChanIndexOverflow)
        );
    }

    #[test]
    fn entering_while_armed_is_rejected() {
        let (device, _bus, _registry) = open_device();
        device.analog_in().arm().unwrap();
        assert!(device.calibrate().is_err());
        device.analog_in().clear_trigger().unwrap();
        assert!(device.calibrate().is_ok());
    }
}
