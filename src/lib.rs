//! Control layer for the USB5000 series of multi-channel USB data
//! acquisition cards.
//!
//! A USB5000 card carries four independent acquisition and output engines
//! behind one USB transport: a 16-channel analog input, a digital input
//! port, a digital output port, and four analog output channels. Each
//! engine has its own sample clock, FIFO and trigger state. This crate
//! models that structure directly: a [`Registry`] opens devices into
//! bounded slots, a [`Device`] hands out per-subsystem views, and every
//! operation reports one of the card's fixed negative status codes via
//! [`Error`].
//!
//! # What This Crate Does
//!
//! - Device enumeration and slot-based open/close with shared handles
//! - Analog input configuration (range, wiring, channel selection) and
//!   blocking, timeout-bounded capture with calibration applied
//! - Digital input capture and digital output waveform playback
//! - Per-channel analog output waveforms, immediate writes and sync groups
//! - Software, external and immediate triggering, including a global
//!   software trigger that fires every armed subsystem in one step
//! - Calibration sessions with raw flash access and per-channel
//!   gain/offset coefficients
//!
//! The crate does not talk USB itself. The transport is abstracted behind
//! the [`DeviceBus`] and [`Backend`] traits so the control layer can be
//! driven over whichever link a deployment uses, and tested against a
//! scripted bus.
//!
//! # Blocking and Concurrency
//!
//! Subsystems are independent: a blocking [`AnalogIn::read`] holds only
//! the analog input's state, so digital and analog output calls proceed
//! concurrently. A pending read polls the bus in short slices and can be
//! aborted from another thread with [`AnalogIn::clear_fifo`], which makes
//! the read fail with [`Error::TransferDataFail`].
//!
//! Timeouts are not failures at this layer: a read that runs out of time
//! returns the partial [`Acquisition`] with its `timed_out` flag set, and
//! the samples captured so far are never discarded.
//!
//! # Error Handling
//!
//! Every fallible operation returns the card's own status code space,
//! `-1..=-15`, as the [`Error`] enum. Validation failures are reported
//! before any device or host state changes, so a rejected call leaves the
//! previous configuration in effect. [`Error::code`] recovers the numeric
//! value for callers bridging to the card's C convention.
//!
//! # Simple Example
//!
//! ```no_run
//! use usb5000::{Registry, Wait};
//! # fn backend() -> Box<dyn usb5000::Backend> { unimplemented!() }
//!
//! let registry = Registry::new(backend());
//! let device = registry.open(0).expect("failed to open device");
//!
//! // Capture 1000 points from the analog input, waiting up to a second.
//! let ai = device.analog_in();
//! ai.set_sample_period(10_000).expect("failed to set period");
//! ai.arm().expect("failed to arm");
//! ai.soft_trig().expect("failed to trigger");
//! let acq = ai
//!     .read(1000, Wait::from_millis(1000))
//!     .expect("failed to read");
//! println!("got {} points (complete: {})", acq.samples.len(), acq.is_complete());
//! ```
#![warn(clippy::all, clippy::pedantic, clippy::cargo, missing_docs)]
// Allow missing error documentation since every operation shares the same
// fixed status-code space documented on `Error`.
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod analog_in;
mod analog_out;
pub mod bus;
mod calibration;
mod config;
mod device;
mod digital;
mod error;
mod fifo;
pub mod prelude;
mod registry;
mod trigger;
pub(crate) mod util;

pub use analog_in::AnalogIn;
pub use analog_out::{AnalogOut, AO_MAX_VOLTS};
pub use bus::{Backend, DeviceBus, Reg, SubsystemId};
pub use calibration::{CalibrationSession, Kb, AI_KB_BASE, AO_KB_BASE, FLASH_SIZE};
pub use config::{
    AiConnectType, AiRange, ConvOutSource, ConvSource, SampleMode, TrigOutSource, TrigSource,
    MAX_SAMPLE_PERIOD_NS, MIN_SAMPLE_PERIOD_NS,
};
pub use device::{
    Device, AI_CHANNELS, AI_FIFO_DEPTH, AO_CHANNELS, AO_FIFO_DEPTH, DI_FIFO_DEPTH, DO_FIFO_DEPTH,
    DO_LINES, MAX_DEVICES,
};
pub use digital::{DigitalIn, DigitalOut};
pub use error::{Error, Result};
pub use fifo::{Acquisition, Wait};
pub use registry::{DeviceIdentity, Registry};
pub use trigger::TriggerPhase;

/// FPGA firmware version word reported by an opened device.
///
/// The word is laid out as `0xMMmm_BBBB`: major byte, minor byte, build
/// halfword.
pub struct FirmwareVersion(pub(crate) u32);

impl FirmwareVersion {
    /// Major version number.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn major(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Minor version number.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn minor(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Build/subversion version number.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn build(&self) -> u16 {
        self.0 as u16
    }
}
