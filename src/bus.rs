//! Transport boundary between the control layer and the device firmware.
//!
//! The control layer never talks USB directly. Everything it needs from the
//! silicon is expressed through two narrow traits:
//!
//! 1. [`Backend`] — enumeration of physical slots and production of a bus
//!    for an attached device.
//! 2. [`DeviceBus`] — register writes, timeout-bounded block reads of the
//!    sample streams, and byte-addressed access to the calibration flash.
//!
//! A bus is assumed to deliver ordered, reliable transfers within one
//! device. Transfer-level failures are reported as
//! [`Error::TransferDataFail`](crate::Error); the control layer never
//! retries them on its own.

use std::time::Duration;

use crate::{registry::DeviceIdentity, Result};

/// One of the device's acquisition or output engines.
///
/// Used both to address per-subsystem control registers and to name the
/// sample stream belonging to that subsystem.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SubsystemId {
    /// Analog input engine (all enabled channels share one stream).
    Ai,
    /// Digital input engine.
    Di,
    /// Digital output engine.
    Do,
    /// One analog output channel; each has its own engine.
    Ao(u8),
}

/// A control register the control layer writes or reads.
///
/// The exact silicon addresses live behind the bus implementation; the
/// control layer only names the register's role.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Reg {
    /// Sample period in nanoseconds.
    SamplePeriod(SubsystemId),
    /// Sample mode (continuous / one-shot / pre-trigger).
    SampleMode(SubsystemId),
    /// Trigger source selection.
    TrigSource(SubsystemId),
    /// Conversion clock source selection.
    ConvSource(SubsystemId),
    /// Points captured ahead of the trigger event.
    PreTrigPoints(SubsystemId),
    /// Finite burst length.
    OneShotPoints(SubsystemId),
    /// Output waveform repeat count.
    Cycle(SubsystemId),
    /// Arm the subsystem for its configured trigger.
    Arm(SubsystemId),
    /// Software trigger strobe.
    SoftTrig(SubsystemId),
    /// Force the subsystem back to idle.
    ClearTrig(SubsystemId),
    /// Reset the subsystem FIFO.
    ClearFifo(SubsystemId),
    /// Analog input span for one channel.
    AiRange(u8),
    /// Analog input channel enable for one channel.
    AiChanSel(u8),
    /// Analog input wiring (single-ended / differential).
    AiConnectType,
    /// Analog output trigger sync group mask.
    AoSync,
    /// Immediate analog output value for one channel (DAC code).
    AoImmediate(u8),
    /// Digital output lines driven from the waveform FIFO.
    DoWaveLines,
    /// Immediate digital output line write.
    DoImmediate,
    /// Source routed to the external trigger output pin.
    ExtTrigOut,
    /// Source routed to the external conversion clock output pin.
    ExtConvOut,
    /// Fire every armed, software-triggered subsystem at once.
    GlobalSoftTrig,
    /// Firmware (FPGA) version word.
    FirmwareVersion,
}

/// Transport to one opened device.
///
/// Implementations carry their own interior locking; methods take `&self`
/// so that a blocking [`read_block`](DeviceBus::read_block) on one stream
/// cannot serialize register writes for unrelated subsystems.
pub trait DeviceBus: Send + Sync {
    /// Write a control register.
    fn write_reg(&self, reg: Reg, value: u32) -> Result<()>;

    /// Read a control register.
    fn read_reg(&self, reg: Reg) -> Result<u32>;

    /// Queue raw sample words on an output stream.
    fn write_block(&self, stream: SubsystemId, data: &[u32]) -> Result<()>;

    /// Read up to `max` raw sample words from an input stream.
    ///
    /// Blocks for at most `wait`; an empty vector means nothing arrived in
    /// time. The control layer calls this in bounded slices so a pending
    /// capture can be aborted between calls.
    fn read_block(&self, stream: SubsystemId, max: usize, wait: Duration) -> Result<Vec<u32>>;

    /// Read `len` bytes from the non-volatile calibration store.
    fn read_flash(&self, addr: u16, len: usize) -> Result<Vec<u8>>;

    /// Write bytes to the non-volatile calibration store.
    fn write_flash(&self, addr: u16, data: &[u8]) -> Result<()>;
}

/// Enumeration service for physical slots.
///
/// The registry owns a backend and asks it for a bus whenever a slot is
/// opened. Probing an empty slot yields `None` rather than an error; the
/// registry turns that into [`Error::NoDevice`](crate::Error).
pub trait Backend: Send + Sync {
    /// Number of devices currently attached.
    fn enumerate(&self) -> usize;

    /// Identity and transport for the device in `slot`, if one is present.
    fn probe(&self, slot: usize) -> Result<Option<(DeviceIdentity, Box<dyn DeviceBus>)>>;
}
