//! Enumerated configuration values shared by the four subsystems.
//!
//! Every value the firmware accepts is a member of a small fixed set; the
//! types here make out-of-set values unrepresentable once constructed.
//! Raw-byte constructors (`from_raw` and friends) cover callers arriving
//! from the device's numeric convention and map rejection onto the
//! matching `Undefined*` status code.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, Result};

/// Shortest supported sample period: 1 µs (1 MS/s).
pub const MIN_SAMPLE_PERIOD_NS: u32 = 1_000;
/// Longest supported sample period: 1 s.
pub const MAX_SAMPLE_PERIOD_NS: u32 = 1_000_000_000;

/// Validate a sample period against the device clock domain.
pub(crate) fn check_sample_period(period_ns: u32) -> Result<()> {
    if (MIN_SAMPLE_PERIOD_NS..=MAX_SAMPLE_PERIOD_NS).contains(&period_ns) {
        Ok(())
    } else {
        Err(Error::UndefinedSamplePeriod)
    }
}

/// Acquisition or playback mode of a subsystem.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SampleMode {
    /// Stream until the trigger is cleared.
    Continuous = 0,
    /// Finite burst of the configured one-shot length.
    OneShot = 1,
    /// One-shot burst retaining points captured ahead of the trigger.
    /// Input subsystems only.
    PreTrigger = 2,
}

impl SampleMode {
    /// Decode the device's raw mode byte.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::try_from(raw).map_err(|_| Error::UndefinedAiSampleMode)
    }
}

/// What starts a configured subsystem once it is armed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TrigSource {
    /// Software strobe (per-subsystem or global).
    Software = 0,
    /// External electrical trigger input.
    External = 1,
    /// Start as soon as the subsystem is armed.
    Immediate = 2,
    /// Trigger shared with the paired subsystem.
    Paired = 3,
}

impl TrigSource {
    /// Decode the device's raw trigger-source byte.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::try_from(raw).map_err(|_| Error::UndefinedParameter)
    }
}

/// Conversion clock driving the sample timer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConvSource {
    /// Internal clock at the configured sample period.
    Internal = 0,
    /// External conversion clock input.
    External = 1,
    /// Clock shared with the paired subsystem.
    Paired = 2,
}

impl ConvSource {
    /// Decode the device's raw conversion-source byte.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::try_from(raw).map_err(|_| Error::UndefinedParameter)
    }
}

/// Analog input wiring.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AiConnectType {
    /// Each channel referenced to analog ground.
    SingleEnded = 0,
    /// Channel pairs measured differentially.
    Differential = 1,
    /// Single-ended with a common sense reference.
    PseudoDifferential = 2,
}

impl AiConnectType {
    /// Decode the device's raw connect-type byte.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Self::try_from(raw).map_err(|_| Error::UndefinedAiConnectType)
    }
}

/// Bipolar analog input span.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AiRange {
    /// ±10 V.
    Pm10V = 0,
    /// ±5 V.
    Pm5V = 1,
    /// ±2.5 V.
    Pm2V5 = 2,
    /// ±1.25 V.
    Pm1V25 = 3,
}

impl AiRange {
    /// Select a range by its positive full-scale voltage, the convention
    /// used by the original configuration interface.
    pub fn from_volts(span: f32) -> Result<Self> {
        match span {
            s if (s - 10.0).abs() < f32::EPSILON => Ok(Self::Pm10V),
            s if (s - 5.0).abs() < f32::EPSILON => Ok(Self::Pm5V),
            s if (s - 2.5).abs() < f32::EPSILON => Ok(Self::Pm2V5),
            s if (s - 1.25).abs() < f32::EPSILON => Ok(Self::Pm1V25),
            _ => Err(Error::UndefinedAiRange),
        }
    }

    /// Positive full-scale voltage of the span.
    #[must_use]
    pub fn volts(self) -> f32 {
        match self {
            Self::Pm10V => 10.0,
            Self::Pm5V => 5.0,
            Self::Pm2V5 => 2.5,
            Self::Pm1V25 => 1.25,
        }
    }
}

/// Signal routed to the external trigger output pin.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TrigOutSource {
    /// Nothing driven.
    Disabled = 0,
    /// Mirror of the analog input trigger.
    AiTrigger = 1,
    /// Mirror of the digital input trigger.
    DiTrigger = 2,
    /// Mirror of the digital output trigger.
    DoTrigger = 3,
    /// Mirror of the global software trigger.
    GlobalTrigger = 4,
}

/// Signal routed to the external conversion clock output pin.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConvOutSource {
    /// Nothing driven.
    Disabled = 0,
    /// Analog input conversion clock.
    AiClock = 1,
    /// Digital input conversion clock.
    DiClock = 2,
    /// Digital output conversion clock.
    DoClock = 3,
}

/// Validated timing and trigger configuration of one subsystem.
///
/// Setters only replace a field after the new value passed validation, so
/// a rejected call always leaves the previous configuration in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamConfig {
    pub period_ns: u32,
    pub mode: SampleMode,
    pub trig: TrigSource,
    pub conv: ConvSource,
    pub pre_trig_points: u32,
    pub one_shot_points: u32,
    /// Output waveform repeat count (DO/AO only).
    pub cycle: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            period_ns: 1_000_000,
            mode: SampleMode::Continuous,
            trig: TrigSource::Software,
            conv: ConvSource::Internal,
            pre_trig_points: 0,
            one_shot_points: 1_024,
            cycle: 1,
        }
    }
}

impl StreamConfig {
    /// Point-count invariants against a FIFO of `capacity` samples.
    pub fn check_points(points: u32, capacity: usize) -> Result<()> {
        if points == 0 || points as usize > capacity {
            Err(Error::UndefinedWaveLen)
        } else {
            Ok(())
        }
    }
}
