//! Per-subsystem trigger state machine.
//!
//! Every subsystem walks `Idle -> Armed -> Triggered -> Completed`, with
//! `Armed -> Idle` only through an explicit clear. The phases live inside
//! each subsystem's lock; the fan-out paths (global soft trigger, global
//! clear) acquire the locks in a fixed order in `device.rs` so that the
//! all-or-none firing rule holds.

use crate::{Error, Result};

/// Where a subsystem stands between configuration and data delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriggerPhase {
    /// Configurable; not waiting for a trigger.
    #[default]
    Idle,
    /// Waiting for the configured trigger source; configuration rejected.
    Armed,
    /// Trigger fired; samples are flowing.
    Triggered,
    /// Finite burst delivered in full; re-arm or clear to continue.
    Completed,
}

impl TriggerPhase {
    /// Armed or actively streaming; configuration must be rejected.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Armed | Self::Triggered)
    }

    /// Transition taken by an arm request.
    pub(crate) fn arm(self) -> Result<Self> {
        match self {
            Self::Idle | Self::Completed => Ok(Self::Armed),
            Self::Armed | Self::Triggered => Err(Error::NotReading),
        }
    }

    /// Transition taken by a software trigger strobe.
    pub(crate) fn fire(self) -> Result<Self> {
        match self {
            Self::Armed => Ok(Self::Triggered),
            // firing an unarmed subsystem is a sequencing bug in the caller
            _ => Err(Error::UndefinedParameter),
        }
    }
}
