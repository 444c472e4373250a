//! Analog input subsystem.
//!
//! All enabled channels share one acquisition engine and one capture FIFO.
//! Samples arrive interleaved across the enabled channels in ascending
//! channel order; [`AnalogIn::read`] converts each raw count to volts with
//! that channel's calibration coefficients.

use crate::{
    bus::{Reg, SubsystemId},
    config::{AiConnectType, AiRange, ConvSource, SampleMode, TrigSource},
    device::{InputEngine, Shared, AI_CHANNELS},
    fifo::{Acquisition, Wait},
    trigger::TriggerPhase,
    util::{lock, read_lock},
    Error, Kb, Result,
};

/// View of a device's analog input subsystem.
///
/// Obtained from [`Device::analog_in`](crate::Device::analog_in).
pub struct AnalogIn<'a> {
    dev: &'a Shared,
}

impl<'a> AnalogIn<'a> {
    pub(crate) fn new(dev: &'a Shared) -> Self {
        Self { dev }
    }

    fn engine(&self) -> InputEngine<'a> {
        InputEngine {
            dev: self.dev,
            state: &self.dev.ai,
            id: SubsystemId::Ai,
        }
    }

    /// Set the time between conversions in nanoseconds.
    pub fn set_sample_period(&self, period_ns: u32) -> Result<()> {
        self.engine().set_sample_period(period_ns)
    }

    /// Select continuous, one-shot or pre-trigger acquisition.
    pub fn set_sample_mode(&self, mode: SampleMode) -> Result<()> {
        self.engine().set_sample_mode(mode)
    }

    /// Select what starts the acquisition once armed.
    pub fn set_trig_source(&self, source: TrigSource) -> Result<()> {
        self.engine().set_trig_source(source)
    }

    /// Select the conversion clock source.
    pub fn set_conv_source(&self, source: ConvSource) -> Result<()> {
        self.engine().set_conv_source(source)
    }

    /// Points retained from before the trigger event.
    ///
    /// Must not exceed the one-shot point count.
    pub fn set_pre_trig_points(&self, points: u32) -> Result<()> {
        self.engine().set_pre_trig_points(points)
    }

    /// Length of a finite acquisition burst.
    pub fn set_one_shot_points(&self, points: u32) -> Result<()> {
        self.engine().set_one_shot_points(points)
    }

    /// Set the input span for one channel.
    pub fn set_range(&self, chan: u8, range: AiRange) -> Result<()> {
        let raw = u32::from(u8::from(range));
        self.with_channel(chan, |ch| ch.range = range, Reg::AiRange(chan), raw)
    }

    /// Include or exclude a channel from the scan.
    pub fn set_channel_enabled(&self, chan: u8, enabled: bool) -> Result<()> {
        self.with_channel(
            chan,
            |ch| ch.enabled = enabled,
            Reg::AiChanSel(chan),
            u32::from(enabled),
        )
    }

    /// Set the wiring of the analog front end.
    pub fn set_connect_type(&self, connect: AiConnectType) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.ai);
        if st.phase.is_busy() || st.reading {
            return Err(Error::NotReading);
        }
        self.dev
            .bus
            .write_reg(Reg::AiConnectType, u32::from(u8::from(connect)))?;
        st.connect = connect;
        Ok(())
    }

    /// Arm the acquisition for its configured trigger source.
    pub fn arm(&self) -> Result<()> {
        self.engine().arm()
    }

    /// Fire the software trigger.
    pub fn soft_trig(&self) -> Result<()> {
        self.engine().soft_trig()
    }

    /// Force the subsystem back to idle, dropping undelivered samples.
    pub fn clear_trigger(&self) -> Result<()> {
        self.engine().clear_trigger()
    }

    /// Reset the capture FIFO unconditionally, aborting a pending read.
    pub fn clear_fifo(&self) -> Result<()> {
        self.engine().clear_fifo()
    }

    /// Current trigger phase.
    pub fn phase(&self) -> Result<TriggerPhase> {
        self.engine().phase()
    }

    /// Capture `points` samples, waiting at most `wait`.
    ///
    /// On timeout the partial capture is returned with
    /// [`Acquisition::timed_out`] set; samples already captured are never
    /// discarded and a following read resumes from the FIFO's remaining
    /// content. Conversion tracks the scan position across reads, so a
    /// partial read that stops mid-scan never shifts coefficients onto
    /// the wrong channel.
    pub fn read(&self, points: usize, wait: Wait) -> Result<Acquisition<f32>> {
        let capture = self.engine().read_counts(points, wait)?;
        let kbs = self.enabled_kbs();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let samples = if kbs.is_empty() {
            capture.counts.iter().map(|c| *c as f32).collect()
        } else {
            let base = (capture.start % kbs.len() as u64) as usize;
            capture
                .counts
                .iter()
                .enumerate()
                .map(|(i, c)| kbs[(base + i) % kbs.len()].apply(*c as f32))
                .collect()
        };
        Ok(Acquisition {
            samples,
            timed_out: capture.timed_out,
        })
    }

    /// Calibration coefficients of the enabled channels, in scan order.
    fn enabled_kbs(&self) -> Vec<Kb> {
        let st = lock(&self.dev.ai);
        let cal = read_lock(&self.dev.cal);
        st.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled)
            .map(|(i, _)| cal.ai[i])
            .collect()
    }

    fn with_channel(
        &self,
        chan: u8,
        apply: impl FnOnce(&mut crate::device::AiChannel),
        reg: Reg,
        value: u32,
    ) -> Result<()> {
        self.dev.ensure_normal()?;
        if usize::from(chan) >= AI_CHANNELS {
            return Err(Error::ChanIndexOverflow);
        }
        let mut st = lock(&self.dev.ai);
        if st.phase.is_busy() || st.reading {
            return Err(Error::NotReading);
        }
        self.dev.bus.write_reg(reg, value)?;
        apply(&mut st.channels[usize::from(chan)]);
        Ok(())
    }
}
