//! Per-channel analog output subsystem.
//!
//! Each of the four output channels owns an independent waveform engine:
//! its own FIFO, timing configuration and trigger state. Channels may be
//! bound into a sync group with [`Device::set_ao_sync`](crate::Device::set_ao_sync),
//! which makes them share trigger timing while keeping per-channel rate
//! and mode.

use std::sync::MutexGuard;

use crate::{
    bus::{Reg, SubsystemId},
    config::{check_sample_period, ConvSource, SampleMode, TrigSource},
    device::{AoState, Shared},
    trigger::TriggerPhase,
    util::{lock, read_lock},
    Error, Kb, Result,
};

/// Full-scale output swing in volts.
pub const AO_MAX_VOLTS: f32 = 10.0;

/// Convert a calibrated voltage to the 16-bit DAC code.
fn volts_to_code(volts: f32) -> u32 {
    let clamped = volts.clamp(-AO_MAX_VOLTS, AO_MAX_VOLTS);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        (((clamped + AO_MAX_VOLTS) / (2.0 * AO_MAX_VOLTS)) * f32::from(u16::MAX)).round() as u32
    }
}

/// View of one analog output channel.
///
/// Obtained from [`Device::analog_out`](crate::Device::analog_out).
pub struct AnalogOut<'a> {
    dev: &'a Shared,
    chan: u8,
}

impl<'a> AnalogOut<'a> {
    pub(crate) fn new(dev: &'a Shared, chan: u8) -> Self {
        Self { dev, chan }
    }

    fn id(&self) -> SubsystemId {
        SubsystemId::Ao(self.chan)
    }

    fn state(&self) -> &'a std::sync::Mutex<AoState> {
        &self.dev.ao[usize::from(self.chan)]
    }

    fn configure<R>(&self, f: impl FnOnce(&mut AoState) -> Result<R>) -> Result<R> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state());
        if st.phase.is_busy() {
            return Err(Error::NotReading);
        }
        f(&mut st)
    }

    /// Set the time between DAC updates in nanoseconds.
    pub fn set_sample_period(&self, period_ns: u32) -> Result<()> {
        self.configure(|st| {
            check_sample_period(period_ns)?;
            self.dev
                .bus
                .write_reg(Reg::SamplePeriod(self.id()), period_ns)?;
            st.config.period_ns = period_ns;
            Ok(())
        })
    }

    /// Select continuous or one-shot playback.
    ///
    /// Pre-trigger capture has no meaning for an output engine.
    pub fn set_sample_mode(&self, mode: SampleMode) -> Result<()> {
        self.configure(|st| {
            if mode == SampleMode::PreTrigger {
                return Err(Error::UndefinedAiSampleMode);
            }
            self.dev
                .bus
                .write_reg(Reg::SampleMode(self.id()), u32::from(u8::from(mode)))?;
            st.config.mode = mode;
            Ok(())
        })
    }

    /// Select what starts playback once armed.
    pub fn set_trig_source(&self, source: TrigSource) -> Result<()> {
        self.configure(|st| {
            self.dev
                .bus
                .write_reg(Reg::TrigSource(self.id()), u32::from(u8::from(source)))?;
            st.config.trig = source;
            Ok(())
        })
    }

    /// Select the update clock source.
    pub fn set_conv_source(&self, source: ConvSource) -> Result<()> {
        self.configure(|st| {
            self.dev
                .bus
                .write_reg(Reg::ConvSource(self.id()), u32::from(u8::from(source)))?;
            st.config.conv = source;
            Ok(())
        })
    }

    /// Number of times the queued waveform is replayed per trigger.
    pub fn set_cycle(&self, cycles: u32) -> Result<()> {
        self.configure(|st| {
            if cycles == 0 {
                return Err(Error::UndefinedParameter);
            }
            self.dev.bus.write_reg(Reg::Cycle(self.id()), cycles)?;
            st.config.cycle = cycles;
            Ok(())
        })
    }

    /// Set the user waveform scaling applied ahead of factory calibration.
    ///
    /// `k * sample + b` is evaluated on every pushed sample before the
    /// calibration transform and DAC code conversion.
    pub fn set_wave_kb(&self, kb: Kb) -> Result<()> {
        self.configure(|st| {
            if !kb.k.is_finite() || !kb.b.is_finite() {
                return Err(Error::UndefinedParameter);
            }
            st.wave_kb = kb;
            Ok(())
        })
    }

    /// Queue waveform samples in volts behind any previously queued data.
    pub fn push(&self, volts: &[f32]) -> Result<()> {
        self.dev.ensure_normal()?;
        let wave_kb = lock(self.state()).wave_kb;
        let cal = read_lock(&self.dev.cal).ao[usize::from(self.chan)];
        let codes: Vec<u32> = volts
            .iter()
            .map(|v| volts_to_code(cal.apply(wave_kb.apply(*v))))
            .collect();
        let mut st = lock(self.state());
        if codes.is_empty() || codes.len() > st.fifo.remaining() {
            return Err(Error::UndefinedWaveLen);
        }
        self.dev.bus.write_block(self.id(), &codes)?;
        st.fifo.try_extend(&codes)
    }

    /// Drive the channel to a level immediately, bypassing the FIFO.
    ///
    /// Only the calibration transform is applied; waveform scaling is a
    /// FIFO-path concern.
    pub fn write_immediate(&self, volts: f32) -> Result<()> {
        self.dev.ensure_normal()?;
        if !volts.is_finite() || volts.abs() > AO_MAX_VOLTS {
            return Err(Error::UndefinedParameter);
        }
        let st = lock(self.state());
        if st.phase.is_busy() {
            return Err(Error::NotReading);
        }
        let cal = read_lock(&self.dev.cal).ao[usize::from(self.chan)];
        self.dev
            .bus
            .write_reg(Reg::AoImmediate(self.chan), volts_to_code(cal.apply(volts)))
    }

    /// Arm playback for the configured trigger source.
    pub fn arm(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state());
        let armed = st.phase.arm()?;
        self.dev.bus.write_reg(Reg::Arm(self.id()), 1)?;
        st.phase = if st.config.trig == TrigSource::Immediate {
            TriggerPhase::Triggered
        } else {
            armed
        };
        Ok(())
    }

    /// Fire the software trigger.
    ///
    /// If the channel belongs to a sync group, every channel in the group
    /// must be armed for a software trigger; they then fire together. A
    /// partially armed group fires nothing.
    pub fn soft_trig(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        // fixed index order keeps group firing deadlock-free
        let mut guards: Vec<MutexGuard<'_, AoState>> =
            self.dev.ao.iter().map(lock).collect();
        let sync = *lock(&self.dev.ao_sync);
        let grouped = sync & (1 << self.chan) != 0;

        let fires = |st: &AoState| st.phase == TriggerPhase::Armed;
        if grouped {
            for (i, st) in guards.iter().enumerate() {
                if sync & (1 << i) != 0
                    && (!fires(st) || st.config.trig != TrigSource::Software)
                {
                    return Err(Error::UndefinedParameter);
                }
            }
        } else {
            let st = &guards[usize::from(self.chan)];
            if st.config.trig != TrigSource::Software {
                return Err(Error::UndefinedParameter);
            }
            st.phase.fire()?;
        }

        // all strobes are delivered before any phase changes
        if grouped {
            for i in 0..guards.len() {
                if sync & (1 << i) != 0 {
                    #[allow(clippy::cast_possible_truncation)]
                    self.dev
                        .bus
                        .write_reg(Reg::SoftTrig(SubsystemId::Ao(i as u8)), 1)?;
                }
            }
            for (i, st) in guards.iter_mut().enumerate() {
                if sync & (1 << i) != 0 {
                    st.phase = TriggerPhase::Triggered;
                }
            }
        } else {
            self.dev.bus.write_reg(Reg::SoftTrig(self.id()), 1)?;
            guards[usize::from(self.chan)].phase = TriggerPhase::Triggered;
        }
        Ok(())
    }

    /// Force the channel back to idle, dropping queued data.
    pub fn clear_trigger(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state());
        self.dev.bus.write_reg(Reg::ClearTrig(self.id()), 1)?;
        st.phase = TriggerPhase::Idle;
        st.fifo.clear();
        Ok(())
    }

    /// Reset the waveform FIFO unconditionally.
    pub fn clear_fifo(&self) -> Result<()> {
        self.dev.ensure_open()?;
        lock(self.state()).fifo.clear();
        self.dev.bus.write_reg(Reg::ClearFifo(self.id()), 1)
    }

    /// Current trigger phase.
    pub fn phase(&self) -> Result<TriggerPhase> {
        self.dev.ensure_open()?;
        Ok(lock(self.state()).phase)
    }

    /// Samples currently queued in the waveform FIFO.
    pub fn queued(&self) -> Result<usize> {
        self.dev.ensure_open()?;
        Ok(lock(self.state()).fifo.len())
    }
}

#[cfg(test)]
mod test {
    use super::volts_to_code;
    use crate::{
        bus::{testing::open_device, Reg, SubsystemId},
        trigger::TriggerPhase,
        Error, Kb,
    };

    #[test]
    fn code_conversion_spans_the_dac_range() {
        assert_eq!(volts_to_code(-10.0), 0);
        assert_eq!(volts_to_code(10.0), 65_535);
        assert_eq!(volts_to_code(0.0), 32_768);
        // out-of-range inputs clamp instead of wrapping
        assert_eq!(volts_to_code(-12.0), 0);
        assert_eq!(volts_to_code(12.0), 65_535);
    }

    #[test]
    fn wave_kb_scales_pushed_samples() {
        let (device, bus, _registry) = open_device();
        let ao = device.analog_out(0).unwrap();
        ao.set_wave_kb(Kb { k: 2.0, b: 0.0 }).unwrap();
        ao.push(&[5.0]).unwrap();
        // 2.0 * 5.0 = full scale
        assert_eq!(bus.sent(SubsystemId::Ao(0)), vec![65_535]);
    }

    #[test]
    fn wave_kb_rejects_non_finite_coefficients() {
        let (device, _bus, _registry) = open_device();
        let ao = device.analog_out(0).unwrap();
        assert_eq!(
            ao.set_wave_kb(Kb {
                k: f32::NAN,
                b: 0.0
            }),
            Err(Error::UndefinedParameter)
        );
    }

    #[test]
    fn immediate_write_validates_range_and_skips_wave_scaling() {
        let (device, bus, _registry) = open_device();
        let ao = device.analog_out(1).unwrap();
        ao.set_wave_kb(Kb { k: 100.0, b: 0.0 }).unwrap();
        assert_eq!(ao.write_immediate(10.5), Err(Error::UndefinedParameter));
        ao.write_immediate(0.0).unwrap();
        assert_eq!(bus.writes_of(Reg::AoImmediate(1)), vec![32_768]);
    }

    #[test]
    fn channels_trigger_independently_by_default() {
        let (device, _bus, _registry) = open_device();
        device.analog_out(0).unwrap().arm().unwrap();
        device.analog_out(1).unwrap().arm().unwrap();
        device.analog_out(0).unwrap().soft_trig().unwrap();
        assert_eq!(
            device.analog_out(0).unwrap().phase().unwrap(),
            TriggerPhase::Triggered
        );
        assert_eq!(
            device.analog_out(1).unwrap().phase().unwrap(),
            TriggerPhase::Armed
        );
    }

    #[test]
    fn sync_group_fires_together_or_not_at_all() {
        let (device, bus, _registry) = open_device();
        device.set_ao_sync(0b0011).unwrap();
        device.analog_out(0).unwrap().arm().unwrap();
        // channel 1 is in the group but not armed
        assert_eq!(
            device.analog_out(0).unwrap().soft_trig(),
            Err(Error::UndefinedParameter)
        );
        assert_eq!(
            device.analog_out(0).unwrap().phase().unwrap(),
            TriggerPhase::Armed
        );

        device.analog_out(1).unwrap().arm().unwrap();
        device.analog_out(0).unwrap().soft_trig().unwrap();
        for chan in [0, 1] {
            assert_eq!(
                device.analog_out(chan).unwrap().phase().unwrap(),
                TriggerPhase::Triggered
            );
            assert_eq!(bus.writes_of(Reg::SoftTrig(SubsystemId::Ao(chan))), vec![1]);
        }
        // channel 2 is outside the group and untouched
        assert_eq!(
            device.analog_out(2).unwrap().phase().unwrap(),
            TriggerPhase::Idle
        );
    }

    #[test]
    fn clear_trigger_drops_queue_and_phase() {
        let (device, _bus, _registry) = open_device();
        let ao = device.analog_out(2).unwrap();
        ao.push(&[0.0, 1.0]).unwrap();
        ao.arm().unwrap();
        ao.clear_trigger().unwrap();
        assert_eq!(ao.phase().unwrap(), TriggerPhase::Idle);
        assert_eq!(ao.queued().unwrap(), 0);
    }

    #[test]
    fn push_while_armed_still_extends_the_queue() {
        let (device, _bus, _registry) = open_device();
        let ao = device.analog_out(0).unwrap();
        ao.push(&[0.0]).unwrap();
        ao.arm().unwrap();
        ao.push(&[0.0]).unwrap();
        assert_eq!(ao.queued().unwrap(), 2);
    }
}
