//! Digital input and digital output subsystems.
//!
//! Digital input mirrors the analog capture path but delivers port
//! snapshots as bytes. Digital output plays a queued word pattern out of
//! its FIFO under trigger control, optionally repeated by the configured
//! cycle count, and can also drive individual lines immediately.

use crate::{
    bus::{Reg, SubsystemId},
    config::{ConvSource, SampleMode, TrigSource},
    device::{InputEngine, Shared, DO_LINES},
    fifo::{Acquisition, Wait},
    trigger::TriggerPhase,
    util::lock,
    Error, Result,
};

/// View of a device's digital input subsystem.
///
/// Obtained from [`Device::digital_in`](crate::Device::digital_in).
pub struct DigitalIn<'a> {
    dev: &'a Shared,
}

impl<'a> DigitalIn<'a> {
    pub(crate) fn new(dev: &'a Shared) -> Self {
        Self { dev }
    }

    fn engine(&self) -> InputEngine<'a> {
        InputEngine {
            dev: self.dev,
            state: &self.dev.di,
            id: SubsystemId::Di,
        }
    }

    /// Set the time between port samples in nanoseconds.
    pub fn set_sample_period(&self, period_ns: u32) -> Result<()> {
        self.engine().set_sample_period(period_ns)
    }

    /// Select continuous, one-shot or pre-trigger capture.
    pub fn set_sample_mode(&self, mode: SampleMode) -> Result<()> {
        self.engine().set_sample_mode(mode)
    }

    /// Select what starts the capture once armed.
    pub fn set_trig_source(&self, source: TrigSource) -> Result<()> {
        self.engine().set_trig_source(source)
    }

    /// Select the conversion clock source.
    pub fn set_conv_source(&self, source: ConvSource) -> Result<()> {
        self.engine().set_conv_source(source)
    }

    /// Points retained from before the trigger event.
    pub fn set_pre_trig_points(&self, points: u32) -> Result<()> {
        self.engine().set_pre_trig_points(points)
    }

    /// Length of a finite capture burst.
    pub fn set_one_shot_points(&self, points: u32) -> Result<()> {
        self.engine().set_one_shot_points(points)
    }

    /// Arm the capture for its configured trigger source.
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

    /// Capture `points` port snapshots, waiting at most `wait`.
    ///
    /// Timeout semantics match [`AnalogIn::read`](crate::AnalogIn::read):
    /// the partial capture is returned, never discarded.
    pub fn read(&self, points: usize, wait: Wait) -> Result<Acquisition<u8>> {
        let capture = self.engine().read_counts(points, wait)?;
        #[allow(clippy::cast_possible_truncation)]
        let samples = capture.counts.iter().map(|c| *c as u8).collect();
        Ok(Acquisition {
            samples,
            timed_out: capture.timed_out,
        })
    }
}

/// View of a device's digital output subsystem.
///
/// Obtained from [`Device::digital_out`](crate::Device::digital_out).
pub struct DigitalOut<'a> {
    dev: &'a Shared,
}

impl<'a> DigitalOut<'a> {
    pub(crate) fn new(dev: &'a Shared) -> Self {
        Self { dev }
    }

    fn configure<R>(&self, f: impl FnOnce(&mut crate::device::DoState) -> Result<R>) -> Result<R> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.dout);
        if st.phase.is_busy() {
            return Err(Error::NotReading);
        }
        f(&mut st)
    }

    /// Set the time between output updates in nanoseconds.
    pub fn set_sample_period(&self, period_ns: u32) -> Result<()> {
        self.configure(|st| {
            crate::config::check_sample_period(period_ns)?;
            self.dev
                .bus
                .write_reg(Reg::SamplePeriod(SubsystemId::Do), period_ns)?;
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
                .write_reg(Reg::SampleMode(SubsystemId::Do), u32::from(u8::from(mode)))?;
            st.config.mode = mode;
            Ok(())
        })
    }

    /// Select what starts playback once armed.
    pub fn set_trig_source(&self, source: TrigSource) -> Result<()> {
        self.configure(|st| {
            self.dev
                .bus
                .write_reg(Reg::TrigSource(SubsystemId::Do), u32::from(u8::from(source)))?;
            st.config.trig = source;
            Ok(())
        })
    }

    /// Select the update clock source.
    pub fn set_conv_source(&self, source: ConvSource) -> Result<()> {
        self.configure(|st| {
            self.dev
                .bus
                .write_reg(Reg::ConvSource(SubsystemId::Do), u32::from(u8::from(source)))?;
            st.config.conv = source;
            Ok(())
        })
    }

    /// Number of times the queued pattern is replayed per trigger.
    pub fn set_cycle(&self, cycles: u32) -> Result<()> {
        self.configure(|st| {
            if cycles == 0 {
                return Err(Error::UndefinedParameter);
            }
            self.dev.bus.write_reg(Reg::Cycle(SubsystemId::Do), cycles)?;
            st.config.cycle = cycles;
            Ok(())
        })
    }

    /// Select which lines are driven from the waveform FIFO.
    pub fn set_wave_lines(&self, mask: u32) -> Result<()> {
        self.configure(|st| {
            if mask >= (1 << DO_LINES) {
                return Err(Error::UndefinedParameter);
            }
            self.dev.bus.write_reg(Reg::DoWaveLines, mask)?;
            st.wave_lines = mask;
            Ok(())
        })
    }

    /// Queue pattern words behind any previously queued data.
    ///
    /// Words are played out first-pushed-first and survive multiple
    /// trigger cycles when the cycle count is greater than one.
    pub fn push(&self, values: &[u32]) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.dout);
        if values.is_empty() || values.len() > st.fifo.remaining() {
            return Err(Error::UndefinedWaveLen);
        }
        self.dev.bus.write_block(SubsystemId::Do, values)?;
        st.fifo.try_extend(values)
    }

    /// Drive one line immediately, bypassing the FIFO.
    pub fn write_immediate(&self, line: u32, level: bool) -> Result<()> {
        self.dev.ensure_normal()?;
        if line >= DO_LINES {
            return Err(Error::ChanIndexOverflow);
        }
        let st = lock(&self.dev.dout);
        if st.phase.is_busy() {
            return Err(Error::NotReading);
        }
        self.dev
            .bus
            .write_reg(Reg::DoImmediate, (line << 16) | u32::from(level))
    }

    /// Arm playback for the configured trigger source.
    pub fn arm(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.dout);
        let armed = st.phase.arm()?;
        self.dev.bus.write_reg(Reg::Arm(SubsystemId::Do), 1)?;
        st.phase = if st.config.trig == TrigSource::Immediate {
            TriggerPhase::Triggered
        } else {
            armed
        };
        Ok(())
    }

    /// Fire the software trigger.
    pub fn soft_trig(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.dout);
        if st.config.trig != TrigSource::Software {
            return Err(Error::UndefinedParameter);
        }
        let fired = st.phase.fire()?;
        self.dev.bus.write_reg(Reg::SoftTrig(SubsystemId::Do), 1)?;
        st.phase = fired;
        Ok(())
    }

    /// Force playback back to idle, dropping queued data.
    pub fn clear_trigger(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(&self.dev.dout);
        self.dev.bus.write_reg(Reg::ClearTrig(SubsystemId::Do), 1)?;
        st.phase = TriggerPhase::Idle;
        st.fifo.clear();
        Ok(())
    }

    /// Reset the waveform FIFO unconditionally.
    pub fn clear_fifo(&self) -> Result<()> {
        self.dev.ensure_open()?;
        lock(&self.dev.dout).fifo.clear();
        self.dev.bus.write_reg(Reg::ClearFifo(SubsystemId::Do), 1)
    }

    /// Current trigger phase.
    pub fn phase(&self) -> Result<TriggerPhase> {
        self.dev.ensure_open()?;
        Ok(lock(&self.dev.dout).phase)
    }

    /// Words currently queued in the waveform FIFO.
    pub fn queued(&self) -> Result<usize> {
        self.dev.ensure_open()?;
        Ok(lock(&self.dev.dout).fifo.len())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bus::{testing::open_device, Reg, SubsystemId},
        config::SampleMode,
        trigger::TriggerPhase,
        util::lock,
        Error, Wait,
    };

    #[test]
    fn pushed_words_drain_in_submission_order() {
        let (device, bus, _registry) = open_device();
        let dout = device.digital_out();
        dout.push(&[1, 2, 3]).unwrap();
        dout.push(&[4, 5]).unwrap();
        assert_eq!(dout.queued().unwrap(), 5);
        // both the host mirror and the bus saw the same order
        assert_eq!(
            lock(&device.shared.dout).fifo.pop_up_to(5),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(bus.sent(SubsystemId::Do), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn push_length_is_validated() {
        let (device, _bus, _registry) = open_device();
        let dout = device.digital_out();
        assert_eq!(dout.push(&[]), Err(Error::UndefinedWaveLen));
        let capacity = lock(&device.shared.dout).fifo.capacity();
        let oversized = vec![0u32; capacity + 1];
        assert_eq!(dout.push(&oversized), Err(Error::UndefinedWaveLen));
        assert_eq!(dout.queued().unwrap(), 0);
    }

    #[test]
    fn pre_trigger_mode_is_rejected_for_outputs() {
        let (device, _bus, _registry) = open_device();
        let dout = device.digital_out();
        assert_eq!(
            dout.set_sample_mode(SampleMode::PreTrigger),
            Err(Error::UndefinedAiSampleMode)
        );
        assert_eq!(
            lock(&device.shared.dout).config.mode,
            SampleMode::Continuous
        );
        assert!(dout.set_sample_mode(SampleMode::OneShot).is_ok());
    }

    #[test]
    fn cycle_count_must_be_positive() {
        let (device, bus, _registry) = open_device();
        let dout = device.digital_out();
        assert_eq!(dout.set_cycle(0), Err(Error::UndefinedParameter));
        dout.set_cycle(4).unwrap();
        assert_eq!(bus.writes_of(Reg::Cycle(SubsystemId::Do)), vec![4]);
    }

    #[test]
    fn wave_line_mask_is_validated() {
        let (device, _bus, _registry) = open_device();
        let dout = device.digital_out();
        assert_eq!(dout.set_wave_lines(1 << 16), Err(Error::UndefinedParameter));
        assert!(dout.set_wave_lines(0b1111_0000).is_ok());
    }

    #[test]
    fn immediate_writes_are_bounds_checked_and_busy_guarded() {
        let (device, bus, _registry) = open_device();
        let dout = device.digital_out();
        assert_eq!(
            dout.write_immediate(16, true),
            Err(Error::ChanIndexOverflow)
        );
        dout.write_immediate(3, true).unwrap();
        assert_eq!(bus.writes_of(Reg::DoImmediate), vec![(3 << 16) | 1]);

        dout.push(&[1]).unwrap();
        dout.arm().unwrap();
        assert_eq!(dout.write_immediate(3, false), Err(Error::NotReading));
    }

    #[test]
    fn queued_pattern_survives_trigger_cycles_until_cleared() {
        let (device, _bus, _registry) = open_device();
        let dout = device.digital_out();
        dout.set_cycle(3).unwrap();
        dout.push(&[0xA, 0xB]).unwrap();
        dout.arm().unwrap();
        dout.soft_trig().unwrap();
        assert_eq!(dout.phase().unwrap(), TriggerPhase::Triggered);
        // still queued while the device replays it
        assert_eq!(dout.queued().unwrap(), 2);
        dout.clear_trigger().unwrap();
        assert_eq!(dout.queued().unwrap(), 0);
        assert_eq!(dout.phase().unwrap(), TriggerPhase::Idle);
    }

    #[test]
    fn digital_input_read_delivers_port_bytes() {
        let (device, bus, _registry) = open_device();
        bus.feed(SubsystemId::Di, &[0xFF, 0x01, 0x80]);
        let acq = device.digital_in().read(3, Wait::from_millis(100)).unwrap();
        assert!(acq.is_complete());
        assert_eq!(acq.samples, vec![0xFF, 0x01, 0x80]);
    }
}
