//! Device handle and the state it owns.
//!
//! A [`Device`] is a cheaply cloneable handle to one opened card. All
//! subsystem configuration, FIFO, trigger and calibration state is scoped
//! to the handle and dies with [`Registry::close`](crate::Registry::close);
//! nothing is shared across devices.
//!
//! Locking follows the one-lock-per-subsystem rule: each engine (AI, DI,
//! DO, and every AO channel) sits behind its own mutex, so a blocking
//! capture on the analog input never stalls digital output configuration
//! on the same card. The only cross-subsystem paths — the global software
//! trigger, the global clear and calibration entry — take the locks in one
//! fixed order: AI, DI, DO, AO0..AO3.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, Instant},
};

use crate::{
    analog_in::AnalogIn,
    analog_out::AnalogOut,
    bus::{DeviceBus, Reg, SubsystemId},
    calibration::{CalTable, CalibrationSession},
    config::{
        check_sample_period, AiConnectType, AiRange, ConvOutSource, ConvSource, SampleMode,
        StreamConfig, TrigOutSource, TrigSource,
    },
    digital::{DigitalIn, DigitalOut},
    fifo::{Fifo, Wait},
    registry::DeviceIdentity,
    trigger::TriggerPhase,
    util::lock,
    Error, FirmwareVersion, Result,
};

/// Bounded device index space; slots are `0..MAX_DEVICES`.
pub const MAX_DEVICES: usize = 8;
/// Analog input channels per device.
pub const AI_CHANNELS: usize = 16;
/// Analog output channels per device.
pub const AO_CHANNELS: usize = 4;
/// Digital output lines per device.
pub const DO_LINES: u32 = 16;
/// Analog input capture FIFO depth in samples.
pub const AI_FIFO_DEPTH: usize = 2 * 1024 * 1024;
/// Digital input capture FIFO depth in samples.
pub const DI_FIFO_DEPTH: usize = 2 * 1024 * 1024;
/// Digital output waveform FIFO depth in words.
pub const DO_FIFO_DEPTH: usize = 65_536;
/// Analog output waveform FIFO depth per channel in samples.
pub const AO_FIFO_DEPTH: usize = 65_536;

/// Largest slice a blocking capture spends inside one bus call, so that a
/// forced FIFO clear can interrupt it promptly.
const POLL_SLICE: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Normal,
    Calibrating,
}

/// Per-channel analog input selection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AiChannel {
    pub enabled: bool,
    pub range: AiRange,
}

impl Default for AiChannel {
    fn default() -> Self {
        Self {
            enabled: true,
            range: AiRange::Pm10V,
        }
    }
}

/// State of one input engine (AI or DI).
#[derive(Debug)]
pub(crate) struct InputState {
    pub config: StreamConfig,
    pub phase: TriggerPhase,
    pub fifo: Fifo<u32>,
    /// Points handed to the caller since the last arm; drives one-shot
    /// completion.
    pub delivered: u64,
    /// A blocking capture is in progress.
    pub reading: bool,
    /// Set by a forced FIFO clear; the pending capture observes it and
    /// returns `TransferDataFail`.
    pub abort: bool,
    /// AI only; empty for DI.
    pub channels: Vec<AiChannel>,
    pub connect: AiConnectType,
}

impl InputState {
    fn new(fifo_depth: usize, channels: usize) -> Self {
        Self {
            config: StreamConfig::default(),
            phase: TriggerPhase::Idle,
            fifo: Fifo::new(fifo_depth),
            delivered: 0,
            reading: false,
            abort: false,
            channels: vec![AiChannel::default(); channels],
            connect: AiConnectType::SingleEnded,
        }
    }

    fn note_delivered(&mut self, n: usize) {
        self.delivered += n as u64;
        if matches!(self.config.mode, SampleMode::OneShot | SampleMode::PreTrigger)
            && self.phase == TriggerPhase::Triggered
            && self.delivered >= u64::from(self.config.one_shot_points)
        {
            self.phase = TriggerPhase::Completed;
        }
    }

    fn reset_stream(&mut self) {
        self.fifo.clear();
        self.delivered = 0;
        if self.reading {
            self.abort = true;
        }
    }
}

/// State of the digital output engine.
#[derive(Debug)]
pub(crate) struct DoState {
    pub config: StreamConfig,
    pub phase: TriggerPhase,
    pub fifo: Fifo<u32>,
    pub wave_lines: u32,
}

impl DoState {
    fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            phase: TriggerPhase::Idle,
            fifo: Fifo::new(DO_FIFO_DEPTH),
            wave_lines: 0,
        }
    }
}

/// State of one analog output channel engine.
#[derive(Debug)]
pub(crate) struct AoState {
    pub config: StreamConfig,
    pub phase: TriggerPhase,
    pub fifo: Fifo<u32>,
    /// User waveform scaling applied ahead of calibration.
    pub wave_kb: crate::Kb,
}

impl AoState {
    fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            phase: TriggerPhase::Idle,
            fifo: Fifo::new(AO_FIFO_DEPTH),
            wave_kb: crate::Kb::IDENTITY,
        }
    }
}

/// Everything one opened device owns. Shared between the registry slot and
/// outstanding [`Device`] handles.
pub(crate) struct Shared {
    pub slot: usize,
    pub identity: DeviceIdentity,
    pub firmware: u32,
    pub open: AtomicBool,
    pub mode: Mutex<Mode>,
    pub bus: Box<dyn DeviceBus>,
    pub ai: Mutex<InputState>,
    pub di: Mutex<InputState>,
    pub dout: Mutex<DoState>,
    pub ao: [Mutex<AoState>; AO_CHANNELS],
    pub ao_sync: Mutex<u8>,
    pub global_latch: AtomicBool,
    pub cal: RwLock<CalTable>,
}

impl Shared {
    pub(crate) fn new(
        slot: usize,
        identity: DeviceIdentity,
        firmware: u32,
        bus: Box<dyn DeviceBus>,
        cal: CalTable,
    ) -> Self {
        Self {
            slot,
            identity,
            firmware,
            open: AtomicBool::new(true),
            mode: Mutex::new(Mode::Normal),
            bus,
            ai: Mutex::new(InputState::new(AI_FIFO_DEPTH, AI_CHANNELS)),
            di: Mutex::new(InputState::new(DI_FIFO_DEPTH, 0)),
            dout: Mutex::new(DoState::new()),
            ao: std::array::from_fn(|_| Mutex::new(AoState::new())),
            ao_sync: Mutex::new(0),
            global_latch: AtomicBool::new(false),
            cal: RwLock::new(cal),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::DeviceClosed)
        }
    }

    /// Open and in normal (non-calibration) mode.
    pub(crate) fn ensure_normal(&self) -> Result<()> {
        self.ensure_open()?;
        if *lock(&self.mode) == Mode::Normal {
            Ok(())
        } else {
            Err(Error::NotReading)
        }
    }

    /// No subsystem armed, streaming or mid-capture.
    pub(crate) fn ensure_settled(&self) -> Result<()> {
        for state in [&self.ai, &self.di] {
            let st = lock(state);
            if st.phase.is_busy() || st.reading {
                return Err(Error::NotReading);
            }
        }
        if lock(&self.dout).phase.is_busy() {
            return Err(Error::NotReading);
        }
        for state in &self.ao {
            if lock(state).phase.is_busy() {
                return Err(Error::NotReading);
            }
        }
        Ok(())
    }
}

/// Raw result of one blocking input capture.
pub(crate) struct RawCapture {
    pub counts: Vec<u32>,
    /// The wait elapsed before the full request was captured.
    pub timed_out: bool,
    /// Scan position at which this capture started: points delivered
    /// since the last arm or clear. Keeps per-channel conversion aligned
    /// when a partial read stops mid-scan.
    pub start: u64,
}

/// Shared implementation of the two input engines.
///
/// `AnalogIn` and `DigitalIn` are thin views over this; they differ only
/// in channel handling and sample conversion.
pub(crate) struct InputEngine<'a> {
    pub dev: &'a Shared,
    pub state: &'a Mutex<InputState>,
    pub id: SubsystemId,
}

impl InputEngine<'_> {
    /// Run a validated configuration mutation under the subsystem lock.
    fn configure<R>(
        &self,
        f: impl FnOnce(&mut InputState, &dyn DeviceBus) -> Result<R>,
    ) -> Result<R> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state);
        if st.phase.is_busy() || st.reading {
            return Err(Error::NotReading);
        }
        f(&mut st, self.dev.bus.as_ref())
    }

    pub fn set_sample_period(&self, period_ns: u32) -> Result<()> {
        self.configure(|st, bus| {
            check_sample_period(period_ns)?;
            bus.write_reg(Reg::SamplePeriod(self.id), period_ns)?;
            st.config.period_ns = period_ns;
            Ok(())
        })
    }

    pub fn set_sample_mode(&self, mode: SampleMode) -> Result<()> {
        self.configure(|st, bus| {
            bus.write_reg(Reg::SampleMode(self.id), u32::from(u8::from(mode)))?;
            st.config.mode = mode;
            Ok(())
        })
    }

    pub fn set_trig_source(&self, source: TrigSource) -> Result<()> {
        self.configure(|st, bus| {
            bus.write_reg(Reg::TrigSource(self.id), u32::from(u8::from(source)))?;
            st.config.trig = source;
            Ok(())
        })
    }

    pub fn set_conv_source(&self, source: ConvSource) -> Result<()> {
        self.configure(|st, bus| {
            bus.write_reg(Reg::ConvSource(self.id), u32::from(u8::from(source)))?;
            st.config.conv = source;
            Ok(())
        })
    }

    pub fn set_pre_trig_points(&self, points: u32) -> Result<()> {
        self.configure(|st, bus| {
            if points > st.config.one_shot_points || points as usize > st.fifo.capacity() {
                return Err(Error::UndefinedWaveLen);
            }
            bus.write_reg(Reg::PreTrigPoints(self.id), points)?;
            st.config.pre_trig_points = points;
            Ok(())
        })
    }

    pub fn set_one_shot_points(&self, points: u32) -> Result<()> {
        self.configure(|st, bus| {
            StreamConfig::check_points(points, st.fifo.capacity())?;
            if st.config.pre_trig_points > points {
                return Err(Error::UndefinedWaveLen);
            }
            bus.write_reg(Reg::OneShotPoints(self.id), points)?;
            st.config.one_shot_points = points;
            Ok(())
        })
    }

    pub fn arm(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state);
        if st.reading {
            return Err(Error::NotReading);
        }
        let armed = st.phase.arm()?;
        self.dev.bus.write_reg(Reg::Arm(self.id), 1)?;
        st.delivered = 0;
        // an immediate source starts streaming the moment it is armed
        st.phase = if st.config.trig == TrigSource::Immediate {
            TriggerPhase::Triggered
        } else {
            armed
        };
        Ok(())
    }

    pub fn soft_trig(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state);
        if st.config.trig != TrigSource::Software {
            return Err(Error::UndefinedParameter);
        }
        let fired = st.phase.fire()?;
        self.dev.bus.write_reg(Reg::SoftTrig(self.id), 1)?;
        st.phase = fired;
        Ok(())
    }

    pub fn clear_trigger(&self) -> Result<()> {
        self.dev.ensure_normal()?;
        let mut st = lock(self.state);
        self.dev.bus.write_reg(Reg::ClearTrig(self.id), 1)?;
        st.phase = TriggerPhase::Idle;
        st.reset_stream();
        Ok(())
    }

    /// Unconditional FIFO reset; aborts a pending capture.
    pub fn clear_fifo(&self) -> Result<()> {
        self.dev.ensure_open()?;
        {
            let mut st = lock(self.state);
            st.fifo.clear();
            st.delivered = 0;
            if st.reading {
                st.abort = true;
                log::debug!("{:?}: pending capture aborted by fifo clear", self.id);
            }
        }
        self.dev.bus.write_reg(Reg::ClearFifo(self.id), 1)
    }

    pub fn phase(&self) -> Result<TriggerPhase> {
        self.dev.ensure_open()?;
        Ok(lock(self.state).phase)
    }

    /// Blocking capture of `points` raw sample words.
    ///
    /// The subsystem lock is held only between bus polls, so other
    /// subsystems stay configurable throughout.
    pub fn read_counts(&self, points: usize, wait: Wait) -> Result<RawCapture> {
        self.dev.ensure_normal()?;
        let start;
        {
            let mut st = lock(self.state);
            if points == 0 {
                return Err(Error::UndefinedParameter);
            }
            if points > st.fifo.capacity() {
                return Err(Error::NotEnoughMemory);
            }
            if st.reading {
                return Err(Error::NotReading);
            }
            if st.fifo.take_overflow() {
                log::warn!("{:?}: capture fifo overflowed", self.id);
                return Err(Error::TransferDataFail);
            }
            start = st.delivered;
            st.reading = true;
            st.abort = false;
        }
        let result = self.pump(points, wait);
        lock(self.state).reading = false;
        let (counts, timed_out) = result?;
        Ok(RawCapture {
            counts,
            timed_out,
            start,
        })
    }

    fn pump(&self, points: usize, wait: Wait) -> Result<(Vec<u32>, bool)> {
        let deadline = wait.deadline();
        let mut out = Vec::with_capacity(points);
        let mut polled = false;
        loop {
            {
                let mut st = lock(self.state);
                if st.abort {
                    st.abort = false;
                    return Err(Error::TransferDataFail);
                }
                let drained = st.fifo.pop_up_to(points - out.len());
                st.note_delivered(drained.len());
                out.extend(drained);
            }
            if out.len() == points {
                return Ok((out, false));
            }
            if !self.dev.is_open() {
                return Err(Error::DeviceClosed);
            }
            let slice = match (wait, deadline) {
                (Wait::NoWait, _) if polled => return Ok((out, true)),
                (Wait::NoWait, _) => Duration::ZERO,
                (_, Some(d)) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok((out, true));
                    }
                    (d - now).min(POLL_SLICE)
                }
                (_, None) => POLL_SLICE,
            };
            let block = self
                .dev
                .bus
                .read_block(self.id, READ_CHUNK.max(points - out.len()), slice)?;
            polled = true;
            if !block.is_empty() {
                lock(self.state).fifo.load(&block);
            }
        }
    }
}

/// Handle to one opened USB5000-series device.
///
/// Handles are cheap to clone and may be used from any thread; operations
/// on different subsystems of the same device proceed in parallel.
///
/// # Example
///
/// ```no_run
/// use usb5000::{Registry, SampleMode, Wait};
///
/// # fn demo(registry: &Registry) -> usb5000::Result<()> {
/// let device = registry.open(0)?;
///
/// let ai = device.analog_in();
/// ai.set_sample_period(1_000_000)?; // 1 kHz
/// ai.set_sample_mode(SampleMode::Continuous)?;
/// ai.clear_fifo()?;
/// ai.arm()?;
/// ai.soft_trig()?;
///
/// let block = ai.read(1_000, Wait::from_millis(1_000))?;
/// println!("captured {} samples", block.samples.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<Shared>,
}

impl Device {
    /// Slot index this handle was opened from.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    /// Whether the device is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Device serial number.
    pub fn serial_number(&self) -> Result<&str> {
        self.shared.ensure_open()?;
        Ok(self.shared.identity.serial())
    }

    /// Device model string.
    pub fn model(&self) -> Result<&str> {
        self.shared.ensure_open()?;
        Ok(self.shared.identity.model())
    }

    /// FPGA firmware version read when the device was opened.
    pub fn firmware_version(&self) -> Result<FirmwareVersion> {
        self.shared.ensure_open()?;
        Ok(FirmwareVersion(self.shared.firmware))
    }

    /// Analog input subsystem.
    #[must_use]
    pub fn analog_in(&self) -> AnalogIn<'_> {
        AnalogIn::new(&self.shared)
    }

    /// Digital input subsystem.
    #[must_use]
    pub fn digital_in(&self) -> DigitalIn<'_> {
        DigitalIn::new(&self.shared)
    }

    /// Digital output subsystem.
    #[must_use]
    pub fn digital_out(&self) -> DigitalOut<'_> {
        DigitalOut::new(&self.shared)
    }

    /// One analog output channel.
    pub fn analog_out(&self, chan: u8) -> Result<AnalogOut<'_>> {
        if usize::from(chan) >= AO_CHANNELS {
            return Err(Error::ChanIndexOverflow);
        }
        Ok(AnalogOut::new(&self.shared, chan))
    }

    /// Bind analog output channels into one trigger group.
    ///
    /// Bit `n` of `mask` selects channel `n`. Bound channels must all be
    /// armed before any of them may fire; a group trigger with a partially
    /// armed group is rejected. Synced channels share trigger timing only;
    /// sample rate and mode may differ per channel.
    pub fn set_ao_sync(&self, mask: u8) -> Result<()> {
        self.shared.ensure_normal()?;
        if u32::from(mask) >= (1 << AO_CHANNELS) {
            return Err(Error::UndefinedParameter);
        }
        let guards: Vec<_> = self.shared.ao.iter().map(lock).collect();
        if guards.iter().any(|st| st.phase.is_busy()) {
            return Err(Error::NotReading);
        }
        self.shared.bus.write_reg(Reg::AoSync, u32::from(mask))?;
        *lock(&self.shared.ao_sync) = mask;
        Ok(())
    }

    /// Fire every armed subsystem configured for a software trigger, in
    /// one logical step.
    ///
    /// All targets are validated before any fires: if an analog output
    /// sync group is only partially armed, or the strobe itself cannot be
    /// delivered, no subsystem changes phase. Firing with no eligible
    /// target is a sequencing error.
    pub fn global_soft_trig(&self) -> Result<()> {
        let sh = &self.shared;
        sh.ensure_normal()?;
        let mut ai = lock(&sh.ai);
        let mut di = lock(&sh.di);
        let mut dout = lock(&sh.dout);
        let mut ao: Vec<_> = sh.ao.iter().map(lock).collect();
        let sync = *lock(&sh.ao_sync);

        let ai_fires = ai.phase == TriggerPhase::Armed && ai.config.trig == TrigSource::Software;
        let di_fires = di.phase == TriggerPhase::Armed && di.config.trig == TrigSource::Software;
        let do_fires =
            dout.phase == TriggerPhase::Armed && dout.config.trig == TrigSource::Software;
        let ao_fires: Vec<bool> = ao
            .iter()
            .map(|st| st.phase == TriggerPhase::Armed && st.config.trig == TrigSource::Software)
            .collect();

        // every member of a touched sync group must itself be eligible,
        // or the group would fire partially
        let group_touched = ao_fires
            .iter()
            .enumerate()
            .any(|(i, fires)| *fires && sync & (1 << i) != 0);
        if group_touched {
            for (i, fires) in ao_fires.iter().enumerate() {
                if sync & (1 << i) != 0 && !*fires {
                    return Err(Error::UndefinedParameter);
                }
            }
        }

        if !(ai_fires || di_fires || do_fires || ao_fires.iter().any(|f| *f)) {
            return Err(Error::UndefinedParameter);
        }

        // single strobe; a failed write leaves every phase untouched
        sh.bus.write_reg(Reg::GlobalSoftTrig, 1)?;

        if ai_fires {
            ai.phase = TriggerPhase::Triggered;
        }
        if di_fires {
            di.phase = TriggerPhase::Triggered;
        }
        if do_fires {
            dout.phase = TriggerPhase::Triggered;
        }
        for (st, fires) in ao.iter_mut().zip(&ao_fires) {
            if *fires {
                st.phase = TriggerPhase::Triggered;
            }
        }
        sh.global_latch.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether the global software trigger latch is set.
    #[must_use]
    pub fn global_soft_trig_latched(&self) -> bool {
        self.shared.global_latch.load(Ordering::Acquire)
    }

    /// Reset the global software trigger latch.
    pub fn clear_global_soft_trig(&self) -> Result<()> {
        self.shared.ensure_normal()?;
        self.shared.bus.write_reg(Reg::GlobalSoftTrig, 0)?;
        self.shared.global_latch.store(false, Ordering::Release);
        Ok(())
    }

    /// Force every subsystem back to idle and drop undelivered FIFO
    /// content.
    pub fn clear_triggers(&self) -> Result<()> {
        let sh = &self.shared;
        sh.ensure_normal()?;
        let mut ai = lock(&sh.ai);
        let mut di = lock(&sh.di);
        let mut dout = lock(&sh.dout);
        let mut ao: Vec<_> = sh.ao.iter().map(lock).collect();

        sh.bus.write_reg(Reg::ClearTrig(SubsystemId::Ai), 1)?;
        sh.bus.write_reg(Reg::ClearTrig(SubsystemId::Di), 1)?;
        sh.bus.write_reg(Reg::ClearTrig(SubsystemId::Do), 1)?;
        for chan in 0..AO_CHANNELS {
            #[allow(clippy::cast_possible_truncation)]
            sh.bus
                .write_reg(Reg::ClearTrig(SubsystemId::Ao(chan as u8)), 1)?;
        }

        for st in [&mut ai, &mut di] {
            st.phase = TriggerPhase::Idle;
            st.reset_stream();
        }
        dout.phase = TriggerPhase::Idle;
        dout.fifo.clear();
        for st in &mut ao {
            st.phase = TriggerPhase::Idle;
            st.fifo.clear();
        }
        Ok(())
    }

    /// Route a trigger signal to the external trigger output pin.
    pub fn set_ext_trig_out_source(&self, source: TrigOutSource) -> Result<()> {
        self.shared.ensure_normal()?;
        self.shared
            .bus
            .write_reg(Reg::ExtTrigOut, u32::from(u8::from(source)))
    }

    /// Route a conversion clock to the external clock output pin.
    pub fn set_ext_conv_out_source(&self, source: ConvOutSource) -> Result<()> {
        self.shared.ensure_normal()?;
        self.shared
            .bus
            .write_reg(Reg::ExtConvOut, u32::from(u8::from(source)))
    }

    /// Enter calibration mode, locking out normal-mode configuration on
    /// this device until the session ends.
    pub fn calibrate(&self) -> Result<CalibrationSession> {
        CalibrationSession::enter(Arc::clone(&self.shared))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("slot", &self.shared.slot)
            .field("serial", &self.shared.identity.serial())
            .field("open", &self.shared.is_open())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        bus::{testing::open_device, Reg, SubsystemId},
        config::{ConvOutSource, TrigOutSource, TrigSource},
        trigger::TriggerPhase,
        Error, Wait,
    };

    #[test]
    fn identity_queries() {
        let (device, _bus, _registry) = open_device();
        assert_eq!(device.serial_number().unwrap(), "USB5K-0001");
        assert_eq!(device.model().unwrap(), "USB5121");
        let fw = device.firmware_version().unwrap();
        assert_eq!(fw.major(), 1);
        assert_eq!(fw.minor(), 2);
        assert_eq!(fw.build(), 3);
    }

    #[test]
    fn analog_out_channel_bound() {
        let (device, _bus, _registry) = open_device();
        assert!(device.analog_out(3).is_ok());
        assert_eq!(device.analog_out(4).err(), Some(Error::ChanIndexOverflow));
    }

    #[test]
    fn global_soft_trig_fires_all_eligible_subsystems() {
        let (device, _bus, _registry) = open_device();
        device.analog_in().arm().unwrap();
        device.digital_out().push(&[1, 2, 3]).unwrap();
        device.digital_out().arm().unwrap();
        // external trigger source is not eligible for the software strobe
        device.digital_in().set_trig_source(TrigSource::External).unwrap();
        device.digital_in().arm().unwrap();

        device.global_soft_trig().unwrap();
        assert!(device.global_soft_trig_latched());
        assert_eq!(device.analog_in().phase().unwrap(), TriggerPhase::Triggered);
        assert_eq!(
            device.digital_out().phase().unwrap(),
            TriggerPhase::Triggered
        );
        assert_eq!(device.digital_in().phase().unwrap(), TriggerPhase::Armed);
    }

    #[test]
    fn global_soft_trig_without_targets_is_rejected() {
        let (device, _bus, _registry) = open_device();
        assert_eq!(device.global_soft_trig(), Err(Error::UndefinedParameter));
        assert!(!device.global_soft_trig_latched());
    }

    #[test]
    fn global_soft_trig_is_all_or_none_under_strobe_failure() {
        let (device, bus, _registry) = open_device();
        device.analog_in().arm().unwrap();
        device.digital_in().arm().unwrap();

        bus.fail_on(Reg::GlobalSoftTrig);
        assert_eq!(device.global_soft_trig(), Err(Error::TransferDataFail));
        // the fault mid-fan-out left the pre-call state intact
        assert_eq!(device.analog_in().phase().unwrap(), TriggerPhase::Armed);
        assert_eq!(device.digital_in().phase().unwrap(), TriggerPhase::Armed);
        assert!(!device.global_soft_trig_latched());

        device.global_soft_trig().unwrap();
        assert_eq!(device.analog_in().phase().unwrap(), TriggerPhase::Triggered);
        assert_eq!(device.digital_in().phase().unwrap(), TriggerPhase::Triggered);
    }

    #[test]
    fn partially_armed_sync_group_blocks_the_global_strobe() {
        let (device, _bus, _registry) = open_device();
        device.set_ao_sync(0b0011).unwrap();
        device.analog_out(0).unwrap().arm().unwrap();
        // channel 1 is bound but never armed
        assert_eq!(device.global_soft_trig(), Err(Error::UndefinedParameter));
        assert_eq!(
            device.analog_out(0).unwrap().phase().unwrap(),
            TriggerPhase::Armed
        );

        device.analog_out(1).unwrap().arm().unwrap();
        device.global_soft_trig().unwrap();
        assert_eq!(
            device.analog_out(0).unwrap().phase().unwrap(),
            TriggerPhase::Triggered
        );
        assert_eq!(
            device.analog_out(1).unwrap().phase().unwrap(),
            TriggerPhase::Triggered
        );
    }

    #[test]
    fn sync_group_with_mixed_trigger_sources_blocks_the_global_strobe() {
        let (device, _bus, _registry) = open_device();
        device.set_ao_sync(0b0011).unwrap();
        device.analog_out(0).unwrap().arm().unwrap();
        // channel 1 is bound and armed, but waits on an external edge
        let ao1 = device.analog_out(1).unwrap();
        ao1.set_trig_source(TrigSource::External).unwrap();
        ao1.arm().unwrap();

        assert_eq!(device.global_soft_trig(), Err(Error::UndefinedParameter));
        assert_eq!(
            device.analog_out(0).unwrap().phase().unwrap(),
            TriggerPhase::Armed
        );
        assert_eq!(ao1.phase().unwrap(), TriggerPhase::Armed);
    }

    #[test]
    fn ao_sync_mask_is_validated() {
        let (device, _bus, _registry) = open_device();
        assert_eq!(device.set_ao_sync(0b1_0000), Err(Error::UndefinedParameter));
        assert!(device.set_ao_sync(0b1010).is_ok());
    }

    #[test]
    fn clear_triggers_resets_every_subsystem() {
        let (device, _bus, _registry) = open_device();
        device.analog_in().arm().unwrap();
        device.digital_in().arm().unwrap();
        device.digital_out().push(&[7, 8]).unwrap();
        device.digital_out().arm().unwrap();

        device.clear_triggers().unwrap();
        assert_eq!(device.analog_in().phase().unwrap(), TriggerPhase::Idle);
        assert_eq!(device.digital_in().phase().unwrap(), TriggerPhase::Idle);
        assert_eq!(device.digital_out().phase().unwrap(), TriggerPhase::Idle);
        assert_eq!(device.digital_out().queued().unwrap(), 0);
    }

    #[test]
    fn clear_global_soft_trig_resets_only_the_latch() {
        let (device, _bus, _registry) = open_device();
        device.analog_in().arm().unwrap();
        device.global_soft_trig().unwrap();
        device.clear_global_soft_trig().unwrap();
        assert!(!device.global_soft_trig_latched());
        // the fired subsystem keeps streaming until its own clear
        assert_eq!(device.analog_in().phase().unwrap(), TriggerPhase::Triggered);
    }

    #[test]
    fn sync_output_routing_writes_registers() {
        let (device, bus, _registry) = open_device();
        device
            .set_ext_trig_out_source(TrigOutSource::GlobalTrigger)
            .unwrap();
        device.set_ext_conv_out_source(ConvOutSource::AiClock).unwrap();
        assert_eq!(bus.writes_of(Reg::ExtTrigOut), vec![4]);
        assert_eq!(bus.writes_of(Reg::ExtConvOut), vec![1]);
    }

    #[test]
    fn blocking_read_does_not_stall_other_subsystems() {
        let (device, bus, _registry) = open_device();
        let reader = {
            let device = device.clone();
            std::thread::spawn(move || {
                device.analog_in().read(8, Wait::from_millis(150))
            })
        };
        // while the capture waits, another subsystem is still configurable
        std::thread::sleep(std::time::Duration::from_millis(30));
        device.digital_out().set_cycle(5).unwrap();

        bus.feed(SubsystemId::Ai, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let acq = reader.join().unwrap().unwrap();
        assert_eq!(acq.samples.len(), 8);
        assert!(acq.is_complete());
    }
}
