//! Sample FIFOs and the stream wait convention.
//!
//! Each subsystem owns one [`Fifo`]: producer side for queued DO/AO
//! waveforms, consumer side for captured AI/DI samples. The buffer keeps
//! strict submission order and records overflow instead of silently
//! dropping the fact that data was lost.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// How long a blocking capture may wait for its requested points.
///
/// The original numeric convention overloads the sign of a millisecond
/// argument: negative waits forever, zero polls once, positive bounds the
/// wait. That distinction is kept here as an explicit enum rather than a
/// numeric edge case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    /// Drain whatever is available right now, polling the bus once.
    NoWait,
    /// Wait up to the given duration.
    Until(Duration),
    /// Wait until the requested points have been captured.
    Forever,
}

impl Wait {
    /// Map the device's raw millisecond convention onto the enum.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            m if m < 0 => Self::Forever,
            0 => Self::NoWait,
            #[allow(clippy::cast_sign_loss)]
            m => Self::Until(Duration::from_millis(m as u64)),
        }
    }

    /// Absolute deadline, if the wait is bounded.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Self::Until(d) => Some(Instant::now() + d),
            Self::NoWait | Self::Forever => None,
        }
    }
}

/// Result of a blocking capture.
///
/// A timed-out capture still hands over everything that arrived before the
/// deadline; nothing captured is ever discarded. The FIFO keeps any samples
/// beyond the request, so a follow-up read resumes where this one stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition<T> {
    /// Captured samples, oldest first.
    pub samples: Vec<T>,
    /// True when the wait elapsed before the full request was captured;
    /// the boundary status for such a read is
    /// [`Error::TimeOut`](crate::Error).
    pub timed_out: bool,
}

impl<T> Acquisition<T> {
    /// Whether the full requested point count was delivered.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.timed_out
    }
}

/// Bounded ring buffer with an overflow latch.
#[derive(Debug)]
pub(crate) struct Fifo<T> {
    buf: VecDeque<T>,
    capacity: usize,
    overflowed: bool,
}

impl<T: Copy> Fifo<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            capacity,
            overflowed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Reset fill level and flags unconditionally.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    /// Append produced samples, latching overflow if capacity is exceeded.
    ///
    /// Samples beyond capacity are dropped; the latch is surfaced on the
    /// next read as a transfer failure.
    pub fn load(&mut self, samples: &[T]) {
        let room = self.remaining();
        if samples.len() > room {
            self.overflowed = true;
        }
        self.buf.extend(samples.iter().take(room).copied());
    }

    /// Queue waveform data, rejecting lengths the buffer cannot hold.
    pub fn try_extend(&mut self, samples: &[T]) -> crate::Result<()> {
        if samples.is_empty() || samples.len() > self.remaining() {
            return Err(crate::Error::UndefinedWaveLen);
        }
        self.buf.extend(samples.iter().copied());
        Ok(())
    }

    /// Remove and return up to `n` samples in arrival order.
    pub fn pop_up_to(&mut self, n: usize) -> Vec<T> {
        let take = n.min(self.buf.len());
        self.buf.drain(..take).collect()
    }

    /// Read and clear the overflow latch.
    pub fn take_overflow(&mut self) -> bool {
        std::mem::take(&mut self.overflowed)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Fifo, Wait};
    use crate::Error;

    #[test]
    fn wait_follows_the_millisecond_convention() {
        assert_eq!(Wait::from_millis(-1), Wait::Forever);
        assert_eq!(Wait::from_millis(0), Wait::NoWait);
        assert_eq!(
            Wait::from_millis(250),
            Wait::Until(Duration::from_millis(250))
        );
    }

    #[test]
    fn preserves_submission_order_across_pushes() {
        let mut fifo = Fifo::new(8);
        fifo.try_extend(&[1u32, 2, 3]).unwrap();
        fifo.try_extend(&[4, 5]).unwrap();
        assert_eq!(fifo.pop_up_to(8), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn rejects_oversized_or_empty_waveforms() {
        let mut fifo = Fifo::new(4);
        assert_eq!(fifo.try_extend(&[]), Err(Error::UndefinedWaveLen));
        assert_eq!(
            fifo.try_extend(&[1u32, 2, 3, 4, 5]),
            Err(Error::UndefinedWaveLen)
        );
        fifo.try_extend(&[1, 2, 3]).unwrap();
        // only one slot left
        assert_eq!(fifo.try_extend(&[4, 5]), Err(Error::UndefinedWaveLen));
        assert_eq!(fifo.len(), 3);
    }

    #[test]
    fn load_latches_overflow_and_keeps_what_fits() {
        let mut fifo = Fifo::new(4);
        fifo.load(&[1u32, 2, 3, 4, 5, 6]);
        assert_eq!(fifo.len(), 4);
        assert!(fifo.take_overflow());
        assert!(!fifo.take_overflow());
        assert_eq!(fifo.pop_up_to(4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn partial_pop_resumes_from_remaining_content() {
        let mut fifo = Fifo::new(8);
        fifo.load(&[10u32, 20, 30, 40, 50]);
        assert_eq!(fifo.pop_up_to(2), vec![10, 20]);
        assert_eq!(fifo.pop_up_to(8), vec![30, 40, 50]);
        assert_eq!(fifo.len(), 0);
    }

    #[test]
    fn clear_resets_fill_and_flags() {
        let mut fifo = Fifo::new(2);
        fifo.load(&[1u32, 2, 3]);
        assert_eq!(fifo.len(), 2);
        fifo.clear();
        assert_eq!(fifo.len(), 0);
        assert!(!fifo.take_overflow());
        assert_eq!(fifo.remaining(), 2);
    }
}
