//! Progress reporting for upgrade runs

use super::upgrader::UpgradeState;

/// Phase of an upgrade run that reports progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Erasing the image slot
    Erase,
    /// Programming pages (with read-back when verifying)
    Program,
    /// Comparing flash contents without writing
    Verify,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Phase::Erase => write!(f, "Erasing"),
            Phase::Program => write!(f, "Programming"),
            Phase::Verify => write!(f, "Verifying"),
        }
    }
}

/// Receiver of upgrade progress notifications
///
/// Percentages are coarse: every phase reports 0, 10, ..., 100 exactly
/// once and in order. Nothing in the upgrade depends on the sink.
pub trait ProgressSink {
    /// Called on every orchestrator state transition
    fn state(&mut self, state: &UpgradeState);

    /// Called when a phase crosses a 10% step
    fn progress(&mut self, phase: Phase, percent: u8);
}

/// A no-op progress reporter
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn state(&mut self, _state: &UpgradeState) {}
    fn progress(&mut self, _phase: Phase, _percent: u8) {}
}

impl<P: ProgressSink + ?Sized> ProgressSink for &mut P {
    fn state(&mut self, state: &UpgradeState) {
        (**self).state(state)
    }

    fn progress(&mut self, phase: Phase, percent: u8) {
        (**self).progress(phase, percent)
    }
}

/// Turns unit counts into 10% steps for one phase
pub(crate) struct Deciles {
    phase: Phase,
    total: usize,
    next: u8,
}

impl Deciles {
    /// Start a phase over `total` units, reporting 0%
    pub(crate) fn start<P: ProgressSink + ?Sized>(phase: Phase, total: usize, sink: &mut P) -> Self {
        sink.progress(phase, 0);
        Self {
            phase,
            total,
            next: 10,
        }
    }

    /// Report every step reached after `done` units
    pub(crate) fn update<P: ProgressSink + ?Sized>(&mut self, done: usize, sink: &mut P) {
        let percent = if self.total == 0 {
            100
        } else {
            done.min(self.total) * 100 / self.total
        };
        while self.next <= 100 && percent >= self.next as usize {
            sink.progress(self.phase, self.next);
            self.next += 10;
        }
    }

    /// Report the remaining steps up to 100%
    pub(crate) fn finish<P: ProgressSink + ?Sized>(&mut self, sink: &mut P) {
        self.update(self.total, sink);
    }
}
