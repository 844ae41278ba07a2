//! Incremental marking phase tracking.
//!
//! The reference-tracking layer does not mark anything itself; it only needs
//! to know whether an incremental marking cycle is in flight, because
//! invalidated-object registration is meaningful only relative to marking
//! progress. The marking driver owns the transitions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Phase of an incremental marking cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum MarkPhase {
    /// No marking cycle in progress.
    Idle = 0,
    /// Marking interleaved with the mutator.
    Marking = 1,
    /// Final atomic pause of the cycle.
    FinalMark = 2,
    /// Marking done; regions are pending or being swept.
    Sweeping = 3,
}

impl MarkPhase {
    /// Decode a stored phase.
    #[must_use]
    pub const fn from_usize(v: usize) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Marking),
            2 => Some(Self::FinalMark),
            3 => Some(Self::Sweeping),
            _ => None,
        }
    }
}

/// Phase state of the heap's incremental marker.
#[derive(Debug)]
pub struct IncrementalMarking {
    phase: AtomicUsize,
    cycle_start: Mutex<Option<Instant>>,
}

impl Default for IncrementalMarking {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalMarking {
    /// Create an idle marker.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AtomicUsize::new(MarkPhase::Idle as usize),
            cycle_start: Mutex::new(None),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> MarkPhase {
        let p = self.phase.load(Ordering::Acquire);
        MarkPhase::from_usize(p).unwrap_or(MarkPhase::Idle)
    }

    /// Force the phase without checking the transition.
    pub fn set_phase(&self, phase: MarkPhase) {
        self.phase.store(phase as usize, Ordering::Release);
    }

    /// Move to `new_phase` if the transition is legal.
    pub fn transition_to(&self, new_phase: MarkPhase) -> bool {
        let current = self.phase();
        if !Self::is_valid_transition(current, new_phase) {
            return false;
        }
        match new_phase {
            MarkPhase::Marking if current == MarkPhase::Idle => {
                *self.cycle_start.lock() = Some(Instant::now());
            }
            MarkPhase::Idle => {
                *self.cycle_start.lock() = None;
            }
            _ => {}
        }
        self.set_phase(new_phase);
        true
    }

    const fn is_valid_transition(from: MarkPhase, to: MarkPhase) -> bool {
        matches!(
            (from, to),
            (MarkPhase::Idle | MarkPhase::FinalMark, MarkPhase::Marking)
                | (MarkPhase::Marking, MarkPhase::FinalMark)
                | (MarkPhase::FinalMark, MarkPhase::Sweeping)
                | (MarkPhase::Sweeping, MarkPhase::Idle)
        )
    }

    /// Whether a marking cycle is in flight. Gates invalidated-slot
    /// registration and old-to-old slot recording.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.phase(), MarkPhase::Marking | MarkPhase::FinalMark)
    }

    /// Time since the current cycle entered [`MarkPhase::Marking`].
    #[must_use]
    pub fn cycle_elapsed(&self) -> Option<Duration> {
        self.cycle_start.lock().map(|start| start.elapsed())
    }
}
