use std::{fmt, time::Instant};

use tracing::trace;

use crate::LifecycleState;

/// Identifies one instance lifetime within a scenario
///
/// The launched instance is generation 0; every recreation produces the next one.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct GenerationId(pub u64);

impl GenerationId {
    /// The generation that replaces this one on recreation
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// A lifecycle state reported by an instance
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ObservedEvent {
    /// Generation of the reporting instance
    pub generation: GenerationId,
    /// State the instance reports having reached
    pub state: LifecycleState,
    /// When the report was recorded
    pub at: Instant,
}

/// Latest self-reported state of a scenario's current generation
///
/// Keeps a single event rather than a log. Reports that belong to an older generation are
/// discarded, so a torn-down instance that reports late cannot disturb its successor.
#[derive(Debug, Clone)]
pub struct Observations {
    latest: ObservedEvent,
    reports: u64,
}

impl Observations {
    /// Start observing `generation`, which has just been constructed
    pub fn new(generation: GenerationId, now: Instant) -> Self {
        Self {
            latest: ObservedEvent {
                generation,
                state: LifecycleState::Initialized,
                at: now,
            },
            reports: 0,
        }
    }

    /// Switch to a freshly constructed generation
    ///
    /// Generations only move forward; publishing an older one is ignored.
    pub fn publish(&mut self, generation: GenerationId, now: Instant) -> bool {
        if generation <= self.latest.generation {
            return false;
        }
        trace!(%generation, "publishing generation");
        self.latest = ObservedEvent {
            generation,
            state: LifecycleState::Initialized,
            at: now,
        };
        true
    }

    /// Record a report, returning whether it was accepted
    ///
    /// Any state of the current generation is accepted until it reports `Destroyed`; reports need
    /// not follow the step order.
    pub fn observe(&mut self, event: ObservedEvent) -> bool {
        if event.generation != self.latest.generation {
            trace!(
                reported = %event.generation,
                current = %self.latest.generation,
                "discarding report from stale generation"
            );
            return false;
        }
        if self.latest.state.is_terminal() {
            trace!(state = %event.state, "discarding report after destruction");
            return false;
        }
        self.latest = event;
        self.reports += 1;
        true
    }

    /// Whether the current generation has reported `state`
    pub fn has_reached(&self, generation: GenerationId, state: LifecycleState) -> bool {
        self.latest.generation == generation && self.latest.state == state
    }

    /// The most recent accepted event, or the publication of the current generation
    pub fn latest(&self) -> ObservedEvent {
        self.latest
    }

    /// Generation currently being observed
    pub fn generation(&self) -> GenerationId {
        self.latest.generation
    }

    /// Number of reports accepted across all generations
    pub fn reports(&self) -> u64 {
        self.reports
    }
}
