use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use proto::{GenerationId, LifecycleState, ObservedEvent, Observations, Step};
use tracing::{debug, trace, warn};

use crate::{HarnessError, Waiting};

/// Records what a scenario's instance reports about its own lifecycle
///
/// Instances push events through a [`StateReporter`]; the harness blocks on the tracker until the
/// state it expects shows up. Only the latest event of the current generation is kept.
#[derive(Clone)]
pub(crate) struct StateTracker {
    shared: Arc<Shared>,
}

struct Shared {
    observations: Mutex<Observations>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Observations> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateTracker {
    pub(crate) fn new(generation: GenerationId) -> Self {
        Self {
            shared: Arc::new(Shared {
                observations: Mutex::new(Observations::new(generation, Instant::now())),
                changed: Condvar::new(),
            }),
        }
    }

    /// A reporter for instances of `generation`
    pub(crate) fn reporter(&self, generation: GenerationId) -> StateReporter {
        StateReporter {
            generation,
            shared: self.shared.clone(),
        }
    }

    /// Start observing a freshly constructed generation
    pub(crate) fn publish(&self, generation: GenerationId) {
        if self.shared.lock().publish(generation, Instant::now()) {
            self.shared.changed.notify_all();
        }
    }

    pub(crate) fn latest(&self) -> ObservedEvent {
        self.shared.lock().latest()
    }

    /// Block until `generation` reports the target of `step`, or `timeout` elapses
    pub(crate) fn wait_for(
        &self,
        generation: GenerationId,
        step: Step,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        let expected = step.target();
        let deadline = Instant::now() + timeout;
        let mut observations = self.shared.lock();
        loop {
            if observations.has_reached(generation, expected) {
                return Ok(());
            }
            let latest = observations.latest();
            if latest.generation == generation && latest.state.is_terminal() {
                // Nothing is accepted after `Destroyed`, so the expected report can never arrive
                debug!(%step, %generation, "instance reported destruction mid-step");
                return Err(HarnessError::NoInstance);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(%step, %generation, last = %latest.state, "instance did not report in time");
                return Err(HarnessError::Timeout(Waiting::Step(step)));
            }
            observations = self
                .shared
                .changed
                .wait_timeout(observations, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("latest", &self.latest())
            .finish()
    }
}

/// Handle through which an instance reports the lifecycle states it reaches
///
/// Cheap to clone and usable from any thread, so an instance may report from deferred work.
/// Reports made after the instance's generation has been replaced are ignored.
#[derive(Clone)]
pub struct StateReporter {
    generation: GenerationId,
    shared: Arc<Shared>,
}

impl StateReporter {
    /// Report that the instance has reached `state`
    pub fn report(&self, state: LifecycleState) {
        let event = ObservedEvent {
            generation: self.generation,
            state,
            at: Instant::now(),
        };
        if self.shared.lock().observe(event) {
            trace!(generation = %self.generation, %state, "instance reported");
            self.shared.changed.notify_all();
        }
    }

    /// Generation of the instance this reporter belongs to
    pub fn generation(&self) -> GenerationId {
        self.generation
    }
}

impl fmt::Debug for StateReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateReporter")
            .field("generation", &self.generation)
            .finish()
    }
}
