use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use proto::{GenerationId, HarnessConfig, LifecycleState, ObservedEvent, Step};
use tracing::{debug, info_span, warn};

use crate::{
    instance::{self, HostContext, HostSlot},
    mutex::{Mutex, MutexGuard},
    tracker::StateTracker,
    ActionBridge, Attachment, BoxError, HarnessError, Hosted, Launcher, ThemeId,
};

/// Builds an instance from the scenario's construction arguments, on the host thread
pub type Factory<T> = dyn Fn(Option<&Bytes>) -> Result<T, BoxError> + Send + Sync;

static NEXT_SCENARIO: AtomicU64 = AtomicU64::new(0);

/// Key of a scenario's instance in the host thread's slot table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct ScenarioId(u64);

impl ScenarioId {
    fn next() -> Self {
        Self(NEXT_SCENARIO.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to one hosted instance, and to every instance that replaces it through recreation
///
/// The instance lives on the host thread; a `Scenario` only ever reaches it through its
/// [`ActionBridge`]. All operations block the calling thread until the host has finished, and
/// operations on the same scenario never overlap: a call made while another is in progress (for
/// example from a second thread sharing the scenario through an `Arc`) waits its turn.
///
/// Dropping a scenario closes it.
pub struct Scenario<T: Hosted> {
    id: ScenarioId,
    bridge: ActionBridge,
    tracker: StateTracker,
    factory: Arc<Factory<T>>,
    params: LaunchParams,
    config: Arc<HarnessConfig>,
    inner: Mutex<Inner>,
    recreations: AtomicU64,
    // Instances are owned by the host thread, not by the handle
    _instance: PhantomData<fn() -> T>,
}

/// Construction arguments shared by the launched instance and all its successors
#[derive(Debug, Clone)]
pub(crate) struct LaunchParams {
    pub(crate) payload: Option<Bytes>,
    pub(crate) theme: Option<ThemeId>,
    pub(crate) attachment: Attachment,
    pub(crate) initial_state: LifecycleState,
}

#[derive(Debug)]
struct Inner {
    status: Status,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Status {
    /// The host holds an instance of this generation
    Live(GenerationId),
    /// This generation was torn down; the scenario may still be recreated
    Destroyed(GenerationId),
    /// Construction failed; nothing left to recreate from
    Vacant,
    Closed,
}

impl Inner {
    fn live(&self) -> Result<GenerationId, HarnessError> {
        match self.status {
            Status::Live(generation) => Ok(generation),
            _ => Err(HarnessError::NoInstance),
        }
    }
}

/// Whether a walk consults the transition policy
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Walk {
    Enforced,
    Forced,
}

impl<T: Hosted> Scenario<T> {
    /// Launch an instance built by `factory` on the default host, with default options
    ///
    /// See [`Launcher`] for construction arguments, containers and the initial state.
    pub fn launch<F>(factory: F) -> Result<Self, HarnessError>
    where
        F: Fn(Option<&Bytes>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Launcher::new(factory).launch()
    }

    pub(crate) fn start(
        bridge: ActionBridge,
        factory: Arc<Factory<T>>,
        params: LaunchParams,
        config: Arc<HarnessConfig>,
    ) -> Result<Self, HarnessError> {
        let generation = GenerationId::default();
        // Longest a single step may legitimately keep other operations waiting
        let patience = config.get_action_timeout() + config.get_step_timeout();
        let scenario = Self {
            id: ScenarioId::next(),
            bridge,
            tracker: StateTracker::new(generation),
            factory,
            params,
            config,
            inner: Mutex::new(
                Inner {
                    status: Status::Vacant,
                },
                patience,
            ),
            recreations: AtomicU64::new(0),
            _instance: PhantomData,
        };

        let _span = info_span!("scenario", id = scenario.id.0).entered();
        debug!(attachment = ?scenario.params.attachment, "launching");
        {
            let mut inner = scenario.enter("launch")?;
            scenario.construct(generation)?;
            inner.status = Status::Live(generation);
            let target = scenario.params.initial_state;
            scenario.drive(&mut inner, generation, target, Walk::Enforced)?;
        }
        Ok(scenario)
    }

    /// Drive the instance to `target`, one step at a time
    ///
    /// Each step runs the instance's hook on the host thread and then waits for the instance to
    /// report the step's target state. Moving to the current state does nothing. Moving to
    /// [`LifecycleState::Destroyed`] tears the instance down; the scenario can then only be
    /// recreated or closed.
    ///
    /// On error the instance stays in the last state it confirmed. Steps already taken are not
    /// undone.
    pub fn move_to_state(&self, target: LifecycleState) -> Result<(), HarnessError> {
        let _span = info_span!("scenario", id = self.id.0).entered();
        let mut inner = self.enter("move_to_state")?;
        let generation = inner.live()?;
        self.drive(&mut inner, generation, target, Walk::Enforced)
    }

    /// Replace the instance with a new one built by the same factory
    ///
    /// The current instance is torn down first, then a new generation is constructed with the
    /// same arguments and driven to the state the old one was in. If the old one had already been
    /// destroyed, the new one is driven to the launch state instead.
    ///
    /// A factory error leaves the scenario without an instance: the old one is already gone.
    pub fn recreate(&self) -> Result<(), HarnessError> {
        let _span = info_span!("scenario", id = self.id.0).entered();
        let mut inner = self.enter("recreate")?;
        let (generation, prior) = match inner.status {
            Status::Live(generation) => (generation, self.tracker.latest().state),
            Status::Destroyed(generation) => (generation, LifecycleState::Destroyed),
            Status::Vacant | Status::Closed => return Err(HarnessError::NoInstance),
        };
        debug!(%generation, %prior, "recreating");

        if let Status::Live(_) = inner.status {
            self.drive(&mut inner, generation, LifecycleState::Destroyed, Walk::Forced)?;
        }
        inner.status = Status::Vacant;

        let next = generation.next();
        self.construct(next)?;
        self.recreations.fetch_add(1, Ordering::Relaxed);
        inner.status = Status::Live(next);
        self.tracker.publish(next);

        let target = match prior {
            LifecycleState::Destroyed => self.params.initial_state,
            state => state,
        };
        self.drive(&mut inner, next, target, Walk::Enforced)
    }

    /// Run `f` against the live instance on the host thread and return its result
    ///
    /// `f` sees the generation that is current when the call is made, and no other operation on
    /// this scenario runs until it returns.
    pub fn on_instance<F, R>(&self, f: F) -> Result<R, HarnessError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let _span = info_span!("scenario", id = self.id.0).entered();
        let inner = self.enter("on_instance")?;
        let generation = inner.live()?;
        let id = self.id;
        self.bridge
            .run("on_instance", move || {
                instance::with_slot(id, |slot: &mut HostSlot<T>| {
                    if slot.generation() != generation {
                        return None;
                    }
                    Some(f(&mut slot.instance))
                })
                .flatten()
            })?
            .ok_or(HarnessError::NoInstance)
    }

    /// Whether the instance is attached to a live container
    ///
    /// Contained instances are attached once they are at least started; standalone instances
    /// never are.
    pub fn is_attached(&self) -> Result<bool, HarnessError> {
        let inner = self.enter("is_attached")?;
        let generation = match inner.status {
            Status::Live(generation) => generation,
            _ => return Ok(false),
        };
        if !self.tracker.latest().state.is_at_least(LifecycleState::Started) {
            return Ok(false);
        }
        let id = self.id;
        let container = self.bridge.run("is_attached", move || {
            instance::with_slot(id, |slot: &mut HostSlot<T>| {
                (slot.generation() == generation)
                    .then(|| slot.context.container())
                    .flatten()
            })
            .flatten()
        })?;
        Ok(container.is_some())
    }

    /// Tear the instance down and release its host resources
    ///
    /// Teardown is forced: the transition policy is not consulted. Closing is idempotent, and a
    /// closed scenario fails every further operation with [`HarnessError::NoInstance`].
    pub fn close(&self) {
        let _span = info_span!("scenario", id = self.id.0).entered();
        let mut inner = match self.enter("close") {
            Ok(inner) => inner,
            Err(_) => {
                // Posting doesn't wait, so the instance can still be released from here
                warn!("closed from the host thread; releasing instance without teardown");
                self.release_detached();
                return;
            }
        };
        if inner.status == Status::Closed {
            return;
        }
        if let Status::Live(generation) = inner.status {
            let teardown =
                self.drive(&mut inner, generation, LifecycleState::Destroyed, Walk::Forced);
            if let Err(e) = teardown {
                warn!("failed to tear down instance on close: {e}");
            }
        }
        // Covers instances that a timed out construction or a failed teardown left on the host.
        // A timed out release stays queued behind them and still runs.
        if let Err(e) = self.release() {
            warn!("failed to release instance on close: {e}");
        }
        inner.status = Status::Closed;
        debug!("closed");
    }

    /// Last state the instance confirmed
    pub fn state(&self) -> LifecycleState {
        self.tracker.latest().state
    }

    /// The latest report of the current generation
    pub fn observe(&self) -> ObservedEvent {
        self.tracker.latest()
    }

    /// Generation of the current instance
    pub fn generation(&self) -> GenerationId {
        self.tracker.latest().generation
    }

    /// How many times the instance has been successfully recreated
    pub fn recreation_count(&self) -> u64 {
        self.recreations.load(Ordering::Relaxed)
    }

    /// Whether the instance is constructed with a container
    pub fn attachment(&self) -> Attachment {
        self.params.attachment
    }

    /// Whether the scenario still has an instance to operate on
    pub fn is_live(&self) -> Result<bool, HarnessError> {
        Ok(matches!(self.enter("is_live")?.status, Status::Live(_)))
    }

    /// Take the operation lock, unless called from the host thread
    ///
    /// The host thread may be running a callback of this very scenario, which holds the lock until
    /// the host is free again, so waiting for it there could never succeed.
    fn enter(&self, purpose: &'static str) -> Result<MutexGuard<'_, Inner>, HarnessError> {
        if self.bridge.host().is_host_thread() {
            return Err(HarnessError::Deadlock);
        }
        Ok(self.inner.lock(purpose))
    }

    /// Drop whatever instance the host holds for this scenario
    fn release(&self) -> Result<(), HarnessError> {
        let id = self.id;
        let host = self.bridge.host().clone();
        self.bridge.run("release", move || {
            if let Some(slot) = instance::remove::<T>(id) {
                slot.release(&*host);
            }
        })
    }

    /// Like [`Self::release`], without waiting
    fn release_detached(&self) {
        let id = self.id;
        let host = self.bridge.host().clone();
        self.bridge.host().post(Box::new(move || {
            if let Some(slot) = instance::remove::<T>(id) {
                slot.release(&*host);
            }
        }));
    }

    /// Build generation `generation` on the host thread and store it there
    fn construct(&self, generation: GenerationId) -> Result<(), HarnessError> {
        let id = self.id;
        let factory = self.factory.clone();
        let host = self.bridge.host().clone();
        let reporter = self.tracker.reporter(generation);
        let LaunchParams {
            payload,
            theme,
            attachment,
            ..
        } = self.params.clone();

        self.bridge.run("construct", move || {
            let instance = factory(payload.as_ref()).map_err(HarnessError::Factory)?;
            let container = match attachment {
                Attachment::Contained => Some(host.create_container()),
                Attachment::Standalone => None,
            };
            let context = HostContext::new(reporter, container, payload, theme);
            instance::insert(id, HostSlot { instance, context });
            Ok::<_, HarnessError>(())
        })??;
        debug!(%generation, "constructed");
        Ok(())
    }

    /// Walk the instance of `generation` to `target`
    fn drive(
        &self,
        inner: &mut Inner,
        generation: GenerationId,
        target: LifecycleState,
        walk: Walk,
    ) -> Result<(), HarnessError> {
        loop {
            self.settle(inner, generation);
            let current = self.tracker.latest().state;
            let step = match current.step_toward(target) {
                Ok(Some(step)) => step,
                Ok(None) => return Ok(()),
                Err(_) if current.is_terminal() => return Err(HarnessError::NoInstance),
                Err(e) => {
                    return Err(HarnessError::UnsupportedTransition {
                        from: e.from,
                        to: e.to,
                    })
                }
            };
            if walk == Walk::Enforced && !self.config.get_policy().permits(step) {
                debug!(%step, %current, "step rejected by policy");
                return Err(HarnessError::UnsupportedTransition {
                    from: current,
                    to: step.target(),
                });
            }
            self.step(inner, generation, step)?;
        }
    }

    /// Run one step on the host thread and wait for the instance to confirm it
    fn step(
        &self,
        inner: &mut Inner,
        generation: GenerationId,
        step: Step,
    ) -> Result<(), HarnessError> {
        debug!(%step, %generation, "step");
        let id = self.id;
        let host = self.bridge.host().clone();
        let applied = self.bridge.run(step.as_str(), move || {
            let applied = instance::with_slot(id, |slot: &mut HostSlot<T>| {
                if slot.generation() != generation {
                    return false;
                }
                slot.apply(step);
                true
            })
            .unwrap_or(false);
            if applied && step == Step::Destroy {
                if let Some(slot) = instance::remove::<T>(id) {
                    slot.release(&*host);
                }
            }
            applied
        })?;

        if !applied {
            // The slot is gone, e.g. torn down by an action that outlived its caller's timeout
            inner.status = Status::Destroyed(generation);
            return Err(HarnessError::NoInstance);
        }
        if step == Step::Destroy {
            inner.status = Status::Destroyed(generation);
        }
        let reached = self
            .tracker
            .wait_for(generation, step, self.config.get_step_timeout());
        if reached.is_err() {
            self.settle(inner, generation);
        }
        reached
    }

    /// Release an instance that reported `Destroyed` outside a destroy step
    fn settle(&self, inner: &mut Inner, generation: GenerationId) {
        if inner.status != Status::Live(generation) || !self.tracker.latest().state.is_terminal() {
            return;
        }
        debug!(%generation, "instance destroyed itself");
        inner.status = Status::Destroyed(generation);
        if let Err(e) = self.release() {
            warn!("failed to release self-destroyed instance: {e}");
        }
    }
}

impl<T: Hosted> Drop for Scenario<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Hosted> fmt::Debug for Scenario<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
