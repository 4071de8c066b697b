use std::{any::Any, cell::RefCell, fmt};

use bytes::Bytes;
use proto::{GenerationId, LifecycleState, Step};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{runtime::ContainerId, scenario::ScenarioId, HostEnvironment, StateReporter};

/// A component whose lifecycle is driven by a [`Scenario`](crate::Scenario)
///
/// Every hook runs on the host thread, once per step, in the order the host imposes. An instance
/// is expected to report each state it reaches through [`HostContext::report`]; the harness does
/// not consider a step complete until it has. The default hooks do nothing but report, so an
/// implementation only needs to override the ones it cares about, and must keep reporting when it
/// does.
///
/// Instances never leave the host thread, so they need not be `Send`.
pub trait Hosted: 'static {
    /// `Initialized -> Created`
    fn on_create(&mut self, host: &HostContext) {
        host.report(LifecycleState::Created);
    }

    /// `Created -> Started`
    fn on_start(&mut self, host: &HostContext) {
        host.report(LifecycleState::Started);
    }

    /// `Started -> Resumed`
    fn on_resume(&mut self, host: &HostContext) {
        host.report(LifecycleState::Resumed);
    }

    /// `Resumed -> Started`
    fn on_pause(&mut self, host: &HostContext) {
        host.report(LifecycleState::Started);
    }

    /// `Started -> Created`
    fn on_stop(&mut self, host: &HostContext) {
        host.report(LifecycleState::Created);
    }

    /// Last call before the instance is dropped
    fn on_destroy(&mut self, host: &HostContext) {
        host.report(LifecycleState::Destroyed);
    }
}

/// Selects the theme an instance is constructed with
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ThemeId(pub u32);

/// Whether an instance is connected to a host container
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Attachment {
    /// Never attached to a container
    #[default]
    Standalone,
    /// Attached to a container created at construction
    Contained,
}

/// What an instance can see of its host while running a hook
pub struct HostContext {
    reporter: StateReporter,
    container: Option<ContainerId>,
    payload: Option<Bytes>,
    theme: Option<ThemeId>,
}

impl HostContext {
    pub(crate) fn new(
        reporter: StateReporter,
        container: Option<ContainerId>,
        payload: Option<Bytes>,
        theme: Option<ThemeId>,
    ) -> Self {
        Self {
            reporter,
            container,
            payload,
            theme,
        }
    }

    /// Report that the instance has reached `state`
    pub fn report(&self, state: LifecycleState) {
        self.reporter.report(state);
    }

    /// Reporter for deferred reports, e.g. from a task spawned by a hook
    pub fn reporter(&self) -> &StateReporter {
        &self.reporter
    }

    /// Generation this instance belongs to
    pub fn generation(&self) -> GenerationId {
        self.reporter.generation()
    }

    /// Container the instance is attached to, if contained
    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    /// Arguments the instance was constructed with
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Theme the instance was constructed with
    pub fn theme(&self) -> Option<ThemeId> {
        self.theme
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("generation", &self.generation())
            .field("container", &self.container)
            .field("theme", &self.theme)
            .finish_non_exhaustive()
    }
}

/// A live instance and its context, owned by the host thread
pub(crate) struct HostSlot<T> {
    pub(crate) instance: T,
    pub(crate) context: HostContext,
}

impl<T: Hosted> HostSlot<T> {
    pub(crate) fn generation(&self) -> GenerationId {
        self.context.generation()
    }

    pub(crate) fn apply(&mut self, step: Step) {
        trace!(%step, generation = %self.generation(), "running hook");
        let host = &self.context;
        match step {
            Step::Create => self.instance.on_create(host),
            Step::Start => self.instance.on_start(host),
            Step::Resume => self.instance.on_resume(host),
            Step::Pause => self.instance.on_pause(host),
            Step::Stop => self.instance.on_stop(host),
            Step::Destroy => self.instance.on_destroy(host),
        }
    }

    /// Drop the instance and give its container back to the host
    pub(crate) fn release(self, host: &dyn HostEnvironment) {
        if let Some(container) = self.context.container {
            host.destroy_container(container);
        }
        trace!(generation = %self.generation(), "released instance");
    }
}

thread_local! {
    /// Instances owned by the host thread, by scenario
    static SLOTS: RefCell<FxHashMap<ScenarioId, Box<dyn Any>>> = RefCell::new(FxHashMap::default());
}

pub(crate) fn insert<T: Hosted>(id: ScenarioId, slot: HostSlot<T>) {
    SLOTS.with(|slots| slots.borrow_mut().insert(id, Box::new(slot)));
}

pub(crate) fn remove<T: Hosted>(id: ScenarioId) -> Option<HostSlot<T>> {
    let slot = SLOTS.with(|slots| slots.borrow_mut().remove(&id))?;
    slot.downcast::<HostSlot<T>>().ok().map(|slot| *slot)
}

/// Run `f` against the slot of scenario `id`
///
/// The slot is taken out of the table for the duration of `f`, so hooks are free to touch other
/// scenarios' slots. It is put back even if `f` panics.
pub(crate) fn with_slot<T: Hosted, R>(
    id: ScenarioId,
    f: impl FnOnce(&mut HostSlot<T>) -> R,
) -> Option<R> {
    let mut taken = Taken {
        id,
        slot: Some(SLOTS.with(|slots| slots.borrow_mut().remove(&id))?),
    };
    let slot = taken.slot.as_mut()?.downcast_mut::<HostSlot<T>>()?;
    Some(f(slot))
}

/// A slot out of the table, returned to it on drop
struct Taken {
    id: ScenarioId,
    slot: Option<Box<dyn Any>>,
}

impl Drop for Taken {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            SLOTS.with(|slots| slots.borrow_mut().insert(self.id, slot));
        }
    }
}
