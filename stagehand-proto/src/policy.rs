use std::fmt;

use crate::{LifecycleState, Step};

/// Host-imposed restrictions on individual lifecycle steps
///
/// Consulted once per step, before the step touches the instance. Keeping the restriction out of
/// the state machine lets the same machine model hosts that, for example, refuse to start an
/// instance below some platform level.
pub trait TransitionPolicy: Send + Sync + fmt::Debug {
    /// Whether the host allows `step` to run
    fn permits(&self, step: Step) -> bool;
}

/// Permits every step
#[derive(Debug, Default, Copy, Clone)]
pub struct AllowAll;

impl TransitionPolicy for AllowAll {
    fn permits(&self, _: Step) -> bool {
        true
    }
}

/// Rejects the setup step entering `state` while the host is below a minimum capability level
///
/// Only the step whose target is `state` on the way up is gated; leaving `state` and every other
/// transition are unaffected.
///
/// ```
/// # use stagehand_proto::{GateEntry, LifecycleState, Step, TransitionPolicy};
/// let policy = GateEntry::new(LifecycleState::Started, 27, 28);
/// assert!(!policy.permits(Step::Start));
/// assert!(policy.permits(Step::Pause));
/// ```
#[derive(Debug, Copy, Clone)]
pub struct GateEntry {
    state: LifecycleState,
    host_level: u32,
    min_level: u32,
}

impl GateEntry {
    /// Gate entry into `state` on `host_level >= min_level`
    pub fn new(state: LifecycleState, host_level: u32, min_level: u32) -> Self {
        Self {
            state,
            host_level,
            min_level,
        }
    }
}

impl TransitionPolicy for GateEntry {
    fn permits(&self, step: Step) -> bool {
        !(step.is_setup() && step.target() == self.state) || self.host_level >= self.min_level
    }
}

/// A policy backed by a closure
pub struct FnPolicy<F>(pub F);

impl<F> fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnPolicy")
    }
}

impl<F> TransitionPolicy for FnPolicy<F>
where
    F: Fn(Step) -> bool + Send + Sync,
{
    fn permits(&self, step: Step) -> bool {
        (self.0)(step)
    }
}
