use std::{fmt, io};

use proto::{ConfigError, LifecycleState, Step};
use thiserror::Error;

/// Error returned by a user-supplied factory
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reasons a scenario operation failed
///
/// None of these are retried by the harness: a step that has started may have side effects, so a
/// failed operation leaves the instance in its last confirmed state.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The host did not acknowledge within the configured bound
    #[error("timed out waiting for {0}")]
    Timeout(Waiting),
    /// The host policy forbids the step, or no step leads between the two states
    #[error("transition from {from} to {to} is not supported")]
    UnsupportedTransition {
        /// Last confirmed state
        from: LifecycleState,
        /// State the rejected step would have entered
        to: LifecycleState,
    },
    /// Called from the host thread, which would wait on itself
    #[error("called from the host thread")]
    Deadlock,
    /// The factory failed to build an instance
    #[error("factory failed: {0}")]
    Factory(#[source] BoxError),
    /// The scenario has no live instance
    #[error("no live instance")]
    NoInstance,
    /// Code running on the host thread panicked
    #[error("host action panicked: {0}")]
    ActionPanicked(String),
    /// The host thread is gone
    #[error("host thread unavailable")]
    HostUnavailable,
    /// The host thread could not be spawned
    #[error("failed to spawn host thread: {0}")]
    Spawn(#[source] io::Error),
    /// Invalid scenario configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What a caller was blocked on when its wait bound elapsed
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Waiting {
    /// The host thread to run the named action
    Action(&'static str),
    /// The instance to report the target state of a step
    Step(Step),
}

impl fmt::Display for Waiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(label) => write!(f, "host to run {label}"),
            Self::Step(step) => write!(f, "instance to report {} after {step}", step.target()),
        }
    }
}
