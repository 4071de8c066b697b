use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{AllowAll, LifecycleState, TransitionPolicy};

/// Parameters governing how a scenario drives its instance
///
/// Default values suit instances that report every step synchronously from their hooks. Hosts that
/// do real work on every step, or instances that report asynchronously, may need longer bounds.
#[derive(Clone)]
pub struct HarnessConfig {
    pub(crate) action_timeout: Duration,
    pub(crate) step_timeout: Duration,
    pub(crate) policy: Arc<dyn TransitionPolicy>,
}

impl HarnessConfig {
    /// Maximum time a caller waits for the host thread to run a posted action
    ///
    /// A wedged host thread surfaces as a timeout after this long instead of hanging the caller.
    pub fn action_timeout(&mut self, value: Duration) -> Result<&mut Self, ConfigError> {
        if value.is_zero() {
            return Err(ConfigError::OutOfBounds);
        }
        self.action_timeout = value;
        Ok(self)
    }

    /// Maximum time to wait for an instance to report reaching the target of a step
    pub fn step_timeout(&mut self, value: Duration) -> Result<&mut Self, ConfigError> {
        if value.is_zero() {
            return Err(ConfigError::OutOfBounds);
        }
        self.step_timeout = value;
        Ok(self)
    }

    /// Host restrictions applied to every step taken by `move_to_state` and by launch
    ///
    /// Teardown performed by close and by recreation is forced and does not consult the policy.
    pub fn policy(&mut self, value: Arc<dyn TransitionPolicy>) -> &mut Self {
        self.policy = value;
        self
    }

    /// Get the current value of `action_timeout`
    pub fn get_action_timeout(&self) -> Duration {
        self.action_timeout
    }

    /// Get the current value of `step_timeout`
    pub fn get_step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Get the active transition policy
    pub fn get_policy(&self) -> &Arc<dyn TransitionPolicy> {
        &self.policy
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

        Self {
            action_timeout: DEFAULT_TIMEOUT,
            step_timeout: DEFAULT_TIMEOUT,
            policy: Arc::new(AllowAll),
        }
    }
}

impl fmt::Debug for HarnessConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("HarnessConfig")
            .field("action_timeout", &self.action_timeout)
            .field("step_timeout", &self.step_timeout)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Checks that `state` can be used as the state a scenario launches into
pub fn validate_initial_state(state: LifecycleState) -> Result<(), ConfigError> {
    match state {
        LifecycleState::Initialized | LifecycleState::Destroyed => {
            Err(ConfigError::InvalidInitialState(state))
        }
        _ => Ok(()),
    }
}

/// Errors in the configuration of a scenario
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Value exceeds supported bounds
    #[error("value exceeds supported bounds")]
    OutOfBounds,
    /// A scenario cannot launch into this state
    #[error("cannot launch into the {0} state")]
    InvalidInitialState(LifecycleState),
}
