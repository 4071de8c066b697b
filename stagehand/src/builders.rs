use std::{fmt, sync::Arc};

use bytes::Bytes;
use proto::{validate_initial_state, HarnessConfig, LifecycleState};

use crate::{
    runtime::default_host,
    scenario::{Factory, LaunchParams},
    ActionBridge, Attachment, BoxError, HarnessError, HostEnvironment, Hosted, Scenario, ThemeId,
};

/// A helper for launching a [`Scenario`]
///
/// Everything set here is fixed for the life of the scenario and reused, unchanged, for every
/// recreation.
///
/// ```no_run
/// # use stagehand::{Attachment, Hosted, Launcher, LifecycleState};
/// struct Screen;
/// impl Hosted for Screen {}
///
/// # fn main() -> Result<(), stagehand::HarnessError> {
/// let scenario = Launcher::new(|_| Ok(Screen))
///     .attachment(Attachment::Contained)
///     .initial_state(LifecycleState::Started)
///     .launch()?;
/// assert!(scenario.is_attached()?);
/// # Ok(())
/// # }
/// ```
pub struct Launcher<T: Hosted> {
    factory: Arc<Factory<T>>,
    params: LaunchParams,
    config: Arc<HarnessConfig>,
    host: Option<Arc<dyn HostEnvironment>>,
}

impl<T: Hosted> Launcher<T> {
    /// Start a launcher for instances built by `factory`
    ///
    /// `factory` runs on the host thread, once for the launch and once per recreation.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(Option<&Bytes>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            params: LaunchParams {
                payload: None,
                theme: None,
                attachment: Attachment::Standalone,
                initial_state: LifecycleState::Resumed,
            },
            config: Arc::new(HarnessConfig::default()),
            host: None,
        }
    }

    /// Arguments handed to the factory on every construction
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.params.payload = Some(payload.into());
        self
    }

    /// Theme instances are constructed with
    pub fn theme(mut self, theme: ThemeId) -> Self {
        self.params.theme = Some(theme);
        self
    }

    /// Whether instances are attached to a host container
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.params.attachment = attachment;
        self
    }

    /// State the launched instance is driven to; `Resumed` by default
    ///
    /// Must be `Created`, `Started` or `Resumed`.
    pub fn initial_state(mut self, state: LifecycleState) -> Self {
        self.params.initial_state = state;
        self
    }

    /// Timeouts and transition policy
    pub fn config(mut self, config: Arc<HarnessConfig>) -> Self {
        self.config = config;
        self
    }

    /// Host to run instances on, instead of the process-wide default
    pub fn host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = Some(host);
        self
    }

    /// Construct the instance and drive it to the initial state
    pub fn launch(self) -> Result<Scenario<T>, HarnessError> {
        validate_initial_state(self.params.initial_state)?;
        let host = match self.host {
            Some(host) => host,
            None => default_host().map_err(HarnessError::Spawn)?,
        };
        let bridge = ActionBridge::new(host, self.config.get_action_timeout());
        Scenario::start(bridge, self.factory, self.params, self.config)
    }
}

impl<T: Hosted> fmt::Debug for Launcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("params", &self.params)
            .field("config", &self.config)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
