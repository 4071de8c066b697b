use std::fmt;

/// Lifecycle state of a hosted instance
///
/// States are totally ordered: `Destroyed < Initialized < Created < Started < Resumed`. An instance
/// starts out `Initialized` right after construction and can only move one [`Step`] at a time.
/// `Destroyed` is terminal: once reached, the instance is gone and no further step applies to it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LifecycleState {
    /// The instance has been torn down and released
    Destroyed,
    /// Constructed by its factory, but not yet created
    Initialized,
    /// Created, not visible
    Created,
    /// Visible, not in the foreground
    Started,
    /// Visible and in the foreground
    Resumed,
}

impl LifecycleState {
    /// All states, in ascending order
    pub const ALL: [Self; 5] = [
        Self::Destroyed,
        Self::Initialized,
        Self::Created,
        Self::Started,
        Self::Resumed,
    ];

    /// Whether `self` is `other` or a later state
    pub fn is_at_least(self, other: Self) -> bool {
        self >= other
    }

    /// Whether no step can leave this state
    pub fn is_terminal(self) -> bool {
        self == Self::Destroyed
    }

    /// The single step that moves an instance from `self` towards `target`
    ///
    /// Returns `Ok(None)` once `self == target`. Walking to `Destroyed` goes down through every
    /// intermediate state. Fails if `target` is unreachable from `self`, which is the case for any
    /// target out of `Destroyed` and for `Initialized` out of any later state.
    pub fn step_toward(self, target: Self) -> Result<Option<Step>, Unreachable> {
        use LifecycleState::*;
        if self == target {
            return Ok(None);
        }
        let step = match (self, target) {
            (Destroyed, _) | (_, Initialized) => {
                return Err(Unreachable {
                    from: self,
                    to: target,
                })
            }
            (Initialized, Destroyed) => Step::Destroy,
            (Initialized, _) => Step::Create,
            (Created, Destroyed) => Step::Destroy,
            (Created, _) => Step::Start,
            (Started, Resumed) => Step::Resume,
            (Started, _) => Step::Stop,
            (Resumed, _) => Step::Pause,
        };
        Ok(Some(step))
    }

    /// The full sequence of steps from `self` to `target`
    pub fn path_to(self, target: Self) -> Result<Vec<Step>, Unreachable> {
        let mut steps = Vec::new();
        let mut current = self;
        while let Some(step) = current.step_toward(target)? {
            steps.push(step);
            current = step.target();
        }
        Ok(steps)
    }

    /// Stable string tag for structured logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Destroyed => "destroyed",
            Self::Initialized => "initialized",
            Self::Created => "created",
            Self::Started => "started",
            Self::Resumed => "resumed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-state lifecycle transition
///
/// Hosts impose the order of these calls; an instance never skips an intermediate state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Step {
    /// `Initialized -> Created`
    Create,
    /// `Created -> Started`
    Start,
    /// `Started -> Resumed`
    Resume,
    /// `Resumed -> Started`
    Pause,
    /// `Started -> Created`
    Stop,
    /// `Created -> Destroyed`, or `Initialized -> Destroyed` for an instance that was never created
    Destroy,
}

impl Step {
    /// The state an instance is in once this step has completed
    pub fn target(self) -> LifecycleState {
        match self {
            Self::Create | Self::Stop => LifecycleState::Created,
            Self::Start | Self::Pause => LifecycleState::Started,
            Self::Resume => LifecycleState::Resumed,
            Self::Destroy => LifecycleState::Destroyed,
        }
    }

    /// Whether this step moves towards `Resumed`
    pub fn is_setup(self) -> bool {
        matches!(self, Self::Create | Self::Start | Self::Resume)
    }

    /// Stable string tag for structured logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Resume => "resume",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// No sequence of steps leads from one state to the other
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("no lifecycle path from {from} to {to}")]
pub struct Unreachable {
    /// State the walk would start from
    pub from: LifecycleState,
    /// Requested state
    pub to: LifecycleState,
}
