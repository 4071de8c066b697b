//! Runtime-independent lifecycle logic for the stagehand scenario harness
//!
//! stagehand-proto contains the deterministic half of the harness: the lifecycle states an
//! instance moves through, the single-step walk between any two of them, the host policy consulted
//! before every step, and the bookkeeping of what an instance has reported about itself. It
//! contains no threads and never blocks. Most users want the `stagehand` crate, which drives a
//! real instance on a host thread using this logic.
//!
//! The most important types are [`LifecycleState`] and [`Step`]: `LifecycleState::step_toward`
//! yields the one step that moves an instance closer to a target, which is the unit the harness
//! executes, observes, and, if the [`TransitionPolicy`] says so, refuses.

#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod config;
pub use crate::config::{validate_initial_state, ConfigError, HarnessConfig};

mod observe;
pub use crate::observe::{GenerationId, ObservedEvent, Observations};

mod policy;
pub use crate::policy::{AllowAll, FnPolicy, GateEntry, TransitionPolicy};

mod state;
pub use crate::state::{LifecycleState, Step, Unreachable};
