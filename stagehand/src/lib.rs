//! Drive host-thread-owned components through their lifecycle from test threads
//!
//! Many components may only ever be touched by the one thread that owns them: UI widgets living on
//! a main loop are the typical example. Testing how such a component behaves when it is paused,
//! stopped, torn down or rebuilt means reaching across that thread boundary without ever touching
//! the component from the wrong side. This crate provides a portable harness for doing exactly
//! that. It builds on top of stagehand-proto, which implements the lifecycle logic independent of
//! any particular host.
//!
//! The entry point of this crate is the [`Scenario`].
//!
//! # How a scenario works
//!
//! A scenario owns one logical instance of a [`Hosted`] type. The instance is constructed by a
//! user-supplied factory *on the host thread* and stays there; the scenario handle held by the
//! test only posts work to the host through an [`ActionBridge`] and blocks until it has run.
//!
//! Lifecycle changes happen one [`Step`] at a time. For every step the harness consults the
//! configured [`TransitionPolicy`], runs the matching hook on the instance, and waits for the
//! instance to report the state it reached. A scenario can be driven forwards and backwards with
//! [`Scenario::move_to_state`], rebuilt from scratch with [`Scenario::recreate`], and inspected
//! with [`Scenario::on_instance`]. Recreation keeps the handle: the scenario is the same object,
//! only the instance behind it belongs to a new [`GenerationId`].
//!
//! Hosts are abstracted by [`HostEnvironment`]. With the default `runtime-tokio` feature, all
//! scenarios that don't name a host share one process-wide [`TokioHost`] thread.
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![warn(clippy::use_self)]

mod bridge;
mod builders;
mod error;
mod instance;
mod mutex;
mod runtime;
mod scenario;
mod tracker;

pub use proto::{
    AllowAll, ConfigError, FnPolicy, GateEntry, GenerationId, HarnessConfig, LifecycleState,
    ObservedEvent, Step, TransitionPolicy,
};

pub use crate::bridge::ActionBridge;
pub use crate::builders::Launcher;
pub use crate::error::{BoxError, HarnessError, Waiting};
pub use crate::instance::{Attachment, HostContext, Hosted, ThemeId};
#[cfg(feature = "runtime-tokio")]
pub use crate::runtime::TokioHost;
pub use crate::runtime::{default_host, ContainerId, HostAction, HostEnvironment};
pub use crate::scenario::{Factory, Scenario};
pub use crate::tracker::StateReporter;
