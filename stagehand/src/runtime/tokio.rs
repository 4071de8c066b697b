use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    thread::{self, ThreadId},
};

use rustc_hash::FxHashSet;
use tokio::{sync::mpsc, task::LocalSet};
use tracing::{debug, trace};

use super::{ContainerId, HostAction, HostEnvironment};

/// A host thread running a current-thread Tokio runtime
///
/// Actions run inside a [`LocalSet`], so hosted code may use `tokio::task::spawn_local` and Tokio
/// timers to do deferred work, the way a UI main loop would. Dropping the last handle closes the
/// queue; the thread finishes the actions already posted and exits.
#[derive(Debug)]
pub struct TokioHost {
    actions: mpsc::UnboundedSender<HostAction>,
    thread: ThreadId,
    containers: Mutex<FxHashSet<ContainerId>>,
    next_container: AtomicU64,
}

impl TokioHost {
    /// Spawn a dedicated host thread
    pub fn spawn() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (actions, mut queue) = mpsc::unbounded_channel::<HostAction>();
        let handle = thread::Builder::new()
            .name("stagehand-host".into())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(action) = queue.recv().await {
                        action();
                    }
                });
                debug!("host queue closed");
            })?;
        let thread = handle.thread().id();
        debug!(?thread, "spawned host thread");
        Ok(Self {
            actions,
            thread,
            containers: Mutex::new(FxHashSet::default()),
            next_container: AtomicU64::new(0),
        })
    }

    /// Number of containers currently alive
    pub fn live_containers(&self) -> usize {
        self.containers().len()
    }

    fn containers(&self) -> MutexGuard<'_, FxHashSet<ContainerId>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HostEnvironment for TokioHost {
    fn post(&self, action: HostAction) {
        if self.actions.send(action).is_err() {
            debug!("host thread gone; dropping action");
        }
    }

    fn is_host_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn create_container(&self) -> ContainerId {
        let id = ContainerId(self.next_container.fetch_add(1, Ordering::Relaxed));
        self.containers().insert(id);
        trace!(%id, "created container");
        id
    }

    fn destroy_container(&self, id: ContainerId) {
        if self.containers().remove(&id) {
            trace!(%id, "destroyed container");
        }
    }
}
