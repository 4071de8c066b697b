use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc},
    time::Duration,
};

use tracing::{trace, warn};

use crate::{HarnessError, HostEnvironment, Waiting};

/// Runs work on the host thread on behalf of another thread
///
/// The calling thread blocks until the host has run the action, the wait bound elapses, or the
/// host goes away. Actions from one caller run in the order they were submitted.
#[derive(Debug, Clone)]
pub struct ActionBridge {
    host: Arc<dyn HostEnvironment>,
    timeout: Duration,
}

impl ActionBridge {
    /// Bridge to `host`, waiting at most `timeout` for each action
    pub fn new(host: Arc<dyn HostEnvironment>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// Run `action` on the host thread and return its result
    ///
    /// Fails immediately with [`HarnessError::Deadlock`] when called from the host thread, since
    /// the host would wait on itself. A panic inside `action` is caught on the host thread and
    /// reported as [`HarnessError::ActionPanicked`]. On timeout the action stays queued and may
    /// still run later; its result is then discarded.
    pub fn run<F, R>(&self, label: &'static str, action: F) -> Result<R, HarnessError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.host.is_host_thread() {
            return Err(HarnessError::Deadlock);
        }

        let (result_tx, result_rx) = mpsc::sync_channel(1);
        trace!(label, "posting action");
        self.host.post(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(action));
            // The requester may have stopped waiting
            let _ = result_tx.send(result);
        }));

        match result_rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(label, %message, "host action panicked");
                Err(HarnessError::ActionPanicked(message))
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(label, timeout = ?self.timeout, "host did not run action in time");
                Err(HarnessError::Timeout(Waiting::Action(label)))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(HarnessError::HostUnavailable),
        }
    }

    /// The host this bridge posts to
    pub fn host(&self) -> &Arc<dyn HostEnvironment> {
        &self.host
    }

    /// Maximum time `run` waits for an action
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
