use std::{
    fmt::{self, Debug},
    io,
    sync::Arc,
};

/// Unit of work posted to the host thread
pub type HostAction = Box<dyn FnOnce() + Send + 'static>;

/// Abstracts the single thread that owns hosted instances
///
/// Implementations run every posted action on one designated thread, one at a time, in the order
/// they were posted. Instances are constructed, driven and dropped inside those actions only, which
/// is what allows an instance type to be `!Send`.
pub trait HostEnvironment: Send + Sync + Debug + 'static {
    /// Queue `action` to run on the host thread
    ///
    /// If the host thread is gone the action is dropped without running.
    fn post(&self, action: HostAction);
    /// Whether the calling thread is the host thread
    fn is_host_thread(&self) -> bool;
    /// Create a container instances can be attached to
    ///
    /// Only called on the host thread.
    fn create_container(&self) -> ContainerId;
    /// Release a container created by `create_container`
    ///
    /// Only called on the host thread.
    fn destroy_container(&self, id: ContainerId);
}

/// Identifies a container created by a [`HostEnvironment`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container{}", self.0)
    }
}

/// The process-wide host shared by scenarios that don't name their own
///
/// With `runtime-tokio` enabled the first call spawns a [`TokioHost`] thread; later calls return
/// the same host. Without a runtime feature there is no default and an error is returned.
pub fn default_host() -> io::Result<Arc<dyn HostEnvironment>> {
    #[cfg(feature = "runtime-tokio")]
    {
        use std::sync::OnceLock;

        static DEFAULT_HOST: OnceLock<Arc<TokioHost>> = OnceLock::new();

        if let Some(host) = DEFAULT_HOST.get() {
            return Ok(host.clone());
        }
        // A host spawned by a losing racer is dropped here, which stops its thread
        let host = Arc::new(TokioHost::spawn()?);
        return Ok(DEFAULT_HOST.get_or_init(|| host).clone());
    }

    #[cfg(not(feature = "runtime-tokio"))]
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no usable host runtime enabled",
    ))
}

#[cfg(feature = "runtime-tokio")]
mod tokio;
#[cfg(feature = "runtime-tokio")]
pub use self::tokio::TokioHost;
