//! Where producer tasks run.

use futures::future::BoxFuture;
use tokio::runtime::Handle;

/// Runs producer tasks independently of the thread driving the graph.
///
/// A task only delivers its completion to the graph's channel; it never touches
/// cell state, so it may run on any thread.
pub trait Spawner: Send + Sync + 'static {
    /// Start `task` and return immediately.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto a tokio runtime.
///
/// Without an explicit handle, tasks go to the runtime of the caller, so
/// `request()` must then be called from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<Handle>,
}

impl TokioSpawner {
    /// Spawn onto the runtime current at each `spawn` call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a fixed runtime, e.g. a multi-threaded pool owned elsewhere.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        match &self.handle {
            Some(handle) => drop(handle.spawn(task)),
            None => drop(tokio::spawn(task)),
        }
    }
}
