//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use remote_flow::{FetchError, Graph};
use tokio::sync::oneshot;

type Responder<T> = oneshot::Sender<Result<T, FetchError>>;

/// A producer whose invocations stay pending until the test settles them.
pub struct Gate<T> {
    waiting: Arc<Mutex<VecDeque<Responder<T>>>>,
    invocations: Arc<AtomicUsize>,
}

impl<T> Clone for Gate<T> {
    fn clone(&self) -> Self {
        Self {
            waiting: self.waiting.clone(),
            invocations: self.invocations.clone(),
        }
    }
}

impl<T: Send + 'static> Gate<T> {
    pub fn new() -> Self {
        Self {
            waiting: Arc::new(Mutex::new(VecDeque::new())),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start one invocation.
    pub fn invoke(&self) -> BoxFuture<'static, Result<T, FetchError>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        self.waiting.lock().push_back(sender);
        async move {
            match receiver.await {
                Ok(result) => result,
                Err(_) => Err(FetchError::msg("gate dropped")),
            }
        }
        .boxed()
    }

    /// A leaf producer backed by this gate.
    pub fn producer(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync + 'static
    where
        T: Sync,
    {
        let gate = self.clone();
        move || gate.invoke()
    }

    /// Resolve the oldest waiting invocation. Returns `false` if none was waiting
    /// or its task is gone.
    pub fn resolve(&self, value: T) -> bool {
        self.settle_oldest(Ok(value))
    }

    /// Reject the oldest waiting invocation.
    pub fn reject(&self, message: &'static str) -> bool {
        self.settle_oldest(Err(FetchError::msg(message)))
    }

    /// Resolve the newest waiting invocation, leaving older ones pending.
    pub fn resolve_latest(&self, value: T) -> bool {
        match self.waiting.lock().pop_back() {
            Some(sender) => sender.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Number of producer invocations so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Number of invocations not settled yet.
    pub fn waiting(&self) -> usize {
        self.waiting.lock().len()
    }

    fn settle_oldest(&self, result: Result<T, FetchError>) -> bool {
        match self.waiting.lock().pop_front() {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }
}

/// Let spawned producer tasks run and apply whatever they delivered.
///
/// Unlike `Graph::settle`, this returns even while gated producers are still
/// waiting.
pub async fn pump(graph: &Graph) {
    for _ in 0..16 {
        tokio::task::yield_now().await;
        graph.process_completions();
    }
}
