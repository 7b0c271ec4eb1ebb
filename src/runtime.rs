//! The graph runtime.
//!
//! All cell state lives in one [`GraphState`] behind a mutex. Every public
//! operation runs as a transaction: it locks the state, applies its change,
//! re-evaluates the dependents it dirtied, and releases the lock. Only then are
//! the collected effects dispatched: tracer events, result hooks and producer
//! invocations. User code therefore never runs while the graph is locked.
//!
//! Producer futures run on spawned tasks and report back through a channel. A
//! completion only touches cell state when the thread driving the graph applies
//! it ([`Graph::process_completions`], [`Graph::next_completion`],
//! [`Graph::settle`]).

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{AbortHandle, AbortRegistration, Abortable, Aborted, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cell::{AnyCell, AsyncCell, CellHandle, CellOptions, DerivedCell};
use crate::config::{GraphConfig, InvalidationPolicy};
use crate::error::{CellError, FetchError, GraphError};
use crate::fetch::Fetcher;
use crate::inputs::Inputs;
use crate::key::CellKey;
use crate::spawn::{Spawner, TokioSpawner};
use crate::status::{AnyValue, CellState, Generation, Revision, Status};
use crate::storage::{
    DerivedFn, ErrorHook, GraphState, Hooks, InputMark, LeafFn, Producer, Resolution, ResultHook,
    Slot,
};
use crate::tracer::{DiscardReason, NoopTracer, SettleResult, Tracer};

/// A dependent asynchronous value graph.
///
/// This is cheap to clone - all data is behind `Arc`. Each graph is its own
/// context; cells of different graphs cannot be combined.
///
/// # Example
///
/// ```
/// use remote_flow::Graph;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let graph = Graph::new();
/// let groups = graph.cell(|| async { Ok(vec!["A".to_string(), "B".to_string()]) });
/// let count = graph.computed(groups.clone(), |groups| Ok(groups.len())).unwrap();
///
/// count.request();
/// graph.settle().await;
/// assert_eq!(count.value().as_deref(), Some(&2));
/// # }
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("cells", &self.len())
            .field("in_flight", &self.in_flight())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Graph {
    /// Create a graph with default settings.
    pub fn new() -> Self {
        GraphBuilder::new().build()
    }

    /// Create a builder for customizing the graph.
    ///
    /// # Example
    ///
    /// ```
    /// use remote_flow::{Graph, InvalidationPolicy};
    ///
    /// let graph = Graph::builder()
    ///     .invalidation(InvalidationPolicy::Eager)
    ///     .cancel_stale(true)
    ///     .build();
    /// assert!(graph.config().cancel_stale);
    /// ```
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Create a leaf cell backed by an asynchronous producer.
    ///
    /// The producer is not called until the cell is requested, and then once per
    /// generation.
    pub fn cell<T, F, Fut>(&self, producer: F) -> AsyncCell<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.cell_with(CellOptions::default(), producer)
    }

    /// Create a leaf cell with per-cell options.
    pub fn cell_with<T, F, Fut>(&self, options: CellOptions<T>, producer: F) -> AsyncCell<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let produce: Arc<LeafFn> = Arc::new(move || {
            let fut = producer();
            async move { fut.await.map(|value| Arc::new(value) as AnyValue) }.boxed()
        });
        let cell = self
            .inner
            .create(&options, Producer::Leaf(produce), Vec::new());
        AsyncCell::from_any(cell)
    }

    /// Create a leaf cell from an API client.
    pub fn fetch_cell<F: Fetcher>(&self, fetcher: F) -> AsyncCell<F::Output> {
        let options = CellOptions::new().label(fetcher.label());
        let fetcher = Arc::new(fetcher);
        self.cell_with(options, move || {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch().await }
        })
    }

    /// Create a derived cell.
    ///
    /// The producer is invoked with the input values, in input order, once every
    /// input is ready, and at most once per tuple of input generations. If any
    /// input fails, the cell fails with [`CellError::Dependency`] and the producer
    /// is not invoked.
    ///
    /// Fails with [`GraphError::ForeignCell`] if an input belongs to another graph.
    pub fn derived<I, T, F, Fut>(
        &self,
        inputs: I,
        producer: F,
    ) -> Result<DerivedCell<T>, GraphError>
    where
        I: Inputs,
        T: Send + Sync + 'static,
        F: Fn(I::Values) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.derived_with(inputs, CellOptions::default(), producer)
    }

    /// Create a derived cell with per-cell options.
    pub fn derived_with<I, T, F, Fut>(
        &self,
        inputs: I,
        options: CellOptions<T>,
        producer: F,
    ) -> Result<DerivedCell<T>, GraphError>
    where
        I: Inputs,
        T: Send + Sync + 'static,
        F: Fn(I::Values) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let cells = inputs.cells();
        if let Some(foreign) = cells.iter().find(|cell| !cell.same_graph(&self.inner)) {
            return Err(GraphError::ForeignCell {
                label: foreign.label(),
            });
        }
        let body: Arc<DerivedFn> = Arc::new(move |values: Vec<AnyValue>| {
            let fut = producer(I::extract(values));
            async move { fut.await.map(|value| Arc::new(value) as AnyValue) }.boxed()
        });
        let producer = Producer::Derived {
            inputs: cells.iter().map(AnyCell::key).collect(),
            body,
            resolved_for: None,
        };
        let cell = self.inner.create(&options, producer, cells);
        Ok(DerivedCell::new(AsyncCell::from_any(cell)))
    }

    /// Create a derived cell from a synchronous function of the input values.
    pub fn computed<I, T, F>(&self, inputs: I, producer: F) -> Result<DerivedCell<T>, GraphError>
    where
        I: Inputs,
        T: Send + Sync + 'static,
        F: Fn(I::Values) -> Result<T, FetchError> + Send + Sync + 'static,
    {
        self.derived(inputs, move |values| futures::future::ready(producer(values)))
    }

    /// Apply every completion that already arrived, without waiting.
    ///
    /// Returns the number of completions applied.
    pub fn process_completions(&self) -> usize {
        let completions = {
            let Ok(mut receiver) = self.inner.receiver.try_lock() else {
                return 0;
            };
            let mut completions = Vec::new();
            while let Ok(completion) = receiver.try_recv() {
                completions.push(completion);
            }
            completions
        };
        let applied = completions.len();
        for completion in completions {
            self.inner.apply(completion);
        }
        applied
    }

    /// Wait for the next producer completion and apply it.
    ///
    /// Returns `false` without waiting if no producer is in flight.
    pub async fn next_completion(&self) -> bool {
        if self.in_flight() == 0 {
            return false;
        }
        let completion = {
            let mut receiver = self.inner.receiver.lock().await;
            receiver.recv().await
        };
        match completion {
            Some(completion) => {
                self.inner.apply(completion);
                true
            }
            None => false,
        }
    }

    /// Apply completions until no producer is in flight.
    ///
    /// Producers started while settling (derived cells whose inputs became ready,
    /// eager re-requests) are waited for as well.
    pub async fn settle(&self) {
        while self.next_completion().await {}
    }

    /// Number of producer tasks whose completion was not applied yet.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Current graph revision. Incremented on every status change of any cell.
    pub fn revision(&self) -> Revision {
        self.inner.state.lock().revision()
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.inner.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder for creating a [`Graph`] with custom settings.
pub struct GraphBuilder {
    config: GraphConfig,
    tracer: Arc<dyn Tracer>,
    spawner: Arc<dyn Spawner>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: GraphConfig::default(),
            tracer: Arc::new(NoopTracer),
            spawner: Arc::new(TokioSpawner::new()),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Default invalidation policy for cells that don't set their own.
    pub fn invalidation(mut self, policy: InvalidationPolicy) -> Self {
        self.config.invalidation = policy;
        self
    }

    /// Abort producer tasks as soon as they are superseded.
    pub fn cancel_stale(mut self, cancel: bool) -> Self {
        self.config.cancel_stale = cancel;
        self
    }

    /// Install a tracer. Pass an `Arc` to keep a handle on it.
    pub fn tracer(mut self, tracer: impl Tracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Run producers somewhere other than the ambient tokio runtime.
    pub fn spawner(mut self, spawner: impl Spawner) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    pub fn build(self) -> Graph {
        let (sender, receiver) = mpsc::unbounded_channel();
        Graph {
            inner: Arc::new(GraphInner {
                state: Mutex::new(GraphState::new()),
                sender,
                receiver: tokio::sync::Mutex::new(receiver),
                config: self.config,
                tracer: self.tracer,
                spawner: self.spawner,
            }),
        }
    }
}

/// Result of one producer invocation, sent from its task back to the graph.
pub(crate) struct Completion {
    cell: CellKey,
    generation: Generation,
    /// Input marks the invocation was started for. `None` for leaf cells.
    inputs: Option<Vec<InputMark>>,
    outcome: Outcome,
}

enum Outcome {
    Settled(Result<AnyValue, FetchError>),
    Aborted,
}

enum Call {
    Leaf(Arc<LeafFn>),
    Derived(Arc<DerivedFn>, Vec<AnyValue>),
}

impl Call {
    fn start(self) -> BoxFuture<'static, Result<AnyValue, FetchError>> {
        match self {
            Call::Leaf(produce) => produce(),
            Call::Derived(body, values) => body(values),
        }
    }
}

struct Invocation {
    cell: CellKey,
    label: Arc<str>,
    generation: Generation,
    inputs: Option<Vec<InputMark>>,
    call: Call,
    registration: AbortRegistration,
}

/// Work deferred until the graph lock is released.
enum Effect {
    Requested(CellKey),
    Invoke(Invocation),
    Settled {
        cell: CellKey,
        label: Arc<str>,
        generation: Generation,
        result: SettleResult,
    },
    DependencyFailed {
        cell: CellKey,
        label: Arc<str>,
        dependency: Arc<str>,
    },
    Discarded {
        cell: CellKey,
        generation: Generation,
        reason: DiscardReason,
    },
    Invalidated {
        cell: CellKey,
        generation: Generation,
    },
    OnResult {
        cell: CellKey,
        hook: Arc<ResultHook>,
        value: AnyValue,
    },
    OnError {
        cell: CellKey,
        hook: Arc<ErrorHook>,
        error: CellError,
    },
}

#[derive(Default)]
struct Effects {
    events: Vec<Effect>,
    /// Replaced values, dropped after unlocking since user types may run code on drop.
    trash: Vec<CellState<dyn Any + Send + Sync>>,
}

pub(crate) struct GraphInner {
    state: Mutex<GraphState>,
    sender: mpsc::UnboundedSender<Completion>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Completion>>,
    config: GraphConfig,
    tracer: Arc<dyn Tracer>,
    spawner: Arc<dyn Spawner>,
}

impl GraphInner {
    fn create<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        options: &CellOptions<T>,
        producer: Producer,
        inputs: Vec<AnyCell>,
    ) -> AnyCell {
        let label: Arc<str> = match &options.label {
            Some(label) => label.as_str().into(),
            None => short_type_name(std::any::type_name::<T>()).into(),
        };
        let policy = options.invalidation.unwrap_or(self.config.invalidation);
        let hooks = Hooks {
            on_result: options.on_result.clone().map(|hook| {
                let erased: Arc<ResultHook> = Arc::new(move |value: &AnyValue| {
                    if let Some(value) = (**value).downcast_ref::<T>() {
                        hook(value);
                    }
                });
                erased
            }),
            on_error: options.on_error.clone().map(|hook| {
                let erased: Arc<ErrorHook> = Arc::new(move |error: &CellError| hook(error));
                erased
            }),
        };
        let input_keys: Vec<CellKey> = inputs.iter().map(AnyCell::key).collect();

        let key = {
            let mut state = self.state.lock();
            let key =
                state.insert(|stamp| Slot::new(stamp, label.clone(), policy, producer, hooks));
            for input in &input_keys {
                state.add_dependent(*input, key);
            }
            key
        };

        tracing::debug!(cell = %key, label = %label, inputs = input_keys.len(), "cell created");
        self.tracer.on_cell_created(key, &label, &input_keys);

        AnyCell {
            handle: Arc::new(CellHandle {
                key,
                graph: self.clone(),
                inputs,
            }),
        }
    }

    /// Run `op` under the lock, flush dirty dependents, then dispatch effects.
    fn transact<R>(&self, op: impl FnOnce(&mut Txn<'_>) -> R) -> R {
        let mut effects = Effects::default();
        let result = {
            let mut state = self.state.lock();
            let mut txn = Txn {
                state: &mut *state,
                cancel_stale: self.config.cancel_stale,
                effects: &mut effects,
            };
            let result = op(&mut txn);
            txn.flush();
            result
        };
        self.dispatch(effects);
        result
    }

    pub(crate) fn request(&self, key: CellKey) {
        self.transact(|txn| txn.request(key));
    }

    pub(crate) fn invalidate(&self, key: CellKey) {
        self.transact(|txn| txn.invalidate(key));
    }

    fn apply(&self, completion: Completion) {
        self.transact(|txn| txn.complete(completion));
    }

    pub(crate) fn peek(&self, key: CellKey) -> CellState<dyn Any + Send + Sync> {
        self.state
            .lock()
            .get(key)
            .map(|slot| slot.state.clone())
            .unwrap_or(CellState::NotRequested)
    }

    pub(crate) fn label(&self, key: CellKey) -> Arc<str> {
        self.state
            .lock()
            .get(key)
            .map(|slot| slot.label.clone())
            .unwrap_or_else(|| "<released>".into())
    }

    pub(crate) fn generation(&self, key: CellKey) -> Generation {
        self.state
            .lock()
            .get(key)
            .map(|slot| slot.generation)
            .unwrap_or_default()
    }

    pub(crate) fn changed_at(&self, key: CellKey) -> Revision {
        self.state
            .lock()
            .get(key)
            .map(|slot| slot.changed_at)
            .unwrap_or_default()
    }

    /// Remove a cell whose last handle was dropped.
    pub(crate) fn release(&self, key: CellKey) {
        let slot = {
            let mut state = self.state.lock();
            let mut slot = state.remove(key);
            if let Some(slot) = &mut slot {
                slot.retire(self.config.cancel_stale);
            }
            slot
        };
        if let Some(slot) = slot {
            tracing::debug!(cell = %key, label = %slot.label, "cell released");
            self.tracer.on_released(key);
        }
    }

    fn dispatch(&self, effects: Effects) {
        let Effects { events, trash } = effects;
        for effect in events {
            match effect {
                Effect::Requested(cell) => {
                    tracing::trace!(cell = %cell, "requested");
                    self.tracer.on_requested(cell);
                }
                Effect::Invoke(invocation) => self.spawn(invocation),
                Effect::Settled {
                    cell,
                    label,
                    generation,
                    result,
                } => {
                    match &result {
                        SettleResult::Ready => {
                            tracing::debug!(
                                cell = %cell,
                                label = %label,
                                generation = %generation,
                                "settled"
                            );
                        }
                        SettleResult::Failed { message } => {
                            tracing::warn!(
                                cell = %cell,
                                label = %label,
                                generation = %generation,
                                error = %message,
                                "fetch failed"
                            );
                        }
                    }
                    self.tracer.on_settled(cell, generation, &result);
                }
                Effect::DependencyFailed {
                    cell,
                    label,
                    dependency,
                } => {
                    tracing::debug!(
                        cell = %cell,
                        label = %label,
                        dependency = %dependency,
                        "dependency failed"
                    );
                    self.tracer.on_dependency_failed(cell, &dependency);
                }
                Effect::Discarded {
                    cell,
                    generation,
                    reason,
                } => {
                    tracing::trace!(
                        cell = %cell,
                        generation = %generation,
                        reason = ?reason,
                        "stale result discarded"
                    );
                    self.tracer.on_stale_discarded(cell, generation, &reason);
                }
                Effect::Invalidated { cell, generation } => {
                    tracing::debug!(cell = %cell, generation = %generation, "invalidated");
                    self.tracer.on_invalidated(cell, generation);
                }
                Effect::OnResult { cell, hook, value } => run_hook(cell, || hook(&value)),
                Effect::OnError { cell, hook, error } => run_hook(cell, || hook(&error)),
            }
        }
        drop(trash);
    }

    fn spawn(&self, invocation: Invocation) {
        let Invocation {
            cell,
            label,
            generation,
            inputs,
            call,
            registration,
        } = invocation;
        tracing::debug!(
            cell = %cell,
            label = %label,
            generation = %generation,
            "invoking producer"
        );
        self.tracer.on_invoked(cell, generation);

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| call.start())) {
            Ok(future) => future,
            Err(panic) => futures::future::ready(Err(panic_error(panic))).boxed(),
        };
        let sender = self.sender.clone();
        let task = async move {
            let guarded = AssertUnwindSafe(future).catch_unwind();
            let outcome = match Abortable::new(guarded, registration).await {
                Ok(Ok(result)) => Outcome::Settled(result),
                Ok(Err(panic)) => Outcome::Settled(Err(panic_error(panic))),
                Err(Aborted) => Outcome::Aborted,
            };
            // Fails only once the graph is gone, and then nobody wants the result.
            let _ = sender.send(Completion {
                cell,
                generation,
                inputs,
                outcome,
            });
        };
        self.spawner.spawn(task.boxed());
    }
}

/// Run a result hook. A panicking hook is logged and must not stop the
/// remaining effects of its transaction from being dispatched.
fn run_hook(cell: CellKey, hook: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
        tracing::warn!(cell = %cell, panic = %panic_message(&*panic), "result hook panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> FetchError {
    FetchError::msg(format!("producer panicked: {}", panic_message(&*panic)))
}

/// `alloc::vec::Vec<alloc::string::String>` becomes `Vec<String>`.
pub(crate) fn short_type_name(name: &str) -> String {
    fn push_segment(out: &mut String, path: &str) {
        out.push_str(path.rsplit("::").next().unwrap_or(path));
    }

    let mut out = String::with_capacity(name.len());
    let mut start = 0;
    for (i, c) in name.char_indices() {
        if matches!(c, '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | '&' | ';') {
            push_segment(&mut out, &name[start..i]);
            out.push(c);
            start = i + c.len_utf8();
        }
    }
    push_segment(&mut out, &name[start..]);
    out
}

/// State changes of one graph operation, applied under the lock.
struct Txn<'a> {
    state: &'a mut GraphState,
    cancel_stale: bool,
    effects: &'a mut Effects,
}

impl Txn<'_> {
    fn push(&mut self, effect: Effect) {
        self.effects.events.push(effect);
    }

    fn replace_state(&mut self, key: CellKey, state: CellState<dyn Any + Send + Sync>) {
        if let Some(slot) = self.state.get_mut(key) {
            let old = std::mem::replace(&mut slot.state, state);
            self.effects.trash.push(old);
        }
    }

    /// Re-evaluate dependents until nothing is dirty.
    fn flush(&mut self) {
        while let Some(key) = self.state.pop_dirty() {
            self.evaluate(key);
        }
    }

    fn request(&mut self, key: CellKey) {
        let Some(slot) = self.state.get(key) else {
            return;
        };
        if slot.status() != Status::NotRequested {
            return;
        }
        let leaf = match &slot.producer {
            Producer::Leaf(produce) => Some(produce.clone()),
            Producer::Derived { .. } => None,
        };

        self.replace_state(key, CellState::Pending);
        self.push(Effect::Requested(key));
        self.state.mark_changed(key);

        match leaf {
            Some(produce) => self.invoke(key, Call::Leaf(produce), None),
            None => self.evaluate(key),
        }
    }

    fn invalidate(&mut self, key: CellKey) {
        let cancel = self.cancel_stale;
        let Some(slot) = self.state.get_mut(key) else {
            return;
        };
        let generation = slot.generation.bump();
        slot.retire(cancel);
        slot.clear_resolution();
        let was_requested = slot.status() != Status::NotRequested;
        let eager = slot.invalidation == InvalidationPolicy::Eager;

        self.push(Effect::Invalidated {
            cell: key,
            generation,
        });
        if was_requested {
            self.replace_state(key, CellState::NotRequested);
            self.state.mark_changed(key);
        }
        if eager {
            self.request(key);
        }
    }

    /// Start a producer invocation under a fresh generation.
    fn invoke(&mut self, key: CellKey, call: Call, inputs: Option<Vec<InputMark>>) {
        let cancel = self.cancel_stale;
        let Some(slot) = self.state.get_mut(key) else {
            return;
        };
        slot.retire(cancel);
        let generation = slot.generation.bump();
        let (handle, registration) = AbortHandle::new_pair();
        slot.abort = Some(handle);
        let label = slot.label.clone();
        self.state.in_flight += 1;

        self.push(Effect::Invoke(Invocation {
            cell: key,
            label,
            generation,
            inputs,
            call,
            registration,
        }));
    }

    /// Recompute a derived cell from its inputs.
    fn evaluate(&mut self, key: CellKey) {
        let Some(slot) = self.state.get(key) else {
            return;
        };
        if slot.status() == Status::NotRequested {
            return;
        }
        let Some(inputs) = slot.inputs().map(<[CellKey]>::to_vec) else {
            return;
        };
        let cancel = self.cancel_stale;

        match self.state.resolve_inputs(&inputs) {
            Resolution::Failed { label, error } => {
                let marks = self.state.input_marks(&inputs);
                let Some(slot) = self.state.get_mut(key) else {
                    return;
                };
                let Producer::Derived { resolved_for, .. } = &mut slot.producer else {
                    return;
                };
                if slot.state.is_failed() && resolved_for.as_ref() == Some(&marks) {
                    return;
                }
                *resolved_for = Some(marks);
                let error = CellError::inherit(label.clone(), &error);
                if let CellState::Failed(current) = &slot.state {
                    if current.same_failure(&error) {
                        return;
                    }
                }
                slot.retire(cancel);
                // Dependents key their resolution on this generation, so a new
                // inherited error must be visible to them as a new mark.
                slot.generation.bump();
                let on_error = slot.hooks.on_error.clone();
                let cell_label = slot.label.clone();

                self.replace_state(key, CellState::Failed(error.clone()));
                self.push(Effect::DependencyFailed {
                    cell: key,
                    label: cell_label,
                    dependency: label,
                });
                if let Some(hook) = on_error {
                    self.push(Effect::OnError {
                        cell: key,
                        hook,
                        error,
                    });
                }
                self.state.mark_changed(key);
            }
            Resolution::Pending { unrequested } => {
                let Some(slot) = self.state.get_mut(key) else {
                    return;
                };
                slot.retire(cancel);
                slot.clear_resolution();
                if slot.status() != Status::Pending {
                    self.replace_state(key, CellState::Pending);
                    self.state.mark_changed(key);
                }
                for input in unrequested {
                    self.request(input);
                }
            }
            Resolution::Ready { values, marks } => {
                let Some(slot) = self.state.get_mut(key) else {
                    return;
                };
                let Producer::Derived {
                    body, resolved_for, ..
                } = &mut slot.producer
                else {
                    return;
                };
                if resolved_for.as_ref() == Some(&marks) {
                    return;
                }
                *resolved_for = Some(marks.clone());
                let body = body.clone();
                if slot.status() != Status::Pending {
                    self.replace_state(key, CellState::Pending);
                    self.state.mark_changed(key);
                }
                self.invoke(key, Call::Derived(body, values), Some(marks));
            }
        }
    }

    /// Accept or discard a producer result.
    fn complete(&mut self, completion: Completion) {
        let Completion {
            cell,
            generation,
            inputs,
            outcome,
        } = completion;
        self.state.in_flight = self.state.in_flight.saturating_sub(1);

        let state = &*self.state;
        let reason = match state.get(cell) {
            None => Some(DiscardReason::CellReleased),
            Some(_) if matches!(outcome, Outcome::Aborted) => Some(DiscardReason::Aborted),
            Some(slot) if slot.generation != generation => {
                Some(DiscardReason::GenerationAdvanced {
                    current: slot.generation,
                })
            }
            Some(slot) if inputs != slot.inputs().map(|keys| state.input_marks(keys)) => {
                Some(DiscardReason::InputsChanged)
            }
            Some(_) => None,
        };
        let result = match (reason, outcome) {
            (Some(reason), outcome) => {
                if let Outcome::Settled(Ok(value)) = outcome {
                    self.effects.trash.push(CellState::Ready(value));
                }
                self.push(Effect::Discarded {
                    cell,
                    generation,
                    reason,
                });
                return;
            }
            (None, Outcome::Aborted) => return,
            (None, Outcome::Settled(result)) => result,
        };

        let Some(slot) = self.state.get_mut(cell) else {
            return;
        };
        slot.abort = None;
        let label = slot.label.clone();
        let hooks = slot.hooks.clone();

        match result {
            Ok(value) => {
                self.replace_state(cell, CellState::Ready(value.clone()));
                self.push(Effect::Settled {
                    cell,
                    label,
                    generation,
                    result: SettleResult::Ready,
                });
                if let Some(hook) = hooks.on_result {
                    self.push(Effect::OnResult {
                        cell,
                        hook,
                        value,
                    });
                }
            }
            Err(error) => {
                let error = CellError::Fetch(error);
                self.replace_state(cell, CellState::Failed(error.clone()));
                self.push(Effect::Settled {
                    cell,
                    label,
                    generation,
                    result: SettleResult::Failed {
                        message: error.message(),
                    },
                });
                if let Some(hook) = hooks.on_error {
                    self.push(Effect::OnError { cell, hook, error });
                }
            }
        }
        self.state.mark_changed(cell);
    }
}
