//! Typed cell handles.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use crate::config::InvalidationPolicy;
use crate::error::CellError;
use crate::key::CellKey;
use crate::runtime::{Graph, GraphInner};
use crate::status::{CellState, Generation, Revision, Status};

/// Owner of a slot in the graph. Dropping the last one releases the cell.
pub(crate) struct CellHandle {
    pub(crate) key: CellKey,
    pub(crate) graph: Arc<GraphInner>,
    /// Inputs of a derived cell, kept alive for as long as the cell is.
    pub(crate) inputs: Vec<AnyCell>,
}

impl Drop for CellHandle {
    fn drop(&mut self) {
        self.graph.release(self.key);
    }
}

/// A cell with its value type erased.
///
/// Useful for inspecting heterogeneous sets of cells, and as the element type the
/// [`Inputs`](crate::Inputs) implementations are built from.
#[derive(Clone)]
pub struct AnyCell {
    pub(crate) handle: Arc<CellHandle>,
}

impl AnyCell {
    pub fn key(&self) -> CellKey {
        self.handle.key
    }

    /// The graph this cell belongs to.
    pub fn graph(&self) -> Graph {
        Graph::from_inner(self.handle.graph.clone())
    }

    pub fn label(&self) -> Arc<str> {
        self.handle.graph.label(self.key())
    }

    pub fn status(&self) -> Status {
        self.peek().status()
    }

    pub fn generation(&self) -> Generation {
        self.handle.graph.generation(self.key())
    }

    /// Revision of the last status change of this cell.
    pub fn changed_at(&self) -> Revision {
        self.handle.graph.changed_at(self.key())
    }

    /// See [`AsyncCell::request`].
    pub fn request(&self) {
        self.handle.graph.request(self.key());
    }

    /// See [`AsyncCell::invalidate`].
    pub fn invalidate(&self) {
        self.handle.graph.invalidate(self.key());
    }

    /// Current state without side effects.
    pub fn peek(&self) -> CellState<dyn Any + Send + Sync> {
        self.handle.graph.peek(self.key())
    }

    /// Inputs of a derived cell; empty for leaf cells.
    pub fn inputs(&self) -> &[AnyCell] {
        &self.handle.inputs
    }

    pub(crate) fn same_graph(&self, graph: &Arc<GraphInner>) -> bool {
        Arc::ptr_eq(&self.handle.graph, graph)
    }
}

impl fmt::Debug for AnyCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyCell")
            .field("key", &self.key())
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

/// A node holding one asynchronously produced value.
///
/// Clone is cheap; all clones refer to the same cell. The cell is released when
/// the last clone (including clones held by derived cells using it as input) is
/// dropped.
pub struct AsyncCell<T> {
    cell: AnyCell,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for AsyncCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> AsyncCell<T> {
    pub(crate) fn from_any(cell: AnyCell) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Start the producer if nobody asked for the value yet.
    ///
    /// Returns immediately. The result lands when the graph processes the
    /// completion (see [`Graph::settle`]). Calling this on a cell that is already
    /// pending, ready or failed does nothing.
    pub fn request(&self) {
        self.cell.request();
    }

    /// Advance the generation and discard whatever the cell holds or awaits.
    ///
    /// Under the lazy policy the cell returns to `NotRequested`; under the eager
    /// policy it is requested again right away. Either way a result still in
    /// flight for the old generation is dropped when it arrives. This is also how
    /// a failed cell is retried.
    pub fn invalidate(&self) {
        self.cell.invalidate();
    }

    /// Current state without side effects. Never blocks, never fetches.
    pub fn peek(&self) -> CellState<T> {
        self.cell.peek().downcast::<T>()
    }

    pub fn status(&self) -> Status {
        self.cell.status()
    }

    /// The value, if ready.
    pub fn value(&self) -> Option<Arc<T>> {
        self.peek().into_value()
    }

    /// The error, if failed.
    pub fn error(&self) -> Option<CellError> {
        match self.peek() {
            CellState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn generation(&self) -> Generation {
        self.cell.generation()
    }

    pub fn changed_at(&self) -> Revision {
        self.cell.changed_at()
    }

    pub fn label(&self) -> Arc<str> {
        self.cell.label()
    }

    pub fn key(&self) -> CellKey {
        self.cell.key()
    }

    pub fn graph(&self) -> Graph {
        self.cell.graph()
    }

    pub fn as_any(&self) -> &AnyCell {
        &self.cell
    }

    /// Erase the value type.
    pub fn erase(self) -> AnyCell {
        self.cell
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for AsyncCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCell")
            .field("key", &self.key())
            .field("label", &self.label())
            .field("status", &self.status())
            .finish()
    }
}

/// A cell computed from other cells.
///
/// Derefs to [`AsyncCell`]; everything a plain cell offers works here too. Its
/// inputs are fixed at construction.
pub struct DerivedCell<T> {
    cell: AsyncCell<T>,
}

impl<T> Clone for DerivedCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> DerivedCell<T> {
    pub(crate) fn new(cell: AsyncCell<T>) -> Self {
        Self { cell }
    }

    /// The inputs, in declaration order.
    pub fn inputs(&self) -> &[AnyCell] {
        self.cell.as_any().inputs()
    }

    /// The underlying cell handle.
    pub fn into_cell(self) -> AsyncCell<T> {
        self.cell
    }
}

impl<T> Deref for DerivedCell<T> {
    type Target = AsyncCell<T>;

    fn deref(&self) -> &AsyncCell<T> {
        &self.cell
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for DerivedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCell")
            .field("key", &self.key())
            .field("label", &self.label())
            .field("status", &self.status())
            .field("inputs", &self.inputs().len())
            .finish()
    }
}

/// Per-cell settings.
///
/// ```
/// # use remote_flow::{CellOptions, InvalidationPolicy};
/// let options = CellOptions::<Vec<String>>::new()
///     .label("sample groups")
///     .invalidation(InvalidationPolicy::Eager)
///     .on_result(|groups| println!("{} groups", groups.len()));
/// # let _ = options;
/// ```
pub struct CellOptions<T> {
    pub(crate) label: Option<String>,
    pub(crate) invalidation: Option<InvalidationPolicy>,
    pub(crate) on_result: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(&CellError) + Send + Sync>>,
}

impl<T> Default for CellOptions<T> {
    fn default() -> Self {
        Self {
            label: None,
            invalidation: None,
            on_result: None,
            on_error: None,
        }
    }
}

impl<T> CellOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs, tracer events and dependency errors. Defaults to the
    /// value type name.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Override the graph's invalidation policy for this cell.
    pub fn invalidation(mut self, policy: InvalidationPolicy) -> Self {
        self.invalidation = Some(policy);
        self
    }

    /// Called with the value every time the cell becomes ready.
    pub fn on_result(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }

    /// Called every time the cell fails, including inherited failures.
    pub fn on_error(mut self, f: impl Fn(&CellError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}
