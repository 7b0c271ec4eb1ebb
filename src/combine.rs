//! Combining the status of several cells for rendering.
//!
//! The combination rule: any failed input makes the whole failed (the first one
//! in input order is reported); otherwise any input that is not ready makes the
//! whole pending; otherwise the whole is ready with every value, in input order.
//! Nothing here is cached or has side effects, except [`View::render`], which
//! requests inputs nobody asked for yet.

use crate::error::CellError;
use crate::inputs::Inputs;
use crate::status::{CellState, Revision, Status};

/// The combined status of an input list.
#[derive(Debug, Clone)]
pub enum Combined<V> {
    Pending,
    Failed(CellError),
    Ready(V),
}

impl<V> Combined<V> {
    pub fn status(&self) -> Status {
        match self {
            Combined::Pending => Status::Pending,
            Combined::Failed(_) => Status::Failed,
            Combined::Ready(_) => Status::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Combined::Ready(_))
    }
}

/// Snapshot the combined status of `inputs`.
pub fn resolve<I: Inputs>(inputs: &I) -> Combined<I::Values> {
    let cells = inputs.cells();
    let mut values = Vec::with_capacity(cells.len());
    let mut pending = false;
    for cell in &cells {
        match cell.peek() {
            CellState::Failed(error) => return Combined::Failed(error),
            CellState::Ready(value) => values.push(value),
            CellState::NotRequested | CellState::Pending => pending = true,
        }
    }
    if pending {
        Combined::Pending
    } else {
        Combined::Ready(I::extract(values))
    }
}

/// Run exactly one of three continuations depending on the combined status.
///
/// ```
/// use remote_flow::{combine, Graph};
///
/// let graph = Graph::new();
/// let groups = graph.cell(|| async { Ok(vec!["A", "B"]) });
/// let profiles = graph.cell(|| async { Ok(3_usize) });
///
/// let text = combine(
///     &(groups, profiles),
///     || "loading".to_string(),
///     |error| format!("error: {}", error.message()),
///     |(groups, profiles)| format!("{} groups, {} profiles", groups.len(), profiles),
/// );
/// assert_eq!(text, "loading");
/// ```
pub fn combine<I, R>(
    inputs: &I,
    on_pending: impl FnOnce() -> R,
    on_error: impl FnOnce(CellError) -> R,
    on_ready: impl FnOnce(I::Values) -> R,
) -> R
where
    I: Inputs,
{
    match resolve(inputs) {
        Combined::Pending => on_pending(),
        Combined::Failed(error) => on_error(error),
        Combined::Ready(values) => on_ready(values),
    }
}

type PendingFn<R> = dyn Fn() -> R + Send + Sync;
type ErrorFn<R> = dyn Fn(&CellError) -> R + Send + Sync;
type ReadyFn<V, R> = dyn Fn(V) -> R + Send + Sync;

/// A renderable view over an await list.
///
/// Each [`render`](View::render) observes the inputs (requesting those nobody
/// asked for yet) and then picks one of the three render functions.
pub struct View<I: Inputs, R> {
    inputs: I,
    render_pending: Box<PendingFn<R>>,
    render_error: Box<ErrorFn<R>>,
    render_ready: Box<ReadyFn<I::Values, R>>,
}

impl<I: Inputs, R> View<I, R> {
    pub fn new(
        inputs: I,
        render_pending: impl Fn() -> R + Send + Sync + 'static,
        render_error: impl Fn(&CellError) -> R + Send + Sync + 'static,
        render_ready: impl Fn(I::Values) -> R + Send + Sync + 'static,
    ) -> Self {
        Self {
            inputs,
            render_pending: Box::new(render_pending),
            render_error: Box::new(render_error),
            render_ready: Box::new(render_ready),
        }
    }

    pub fn inputs(&self) -> &I {
        &self.inputs
    }

    /// Observe the inputs and render the branch matching their combined status.
    pub fn render(&self) -> R {
        self.inputs.observe();
        match resolve(&self.inputs) {
            Combined::Pending => (self.render_pending)(),
            Combined::Failed(error) => (self.render_error)(&error),
            Combined::Ready(values) => (self.render_ready)(values),
        }
    }

    /// Combined status, without observing.
    pub fn status(&self) -> Status {
        resolve(&self.inputs).status()
    }

    /// Whether any input changed status after `revision`.
    pub fn changed_since(&self, revision: Revision) -> bool {
        self.inputs
            .cells()
            .iter()
            .any(|cell| cell.changed_at() > revision)
    }
}
