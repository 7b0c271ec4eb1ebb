//! Tracer trait for observing graph execution.
//!
//! This module defines the [`Tracer`] trait and related types for observing the
//! cell lifecycle. The default [`NoopTracer`] discards everything. The runtime
//! also logs the same transitions through the `tracing` crate; a `Tracer` is for
//! consumers that want structured events, such as [`EventCollector`].
//!
//! # Example
//!
//! ```
//! use remote_flow::{CellKey, Generation, Graph, Tracer};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn on_invoked(&self, cell: CellKey, generation: Generation) {
//!         println!("{cell} invoked at {generation}");
//!     }
//! }
//!
//! let graph = Graph::builder().tracer(PrintTracer).build();
//! # let _ = graph;
//! ```
//!
//! [`EventCollector`]: crate::EventCollector

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::key::CellKey;
use crate::status::Generation;

/// How a producer invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettleResult {
    /// The producer resolved and the cell is ready.
    Ready,
    /// The producer rejected.
    Failed { message: String },
}

/// Why a producer result was thrown away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// The cell moved to a newer generation while the producer ran.
    GenerationAdvanced { current: Generation },
    /// The inputs no longer have the generation tuple the producer ran for.
    InputsChanged,
    /// The cell was released while the producer ran.
    CellReleased,
    /// The task was aborted after being superseded.
    Aborted,
}

/// Tracer trait for observing the cell lifecycle.
///
/// All methods have default empty implementations, so you only need to override
/// the events you're interested in.
///
/// Callbacks run on the thread driving the graph, never while the graph is
/// locked, so a tracer may call back into cells (for example to `peek`).
pub trait Tracer: Send + Sync + 'static {
    /// A cell was created. `inputs` is empty for leaf cells.
    #[inline]
    fn on_cell_created(&self, _cell: CellKey, _label: &str, _inputs: &[CellKey]) {}

    /// A cell left `NotRequested`.
    #[inline]
    fn on_requested(&self, _cell: CellKey) {}

    /// A producer invocation started.
    #[inline]
    fn on_invoked(&self, _cell: CellKey, _generation: Generation) {}

    /// A producer result was accepted.
    #[inline]
    fn on_settled(&self, _cell: CellKey, _generation: Generation, _result: &SettleResult) {}

    /// A derived cell inherited a failure from `dependency` without invoking its producer.
    #[inline]
    fn on_dependency_failed(&self, _cell: CellKey, _dependency: &str) {}

    /// A producer result arrived for a superseded invocation and was dropped.
    #[inline]
    fn on_stale_discarded(
        &self,
        _cell: CellKey,
        _generation: Generation,
        _reason: &DiscardReason,
    ) {
    }

    /// A cell was invalidated and now has `generation`.
    #[inline]
    fn on_invalidated(&self, _cell: CellKey, _generation: Generation) {}

    /// The last handle to a cell was dropped.
    #[inline]
    fn on_released(&self, _cell: CellKey) {}
}

/// Tracer that discards all events.
///
/// This is the default tracer for [`Graph`](crate::Graph).
pub struct NoopTracer;

impl Tracer for NoopTracer {}

impl<T: Tracer + ?Sized> Tracer for Arc<T> {
    fn on_cell_created(&self, cell: CellKey, label: &str, inputs: &[CellKey]) {
        (**self).on_cell_created(cell, label, inputs)
    }

    fn on_requested(&self, cell: CellKey) {
        (**self).on_requested(cell)
    }

    fn on_invoked(&self, cell: CellKey, generation: Generation) {
        (**self).on_invoked(cell, generation)
    }

    fn on_settled(&self, cell: CellKey, generation: Generation, result: &SettleResult) {
        (**self).on_settled(cell, generation, result)
    }

    fn on_dependency_failed(&self, cell: CellKey, dependency: &str) {
        (**self).on_dependency_failed(cell, dependency)
    }

    fn on_stale_discarded(&self, cell: CellKey, generation: Generation, reason: &DiscardReason) {
        (**self).on_stale_discarded(cell, generation, reason)
    }

    fn on_invalidated(&self, cell: CellKey, generation: Generation) {
        (**self).on_invalidated(cell, generation)
    }

    fn on_released(&self, cell: CellKey) {
        (**self).on_released(cell)
    }
}
