//! Cell status and observed state.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CellError;

/// Type-erased cell value as stored by the graph.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Lifecycle status of a cell.
///
/// A cell moves `NotRequested → Pending → {Ready | Failed}` and goes back to
/// `NotRequested` or `Pending` only through invalidation or an input change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Nobody asked for the value yet.
    NotRequested,
    /// A producer invocation is outstanding, or inputs are not ready.
    Pending,
    /// The value is available.
    Ready,
    /// The producer or one of the inputs failed.
    Failed,
}

impl Status {
    /// `NotRequested` or `Pending`.
    pub fn is_pending(self) -> bool {
        matches!(self, Status::NotRequested | Status::Pending)
    }

    pub fn is_ready(self) -> bool {
        self == Status::Ready
    }

    pub fn is_failed(self) -> bool {
        self == Status::Failed
    }

    /// `Ready` or `Failed`.
    pub fn is_complete(self) -> bool {
        matches!(self, Status::Ready | Status::Failed)
    }
}

/// Per-cell counter distinguishing successive computation attempts.
///
/// Bumped on invalidation, whenever a new producer invocation starts, and when a
/// derived cell inherits a different failure. A result
/// is only accepted if the cell still has the generation it was started with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

impl Generation {
    /// Advance and return the new generation.
    pub(crate) fn bump(&mut self) -> Generation {
        self.0 += 1;
        *self
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Graph-wide counter incremented on every status change of any cell.
///
/// Compare a cell's [`changed_at`](crate::AsyncCell::changed_at) with a previously
/// stored revision to decide whether a repaint is needed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Revision(pub u64);

/// Snapshot of a cell returned by `peek()`.
pub enum CellState<T: ?Sized> {
    /// Nobody asked for the value yet.
    NotRequested,
    /// Waiting on the producer or on inputs.
    Pending,
    /// The value.
    Ready(Arc<T>),
    /// The failure.
    Failed(CellError),
}

impl<T: ?Sized> CellState<T> {
    pub fn status(&self) -> Status {
        match self {
            CellState::NotRequested => Status::NotRequested,
            CellState::Pending => Status::Pending,
            CellState::Ready(_) => Status::Ready,
            CellState::Failed(_) => Status::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CellState::Ready(_))
    }

    /// `NotRequested` or `Pending`.
    pub fn is_pending(&self) -> bool {
        matches!(self, CellState::NotRequested | CellState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CellState::Failed(_))
    }

    /// Get the value if ready.
    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            CellState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Get the value if ready (consuming version).
    pub fn into_value(self) -> Option<Arc<T>> {
        match self {
            CellState::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Get the error if failed.
    pub fn error(&self) -> Option<&CellError> {
        match self {
            CellState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl CellState<dyn Any + Send + Sync> {
    /// Restore the static type of a snapshot taken from storage.
    pub(crate) fn downcast<T: Send + Sync + 'static>(self) -> CellState<T> {
        match self {
            CellState::NotRequested => CellState::NotRequested,
            CellState::Pending => CellState::Pending,
            CellState::Failed(err) => CellState::Failed(err),
            CellState::Ready(value) => match value.downcast::<T>() {
                Ok(value) => CellState::Ready(value),
                Err(_) => unreachable!("a cell's value type is fixed when the cell is created"),
            },
        }
    }
}

impl<T: ?Sized> Clone for CellState<T> {
    fn clone(&self) -> Self {
        match self {
            CellState::NotRequested => CellState::NotRequested,
            CellState::Pending => CellState::Pending,
            CellState::Ready(value) => CellState::Ready(value.clone()),
            CellState::Failed(err) => CellState::Failed(err.clone()),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for CellState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellState::NotRequested => write!(f, "CellState::NotRequested"),
            CellState::Pending => write!(f, "CellState::Pending"),
            CellState::Ready(value) => write!(f, "CellState::Ready({:?})", value),
            CellState::Failed(err) => write!(f, "CellState::Failed({})", err),
        }
    }
}
