//! Error types for cell evaluation.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A producer rejected.
///
/// The payload is opaque: whatever the API client failed with is carried through
/// as an `anyhow::Error`. Any `Into<anyhow::Error>` converts into a `FetchError`,
/// so producers can use the `?` operator directly.
///
/// Clone is cheap as the payload is wrapped by `Arc`.
#[derive(Clone)]
pub struct FetchError(Arc<anyhow::Error>);

impl FetchError {
    /// Wrap an arbitrary error.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Create an error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// The display message of the payload.
    pub fn message(&self) -> String {
        self.0.to_string()
    }

    /// The shared payload.
    pub fn inner(&self) -> &Arc<anyhow::Error> {
        &self.0
    }

    /// Attempts to downcast the payload to a specific error type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns `true` if the payload is an error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Returns `true` if both errors share the same payload.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FetchError").field(&self.0).finish()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// FetchError deliberately does not implement `std::error::Error`: it would make
// this impl overlap with `impl<T> From<T> for T`.
impl<T: Into<anyhow::Error>> From<T> for FetchError {
    fn from(err: T) -> Self {
        Self::new(err)
    }
}

/// Why a cell ended up in the failed state.
#[derive(Debug, Clone, Error)]
pub enum CellError {
    /// The cell's own producer rejected.
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    /// An input of a derived cell failed; the producer was never invoked.
    ///
    /// `origin` is the fetch error that started the failure chain, however many
    /// derived cells it passed through.
    #[error("dependency `{dependency}` failed: {origin}")]
    Dependency {
        /// Label of the direct input that failed.
        dependency: Arc<str>,
        /// The originating fetch error.
        origin: FetchError,
    },
}

impl CellError {
    /// The fetch error at the root of this failure.
    pub fn origin(&self) -> &FetchError {
        match self {
            CellError::Fetch(err) => err,
            CellError::Dependency { origin, .. } => origin,
        }
    }

    /// Message of the originating fetch error, for display.
    pub fn message(&self) -> String {
        self.origin().message()
    }

    /// Returns `true` if the failure was inherited from an input.
    pub fn is_dependency(&self) -> bool {
        matches!(self, CellError::Dependency { .. })
    }

    /// Returns `true` if both errors came through the same direct input from the
    /// same originating fetch error.
    pub(crate) fn same_failure(&self, other: &CellError) -> bool {
        match (self, other) {
            (CellError::Fetch(a), CellError::Fetch(b)) => a.ptr_eq(b),
            (
                CellError::Dependency {
                    dependency: a,
                    origin: a_origin,
                },
                CellError::Dependency {
                    dependency: b,
                    origin: b_origin,
                },
            ) => a == b && a_origin.ptr_eq(b_origin),
            _ => false,
        }
    }

    pub(crate) fn inherit(dependency: Arc<str>, from: &CellError) -> Self {
        CellError::Dependency {
            dependency,
            origin: from.origin().clone(),
        }
    }
}

/// Misuse of the graph API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A derived cell was given an input that lives in another graph.
    #[error("cell `{label}` belongs to a different graph")]
    ForeignCell {
        /// Label of the offending input.
        label: Arc<str>,
    },
}
