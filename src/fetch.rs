//! The API-client boundary.
//!
//! Leaf cells are usually backed by a remote call. Any closure returning a future
//! works as a leaf producer; [`Fetcher`] is the trait form for clients that are
//! structs with their own state (a base URL, an HTTP client, parameters).

use async_trait::async_trait;

use crate::error::FetchError;
use crate::runtime::short_type_name;

/// A remote operation that resolves with data or rejects with an error.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use remote_flow::{FetchError, Fetcher, Graph};
///
/// struct SampleGroups {
///     study_id: String,
/// }
///
/// #[async_trait]
/// impl Fetcher for SampleGroups {
///     type Output = Vec<String>;
///
///     async fn fetch(&self) -> Result<Vec<String>, FetchError> {
///         Ok(vec![format!("{}:A", self.study_id), format!("{}:B", self.study_id)])
///     }
/// }
///
/// let graph = Graph::new();
/// let groups = graph.fetch_cell(SampleGroups { study_id: "brca".into() });
/// assert_eq!(&*groups.label(), "SampleGroups");
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// The data the operation produces.
    type Output: Send + Sync + 'static;

    /// Perform the operation. Called once per cell generation.
    async fn fetch(&self) -> Result<Self::Output, FetchError>;

    /// Label of the cell built from this fetcher. Defaults to the type name
    /// without its module path.
    fn label(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }
}
