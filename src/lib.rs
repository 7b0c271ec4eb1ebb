//! Remote-Flow: a dependent asynchronous value graph.
//!
//! Declare remote data as leaf cells, values computed from them as derived
//! cells, and let the graph decide when each producer runs. Every cell exposes a
//! three-state status (pending / ready / failed) that views combine with a
//! single rule: any failure fails the combination, any pending input makes it
//! pending, and only when every input is ready does downstream computation run.
//!
//! # Key Features
//!
//! - **Fetch on demand**: producers run when a cell is first requested, directly
//!   or through a derived cell or view that needs it
//! - **Single-flight**: a derived producer runs once per tuple of input generations
//! - **Staleness guard**: results computed for a superseded generation are discarded
//! - **Total failure propagation**: one failing leaf fails every transitive dependent,
//!   reporting the originating [`FetchError`]
//! - **Tracing**: lifecycle events through the [`Tracer`] trait and the `tracing` crate
//!
//! # Example
//!
//! ```
//! use remote_flow::{combine, Graph};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = Graph::new();
//! let groups = graph.cell(|| async { Ok(vec!["A".to_string(), "B".to_string()]) });
//! let profiles = graph.cell(|| async { Ok(vec![("p1".to_string(), "name".to_string())]) });
//!
//! let summary = graph
//!     .derived((groups.clone(), profiles.clone()), |(groups, profiles)| async move {
//!         Ok(format!("{} groups, {} profiles", groups.len(), profiles.len()))
//!     })
//!     .unwrap();
//!
//! summary.request();
//! graph.settle().await;
//!
//! let text = combine(
//!     &summary.clone().into_cell(),
//!     || "loading".to_string(),
//!     |error| format!("error: {}", error.message()),
//!     |summary| summary.to_string(),
//! );
//! assert_eq!(text, "2 groups, 1 profiles");
//! # }
//! ```
//!
//! # Driving the graph
//!
//! Producers run on spawned tasks. Their results are applied by whoever drives
//! the graph: [`Graph::process_completions`] from a render loop,
//! [`Graph::next_completion`] or [`Graph::settle`] from async code.

mod cell;
mod combine;
mod config;
mod error;
mod fetch;
mod inputs;
pub mod inspector;
mod key;
mod runtime;
mod spawn;
mod status;
mod storage;
pub mod tracer;

pub use cell::{AnyCell, AsyncCell, CellOptions, DerivedCell};
pub use combine::{combine, resolve, Combined, View};
pub use config::{GraphConfig, InvalidationPolicy};
pub use error::{CellError, FetchError, GraphError};
pub use fetch::Fetcher;
pub use inputs::{Input, Inputs};
pub use inspector::{EventCollector, GraphEvent};
pub use key::CellKey;
pub use runtime::{Graph, GraphBuilder};
pub use spawn::{Spawner, TokioSpawner};
pub use status::{AnyValue, CellState, Generation, Revision, Status};
pub use tracer::{DiscardReason, NoopTracer, SettleResult, Tracer};
