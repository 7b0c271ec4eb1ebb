//! Event collection for testing and offline inspection.
//!
//! `EventCollector` is a [`Tracer`] that accumulates [`GraphEvent`]s for later
//! assertion. Events are serializable, so a trace can be dumped as JSON.
//!
//! ```
//! use std::sync::Arc;
//! use remote_flow::{EventCollector, Graph};
//!
//! let collector = Arc::new(EventCollector::new());
//! let graph = Graph::builder().tracer(collector.clone()).build();
//! let _groups = graph.cell(|| async { Ok(vec!["A", "B"]) });
//! assert_eq!(collector.len(), 1);
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::key::CellKey;
use crate::status::Generation;
use crate::tracer::{DiscardReason, SettleResult, Tracer};

/// One observed lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphEvent {
    CellCreated {
        cell: CellKey,
        label: String,
        inputs: Vec<CellKey>,
    },
    Requested {
        cell: CellKey,
    },
    Invoked {
        cell: CellKey,
        generation: Generation,
    },
    Settled {
        cell: CellKey,
        generation: Generation,
        result: SettleResult,
    },
    DependencyFailed {
        cell: CellKey,
        dependency: String,
    },
    StaleDiscarded {
        cell: CellKey,
        generation: Generation,
        reason: DiscardReason,
    },
    Invalidated {
        cell: CellKey,
        generation: Generation,
    },
    Released {
        cell: CellKey,
    },
}

impl GraphEvent {
    /// The cell the event is about.
    pub fn cell(&self) -> CellKey {
        match self {
            GraphEvent::CellCreated { cell, .. }
            | GraphEvent::Requested { cell }
            | GraphEvent::Invoked { cell, .. }
            | GraphEvent::Settled { cell, .. }
            | GraphEvent::DependencyFailed { cell, .. }
            | GraphEvent::StaleDiscarded { cell, .. }
            | GraphEvent::Invalidated { cell, .. }
            | GraphEvent::Released { cell } => *cell,
        }
    }
}

/// Event collector - accumulates events for assertions.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<GraphEvent>>,
}

impl EventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<GraphEvent> {
        self.events.lock().clone()
    }

    /// Events about one cell, in order.
    pub fn events_for(&self, cell: CellKey) -> Vec<GraphEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.cell() == cell)
            .cloned()
            .collect()
    }

    /// Number of producer invocations recorded for `cell`.
    pub fn invocations(&self, cell: CellKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, GraphEvent::Invoked { cell: c, .. } if *c == cell))
            .count()
    }

    /// Number of discarded results recorded for `cell`.
    pub fn discards(&self, cell: CellKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| {
                matches!(event, GraphEvent::StaleDiscarded { cell: c, .. } if *c == cell)
            })
            .count()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<GraphEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Get the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn push(&self, event: GraphEvent) {
        self.events.lock().push(event);
    }
}

impl Tracer for EventCollector {
    fn on_cell_created(&self, cell: CellKey, label: &str, inputs: &[CellKey]) {
        self.push(GraphEvent::CellCreated {
            cell,
            label: label.to_string(),
            inputs: inputs.to_vec(),
        });
    }

    fn on_requested(&self, cell: CellKey) {
        self.push(GraphEvent::Requested { cell });
    }

    fn on_invoked(&self, cell: CellKey, generation: Generation) {
        self.push(GraphEvent::Invoked { cell, generation });
    }

    fn on_settled(&self, cell: CellKey, generation: Generation, result: &SettleResult) {
        self.push(GraphEvent::Settled {
            cell,
            generation,
            result: result.clone(),
        });
    }

    fn on_dependency_failed(&self, cell: CellKey, dependency: &str) {
        self.push(GraphEvent::DependencyFailed {
            cell,
            dependency: dependency.to_string(),
        });
    }

    fn on_stale_discarded(&self, cell: CellKey, generation: Generation, reason: &DiscardReason) {
        self.push(GraphEvent::StaleDiscarded {
            cell,
            generation,
            reason: reason.clone(),
        });
    }

    fn on_invalidated(&self, cell: CellKey, generation: Generation) {
        self.push(GraphEvent::Invalidated { cell, generation });
    }

    fn on_released(&self, cell: CellKey) {
        self.push(GraphEvent::Released { cell });
    }
}
