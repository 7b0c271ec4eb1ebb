//! Invalidation policies, cancellation of superseded tasks, and retries.

mod common;

use std::sync::Arc;

use common::{pump, Gate};
use remote_flow::{
    CellOptions, DiscardReason, EventCollector, Generation, Graph, GraphEvent, InvalidationPolicy,
    Status,
};

// ============================================================================
// Lazy and eager policies
// ============================================================================

#[tokio::test]
async fn test_lazy_invalidate_discards_in_flight_result() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());

    cell.request();
    assert_eq!(cell.generation(), Generation(1));
    cell.invalidate();
    assert_eq!(cell.status(), Status::NotRequested);
    assert_eq!(cell.generation(), Generation(2));

    assert!(gate.resolve(7));
    pump(&graph).await;
    assert_eq!(cell.status(), Status::NotRequested);
    assert_eq!(graph.in_flight(), 0);
    assert!(collector.events_for(cell.key()).contains(&GraphEvent::StaleDiscarded {
        cell: cell.key(),
        generation: Generation(1),
        reason: DiscardReason::GenerationAdvanced {
            current: Generation(2)
        },
    }));

    cell.request();
    assert!(gate.resolve(8));
    pump(&graph).await;
    assert_eq!(cell.value().as_deref(), Some(&8));
}

#[tokio::test]
async fn test_eager_invalidate_requests_again() {
    let graph = Graph::builder()
        .invalidation(InvalidationPolicy::Eager)
        .build();
    let gate = Gate::<&'static str>::new();
    let cell = graph.cell(gate.producer());

    cell.request();
    cell.invalidate();
    assert_eq!(cell.status(), Status::Pending);
    assert_eq!(gate.invocations(), 2);
    assert_eq!(cell.generation(), Generation(3));

    assert!(gate.resolve("old"));
    pump(&graph).await;
    assert_eq!(cell.status(), Status::Pending);

    assert!(gate.resolve("new"));
    pump(&graph).await;
    assert_eq!(cell.value().as_deref(), Some(&"new"));
}

#[tokio::test]
async fn test_cell_policy_overrides_graph_default() {
    let graph = Graph::new();
    let gate = Gate::<u32>::new();
    let cell = graph.cell_with(
        CellOptions::new().invalidation(InvalidationPolicy::Eager),
        gate.producer(),
    );

    cell.request();
    assert!(gate.resolve(1));
    pump(&graph).await;

    cell.invalidate();
    assert_eq!(cell.status(), Status::Pending);
    assert!(gate.resolve(2));
    pump(&graph).await;
    assert_eq!(cell.value().as_deref(), Some(&2));
}

// ============================================================================
// Retries and derived cells
// ============================================================================

#[tokio::test]
async fn test_invalidate_retries_failed_cell() {
    let graph = Graph::new();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());

    cell.request();
    assert!(gate.reject("503"));
    pump(&graph).await;
    assert_eq!(cell.status(), Status::Failed);

    // No automatic retry.
    cell.request();
    assert_eq!(gate.invocations(), 1);

    cell.invalidate();
    cell.request();
    assert!(gate.resolve(9));
    pump(&graph).await;
    assert_eq!(cell.value().as_deref(), Some(&9));
    assert_eq!(gate.invocations(), 2);
}

#[tokio::test]
async fn test_invalidating_derived_cell_reinvokes_for_same_inputs() {
    let graph = Graph::builder()
        .invalidation(InvalidationPolicy::Eager)
        .build();
    let gate = Gate::<u32>::new();
    let input = graph.cell(gate.producer());
    let derived_gate = Gate::<u32>::new();
    let derived = graph
        .derived(input.clone(), {
            let derived_gate = derived_gate.clone();
            move |_| derived_gate.invoke()
        })
        .unwrap();

    derived.request();
    assert!(gate.resolve(1));
    pump(&graph).await;
    assert!(derived_gate.resolve(10));
    pump(&graph).await;
    assert_eq!(derived.value().as_deref(), Some(&10));

    derived.invalidate();
    assert_eq!(derived_gate.invocations(), 2);
    assert_eq!(gate.invocations(), 1);
    assert!(derived_gate.resolve(11));
    pump(&graph).await;
    assert_eq!(derived.value().as_deref(), Some(&11));
}

// ============================================================================
// Cancellation of superseded tasks
// ============================================================================

#[tokio::test]
async fn test_cancel_stale_aborts_superseded_task() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder()
        .cancel_stale(true)
        .tracer(collector.clone())
        .build();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());

    cell.request();
    pump(&graph).await;
    cell.invalidate();
    pump(&graph).await;

    // The aborted task dropped its receiver.
    assert!(!gate.resolve(1));
    assert_eq!(graph.in_flight(), 0);
    assert_eq!(cell.status(), Status::NotRequested);
    assert!(collector.events_for(cell.key()).contains(&GraphEvent::StaleDiscarded {
        cell: cell.key(),
        generation: Generation(1),
        reason: DiscardReason::Aborted,
    }));
}

#[tokio::test]
async fn test_without_cancel_stale_task_runs_to_completion() {
    let graph = Graph::new();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());

    cell.request();
    pump(&graph).await;
    cell.invalidate();
    pump(&graph).await;

    assert_eq!(graph.in_flight(), 1);
    assert!(gate.resolve(1));
    pump(&graph).await;
    assert_eq!(graph.in_flight(), 0);
    assert_eq!(cell.status(), Status::NotRequested);
}
