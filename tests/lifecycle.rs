//! Cell creation, hooks, release, tracing and driving the graph.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{pump, Gate};
use parking_lot::Mutex;
use remote_flow::{
    AnyCell, CellOptions, DiscardReason, EventCollector, FetchError, Fetcher, Graph, GraphError,
    GraphEvent, SettleResult, Status, TokioSpawner, View,
};

// ============================================================================
// Labels and the fetcher seam
// ============================================================================

struct StudyGroups {
    study: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for StudyGroups {
    type Output = Vec<String>;

    async fn fetch(&self) -> Result<Vec<String>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![format!("{}:A", self.study), format!("{}:B", self.study)])
    }
}

struct Missing;

#[async_trait]
impl Fetcher for Missing {
    type Output = u32;

    async fn fetch(&self) -> Result<u32, FetchError> {
        let parsed: u32 = "not a number".parse()?;
        Ok(parsed)
    }

    fn label(&self) -> String {
        "missing-resource".to_string()
    }
}

#[tokio::test]
async fn test_fetch_cell() {
    let graph = Graph::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let groups = graph.fetch_cell(StudyGroups {
        study: "brca",
        calls: calls.clone(),
    });
    assert_eq!(&*groups.label(), "StudyGroups");

    groups.request();
    graph.settle().await;
    assert_eq!(
        groups.value().as_deref(),
        Some(&vec!["brca:A".to_string(), "brca:B".to_string()])
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_error_from_question_mark() {
    let graph = Graph::new();
    let missing = graph.fetch_cell(Missing);
    assert_eq!(&*missing.label(), "missing-resource");

    missing.request();
    graph.settle().await;
    let error = missing.error().unwrap();
    assert!(!error.is_dependency());
    assert!(error.origin().is::<std::num::ParseIntError>());
}

#[test]
fn test_default_labels_use_type_names() {
    let graph = Graph::new();
    let groups = graph.cell(|| async { Ok(vec!["A".to_string()]) });
    assert_eq!(&*groups.label(), "Vec<String>");

    let labeled = graph.cell_with(CellOptions::new().label("profiles"), || async { Ok(1_u8) });
    assert_eq!(&*labeled.label(), "profiles");
}

// ============================================================================
// Graph membership and release
// ============================================================================

#[test]
fn test_foreign_input_is_rejected() {
    let graph = Graph::new();
    let other = Graph::new();
    let local = graph.cell(|| async { Ok(1_u32) });
    let foreign = other.cell_with(CellOptions::new().label("foreign"), || async { Ok(2_u32) });

    let result = graph.computed((local, foreign), |(a, b)| Ok(*a + *b));
    assert_eq!(
        result.err(),
        Some(GraphError::ForeignCell {
            label: "foreign".into()
        })
    );
}

#[test]
fn test_derived_cell_keeps_inputs_alive() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let leaf = graph.cell(|| async { Ok(1_u32) });
    let leaf_key = leaf.key();
    let derived = graph.computed(leaf, |value| Ok(*value + 1)).unwrap();

    assert_eq!(graph.len(), 2);
    assert_eq!(derived.inputs().len(), 1);
    assert_eq!(derived.inputs()[0].key(), leaf_key);

    let derived_key = derived.key();
    drop(derived);
    assert!(graph.is_empty());

    let released: Vec<_> = collector
        .events()
        .into_iter()
        .filter_map(|event| match event {
            GraphEvent::Released { cell } => Some(cell),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![derived_key, leaf_key]);
}

#[tokio::test]
async fn test_completion_for_released_cell_is_dropped() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());
    let key = cell.key();

    cell.request();
    drop(cell);
    assert!(graph.is_empty());
    assert_eq!(graph.in_flight(), 1);

    assert!(gate.resolve(1));
    pump(&graph).await;
    assert_eq!(graph.in_flight(), 0);
    assert_eq!(
        collector.events_for(key).last(),
        Some(&GraphEvent::StaleDiscarded {
            cell: key,
            generation: remote_flow::Generation(1),
            reason: DiscardReason::CellReleased,
        })
    );
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn test_hooks_run_after_state_change() {
    let graph = Graph::new();
    let gate = Gate::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let cell = graph.cell_with(
        CellOptions::new()
            .on_result({
                let seen = seen.clone();
                move |value: &u32| seen.lock().push(*value)
            })
            .on_error({
                let errors = errors.clone();
                move |error| errors.lock().push(error.message())
            }),
        gate.producer(),
    );
    let derived_errors = Arc::new(Mutex::new(Vec::new()));
    let derived = graph
        .derived_with(
            cell.clone(),
            CellOptions::new().on_error({
                let derived_errors = derived_errors.clone();
                move |error| derived_errors.lock().push(error.to_string())
            }),
            |value| async move { Ok(*value) },
        )
        .unwrap();

    derived.request();
    assert!(gate.resolve(3));
    pump(&graph).await;
    assert_eq!(*seen.lock(), vec![3]);

    cell.invalidate();
    assert!(gate.reject("gone"));
    pump(&graph).await;
    assert_eq!(*errors.lock(), vec!["gone".to_string()]);
    assert_eq!(derived_errors.lock().len(), 1);
    assert!(derived_errors.lock()[0].contains("gone"));
}

#[tokio::test]
async fn test_hook_may_call_back_into_graph() {
    let graph = Graph::new();
    let follow_up = graph.cell(|| async { Ok("follow-up") });
    let first = graph.cell_with(
        CellOptions::new().on_result({
            let follow_up = follow_up.clone();
            move |_: &u32| follow_up.request()
        }),
        || async { Ok(1_u32) },
    );

    first.request();
    graph.settle().await;
    assert_eq!(follow_up.value().as_deref(), Some(&"follow-up"));
}

#[tokio::test]
async fn test_panicking_hook_does_not_stall_dependents() {
    let graph = Graph::new();
    let leaf = graph.cell_with(
        CellOptions::new().on_result(|_: &u32| panic!("hook exploded")),
        || async { Ok(2_u32) },
    );
    let doubled = graph.computed(leaf.clone(), |value| Ok(*value * 2)).unwrap();
    let failing = graph.cell_with(
        CellOptions::new().on_error(|_| panic!("error hook exploded")),
        || async { Err::<u32, _>(FetchError::msg("503")) },
    );
    let dependent = graph.computed(failing.clone(), |value| Ok(*value)).unwrap();

    doubled.request();
    dependent.request();
    graph.settle().await;

    assert_eq!(leaf.value().as_deref(), Some(&2));
    assert_eq!(doubled.value().as_deref(), Some(&4));
    assert_eq!(failing.status(), Status::Failed);
    assert_eq!(dependent.error().map(|e| e.message()).as_deref(), Some("503"));
    assert_eq!(graph.in_flight(), 0);
}

// ============================================================================
// Panics, driving and change detection
// ============================================================================

#[tokio::test]
async fn test_panicking_producer_fails_the_cell() {
    let graph = Graph::new();
    let cell = graph.cell(|| async {
        if true {
            panic!("producer exploded");
        }
        Ok(0_u32)
    });

    cell.request();
    graph.settle().await;
    assert_eq!(cell.status(), Status::Failed);
    assert!(cell.error().unwrap().message().contains("producer exploded"));
}

#[tokio::test]
async fn test_next_completion_and_process_completions() {
    let graph = Graph::new();
    assert!(!graph.next_completion().await);
    assert_eq!(graph.process_completions(), 0);

    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());
    cell.request();
    assert!(gate.resolve(5));

    assert!(graph.next_completion().await);
    assert_eq!(cell.value().as_deref(), Some(&5));
    assert_eq!(graph.in_flight(), 0);
}

#[test]
fn test_explicit_runtime_handle() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let graph = Graph::builder()
        .spawner(TokioSpawner::with_handle(runtime.handle().clone()))
        .build();
    let cell = graph.cell(|| async { Ok("remote") });

    // Requested outside of any runtime context.
    cell.request();
    runtime.block_on(graph.settle());
    assert_eq!(cell.value().as_deref(), Some(&"remote"));
}

#[tokio::test]
async fn test_changed_at_tracks_status_changes() {
    let graph = Graph::new();
    let gate = Gate::<u32>::new();
    let cell = graph.cell(gate.producer());
    let untouched = graph.cell(|| async { Ok(0_u8) });
    let start = graph.revision();

    cell.request();
    let requested = cell.changed_at();
    assert!(requested > start);

    assert!(gate.resolve(1));
    pump(&graph).await;
    assert!(cell.changed_at() > requested);
    assert_eq!(untouched.changed_at(), remote_flow::Revision::default());
    assert_eq!(graph.revision(), cell.changed_at());

    let view = View::new(
        untouched.clone(),
        || "pending",
        |_| "error",
        |_| "ready",
    );
    assert!(!view.changed_since(start));
}

#[tokio::test]
async fn test_any_cell_erases_type() {
    let graph = Graph::new();
    let number = graph.cell(|| async { Ok(1_u32) });
    let text = graph.cell(|| async { Ok("one".to_string()) });
    let cells: Vec<AnyCell> = vec![number.clone().erase(), text.as_any().clone()];

    for cell in &cells {
        cell.request();
    }
    graph.settle().await;

    assert!(cells.iter().all(|cell| cell.status() == Status::Ready));
    let value = cells[1].peek().into_value().unwrap();
    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("one"));
    assert_eq!(cells[0].label(), number.label());
}

#[tokio::test]
async fn test_tracer_sees_lifecycle_in_order() {
    let collector = Arc::new(EventCollector::new());
    let graph = Graph::builder().tracer(collector.clone()).build();
    let leaf = graph.cell_with(CellOptions::new().label("leaf"), || async { Ok(2_u32) });
    let derived = graph.computed(leaf.clone(), |value| Ok(*value * 2)).unwrap();
    let leaf_key = leaf.key();
    let derived_key = derived.key();

    derived.request();
    graph.settle().await;

    let leaf_events = collector.events_for(leaf_key);
    assert!(matches!(
        leaf_events.as_slice(),
        [
            GraphEvent::CellCreated { .. },
            GraphEvent::Requested { .. },
            GraphEvent::Invoked { .. },
            GraphEvent::Settled {
                result: SettleResult::Ready,
                ..
            },
        ]
    ));
    assert_eq!(
        collector.events_for(derived_key)[0],
        GraphEvent::CellCreated {
            cell: derived_key,
            label: "u32".to_string(),
            inputs: vec![leaf_key],
        }
    );
    assert_eq!(collector.invocations(derived_key), 1);

    let json = serde_json::to_string(&collector.events()).unwrap();
    assert!(json.contains("CellCreated"));
}
