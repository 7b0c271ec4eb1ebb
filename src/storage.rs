//! Slab storage for cell state.
//!
//! Everything here is plain data manipulated under the graph lock. Producers,
//! hooks and tracer callbacks are never called from this module.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashSet;
use futures::future::{AbortHandle, BoxFuture};
use slab::Slab;

use crate::config::InvalidationPolicy;
use crate::error::{CellError, FetchError};
use crate::key::CellKey;
use crate::status::{AnyValue, CellState, Generation, Revision, Status};

/// Type-erased leaf producer.
pub(crate) type LeafFn = dyn Fn() -> BoxFuture<'static, Result<AnyValue, FetchError>> + Send + Sync;

/// Type-erased derived producer, fed the input values in input order.
pub(crate) type DerivedFn =
    dyn Fn(Vec<AnyValue>) -> BoxFuture<'static, Result<AnyValue, FetchError>> + Send + Sync;

pub(crate) type ResultHook = dyn Fn(&AnyValue) + Send + Sync;
pub(crate) type ErrorHook = dyn Fn(&CellError) + Send + Sync;

/// Status and generation of one input at the time a derived cell resolved.
///
/// A vector of marks is the "generation tuple" an invocation is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputMark {
    pub generation: Generation,
    pub status: Status,
}

pub(crate) enum Producer {
    Leaf(Arc<LeafFn>),
    Derived {
        inputs: Vec<CellKey>,
        body: Arc<DerivedFn>,
        /// Input marks of the last invocation or inherited failure.
        resolved_for: Option<Vec<InputMark>>,
    },
}

#[derive(Default, Clone)]
pub(crate) struct Hooks {
    pub on_result: Option<Arc<ResultHook>>,
    pub on_error: Option<Arc<ErrorHook>>,
}

pub(crate) struct Slot {
    pub stamp: u64,
    pub label: Arc<str>,
    pub state: CellState<dyn Any + Send + Sync>,
    pub generation: Generation,
    pub changed_at: Revision,
    pub invalidation: InvalidationPolicy,
    pub producer: Producer,
    pub dependents: Vec<CellKey>,
    /// Abort handle of the live producer task, if any.
    pub abort: Option<AbortHandle>,
    pub hooks: Hooks,
}

impl Slot {
    pub fn new(
        stamp: u64,
        label: Arc<str>,
        invalidation: InvalidationPolicy,
        producer: Producer,
        hooks: Hooks,
    ) -> Self {
        Self {
            stamp,
            label,
            state: CellState::NotRequested,
            generation: Generation::default(),
            changed_at: Revision::default(),
            invalidation,
            producer,
            dependents: Vec::new(),
            abort: None,
            hooks,
        }
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn inputs(&self) -> Option<&[CellKey]> {
        match &self.producer {
            Producer::Leaf(_) => None,
            Producer::Derived { inputs, .. } => Some(inputs),
        }
    }

    /// Forget which input tuple the derived producer last ran for.
    pub fn clear_resolution(&mut self) {
        if let Producer::Derived { resolved_for, .. } = &mut self.producer {
            *resolved_for = None;
        }
    }

    /// Drop the live task's abort handle, aborting the task if `cancel` is set.
    pub fn retire(&mut self, cancel: bool) {
        if let Some(abort) = self.abort.take() {
            if cancel {
                abort.abort();
            }
        }
    }
}

/// Combined readiness of a derived cell's inputs, by fixed precedence.
pub(crate) enum Resolution {
    /// The first failing input, in input order.
    Failed { label: Arc<str>, error: CellError },
    /// Some input is not ready. Lists the inputs nobody requested yet.
    Pending { unrequested: Vec<CellKey> },
    /// Every input is ready.
    Ready {
        values: Vec<AnyValue>,
        marks: Vec<InputMark>,
    },
}

/// All cells of one graph.
pub(crate) struct GraphState {
    slots: Slab<Slot>,
    next_stamp: u64,
    /// Dependents waiting for re-evaluation, in notification order.
    dirty: VecDeque<CellKey>,
    queued: AHashSet<CellKey>,
    /// Spawned producer tasks whose completion was not applied yet.
    pub in_flight: usize,
    revision: Revision,
}

impl Default for GraphState {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphState {
    pub fn new() -> Self {
        Self {
            slots: Slab::new(),
            next_stamp: 0,
            dirty: VecDeque::new(),
            queued: AHashSet::new(),
            in_flight: 0,
            revision: Revision::default(),
        }
    }

    pub fn insert(&mut self, make: impl FnOnce(u64) -> Slot) -> CellKey {
        self.next_stamp += 1;
        let stamp = self.next_stamp;
        let entry = self.slots.vacant_entry();
        let key = CellKey {
            index: entry.key(),
            stamp,
        };
        entry.insert(make(stamp));
        key
    }

    pub fn get(&self, key: CellKey) -> Option<&Slot> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.stamp == key.stamp)
    }

    pub fn get_mut(&mut self, key: CellKey) -> Option<&mut Slot> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.stamp == key.stamp)
    }

    pub fn contains(&self, key: CellKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Remove a cell and unregister it from its inputs.
    ///
    /// The returned slot must be dropped after the graph lock is released.
    #[must_use]
    pub fn remove(&mut self, key: CellKey) -> Option<Slot> {
        if !self.contains(key) {
            return None;
        }
        let slot = self.slots.remove(key.index);
        for input in slot.inputs().unwrap_or_default() {
            if let Some(input) = self.get_mut(*input) {
                input.dependents.retain(|dependent| *dependent != key);
            }
        }
        self.queued.remove(&key);
        Some(slot)
    }

    /// Register `dependent` to be notified when `input` changes status.
    pub fn add_dependent(&mut self, input: CellKey, dependent: CellKey) {
        if let Some(slot) = self.get_mut(input) {
            if !slot.dependents.contains(&dependent) {
                slot.dependents.push(dependent);
            }
        }
    }

    /// Record a status change of `key` and queue its dependents.
    pub fn mark_changed(&mut self, key: CellKey) -> Revision {
        self.revision.0 += 1;
        let revision = self.revision;
        let dependents = match self.get_mut(key) {
            Some(slot) => {
                slot.changed_at = revision;
                slot.dependents.clone()
            }
            None => return revision,
        };
        for dependent in dependents {
            self.enqueue(dependent);
        }
        revision
    }

    /// Queue a cell for re-evaluation. Queuing twice before evaluation is a no-op.
    pub fn enqueue(&mut self, key: CellKey) {
        if self.queued.insert(key) {
            self.dirty.push_back(key);
        }
    }

    pub fn pop_dirty(&mut self) -> Option<CellKey> {
        while let Some(key) = self.dirty.pop_front() {
            if self.queued.remove(&key) {
                return Some(key);
            }
        }
        None
    }

    pub fn input_marks(&self, inputs: &[CellKey]) -> Vec<InputMark> {
        inputs
            .iter()
            .map(|input| match self.get(*input) {
                Some(slot) => InputMark {
                    generation: slot.generation,
                    status: slot.status(),
                },
                None => InputMark {
                    generation: Generation::default(),
                    status: Status::NotRequested,
                },
            })
            .collect()
    }

    /// Apply the combination rule to a list of inputs.
    ///
    /// Any failure wins over pending inputs; the first failing input by position
    /// is reported regardless of the order in which the failures arrived.
    pub fn resolve_inputs(&self, inputs: &[CellKey]) -> Resolution {
        let mut unrequested = Vec::new();
        let mut any_pending = false;
        let mut values = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(slot) = self.get(*input) else {
                any_pending = true;
                continue;
            };
            match &slot.state {
                CellState::Failed(error) => {
                    return Resolution::Failed {
                        label: slot.label.clone(),
                        error: error.clone(),
                    };
                }
                CellState::NotRequested => {
                    any_pending = true;
                    if !unrequested.contains(input) {
                        unrequested.push(*input);
                    }
                }
                CellState::Pending => any_pending = true,
                CellState::Ready(value) => values.push(value.clone()),
            }
        }
        if any_pending {
            Resolution::Pending { unrequested }
        } else {
            Resolution::Ready {
                values,
                marks: self.input_marks(inputs),
            }
        }
    }
}
