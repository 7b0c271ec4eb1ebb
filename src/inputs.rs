//! Ordered input lists for derived cells and views.
//!
//! An input list is a single cell, a tuple of up to eight cells of any value
//! types, or a `Vec` of cells sharing one value type. The values handed to a
//! producer or continuation mirror that shape: `Arc<T>`, a tuple of `Arc`s, or a
//! `Vec<Arc<T>>`, always in input order.

use std::sync::Arc;

use crate::cell::{AnyCell, AsyncCell, DerivedCell};
use crate::status::AnyValue;

/// A single cell usable as an input.
pub trait Input: Send + Sync + 'static {
    /// The value type of the cell.
    type Value: Send + Sync + 'static;

    /// The type-erased cell.
    fn any_cell(&self) -> AnyCell;
}

impl<T: Send + Sync + 'static> Input for AsyncCell<T> {
    type Value = T;

    fn any_cell(&self) -> AnyCell {
        self.as_any().clone()
    }
}

impl<T: Send + Sync + 'static> Input for DerivedCell<T> {
    type Value = T;

    fn any_cell(&self) -> AnyCell {
        self.as_any().clone()
    }
}

/// An ordered list of input cells.
pub trait Inputs: Send + Sync + 'static {
    /// The input values, shaped like the list.
    type Values: Send + 'static;

    /// The cells, in order. Duplicates are allowed.
    fn cells(&self) -> Vec<AnyCell>;

    /// Rebuild the typed values from the erased ones, given in the order of
    /// [`cells`](Inputs::cells).
    fn extract(values: Vec<AnyValue>) -> Self::Values;

    /// Request every input nobody asked for yet.
    fn observe(&self) {
        for cell in self.cells() {
            cell.request();
        }
    }
}

fn downcast<T: Send + Sync + 'static>(value: AnyValue) -> Arc<T> {
    match value.downcast::<T>() {
        Ok(value) => value,
        Err(_) => unreachable!("an input's value type is fixed by its handle"),
    }
}

fn next_value(values: &mut impl Iterator<Item = AnyValue>) -> AnyValue {
    match values.next() {
        Some(value) => value,
        None => unreachable!("one value per input cell"),
    }
}

impl<T: Send + Sync + 'static> Inputs for AsyncCell<T> {
    type Values = Arc<T>;

    fn cells(&self) -> Vec<AnyCell> {
        vec![self.any_cell()]
    }

    fn extract(values: Vec<AnyValue>) -> Arc<T> {
        downcast(next_value(&mut values.into_iter()))
    }
}

impl<T: Send + Sync + 'static> Inputs for DerivedCell<T> {
    type Values = Arc<T>;

    fn cells(&self) -> Vec<AnyCell> {
        vec![self.any_cell()]
    }

    fn extract(values: Vec<AnyValue>) -> Arc<T> {
        downcast(next_value(&mut values.into_iter()))
    }
}

impl<I: Input> Inputs for Vec<I> {
    type Values = Vec<Arc<I::Value>>;

    fn cells(&self) -> Vec<AnyCell> {
        self.iter().map(Input::any_cell).collect()
    }

    fn extract(values: Vec<AnyValue>) -> Self::Values {
        values.into_iter().map(downcast).collect()
    }
}

impl Inputs for () {
    type Values = ();

    fn cells(&self) -> Vec<AnyCell> {
        Vec::new()
    }

    fn extract(_values: Vec<AnyValue>) {}
}

macro_rules! impl_inputs_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Input),+> Inputs for ($($name,)+) {
            type Values = ($(Arc<<$name as Input>::Value>,)+);

            #[allow(non_snake_case)]
            fn cells(&self) -> Vec<AnyCell> {
                let ($($name,)+) = self;
                vec![$($name.any_cell()),+]
            }

            fn extract(values: Vec<AnyValue>) -> Self::Values {
                let mut values = values.into_iter();
                ($(downcast::<<$name as Input>::Value>(next_value(&mut values)),)+)
            }
        }
    };
}

impl_inputs_for_tuple!(A);
impl_inputs_for_tuple!(A, B);
impl_inputs_for_tuple!(A, B, C);
impl_inputs_for_tuple!(A, B, C, D);
impl_inputs_for_tuple!(A, B, C, D, E);
impl_inputs_for_tuple!(A, B, C, D, E, F);
impl_inputs_for_tuple!(A, B, C, D, E, F, G);
impl_inputs_for_tuple!(A, B, C, D, E, F, G, H);
