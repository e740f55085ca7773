//! Columnar component storage
//!
//! One [`DenseStore`] per (group, component type) pair: a dense value array
//! with a parallel id column and a sparse index. Two value-buffer strategies
//! back the same store type, and an erased trait lets the directory hold
//! stores of different payload types side by side.

mod buffer;
mod dense;
mod erased;

pub use dense::{DenseStore, StoreError, SwapBackLog};

pub(crate) use erased::{DrainError, ErasedStore};
