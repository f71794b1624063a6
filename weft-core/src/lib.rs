//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive framework:
//! fine-grained dependency tracking over a dynamic value model.
//!
//! # Architecture
//!
//! - `value`: the dynamic [`Value`](value::Value) model that tracked data
//!   is made of, with shared-ownership objects and identity semantics.
//! - `reactive`: tracked containers, effects, refs, computed values,
//!   effect scopes, and the deferred-notification scheduler.
//!
//! # Example
//!
//! ```rust
//! use weft_core::reactive::{effect, reactive, computed};
//! use weft_core::value::Value;
//!
//! let state = reactive(Value::plain([("count", Value::Int(0))]));
//! let Value::Reactive(state) = state else { unreachable!() };
//!
//! let doubled = {
//!     let state = state.clone();
//!     computed(move || state.get("count").as_int().unwrap_or(0) * 2)
//! };
//!
//! // The runner handle keeps the effect subscribed; dropping it (outside
//! // an effect scope) lets the subscription lapse.
//! let printer = doubled.clone();
//! let _runner = effect(move || {
//!     println!("doubled: {}", printer.get());
//! });
//!
//! // Re-runs the effect, printing "doubled: 10".
//! state.set("count", Value::Int(5));
//! ```

pub mod reactive;
pub mod value;

pub use reactive::{computed, deferred_computed, effect, effect_scope, reactive};
pub use value::{Key, Obj, ObjKind, Value, ValueError};
