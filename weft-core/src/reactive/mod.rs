//! Reactive Runtime
//!
//! Fine-grained dependency tracking: reads performed inside an effect
//! subscribe it to exactly the data it touched, and writes re-run exactly
//! the effects that depend on them.
//!
//! The pieces:
//!
//! - [`container`]: tracked object handles (`reactive`, `readonly` and the
//!   shallow variants) over the dynamic [`Value`](crate::value::Value)
//!   model.
//! - [`effect`]: the effect machinery itself, plus the low-level [`track`]
//!   and [`trigger`] entry points for code that manages its own storage.
//! - [`reference`]: single-value tracked cells.
//! - [`computed`]: cached derivations, lazy and deferred.
//! - [`scope`]: collective ownership of effects.
//! - [`scheduler`]: the flush boundary deferred computeds batch against.
//!
//! All tracking state is thread-local; shared data structures are
//! internally synchronized, so values can be handed across threads and
//! used with each thread's own effects.

pub(crate) mod dep;

pub mod computed;
pub mod container;
pub mod effect;
pub mod reference;
pub mod scheduler;
pub mod scope;

pub use computed::{computed, deferred_computed, Computed};
pub use container::{
    del, is_proxy, is_reactive, is_readonly, is_shallow, mark_raw, reactive, readonly, set,
    shallow_reactive, shallow_readonly, to_raw, Reactive,
};
pub use dep::tracked_target_count;
pub use effect::{
    effect, effect_with, enable_tracking, is_tracking, pause_tracking, reset_tracking, stop,
    track, trigger, untracked, EffectOptions, ReactiveEffect, TriggerKind,
};
pub use reference::{is_ref, proxy_refs, to_ref, to_refs, unref, Ref};
pub use scope::{effect_scope, get_current_scope, on_scope_dispose, EffectScope};
