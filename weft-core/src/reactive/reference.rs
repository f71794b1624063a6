//! Refs: Single-Value Tracked Cells
//!
//! A [`Ref`] tracks reads and writes of one value slot. Deep refs wrap
//! object values in a tracked container on read; shallow refs hand the
//! stored value back untouched and only react to whole-slot replacement.
//! Custom refs delegate both sides to user closures that call the provided
//! track and trigger hooks explicitly.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::reactive::container::{reactive, to_raw, to_reactive, Reactive};
use crate::reactive::dep::Dep;
use crate::reactive::effect::{track_effects, trigger_subscribers, DirtyLevel};
use crate::value::{Key, Value};

enum RefKind {
    Plain {
        /// The unwrapped value, as stored.
        raw: RwLock<Value>,
        shallow: bool,
    },
    Custom {
        get: Box<dyn Fn() -> Value + Send + Sync>,
        set: Box<dyn Fn(Value) + Send + Sync>,
    },
    /// A view of one container key: reads and writes go through the
    /// container, which owns the tracking.
    Projection { source: Reactive, key: Key },
}

struct RefInner {
    dep: Dep,
    kind: RefKind,
}

/// A tracked single-value cell. Cloning shares the cell.
#[derive(Clone)]
pub struct Ref {
    inner: Arc<RefInner>,
}

impl Ref {
    /// A deep ref: object values read out of it come back wrapped in a
    /// tracked container.
    pub fn new(value: Value) -> Self {
        Self {
            inner: Arc::new(RefInner {
                dep: Dep::new(),
                kind: RefKind::Plain {
                    raw: RwLock::new(to_raw(value)),
                    shallow: false,
                },
            }),
        }
    }

    /// A shallow ref: only `.set_value` on the slot itself triggers.
    pub fn shallow(value: Value) -> Self {
        Self {
            inner: Arc::new(RefInner {
                dep: Dep::new(),
                kind: RefKind::Plain {
                    raw: RwLock::new(value),
                    shallow: true,
                },
            }),
        }
    }

    /// Build a ref from user get/set closures. The factory receives the
    /// track and trigger hooks and decides when to call them.
    pub fn custom<F>(factory: F) -> Self
    where
        F: FnOnce(
            Arc<dyn Fn() + Send + Sync>,
            Arc<dyn Fn() + Send + Sync>,
        ) -> (
            Box<dyn Fn() -> Value + Send + Sync>,
            Box<dyn Fn(Value) + Send + Sync>,
        ),
    {
        let dep = Dep::new();
        let track_dep = dep.clone();
        let track_hook: Arc<dyn Fn() + Send + Sync> =
            Arc::new(move || track_effects(&track_dep));
        let trigger_dep = dep.clone();
        let trigger_hook: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            trigger_subscribers(&trigger_dep.subscribers(), DirtyLevel::Dirty);
        });

        let (get, set) = factory(track_hook, trigger_hook);
        Self {
            inner: Arc::new(RefInner {
                dep,
                kind: RefKind::Custom { get, set },
            }),
        }
    }

    /// A ref projecting one key of a tracked container. Reads and writes
    /// pass through the container's own tracking, so the projection stays
    /// live alongside direct container access.
    pub fn projected(source: Reactive, key: impl Into<Key>) -> Self {
        Self {
            inner: Arc::new(RefInner {
                dep: Dep::new(),
                kind: RefKind::Projection {
                    source,
                    key: key.into(),
                },
            }),
        }
    }

    /// Read the cell. Tracked.
    pub fn value(&self) -> Value {
        match &self.inner.kind {
            RefKind::Plain { raw, shallow } => {
                track_effects(&self.inner.dep);
                let v = raw.read().clone();
                if *shallow {
                    v
                } else {
                    to_reactive(v)
                }
            }
            RefKind::Custom { get, .. } => get(),
            RefKind::Projection { source, key } => source.get(key.clone()),
        }
    }

    /// Write the cell. No trigger when the raw value is unchanged under
    /// SameValueZero.
    pub fn set_value(&self, value: Value) {
        match &self.inner.kind {
            RefKind::Plain { raw, shallow } => {
                let next = if *shallow { value } else { to_raw(value) };
                {
                    let mut slot = raw.write();
                    if *slot == next {
                        return;
                    }
                    *slot = next;
                }
                self.trigger();
            }
            RefKind::Custom { set, .. } => set(value),
            RefKind::Projection { source, key } => {
                source.set(key.clone(), value);
            }
        }
    }

    /// Force-notify subscribers, regardless of value comparison. The escape
    /// hatch for shallow refs mutated in place.
    pub fn trigger(&self) {
        trigger_subscribers(&self.inner.dep.subscribers(), DirtyLevel::Dirty);
    }

    /// Identity comparison.
    pub fn same(&self, other: &Ref) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Whether a value is a ref cell.
pub fn is_ref(v: &Value) -> bool {
    matches!(v, Value::Ref(_))
}

/// Unwrap one level of ref, reading through it; non-refs pass through.
pub fn unref(v: Value) -> Value {
    match v {
        Value::Ref(r) => r.value(),
        other => other,
    }
}

/// A ref over one key of a tracked container. See [`Ref::projected`].
pub fn to_ref(source: &Reactive, key: impl Into<Key>) -> Ref {
    Ref::projected(source.clone(), key)
}

/// One projected ref per current entry of the container. The key listing
/// itself is a tracked read.
pub fn to_refs(source: &Reactive) -> Vec<(Key, Ref)> {
    source
        .keys()
        .into_iter()
        .filter_map(|k| match k {
            Value::Str(s) => Some(Key::Prop(s)),
            Value::Int(i) if i >= 0 => Some(Key::Index(i as usize)),
            _ => None,
        })
        .map(|key| (key.clone(), Ref::projected(source.clone(), key)))
        .collect()
}

/// Wrap an object holding refs in a handle whose reads unwrap them and
/// whose writes land inside an existing ref slot. Deep tracked handles
/// already behave this way and pass through; raw objects get a deep
/// handle; everything else is returned unchanged.
pub fn proxy_refs(v: Value) -> Value {
    match v {
        Value::Reactive(r) => Value::Reactive(r),
        obj @ Value::Obj(_) => reactive(obj),
        other => other,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
