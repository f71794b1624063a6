//! Dependency Sets and the Global Registry
//!
//! A [`Dep`] is one tracked key's subscriber list. The registry maps every
//! owner object to its per-key deps, keyed by [`ObjId`] so it never keeps
//! the owner itself alive; dropping the last handle to an object purges its
//! entry via [`purge_target`].
//!
//! # Generation bitmasks
//!
//! Each dep carries two bitmask words, `w` ("was tracked") and `n` ("newly
//! tracked"). When an effect run begins at nesting depth `d <= 30`, bit
//! `1 << d` is set in `w` for every dep the effect currently subscribes to.
//! During the run, [`Dep::mark_new`] sets the same bit in `n` as reads come
//! in, and a dep is only pushed onto the effect's list if it was not already
//! tracked this generation. When the run finishes, deps with `w` set but `n`
//! unset are the stale ones and get pruned, then both bits are cleared.
//! Past depth 30 the runtime falls back to a full cleanup before the run,
//! which is always correct, just slower.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::reactive::effect::{EffectInner, ReactiveEffect};
use crate::value::{Key, ObjId};

struct DepInner {
    subs: Mutex<Vec<Weak<EffectInner>>>,
    /// "Was tracked" generation bits.
    w: AtomicU32,
    /// "Newly tracked" generation bits.
    n: AtomicU32,
}

/// A single tracked key's subscriber set. Cheap to clone.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                subs: Mutex::new(Vec::new()),
                w: AtomicU32::new(0),
                n: AtomicU32::new(0),
            }),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Dep) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn was_tracked(&self, bit: u32) -> bool {
        self.inner.w.load(Ordering::Relaxed) & bit != 0
    }

    pub(crate) fn new_tracked(&self, bit: u32) -> bool {
        self.inner.n.load(Ordering::Relaxed) & bit != 0
    }

    pub(crate) fn mark_was(&self, bit: u32) {
        self.inner.w.fetch_or(bit, Ordering::Relaxed);
    }

    pub(crate) fn mark_new(&self, bit: u32) {
        self.inner.n.fetch_or(bit, Ordering::Relaxed);
    }

    pub(crate) fn clear_bits(&self, bit: u32) {
        self.inner.w.fetch_and(!bit, Ordering::Relaxed);
        self.inner.n.fetch_and(!bit, Ordering::Relaxed);
    }

    pub(crate) fn add(&self, effect: Weak<EffectInner>) {
        self.inner.subs.lock().push(effect);
    }

    /// Remove one subscriber by identity.
    pub(crate) fn remove(&self, effect: &Weak<EffectInner>) {
        self.inner
            .subs
            .lock()
            .retain(|w| !Weak::ptr_eq(w, effect));
    }

    pub(crate) fn has(&self, effect: &ReactiveEffect) -> bool {
        let subs = self.inner.subs.lock();
        subs.iter()
            .any(|w| w.upgrade().is_some_and(|e| effect.is_inner(&e)))
    }

    /// Snapshot the live subscribers, pruning dead weak entries in passing.
    pub(crate) fn subscribers(&self) -> Vec<ReactiveEffect> {
        let mut subs = self.inner.subs.lock();
        let mut live = Vec::with_capacity(subs.len());
        subs.retain(|w| match w.upgrade() {
            Some(e) => {
                live.push(ReactiveEffect::from_inner(e));
                true
            }
            None => false,
        });
        live
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.subs.lock().is_empty()
    }
}

/// Registry of every owner's tracked keys. Entries are created lazily on
/// first track and purged when the owner object is dropped.
static TARGET_MAP: OnceLock<DashMap<ObjId, IndexMap<Key, Dep>>> = OnceLock::new();

fn target_map() -> &'static DashMap<ObjId, IndexMap<Key, Dep>> {
    TARGET_MAP.get_or_init(DashMap::new)
}

/// Fetch or create the dep for `(target, key)`.
pub(crate) fn dep_for(target: ObjId, key: &Key) -> Dep {
    let mut entry = target_map().entry(target).or_default();
    entry
        .entry(key.clone())
        .or_insert_with(Dep::new)
        .clone()
}

/// Run `f` over the owner's full key table, if it has one.
pub(crate) fn with_target_deps<R>(
    target: ObjId,
    f: impl FnOnce(&IndexMap<Key, Dep>) -> R,
) -> Option<R> {
    target_map().get(&target).map(|m| f(&m))
}

/// Drop all bookkeeping for a dead owner.
pub(crate) fn purge_target(target: ObjId) {
    if let Some(map) = TARGET_MAP.get() {
        map.remove(&target);
    }
}

/// Number of owners currently registered. Diagnostic only.
pub fn tracked_target_count() -> usize {
    TARGET_MAP.get().map_or(0, |m| m.len())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
