//! Effects, Tracking, and Triggering
//!
//! A [`ReactiveEffect`] wraps a closure and re-runs it when any dependency
//! recorded during its last run changes. Tracking is thread-local: while an
//! effect runs it sits on top of the effect stack, and every tracked read
//! funnels through [`track`] to subscribe the top of the stack.
//!
//! # Dirty levels
//!
//! Effects carry a dirty level rather than a boolean:
//!
//! - `Dirty`: a source write reached the effect; it must re-run.
//! - `MaybeDirty`: only computed values in between were invalidated. The
//!   effect re-runs only if refreshing those computeds shows one of their
//!   values actually moved. This is what keeps a chain of computeds from
//!   re-running downstream work when an upstream write produces the same
//!   computed output.
//!
//! # Trigger ordering
//!
//! When a write fans out, computed-backed effects are notified before plain
//! effects, so by the time a plain effect runs every computed it depends on
//! has already been invalidated and will serve a fresh value.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::reactive::computed::AnyComputed;
use crate::reactive::dep::{self, Dep};
use crate::reactive::scope;
use crate::value::{Key, Obj, ObjKind};

/// Nesting depth up to which the generation-bitmask cleanup applies.
/// Deeper runs fall back to a full subscriber cleanup before tracking.
pub(crate) const MAX_MARKER_BITS: u32 = 30;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<ReactiveEffect>> = const { RefCell::new(Vec::new()) };
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static TRACK_DEPTH: Cell<u32> = const { Cell::new(0) };
    static TRACK_OP_BIT: Cell<u32> = const { Cell::new(1) };
}

/// How far a pending change has propagated to an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(crate) enum DirtyLevel {
    Clean = 0,
    MaybeDirty = 1,
    Dirty = 2,
}

impl DirtyLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DirtyLevel::Clean,
            1 => DirtyLevel::MaybeDirty,
            _ => DirtyLevel::Dirty,
        }
    }
}

/// The kind of structural change behind a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// A key that did not exist before was created.
    Add,
    /// An existing key's value changed.
    Set,
    /// A key was removed.
    Delete,
    /// The whole collection was emptied.
    Clear,
}

pub(crate) struct EffectInner {
    /// The effect body. Computed-backed effects have no body of their own;
    /// their owner drives recomputation through `run_with`.
    f: Option<Box<dyn Fn() + Send + Sync>>,
    /// Invoked instead of running when the effect is triggered.
    scheduler: Option<Box<dyn Fn() + Send + Sync>>,
    computed: bool,
    allow_recurse: bool,
    active: AtomicBool,
    paused: AtomicBool,
    defer_stop: AtomicBool,
    /// Highest trigger level received while paused, replayed on resume.
    pending: AtomicU8,
    dirty: AtomicU8,
    deps: Mutex<SmallVec<[Dep; 4]>>,
    /// Computed values read during the last run, with the version seen.
    /// Consulted to resolve `MaybeDirty` without re-running the body.
    tracked_computeds: Mutex<Vec<(Weak<dyn AnyComputed + Send + Sync>, u64)>>,
}

/// Handle to a registered effect. Cloning shares the effect.
#[derive(Clone)]
pub struct ReactiveEffect {
    inner: Arc<EffectInner>,
}

/// Options for [`effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the caller invokes the runner when ready.
    pub lazy: bool,
    /// Called on trigger instead of running the effect.
    pub scheduler: Option<Box<dyn Fn() + Send + Sync>>,
    /// Allow the effect to re-trigger itself from its own run.
    pub allow_recurse: bool,
}

impl ReactiveEffect {
    pub(crate) fn new(
        f: Option<Box<dyn Fn() + Send + Sync>>,
        scheduler: Option<Box<dyn Fn() + Send + Sync>>,
        computed: bool,
        allow_recurse: bool,
    ) -> Self {
        let e = Self {
            inner: Arc::new(EffectInner {
                f,
                scheduler,
                computed,
                allow_recurse,
                active: AtomicBool::new(true),
                paused: AtomicBool::new(false),
                defer_stop: AtomicBool::new(false),
                pending: AtomicU8::new(0),
                dirty: AtomicU8::new(DirtyLevel::Clean as u8),
                deps: Mutex::new(SmallVec::new()),
                tracked_computeds: Mutex::new(Vec::new()),
            }),
        };
        scope::record_effect(&e);
        e
    }

    pub(crate) fn from_inner(inner: Arc<EffectInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn is_inner(&self, inner: &Arc<EffectInner>) -> bool {
        Arc::ptr_eq(&self.inner, inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<EffectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const EffectInner {
        Arc::as_ptr(&self.inner)
    }

    pub fn ptr_eq(&self, other: &ReactiveEffect) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.inner.computed
    }

    pub(crate) fn dirty_level(&self) -> DirtyLevel {
        DirtyLevel::from_u8(self.inner.dirty.load(Ordering::Relaxed))
    }

    pub(crate) fn mark_dirty(&self, level: DirtyLevel) {
        self.inner.dirty.fetch_max(level as u8, Ordering::Relaxed);
    }

    pub(crate) fn set_clean(&self) {
        self.inner
            .dirty
            .store(DirtyLevel::Clean as u8, Ordering::Relaxed);
    }

    /// Run the effect body, re-collecting dependencies.
    ///
    /// A stopped effect's body still runs, just without tracking. A body
    /// already on the effect stack is skipped to break self-trigger loops.
    pub fn run(&self) {
        let Some(f) = self.inner.f.as_ref() else {
            return;
        };
        if !self.is_active() {
            f();
            return;
        }
        if self.on_stack() {
            return;
        }
        self.run_tracked(|| f());
    }

    /// Run a closure as this effect's body: track if active, raw otherwise.
    pub(crate) fn run_with<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.is_active() {
            return f();
        }
        self.run_tracked(f)
    }

    fn on_stack(&self) -> bool {
        EFFECT_STACK.with_borrow(|s| s.iter().any(|e| e.ptr_eq(self)))
    }

    /// Push a tracking frame, run `f`, finalize dependency markers.
    /// The frame unwinds correctly on panic.
    pub(crate) fn run_tracked<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Frame {
            effect: ReactiveEffect,
            bit: u32,
            depth: u32,
            prev_should_track: bool,
        }

        impl Drop for Frame {
            fn drop(&mut self) {
                if self.depth <= MAX_MARKER_BITS {
                    let weak = self.effect.downgrade();
                    let mut deps = self.effect.inner.deps.lock();
                    let bit = self.bit;
                    deps.retain(|dep| {
                        let keep = !dep.was_tracked(bit) || dep.new_tracked(bit);
                        if !keep {
                            dep.remove(&weak);
                        }
                        dep.clear_bits(bit);
                        keep
                    });
                }
                EFFECT_STACK.with_borrow_mut(|s| {
                    s.pop();
                });
                SHOULD_TRACK.set(self.prev_should_track);
                let depth = self.depth - 1;
                TRACK_DEPTH.set(depth);
                TRACK_OP_BIT.set(if depth <= MAX_MARKER_BITS { 1 << depth } else { 0 });
                if self.effect.inner.defer_stop.swap(false, Ordering::Relaxed) {
                    self.effect.stop();
                }
            }
        }

        let depth = TRACK_DEPTH.get() + 1;
        TRACK_DEPTH.set(depth);
        let bit = if depth <= MAX_MARKER_BITS {
            1u32 << depth
        } else {
            0
        };
        TRACK_OP_BIT.set(bit);

        if depth <= MAX_MARKER_BITS {
            for dep in self.inner.deps.lock().iter() {
                dep.mark_was(bit);
            }
        } else {
            self.cleanup();
        }

        self.inner.tracked_computeds.lock().clear();

        let prev_should_track = SHOULD_TRACK.replace(true);
        EFFECT_STACK.with_borrow_mut(|s| s.push(self.clone()));

        let _frame = Frame {
            effect: self.clone(),
            bit,
            depth,
            prev_should_track,
        };
        f()
    }

    /// Unsubscribe from every dep.
    fn cleanup(&self) {
        let weak = self.downgrade();
        let mut deps = self.inner.deps.lock();
        for dep in deps.drain(..) {
            dep.remove(&weak);
        }
    }

    /// Stop the effect: unsubscribe everywhere and mark inactive.
    /// Stopping mid-run defers until the run finishes. Idempotent.
    pub fn stop(&self) {
        if self.on_stack() {
            self.inner.defer_stop.store(true, Ordering::Relaxed);
        } else if self.inner.active.swap(false, Ordering::Relaxed) {
            self.cleanup();
        }
    }

    /// Suspend triggering. Triggers received while paused are coalesced
    /// into a single pending level.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Relaxed);
    }

    /// Resume triggering and replay the strongest pending trigger, if any.
    pub fn resume(&self) {
        if !self.inner.paused.swap(false, Ordering::Relaxed) {
            return;
        }
        let pending = self.inner.pending.swap(0, Ordering::Relaxed);
        if pending != 0 {
            self.mark_dirty(DirtyLevel::from_u8(pending));
            match &self.inner.scheduler {
                Some(s) => s(),
                None => self.try_run(),
            }
        }
    }

    /// Run if the dirty level warrants it, resolving `MaybeDirty` through
    /// the tracked computed snapshot.
    pub(crate) fn try_run(&self) {
        match self.dirty_level() {
            DirtyLevel::Clean => {}
            DirtyLevel::Dirty => {
                self.set_clean();
                self.run();
            }
            DirtyLevel::MaybeDirty => {
                if self.deps_changed() {
                    self.set_clean();
                    self.run();
                } else {
                    self.set_clean();
                }
            }
        }
    }

    /// Refresh each computed read last run and report whether any version
    /// moved. A dropped computed counts as changed.
    pub(crate) fn deps_changed(&self) -> bool {
        let snapshot: Vec<(Weak<dyn AnyComputed + Send + Sync>, u64)> =
            self.inner.tracked_computeds.lock().clone();
        for (weak, seen) in snapshot {
            match weak.upgrade() {
                Some(c) => {
                    c.refresh();
                    if c.version() != seen {
                        return true;
                    }
                }
                None => return true,
            }
        }
        false
    }
}

impl std::fmt::Debug for ReactiveEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveEffect")
            .field("active", &self.is_active())
            .field("computed", &self.inner.computed)
            .finish()
    }
}

/// Create and immediately run an effect.
pub fn effect(f: impl Fn() + Send + Sync + 'static) -> ReactiveEffect {
    effect_with(f, EffectOptions::default())
}

/// Create an effect with explicit options.
pub fn effect_with(f: impl Fn() + Send + Sync + 'static, opts: EffectOptions) -> ReactiveEffect {
    let e = ReactiveEffect::new(
        Some(Box::new(f)),
        opts.scheduler,
        false,
        opts.allow_recurse,
    );
    if !opts.lazy {
        e.run();
    }
    e
}

/// Stop an effect runner. Equivalent to [`ReactiveEffect::stop`].
pub fn stop(runner: &ReactiveEffect) {
    runner.stop();
}

/// The effect currently collecting dependencies on this thread, if any.
pub(crate) fn active_effect() -> Option<ReactiveEffect> {
    EFFECT_STACK.with_borrow(|s| s.last().cloned())
}

/// Whether reads are currently being recorded.
pub fn is_tracking() -> bool {
    SHOULD_TRACK.get() && EFFECT_STACK.with_borrow(|s| !s.is_empty())
}

/// Disable tracking until the matching [`reset_tracking`].
pub fn pause_tracking() {
    TRACK_STACK.with_borrow_mut(|s| s.push(SHOULD_TRACK.get()));
    SHOULD_TRACK.set(false);
}

/// Force-enable tracking until the matching [`reset_tracking`].
pub fn enable_tracking() {
    TRACK_STACK.with_borrow_mut(|s| s.push(SHOULD_TRACK.get()));
    SHOULD_TRACK.set(true);
}

/// Restore the tracking state saved by the last pause/enable.
pub fn reset_tracking() {
    let last = TRACK_STACK.with_borrow_mut(|s| s.pop());
    SHOULD_TRACK.set(last.unwrap_or(true));
}

/// Run `f` with tracking disabled, restoring on the way out even if `f`
/// panics.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    struct Restore;
    impl Drop for Restore {
        fn drop(&mut self) {
            reset_tracking();
        }
    }
    pause_tracking();
    let _restore = Restore;
    f()
}

/// Record a read of `key` on `target` for the active effect.
pub fn track(target: &Obj, key: impl Into<Key>) {
    if !is_tracking() {
        return;
    }
    let dep = dep::dep_for(target.id(), &key.into());
    track_effects(&dep);
}

/// Subscribe the active effect to `dep`, using the generation bitmasks to
/// skip duplicate work within a run.
pub(crate) fn track_effects(dep: &Dep) {
    if !SHOULD_TRACK.get() {
        return;
    }
    let Some(effect) = active_effect() else {
        return;
    };

    let depth = TRACK_DEPTH.get();
    let should_add = if depth <= MAX_MARKER_BITS {
        let bit = TRACK_OP_BIT.get();
        if dep.new_tracked(bit) {
            false
        } else {
            dep.mark_new(bit);
            !dep.was_tracked(bit)
        }
    } else {
        !dep.has(&effect)
    };

    if should_add {
        dep.add(effect.downgrade());
        effect.inner.deps.lock().push(dep.clone());
    }
}

/// Record that the active effect read a computed at `version`, feeding the
/// `MaybeDirty` resolution snapshot.
pub(crate) fn record_tracked_computed(weak: Weak<dyn AnyComputed + Send + Sync>, version: u64) {
    let Some(effect) = active_effect() else {
        return;
    };
    let mut list = effect.inner.tracked_computeds.lock();
    if !list.iter().any(|(w, _)| Weak::ptr_eq(w, &weak)) {
        list.push((weak, version));
    }
}

/// Notify one effect of a change at `level`.
pub(crate) fn trigger_effect(effect: &ReactiveEffect, level: DirtyLevel) {
    if let Some(active) = active_effect() {
        if active.ptr_eq(effect) && !effect.inner.allow_recurse {
            return;
        }
    }
    if effect.inner.paused.load(Ordering::Relaxed) {
        effect.inner.pending.fetch_max(level as u8, Ordering::Relaxed);
        return;
    }
    effect.mark_dirty(level);
    match &effect.inner.scheduler {
        Some(s) => s(),
        None => effect.try_run(),
    }
}

/// Notify a subscriber set, computed-backed effects first.
pub(crate) fn trigger_subscribers(effects: &[ReactiveEffect], level: DirtyLevel) {
    for e in effects.iter().filter(|e| e.is_computed()) {
        trigger_effect(e, level);
    }
    for e in effects.iter().filter(|e| !e.is_computed()) {
        trigger_effect(e, level);
    }
}

/// Fan a structural change on `target` out to every affected dep.
///
/// `new_len` carries the post-write length for list length changes, so index
/// deps at or beyond it can be invalidated.
pub fn trigger(target: &Obj, kind: TriggerKind, key: Option<Key>, new_len: Option<usize>) {
    let target_kind = target.kind();
    let is_list = target_kind == ObjKind::List;
    let is_keyed = target_kind == ObjKind::Keyed;

    let mut deps: Vec<Dep> = Vec::new();
    let found = dep::with_target_deps(target.id(), |map| {
        if kind == TriggerKind::Clear {
            deps.extend(map.values().cloned());
            return;
        }

        if is_list && key == Some(Key::Length) {
            for (k, d) in map {
                match k {
                    Key::Length => deps.push(d.clone()),
                    Key::Index(i) if new_len.is_some_and(|n| *i >= n) => deps.push(d.clone()),
                    _ => {}
                }
            }
            return;
        }

        if let Some(k) = &key {
            if let Some(d) = map.get(k) {
                deps.push(d.clone());
            }
        }

        match kind {
            TriggerKind::Add => {
                if !is_list {
                    if let Some(d) = map.get(&Key::Iterate) {
                        deps.push(d.clone());
                    }
                    if is_keyed {
                        if let Some(d) = map.get(&Key::KeyIterate) {
                            deps.push(d.clone());
                        }
                    }
                } else if matches!(key, Some(Key::Index(_))) {
                    // A new index extends the list, so its length moved too.
                    if let Some(d) = map.get(&Key::Length) {
                        deps.push(d.clone());
                    }
                }
            }
            TriggerKind::Delete => {
                if !is_list {
                    if let Some(d) = map.get(&Key::Iterate) {
                        deps.push(d.clone());
                    }
                    if is_keyed {
                        if let Some(d) = map.get(&Key::KeyIterate) {
                            deps.push(d.clone());
                        }
                    }
                }
            }
            TriggerKind::Set => {
                if is_keyed {
                    if let Some(d) = map.get(&Key::Iterate) {
                        deps.push(d.clone());
                    }
                }
            }
            TriggerKind::Clear => unreachable!(),
        }
    })
    .is_some();

    if !found {
        return;
    }

    let mut seen: HashSet<*const EffectInner> = HashSet::new();
    let mut subscribers = Vec::new();
    for dep in &deps {
        for e in dep.subscribers() {
            if seen.insert(e.as_ptr()) {
                subscribers.push(e);
            }
        }
    }

    tracing::trace!(
        target: "weft_core::reactive",
        ?kind,
        subscribers = subscribers.len(),
        "trigger"
    );
    trigger_subscribers(&subscribers, DirtyLevel::Dirty);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
