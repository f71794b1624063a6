//! Computed Values
//!
//! A [`Computed`] caches the result of a tracked getter and recomputes
//! lazily: an upstream write only marks it dirty, the next read pays for the
//! recompute. Every recompute that actually changes the value (by
//! `PartialEq`) bumps a monotone version stamp; effects record the version
//! they saw, which is what lets a `MaybeDirty` effect skip its body when a
//! recompute produced the same value.
//!
//! # Deferred computeds
//!
//! A deferred computed additionally batches its downstream notification:
//! upstream writes invalidate it synchronously (so a direct read is always
//! fresh) but plain effects subscribed to it are only notified from a queued
//! job at the next [`scheduler::flush`], and only if the value actually
//! moved since the batch began.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::reactive::dep::Dep;
use crate::reactive::effect::{
    self, record_tracked_computed, track_effects, trigger_subscribers, DirtyLevel, ReactiveEffect,
};
use crate::reactive::scheduler;

/// Type-erased view of a computed, held weakly by effects that read it.
pub(crate) trait AnyComputed: Send + Sync {
    /// Bring the cached value up to date if dirty.
    fn refresh(&self);
    /// Version stamp, bumped only when a recompute changes the value.
    fn version(&self) -> u64;
}

struct ComputedCore<T> {
    getter: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    version: AtomicU64,
    /// Subscribers reading this computed.
    dep: Dep,
    effect: OnceLock<ReactiveEffect>,
    deferred: bool,
    /// Guards against a getter reading its own computed.
    computing: AtomicBool,
    /// Regular mode: downstream already notified since the last refresh.
    notified: AtomicBool,
    /// Deferred mode: a flush job is queued.
    scheduled: AtomicBool,
    /// Version at the start of the current deferred batch. The flush job
    /// compares against it to decide whether downstream must run.
    base_captured: AtomicBool,
    base_version: AtomicU64,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ComputedCore<T> {
    fn effect(&self) -> &ReactiveEffect {
        self.effect.get().expect("effect installed at construction")
    }

    /// Scheduler body: an upstream dependency changed.
    fn on_upstream(self: Arc<Self>) {
        if self.deferred {
            self.capture_base();
            if !self.scheduled.swap(true, Ordering::Relaxed) {
                let weak = Arc::downgrade(&self);
                scheduler::queue(Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        core.flush_job();
                    }
                }));
            }
            // Chained computeds are invalidated now so synchronous reads
            // stay fresh; plain effects wait for the flush job.
            let computed_subs: Vec<ReactiveEffect> = self
                .dep
                .subscribers()
                .into_iter()
                .filter(ReactiveEffect::is_computed)
                .collect();
            trigger_subscribers(&computed_subs, DirtyLevel::MaybeDirty);
        } else if !self.notified.swap(true, Ordering::Relaxed) {
            trigger_subscribers(&self.dep.subscribers(), DirtyLevel::MaybeDirty);
        }
    }

    fn capture_base(&self) {
        if !self.base_captured.swap(true, Ordering::Relaxed) {
            self.base_version
                .store(self.version.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Runs at flush: settle the batch and notify downstream if the value
    /// moved since the batch began.
    fn flush_job(&self) {
        self.scheduled.store(false, Ordering::Relaxed);
        self.base_captured.store(false, Ordering::Relaxed);

        // With nobody subscribed, stay lazy until the next read.
        if !self.effect().is_active() || self.dep.is_empty() {
            return;
        }

        let base = self.base_version.load(Ordering::Relaxed);
        self.refresh_impl();
        if self.version.load(Ordering::Relaxed) != base {
            trigger_subscribers(&self.dep.subscribers(), DirtyLevel::Dirty);
        }
    }

    fn refresh_impl(&self) {
        let effect = self.effect();
        if self.computing.load(Ordering::Relaxed) {
            tracing::warn!(
                target: "weft_core::reactive",
                "computed getter read its own value, serving the cached one"
            );
            return;
        }
        match effect.dirty_level() {
            DirtyLevel::Clean => return,
            DirtyLevel::MaybeDirty => {
                if !effect.deps_changed() {
                    effect.set_clean();
                    self.notified.store(false, Ordering::Relaxed);
                    return;
                }
            }
            DirtyLevel::Dirty => {}
        }

        self.computing.store(true, Ordering::Relaxed);
        struct Guard<'a>(&'a AtomicBool);
        impl Drop for Guard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Relaxed);
            }
        }
        let _guard = Guard(&self.computing);

        // A panicking getter unwinds past this point with the dirty level
        // intact, so the next read retries.
        let new_value = effect.run_with(|| (self.getter)());

        let mut slot = self.value.write();
        let changed = match &*slot {
            Some(old) => *old != new_value,
            None => true,
        };
        if changed {
            *slot = Some(new_value);
            self.version.fetch_add(1, Ordering::Relaxed);
        }
        drop(slot);

        effect.set_clean();
        self.notified.store(false, Ordering::Relaxed);
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> AnyComputed for ComputedCore<T> {
    fn refresh(&self) {
        self.refresh_impl();
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

/// A cached, tracked derivation. Cloning shares the cache.
pub struct Computed<T> {
    core: Arc<ComputedCore<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Computed<T> {
    fn with_flags(getter: impl Fn() -> T + Send + Sync + 'static, deferred: bool) -> Self {
        let core = Arc::new(ComputedCore {
            getter: Box::new(getter),
            value: RwLock::new(None),
            version: AtomicU64::new(0),
            dep: Dep::new(),
            effect: OnceLock::new(),
            deferred,
            computing: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            base_captured: AtomicBool::new(false),
            base_version: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&core);
        let eff = ReactiveEffect::new(
            None,
            Some(Box::new(move || {
                if let Some(core) = weak.upgrade() {
                    core.on_upstream();
                }
            })),
            true,
            false,
        );
        // First read must compute.
        eff.mark_dirty(DirtyLevel::Dirty);
        let _ = core.effect.set(eff);

        Self { core }
    }

    /// Read the current value, recomputing if dirty. Tracked.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads this computed's own value during its
    /// first evaluation, when there is no cached value to serve. A
    /// self-read on a later evaluation logs a warning and serves the
    /// cached value instead.
    pub fn get(&self) -> T {
        track_effects(&self.core.dep);
        self.core.refresh_impl();

        let erased: Arc<dyn AnyComputed + Send + Sync> = self.core.clone();
        record_tracked_computed(
            Arc::downgrade(&erased),
            self.core.version.load(Ordering::Relaxed),
        );

        self.core
            .value
            .read()
            .clone()
            .expect("computed getter read its own value during first evaluation")
    }

    /// Read without subscribing the active effect.
    pub fn get_untracked(&self) -> T {
        effect::untracked(|| self.get())
    }

    /// Detach from upstream dependencies. Later reads serve the cached
    /// value; a still-dirty computed recomputes once, untracked.
    pub fn stop(&self) {
        self.core.effect().stop();
    }

    pub fn effect(&self) -> &ReactiveEffect {
        self.core.effect()
    }
}

impl<T> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("deferred", &self.core.deferred)
            .finish()
    }
}

/// Create a computed value from a tracked getter.
pub fn computed<T: Clone + PartialEq + Send + Sync + 'static>(
    getter: impl Fn() -> T + Send + Sync + 'static,
) -> Computed<T> {
    Computed::with_flags(getter, false)
}

/// Create a computed whose downstream notification is deferred to the next
/// [`scheduler::flush`].
pub fn deferred_computed<T: Clone + PartialEq + Send + Sync + 'static>(
    getter: impl Fn() -> T + Send + Sync + 'static,
) -> Computed<T> {
    Computed::with_flags(getter, true)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
