//! Effect Scopes
//!
//! A scope collects every effect created while it runs, so a whole subtree
//! of reactive machinery can be stopped, paused, or resumed as one unit.
//! Scopes nest: a child created inside a parent's `run` is stopped with the
//! parent, unless it was created detached.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::reactive::effect::ReactiveEffect;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    active: AtomicBool,
    paused: AtomicBool,
    detached: bool,
    effects: Mutex<Vec<ReactiveEffect>>,
    cleanups: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    scopes: Mutex<Vec<EffectScope>>,
    parent: Mutex<Option<Weak<ScopeInner>>>,
}

/// Handle to a scope. Cloning shares the scope.
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

impl EffectScope {
    fn new(detached: bool) -> Self {
        let scope = Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                paused: AtomicBool::new(false),
                detached,
                effects: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                scopes: Mutex::new(Vec::new()),
                parent: Mutex::new(None),
            }),
        };
        if !detached {
            if let Some(parent) = get_current_scope() {
                *scope.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
                parent.inner.scopes.lock().push(scope.clone());
            }
        }
        scope
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `f` with this scope collecting the effects it creates.
    ///
    /// On a stopped scope `f` still runs, but nothing it creates is owned
    /// by the scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.is_active() {
            tracing::warn!(
                target: "weft_core::reactive",
                "run on a stopped scope; created effects will not be owned"
            );
            return f();
        }

        struct PopGuard;
        impl Drop for PopGuard {
            fn drop(&mut self) {
                SCOPE_STACK.with_borrow_mut(|s| {
                    s.pop();
                });
            }
        }

        SCOPE_STACK.with_borrow_mut(|s| s.push(self.clone()));
        let _guard = PopGuard;
        f()
    }

    /// Stop every owned effect, run cleanups in registration order, stop
    /// child scopes, and detach from the parent. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::Relaxed) {
            return;
        }

        let effects: Vec<ReactiveEffect> = self.inner.effects.lock().drain(..).collect();
        for e in effects {
            e.stop();
        }

        let cleanups: Vec<Box<dyn FnOnce() + Send>> =
            self.inner.cleanups.lock().drain(..).collect();
        for cleanup in cleanups {
            cleanup();
        }

        let scopes: Vec<EffectScope> = self.inner.scopes.lock().drain(..).collect();
        for scope in scopes {
            scope.stop();
        }

        let parent = self.inner.parent.lock().take();
        if let Some(parent) = parent.and_then(|w| w.upgrade()) {
            parent.scopes.lock().retain(|s| !Arc::ptr_eq(&s.inner, &self.inner));
        }
    }

    /// Suspend every owned effect and child scope. Idempotent.
    pub fn pause(&self) {
        if self.inner.paused.swap(true, Ordering::Relaxed) {
            return;
        }
        for e in self.inner.effects.lock().iter() {
            e.pause();
        }
        for s in self.inner.scopes.lock().iter() {
            s.pause();
        }
    }

    /// Undo [`pause`]: effects replay the strongest trigger received while
    /// suspended. Idempotent.
    pub fn resume(&self) {
        if !self.inner.paused.swap(false, Ordering::Relaxed) {
            return;
        }
        for s in self.inner.scopes.lock().iter() {
            s.resume();
        }
        let effects: Vec<ReactiveEffect> = self.inner.effects.lock().clone();
        for e in effects {
            e.resume();
        }
    }

    /// Register a callback to run when the scope stops.
    pub fn add_cleanup(&self, f: impl FnOnce() + Send + 'static) {
        if !self.is_active() {
            tracing::warn!(
                target: "weft_core::reactive",
                "cleanup registered on a stopped scope is dropped"
            );
            return;
        }
        self.inner.cleanups.lock().push(Box::new(f));
    }
}

impl std::fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScope")
            .field("active", &self.is_active())
            .field("detached", &self.inner.detached)
            .finish()
    }
}

/// Create a scope. A detached scope ignores the enclosing scope and must
/// be stopped explicitly.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope::new(detached)
}

/// The scope currently collecting effects on this thread, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    SCOPE_STACK.with_borrow(|s| s.last().cloned())
}

/// Register a cleanup on the current scope. Without one the callback is
/// dropped with a warning.
pub fn on_scope_dispose(f: impl FnOnce() + Send + 'static) {
    match get_current_scope() {
        Some(scope) => scope.add_cleanup(f),
        None => {
            tracing::warn!(
                target: "weft_core::reactive",
                "on_scope_dispose called outside of a scope"
            );
        }
    }
}

/// Hand a freshly created effect to the current scope, if one is active.
/// An effect born into a paused scope starts paused itself, so it stays in
/// step with its siblings until the scope resumes.
pub(crate) fn record_effect(e: &ReactiveEffect) {
    if let Some(scope) = get_current_scope() {
        if scope.is_active() {
            if scope.inner.paused.load(Ordering::Relaxed) {
                e.pause();
            }
            scope.inner.effects.lock().push(e.clone());
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::{effect, track, trigger, TriggerKind};
    use crate::value::{Key, Obj, Value};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn spy() -> (Arc<AtomicI32>, impl Fn() -> i32) {
        let c = Arc::new(AtomicI32::new(0));
        let r = c.clone();
        (c, move || r.load(Ordering::SeqCst))
    }

    #[test]
    fn stop_kills_owned_effects() {
        let obj = Obj::plain_from([("n", Value::Int(0))]);
        let (calls, count) = spy();

        let scope = effect_scope(false);
        let target = obj.clone();
        scope.run(|| {
            let _ = effect(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                track(&target, "n");
            });
        });
        assert_eq!(count(), 1);

        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 2);

        scope.stop();
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 2);
    }

    #[test]
    fn nested_scope_stopped_with_parent() {
        let obj = Obj::plain_from([("n", Value::Int(0))]);
        let (calls, count) = spy();

        let parent = effect_scope(false);
        parent.run(|| {
            let child = effect_scope(false);
            let target = obj.clone();
            let calls = calls.clone();
            child.run(move || {
                let _ = effect(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    track(&target, "n");
                });
            });
        });

        parent.stop();
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 1);
    }

    #[test]
    fn detached_scope_survives_parent_stop() {
        let obj = Obj::plain_from([("n", Value::Int(0))]);
        let (calls, count) = spy();

        let parent = effect_scope(false);
        let detached = parent.run(|| {
            let detached = effect_scope(true);
            let target = obj.clone();
            let calls = calls.clone();
            detached.run(move || {
                let _ = effect(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    track(&target, "n");
                });
            });
            detached
        });

        parent.stop();
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 2);

        detached.stop();
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 2);
    }

    #[test]
    fn cleanups_run_once_in_registration_order() {
        let log: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

        let scope = effect_scope(false);
        let l1 = log.clone();
        let l2 = log.clone();
        scope.run(|| {
            on_scope_dispose(move || l1.lock().push(1));
            on_scope_dispose(move || l2.lock().push(2));
        });

        scope.stop();
        scope.stop();
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn run_on_stopped_scope_still_executes() {
        let scope = effect_scope(false);
        scope.stop();
        assert_eq!(scope.run(|| 42), 42);
        assert!(get_current_scope().is_none());
    }

    #[test]
    fn current_scope_visible_inside_run() {
        let scope = effect_scope(false);
        scope.run(|| {
            let current = get_current_scope().expect("scope active inside run");
            assert!(current.ptr_eq(&scope));
        });
        assert!(get_current_scope().is_none());
    }

    #[test]
    fn effect_born_into_paused_scope_starts_paused() {
        let obj = Obj::plain_from([("n", Value::Int(0))]);
        let (calls, count) = spy();

        let scope = effect_scope(false);
        scope.pause();

        let target = obj.clone();
        let calls2 = calls.clone();
        scope.run(move || {
            let _ = effect(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                track(&target, "n");
            });
        });
        // The initial run happens regardless; only triggers are suspended.
        assert_eq!(count(), 1);

        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 1);

        scope.resume();
        assert_eq!(count(), 2);
    }

    #[test]
    fn pause_suspends_and_resume_replays() {
        let obj = Obj::plain_from([("n", Value::Int(0))]);
        let (calls, count) = spy();

        let scope = effect_scope(false);
        let target = obj.clone();
        scope.run(|| {
            let _ = effect(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                track(&target, "n");
            });
        });
        assert_eq!(count(), 1);

        scope.pause();
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 1);

        scope.resume();
        assert_eq!(count(), 2);

        trigger(&obj, TriggerKind::Set, Some(Key::from("n")), None);
        assert_eq!(count(), 3);
    }
}
