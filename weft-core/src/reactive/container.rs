//! Tracked Containers
//!
//! A [`Reactive`] is an accessor handle over a shared [`Obj`]: every read
//! goes through [`track`] and every write fans out through [`trigger`].
//! Handles are values, not wrappers with identity of their own; two handles
//! over the same target with the same flags compare equal, which is what
//! code relying on "wrapping the same object twice yields the same thing"
//! observes.
//!
//! Four flavors cover the read/write matrix:
//!
//! - `reactive`: deep, writable. Nested objects come back wrapped, ref
//!   values auto-unwrap on non-index access.
//! - `shallow_reactive`: only root-level access is tracked; nested values
//!   come back raw.
//! - `readonly`: deep, rejects writes. Over an already-tracked handle it
//!   keeps tracking reads, so a readonly view of live data stays live.
//! - `shallow_readonly`: root-level readonly.

use crate::reactive::effect::{track, trigger, TriggerKind};
use crate::reactive::reference::Ref;
use crate::value::{Key, Obj, ObjData, ObjKind, Value};

/// Accessor handle over a tracked object.
#[derive(Clone)]
pub struct Reactive {
    target: Obj,
    readonly: bool,
    shallow: bool,
    /// Readonly view layered over an already-tracked target. Reads still
    /// track, and `is_reactive` reports true.
    base_reactive: bool,
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Reactive) -> bool {
        self.target.same(&other.target)
            && self.readonly == other.readonly
            && self.shallow == other.shallow
            && self.base_reactive == other.base_reactive
    }
}

impl std::fmt::Debug for Reactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.target)
            .field("readonly", &self.readonly)
            .field("shallow", &self.shallow)
            .finish()
    }
}

enum Write {
    Added,
    Changed,
    Unchanged,
    /// Existing slot holds a ref and the incoming value is not one:
    /// write through the ref instead of replacing the slot.
    RefWrite(Ref, Value),
    Invalid,
}

impl Reactive {
    fn new_deep(target: Obj, readonly: bool) -> Self {
        Self {
            target,
            readonly,
            shallow: false,
            base_reactive: false,
        }
    }

    /// The underlying raw object.
    pub fn target(&self) -> &Obj {
        &self.target
    }

    pub fn kind(&self) -> ObjKind {
        self.target.kind()
    }

    fn tracks(&self) -> bool {
        !self.readonly || self.base_reactive
    }

    /// Post-process a value read out of the container: shallow handles
    /// return it raw, deep handles unwrap refs (except list elements read
    /// by index) and wrap nested objects with the same flags.
    fn wrap_read(&self, list_index: bool, v: Value) -> Value {
        if self.shallow {
            return v;
        }
        if let Value::Ref(r) = &v {
            if !list_index {
                return r.value();
            }
        }
        match v {
            Value::Obj(o) if !o.is_skipped() => {
                Value::Reactive(Reactive::new_deep(o, self.readonly))
            }
            other => other,
        }
    }

    /// Tracked read. Missing keys read as `Null`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        if self.tracks() {
            track(&self.target, key.clone());
        }
        let slot = {
            let data = self.target.data().read();
            read_slot(&data, &key)
        };
        match slot {
            Some(v) => self.wrap_read(matches!(key, Key::Index(_)) && self.kind() == ObjKind::List, v),
            None => Value::Null,
        }
    }

    /// Write a key. Returns false on a readonly handle or a key that does
    /// not fit the container shape.
    ///
    /// Writing past the end of a list pads the gap with `Null`. A write
    /// that leaves the slot unchanged under SameValueZero does not trigger.
    pub fn set(&self, key: impl Into<Key>, value: Value) -> bool {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "write to readonly container ignored"
            );
            return false;
        }
        let key = key.into();
        let value = if self.shallow { value } else { to_raw(value) };

        let outcome = {
            let mut data = self.target.data().write();
            match (&mut *data, &key) {
                (ObjData::Plain(m), Key::Prop(k)) | (ObjData::Keyed(m), Key::Prop(k)) => {
                    match m.get_mut(k.as_ref()) {
                        Some(slot) => {
                            if let Value::Ref(r) = slot {
                                if !matches!(value, Value::Ref(_)) {
                                    Write::RefWrite(r.clone(), value)
                                } else if *slot == value {
                                    Write::Unchanged
                                } else {
                                    *slot = value;
                                    Write::Changed
                                }
                            } else if *slot == value {
                                Write::Unchanged
                            } else {
                                *slot = value;
                                Write::Changed
                            }
                        }
                        None => {
                            m.insert(k.clone(), value);
                            Write::Added
                        }
                    }
                }
                (ObjData::List(items), Key::Index(i)) => {
                    let i = *i;
                    if i < items.len() {
                        let slot = &mut items[i];
                        if *slot == value {
                            Write::Unchanged
                        } else {
                            *slot = value;
                            Write::Changed
                        }
                    } else {
                        while items.len() < i {
                            items.push(Value::Null);
                        }
                        items.push(value);
                        Write::Added
                    }
                }
                _ => Write::Invalid,
            }
        };

        // Data lock released; fan-out may run arbitrary effect bodies.
        match outcome {
            Write::RefWrite(r, v) => {
                r.set_value(v);
                true
            }
            Write::Added => {
                trigger(&self.target, TriggerKind::Add, Some(key), None);
                true
            }
            Write::Changed => {
                trigger(&self.target, TriggerKind::Set, Some(key), None);
                true
            }
            Write::Unchanged => true,
            Write::Invalid => {
                tracing::debug!(
                    target: "weft_core::reactive",
                    ?key,
                    kind = ?self.kind(),
                    "key does not fit container shape"
                );
                false
            }
        }
    }

    /// Remove a key. On a list the slot becomes `Null` without reindexing.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "delete on readonly container ignored"
            );
            return false;
        }
        let key = key.into();
        let removed = {
            let mut data = self.target.data().write();
            match (&mut *data, &key) {
                (ObjData::Plain(m), Key::Prop(k)) | (ObjData::Keyed(m), Key::Prop(k)) => {
                    m.shift_remove(k.as_ref()).is_some()
                }
                (ObjData::List(items), Key::Index(i)) => {
                    if *i < items.len() && items[*i] != Value::Null {
                        items[*i] = Value::Null;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };
        if removed {
            trigger(&self.target, TriggerKind::Delete, Some(key), None);
        }
        removed
    }

    /// Tracked existence check.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        if self.tracks() {
            track(&self.target, key.clone());
        }
        let data = self.target.data().read();
        match (&*data, &key) {
            (ObjData::Plain(m), Key::Prop(k)) | (ObjData::Keyed(m), Key::Prop(k)) => {
                m.contains_key(k.as_ref())
            }
            (ObjData::List(items), Key::Index(i)) => *i < items.len(),
            _ => false,
        }
    }

    /// Tracked key listing. Subscribes to the key-set iteration dep, so a
    /// later add or delete re-triggers without a value write.
    pub fn keys(&self) -> Vec<Value> {
        if self.tracks() {
            match self.kind() {
                ObjKind::Plain => track(&self.target, Key::Iterate),
                ObjKind::Keyed => track(&self.target, Key::KeyIterate),
                ObjKind::List => track(&self.target, Key::Length),
            }
        }
        let data = self.target.data().read();
        match &*data {
            ObjData::Plain(m) | ObjData::Keyed(m) => {
                m.keys().map(|k| Value::Str(k.clone())).collect()
            }
            ObjData::List(items) => (0..items.len()).map(Value::from).collect(),
        }
    }

    /// Tracked value listing. Subscribes to every present entry as well as
    /// the iteration dep, so both value writes and structural edits
    /// re-trigger.
    pub fn values(&self) -> Vec<Value> {
        let kind = self.kind();
        let (raw, keys): (Vec<Value>, Vec<Key>) = {
            let data = self.target.data().read();
            match &*data {
                ObjData::Plain(m) | ObjData::Keyed(m) => (
                    m.values().cloned().collect(),
                    m.keys().map(|k| Key::Prop(k.clone())).collect(),
                ),
                ObjData::List(items) => (items.clone(), Vec::new()),
            }
        };
        if self.tracks() {
            match kind {
                ObjKind::List => {
                    track(&self.target, Key::Length);
                    for i in 0..raw.len() {
                        track(&self.target, i);
                    }
                }
                _ => {
                    track(&self.target, Key::Iterate);
                    for k in keys {
                        track(&self.target, k);
                    }
                }
            }
        }
        raw.into_iter()
            .map(|v| self.wrap_read(kind == ObjKind::List, v))
            .collect()
    }

    /// Tracked size: list length, or entry count elsewhere.
    pub fn len(&self) -> usize {
        if self.tracks() {
            match self.kind() {
                ObjKind::List => track(&self.target, Key::Length),
                _ => track(&self.target, Key::Iterate),
            }
        }
        let data = self.target.data().read();
        match &*data {
            ObjData::Plain(m) | ObjData::Keyed(m) => m.len(),
            ObjData::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty a plain or keyed container, notifying every subscriber.
    pub fn clear(&self) -> bool {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "clear on readonly container ignored"
            );
            return false;
        }
        let had = {
            let mut data = self.target.data().write();
            match &mut *data {
                ObjData::Plain(m) | ObjData::Keyed(m) => {
                    let had = !m.is_empty();
                    m.clear();
                    had
                }
                ObjData::List(_) => {
                    tracing::debug!(
                        target: "weft_core::reactive",
                        "clear on a list; use set_len(0)"
                    );
                    return false;
                }
            }
        };
        if had {
            trigger(&self.target, TriggerKind::Clear, None, None);
        }
        had
    }

    /// Append to a list. Returns the new length.
    pub fn push(&self, value: Value) -> usize {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "push on readonly container ignored"
            );
            return self.raw_len();
        }
        let value = if self.shallow { value } else { to_raw(value) };
        let (idx, new_len) = {
            let mut data = self.target.data().write();
            let ObjData::List(items) = &mut *data else {
                tracing::debug!(target: "weft_core::reactive", "push on non-list");
                return 0;
            };
            items.push(value);
            (items.len() - 1, items.len())
        };
        trigger(&self.target, TriggerKind::Add, Some(Key::Index(idx)), None);
        new_len
    }

    /// Remove and return the last element, `Null` when empty.
    pub fn pop(&self) -> Value {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "pop on readonly container ignored"
            );
            return Value::Null;
        }
        let (popped, new_len) = {
            let mut data = self.target.data().write();
            let ObjData::List(items) = &mut *data else {
                return Value::Null;
            };
            let popped = items.pop();
            (popped, items.len())
        };
        match popped {
            Some(v) => {
                trigger(&self.target, TriggerKind::Set, Some(Key::Length), Some(new_len));
                v
            }
            None => Value::Null,
        }
    }

    /// Remove and return the first element, `Null` when empty.
    pub fn shift(&self) -> Value {
        let mut removed = self.splice(0, 1, Vec::new());
        if removed.is_empty() {
            Value::Null
        } else {
            removed.remove(0)
        }
    }

    /// Prepend elements. Returns the new length.
    pub fn unshift(&self, values: Vec<Value>) -> usize {
        self.splice(0, 0, values);
        self.raw_len()
    }

    /// Remove `delete_count` elements starting at `start`, inserting
    /// `items` in their place. Returns the removed elements.
    ///
    /// When the length moves, everything at or beyond `start` may have
    /// shifted, so all index deps from `start` onward plus the length dep
    /// are invalidated. An equal-length replacement leaves the length dep
    /// alone and only touches the replaced index deps.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "splice on readonly container ignored"
            );
            return Vec::new();
        }
        let items: Vec<Value> = if self.shallow {
            items
        } else {
            items.into_iter().map(to_raw).collect()
        };
        let inserted = items.len();
        let (removed, start, old_len, new_len) = {
            let mut data = self.target.data().write();
            let ObjData::List(list) = &mut *data else {
                tracing::debug!(target: "weft_core::reactive", "splice on non-list");
                return Vec::new();
            };
            let old_len = list.len();
            let start = start.min(old_len);
            let end = (start + delete_count).min(old_len);
            let removed = list.splice(start..end, items).collect::<Vec<_>>();
            (removed, start, old_len, list.len())
        };
        if new_len != old_len {
            trigger(
                &self.target,
                TriggerKind::Set,
                Some(Key::Length),
                Some(start),
            );
        } else {
            for i in start..(start + inserted).min(new_len) {
                trigger(&self.target, TriggerKind::Set, Some(Key::Index(i)), None);
            }
        }
        removed
    }

    /// Insert one element at `index`, shifting the tail.
    pub fn insert(&self, index: usize, value: Value) {
        self.splice(index, 0, vec![value]);
    }

    /// Resize a list, padding with `Null` on growth.
    pub fn set_len(&self, n: usize) -> bool {
        if self.readonly {
            tracing::warn!(
                target: "weft_core::reactive",
                "set_len on readonly container ignored"
            );
            return false;
        }
        let changed = {
            let mut data = self.target.data().write();
            let ObjData::List(items) = &mut *data else {
                return false;
            };
            if items.len() == n {
                false
            } else {
                items.resize(n, Value::Null);
                true
            }
        };
        if changed {
            trigger(&self.target, TriggerKind::Set, Some(Key::Length), Some(n));
        }
        changed
    }

    fn raw_len(&self) -> usize {
        let data = self.target.data().read();
        match &*data {
            ObjData::Plain(m) | ObjData::Keyed(m) => m.len(),
            ObjData::List(items) => items.len(),
        }
    }

    /// Tracked search by SameValueZero. A tracked-handle needle that misses
    /// is retried with its raw form, so searching for the wrapped or the
    /// raw object behaves the same.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        let items: Vec<Value> = {
            let data = self.target.data().read();
            match &*data {
                ObjData::List(items) => items.clone(),
                _ => return None,
            }
        };
        if self.tracks() {
            track(&self.target, Key::Length);
            for i in 0..items.len() {
                track(&self.target, i);
            }
        }
        if let Some(i) = items.iter().position(|v| v == needle) {
            return Some(i);
        }
        let raw = to_raw(needle.clone());
        if raw != *needle {
            items.iter().position(|v| *v == raw)
        } else {
            None
        }
    }

    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        let items: Vec<Value> = {
            let data = self.target.data().read();
            match &*data {
                ObjData::List(items) => items.clone(),
                _ => return None,
            }
        };
        if self.tracks() {
            track(&self.target, Key::Length);
            for i in 0..items.len() {
                track(&self.target, i);
            }
        }
        if let Some(i) = items.iter().rposition(|v| v == needle) {
            return Some(i);
        }
        let raw = to_raw(needle.clone());
        if raw != *needle {
            items.iter().rposition(|v| *v == raw)
        } else {
            None
        }
    }

    pub fn includes(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }
}

fn read_slot(data: &ObjData, key: &Key) -> Option<Value> {
    match (data, key) {
        (ObjData::Plain(m), Key::Prop(k)) | (ObjData::Keyed(m), Key::Prop(k)) => {
            m.get(k.as_ref()).cloned()
        }
        (ObjData::List(items), Key::Index(i)) => items.get(*i).cloned(),
        (ObjData::List(items), Key::Length) => Some(Value::Int(items.len() as i64)),
        _ => None,
    }
}

fn create_handle(v: Value, readonly_flag: bool, shallow: bool) -> Value {
    match v {
        Value::Obj(o) => {
            if o.is_skipped() {
                tracing::debug!(
                    target: "weft_core::reactive",
                    "target marked raw, returned as-is"
                );
                return Value::Obj(o);
            }
            Value::Reactive(Reactive {
                target: o,
                readonly: readonly_flag,
                shallow,
                base_reactive: false,
            })
        }
        Value::Reactive(r) => {
            if readonly_flag && !r.readonly {
                Value::Reactive(Reactive {
                    target: r.target,
                    readonly: true,
                    shallow,
                    base_reactive: true,
                })
            } else {
                Value::Reactive(r)
            }
        }
        other => {
            tracing::debug!(
                target: "weft_core::reactive",
                found = other.type_name(),
                "value cannot be wrapped"
            );
            other
        }
    }
}

/// Wrap an object in a deep writable tracked handle. Non-objects and
/// raw-marked objects pass through unchanged.
pub fn reactive(v: Value) -> Value {
    create_handle(v, false, false)
}

/// Wrap with root-level tracking only.
pub fn shallow_reactive(v: Value) -> Value {
    create_handle(v, false, true)
}

/// Wrap in a deep read-only handle. Over an already-tracked handle the
/// result still tracks reads.
pub fn readonly(v: Value) -> Value {
    create_handle(v, true, false)
}

/// Root-level read-only handle.
pub fn shallow_readonly(v: Value) -> Value {
    create_handle(v, true, true)
}

/// Mark an object so it is never wrapped by the reactive family.
pub fn mark_raw(v: Value) -> Value {
    if let Value::Obj(o) = &v {
        o.set_skip();
    }
    v
}

/// Strip a tracked handle back to its raw object; other values pass
/// through.
pub fn to_raw(v: Value) -> Value {
    match v {
        Value::Reactive(r) => Value::Obj(r.target),
        other => other,
    }
}

/// Deep-wrap object values, leave everything else alone.
pub(crate) fn to_reactive(v: Value) -> Value {
    match v {
        Value::Obj(o) if !o.is_skipped() => Value::Reactive(Reactive::new_deep(o, false)),
        other => other,
    }
}

/// Whether `v` is a tracked handle whose reads subscribe.
pub fn is_reactive(v: &Value) -> bool {
    matches!(v, Value::Reactive(r) if !r.readonly || r.base_reactive)
}

pub fn is_readonly(v: &Value) -> bool {
    matches!(v, Value::Reactive(r) if r.readonly)
}

pub fn is_shallow(v: &Value) -> bool {
    matches!(v, Value::Reactive(r) if r.shallow)
}

/// Whether `v` is any flavor of tracked handle.
pub fn is_proxy(v: &Value) -> bool {
    matches!(v, Value::Reactive(_))
}

/// Write a key on a tracked handle or a raw object, triggering subscribers
/// either way. The escape hatch for code holding raw objects.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> bool {
    match target {
        Value::Reactive(r) => r.set(key, value),
        Value::Obj(o) => Reactive::new_deep(o.clone(), false).set(key, value),
        other => {
            tracing::debug!(
                target: "weft_core::reactive",
                found = other.type_name(),
                "set target is not a container"
            );
            false
        }
    }
}

/// Delete a key on a tracked handle or a raw object.
pub fn del(target: &Value, key: impl Into<Key>) -> bool {
    match target {
        Value::Reactive(r) => r.delete(key),
        Value::Obj(o) => Reactive::new_deep(o.clone(), false).delete(key),
        other => {
            tracing::debug!(
                target: "weft_core::reactive",
                found = other.type_name(),
                "del target is not a container"
            );
            false
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn reactive_obj(entries: Vec<(&str, Value)>) -> Reactive {
        match reactive(Value::plain(entries)) {
            Value::Reactive(r) => r,
            _ => unreachable!(),
        }
    }

    fn reactive_list(items: Vec<Value>) -> Reactive {
        match reactive(Value::list(items)) {
            Value::Reactive(r) => r,
            _ => unreachable!(),
        }
    }

    fn spy() -> (Arc<AtomicI32>, impl Fn() -> i32) {
        let c = Arc::new(AtomicI32::new(0));
        let r = c.clone();
        (c, move || r.load(Ordering::SeqCst))
    }

    #[test]
    fn get_set_roundtrip_and_missing_reads_null() {
        let r = reactive_obj(vec![("a", Value::Int(1))]);
        assert_eq!(r.get("a"), Value::Int(1));
        assert_eq!(r.get("missing"), Value::Null);

        assert!(r.set("a", Value::Int(2)));
        assert_eq!(r.get("a"), Value::Int(2));
    }

    #[test]
    fn effect_sees_property_writes() {
        let r = reactive_obj(vec![("n", Value::Int(1))]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.get("n");
        });
        assert_eq!(count(), 1);

        r.set("n", Value::Int(2));
        assert_eq!(count(), 2);

        // SameValueZero: no trigger on identical write.
        r.set("n", Value::Int(2));
        assert_eq!(count(), 2);
    }

    #[test]
    fn add_and_delete_retrigger_iteration() {
        let r = reactive_obj(vec![("a", Value::Int(1))]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.keys();
        });
        assert_eq!(count(), 1);

        r.set("b", Value::Int(2));
        assert_eq!(count(), 2);

        r.delete("b");
        assert_eq!(count(), 3);

        // Value change on an existing key leaves the key set alone.
        r.set("a", Value::Int(9));
        assert_eq!(count(), 3);
    }

    #[test]
    fn nested_objects_come_back_wrapped() {
        let r = reactive_obj(vec![(
            "inner",
            Value::plain(vec![("x", Value::Int(1))]),
        )]);
        let inner = r.get("inner");
        assert!(is_reactive(&inner));

        let (calls, count) = spy();
        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Value::Reactive(inner) = r2.get("inner") {
                inner.get("x");
            }
        });
        assert_eq!(count(), 1);

        if let Value::Reactive(inner) = r.get("inner") {
            inner.set("x", Value::Int(2));
        }
        assert_eq!(count(), 2);
    }

    #[test]
    fn shallow_reactive_leaves_nested_raw() {
        let v = shallow_reactive(Value::plain(vec![(
            "inner",
            Value::plain(vec![("x", Value::Int(1))]),
        )]));
        let Value::Reactive(r) = v else { unreachable!() };
        assert!(is_shallow(&Value::Reactive(r.clone())));
        assert!(matches!(r.get("inner"), Value::Obj(_)));
    }

    #[test]
    fn readonly_rejects_writes_but_still_reads() {
        let v = readonly(Value::plain(vec![("a", Value::Int(1))]));
        let Value::Reactive(r) = v else { unreachable!() };
        assert!(!r.set("a", Value::Int(2)));
        assert!(!r.delete("a"));
        assert_eq!(r.get("a"), Value::Int(1));
    }

    #[test]
    fn readonly_over_reactive_stays_live() {
        let writable = reactive_obj(vec![("n", Value::Int(1))]);
        let view = readonly(Value::Reactive(writable.clone()));
        assert!(is_reactive(&view));
        assert!(is_readonly(&view));
        let Value::Reactive(view) = view else { unreachable!() };

        let (calls, count) = spy();
        let view2 = view.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            view2.get("n");
        });
        assert_eq!(count(), 1);

        writable.set("n", Value::Int(2));
        assert_eq!(count(), 2);
    }

    #[test]
    fn plain_readonly_does_not_track() {
        let v = readonly(Value::plain(vec![("n", Value::Int(1))]));
        let Value::Reactive(r) = v else { unreachable!() };
        assert!(!is_reactive(&Value::Reactive(r.clone())));

        let (calls, count) = spy();
        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.get("n");
        });
        assert_eq!(count(), 1);

        // Mutate behind the readonly view via the raw escape hatch.
        set(&Value::Obj(r.target().clone()), "n", Value::Int(2));
        assert_eq!(count(), 1);
    }

    #[test]
    fn wrapping_twice_yields_equal_handles() {
        let obj = Value::plain(vec![("a", Value::Int(1))]);
        let a = reactive(obj.clone());
        let b = reactive(obj);
        assert_eq!(a, b);

        // Re-wrapping a handle is a no-op.
        assert_eq!(reactive(a.clone()), a);
    }

    #[test]
    fn mark_raw_opts_out_of_wrapping() {
        let raw = mark_raw(Value::plain(vec![("a", Value::Int(1))]));
        assert!(matches!(reactive(raw.clone()), Value::Obj(_)));

        // Also when nested inside a tracked container.
        let r = reactive_obj(vec![("inner", raw)]);
        assert!(matches!(r.get("inner"), Value::Obj(_)));
    }

    #[test]
    fn to_raw_strips_the_handle() {
        let obj = Obj::plain_from([("a", Value::Int(1))]);
        let wrapped = reactive(Value::Obj(obj.clone()));
        let Value::Obj(stripped) = to_raw(wrapped) else {
            panic!("expected raw object");
        };
        assert!(stripped.same(&obj));
    }

    #[test]
    fn stored_handles_are_unwrapped_to_raw() {
        let inner = reactive(Value::plain(vec![("x", Value::Int(1))]));
        let r = reactive_obj(vec![]);
        r.set("inner", inner);

        let data = r.target().data().read();
        let ObjData::Plain(m) = &*data else { unreachable!() };
        assert!(matches!(m.get("inner"), Some(Value::Obj(_))));
    }

    #[test]
    fn ref_slots_unwrap_and_write_through() {
        let cell = Ref::new(Value::Int(1));
        let r = reactive_obj(vec![("n", Value::Ref(cell.clone()))]);

        assert_eq!(r.get("n"), Value::Int(1));

        let (calls, count) = spy();
        let cell2 = cell.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            cell2.value();
        });
        assert_eq!(count(), 1);

        // A non-ref write lands inside the ref, not over it.
        r.set("n", Value::Int(2));
        assert_eq!(cell.value(), Value::Int(2));
        assert_eq!(count(), 2);

        // A ref write replaces the slot.
        let other = Ref::new(Value::Int(9));
        r.set("n", Value::Ref(other));
        assert_eq!(r.get("n"), Value::Int(9));
    }

    #[test]
    fn list_index_access_does_not_unwrap_refs() {
        let cell = Ref::new(Value::Int(1));
        let r = reactive_list(vec![Value::Ref(cell)]);
        assert!(matches!(r.get(0usize), Value::Ref(_)));
    }

    #[test]
    fn list_push_retriggers_length_readers() {
        let r = reactive_list(vec![Value::Int(1)]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.len();
        });
        assert_eq!(count(), 1);

        r.push(Value::Int(2));
        assert_eq!(count(), 2);
        assert_eq!(r.get(Key::Length), Value::Int(2));
    }

    #[test]
    fn truncation_retriggers_dropped_index_readers() {
        let r = reactive_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.get(2usize);
        });
        assert_eq!(count(), 1);

        r.set_len(1);
        assert_eq!(count(), 2);

        // Index 0 reader is untouched by the same truncation.
        let (calls0, count0) = spy();
        let r3 = r.clone();
        let _e0 = effect(move || {
            calls0.fetch_add(1, Ordering::SeqCst);
            r3.get(0usize);
        });
        r.set_len(0);
        assert_eq!(count0(), 2);
    }

    #[test]
    fn out_of_bounds_write_pads_with_null() {
        let r = reactive_list(vec![Value::Int(1)]);
        assert!(r.set(3usize, Value::Int(4)));
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(1usize), Value::Null);
        assert_eq!(r.get(3usize), Value::Int(4));
    }

    #[test]
    fn values_reader_sees_value_writes() {
        let r = reactive_obj(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.values();
        });
        assert_eq!(count(), 1);

        // Overwriting a value the iteration read must re-run the reader.
        r.set("a", Value::Int(9));
        assert_eq!(count(), 2);

        // A key that appears later is picked up on the next run.
        r.set("c", Value::Int(3));
        assert_eq!(count(), 3);
        r.set("c", Value::Int(4));
        assert_eq!(count(), 4);
    }

    #[test]
    fn in_place_splice_leaves_length_reader_alone() {
        let r = reactive_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let (len_calls, len_count) = spy();
        let (slot_calls, slot_count) = spy();

        let r2 = r.clone();
        let _len = effect(move || {
            len_calls.fetch_add(1, Ordering::SeqCst);
            r2.len();
        });
        let r3 = r.clone();
        let _slot = effect(move || {
            slot_calls.fetch_add(1, Ordering::SeqCst);
            r3.get(1usize);
        });

        // Same-length replacement: only the replaced slot's reader moves.
        r.splice(1, 1, vec![Value::Int(9)]);
        assert_eq!(len_count(), 1);
        assert_eq!(slot_count(), 2);
        assert_eq!(r.get(1usize), Value::Int(9));

        // A no-op splice triggers nothing.
        r.splice(1, 0, vec![]);
        assert_eq!(len_count(), 1);
        assert_eq!(slot_count(), 2);

        // A shrinking splice still reaches the length reader.
        r.splice(1, 1, vec![]);
        assert_eq!(len_count(), 2);
    }

    #[test]
    fn splice_invalidates_shifted_indices_only() {
        let r = reactive_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let (head_calls, head_count) = spy();
        let (tail_calls, tail_count) = spy();

        let r2 = r.clone();
        let _head = effect(move || {
            head_calls.fetch_add(1, Ordering::SeqCst);
            r2.get(0usize);
        });
        let r3 = r.clone();
        let _tail = effect(move || {
            tail_calls.fetch_add(1, Ordering::SeqCst);
            r3.get(2usize);
        });

        let removed = r.splice(1, 1, vec![]);
        assert_eq!(removed, vec![Value::Int(2)]);
        assert_eq!(head_count(), 1);
        assert_eq!(tail_count(), 2);
    }

    #[test]
    fn shift_and_unshift_reindex() {
        let r = reactive_list(vec![Value::Int(1), Value::Int(2)]);
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.get(0usize);
        });

        assert_eq!(r.shift(), Value::Int(1));
        assert_eq!(count(), 2);
        assert_eq!(r.get(0usize), Value::Int(2));

        r.unshift(vec![Value::Int(0)]);
        assert_eq!(count(), 3);
        assert_eq!(r.get(0usize), Value::Int(0));
    }

    #[test]
    fn search_finds_raw_through_wrapped_needle() {
        let obj = Obj::plain_from([("x", Value::Int(1))]);
        let r = reactive_list(vec![Value::Obj(obj.clone()), Value::Int(5)]);

        let wrapped = reactive(Value::Obj(obj));
        assert_eq!(r.index_of(&wrapped), Some(0));
        assert!(r.includes(&Value::Int(5)));
        assert_eq!(r.last_index_of(&Value::Int(99)), None);
    }

    #[test]
    fn keyed_set_retriggers_entry_iteration() {
        let v = reactive(Value::keyed(vec![("a", Value::Int(1))]));
        let Value::Reactive(r) = v else { unreachable!() };
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.values();
        });
        assert_eq!(count(), 1);

        // Unlike plain objects, a keyed value write moves entry iteration.
        r.set("a", Value::Int(2));
        assert_eq!(count(), 2);
    }

    #[test]
    fn keyed_key_iteration_ignores_value_writes() {
        let v = reactive(Value::keyed(vec![("a", Value::Int(1))]));
        let Value::Reactive(r) = v else { unreachable!() };
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.keys();
        });

        r.set("a", Value::Int(2));
        assert_eq!(count(), 1);

        r.set("b", Value::Int(3));
        assert_eq!(count(), 2);
    }

    #[test]
    fn clear_notifies_every_subscriber() {
        let v = reactive(Value::keyed(vec![("a", Value::Int(1))]));
        let Value::Reactive(r) = v else { unreachable!() };
        let (calls, count) = spy();

        let r2 = r.clone();
        let _e = effect(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            r2.get("a");
        });
        assert_eq!(count(), 1);

        assert!(r.clear());
        assert_eq!(count(), 2);
        assert_eq!(r.len(), 0);
    }
}
