//! Dynamic Value Model
//!
//! The reactivity runtime is domain-agnostic: it tracks reads and writes on
//! loosely shaped data the way a UI framework's render functions consume it.
//! This module provides that data shape.
//!
//! # Concepts
//!
//! - [`Value`] is the universal slot type: scalars, strings, heap objects,
//!   tracked containers, and refs all flow through it.
//!
//! - [`Obj`] is a cheap-clone handle to a shared heap object. An object is
//!   one of three shapes: `Plain` (a struct-like string-keyed record),
//!   `List` (an array), or `Keyed` (a map collection whose key set is
//!   tracked independently of its values).
//!
//! - [`Key`] is the dependency key space: property names, list indices, the
//!   list length, and the two iteration sentinels.
//!
//! # Identity and equality
//!
//! Objects and refs compare by identity, scalars by value. Change detection
//! everywhere in the runtime uses SameValueZero semantics: `Float` NaN is
//! equal to NaN, so writing NaN over NaN does not trigger. There is no
//! cross-type numeric equality (`Int(1) != Float(1.0)`).
//!
//! # Lifetime
//!
//! Dropping the last handle to an [`Obj`] purges its entry in the global
//! dependency registry, so registry bookkeeping never keeps a dead owner's
//! key table alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::reactive::container::Reactive;
use crate::reactive::reference::Ref;

/// Counter for generating unique object IDs.
static OBJ_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a heap object.
///
/// The dependency registry is keyed by `ObjId`, not by the object itself, so
/// registry entries never hold a strong reference to their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(u64);

impl ObjId {
    fn next() -> Self {
        Self(OBJ_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The shape of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    /// Struct-like record with string keys.
    Plain,
    /// Array-like sequence with integer indices and a length.
    List,
    /// Map collection; iteration over its keys is tracked separately from
    /// iteration over its entries.
    Keyed,
}

/// Object storage, behind the owner's lock.
pub enum ObjData {
    Plain(IndexMap<Arc<str>, Value>),
    List(Vec<Value>),
    Keyed(IndexMap<Arc<str>, Value>),
}

impl ObjData {
    pub fn kind(&self) -> ObjKind {
        match self {
            ObjData::Plain(_) => ObjKind::Plain,
            ObjData::List(_) => ObjKind::List,
            ObjData::Keyed(_) => ObjKind::Keyed,
        }
    }
}

struct ObjInner {
    id: ObjId,
    /// Set by `mark_raw`; a skipped object is never wrapped.
    skip: AtomicBool,
    data: RwLock<ObjData>,
}

impl Drop for ObjInner {
    fn drop(&mut self) {
        crate::reactive::dep::purge_target(self.id);
    }
}

/// A shared heap object: the raw target that tracked containers wrap.
///
/// Cloning is cheap (reference-counted); clones share storage and identity.
#[derive(Clone)]
pub struct Obj {
    inner: Arc<ObjInner>,
}

impl Obj {
    fn new(data: ObjData) -> Self {
        Self {
            inner: Arc::new(ObjInner {
                id: ObjId::next(),
                skip: AtomicBool::new(false),
                data: RwLock::new(data),
            }),
        }
    }

    /// Create an empty struct-like object.
    pub fn plain() -> Self {
        Self::new(ObjData::Plain(IndexMap::new()))
    }

    /// Create an empty list.
    pub fn list() -> Self {
        Self::new(ObjData::List(Vec::new()))
    }

    /// Create an empty keyed collection.
    pub fn keyed() -> Self {
        Self::new(ObjData::Keyed(IndexMap::new()))
    }

    /// Create a struct-like object from entries.
    pub fn plain_from<K, I>(entries: I) -> Self
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::new(ObjData::Plain(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Create a list from items.
    pub fn list_from<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::new(ObjData::List(items.into_iter().collect()))
    }

    /// Create a keyed collection from entries.
    pub fn keyed_from<K, I>(entries: I) -> Self
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::new(ObjData::Keyed(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn id(&self) -> ObjId {
        self.inner.id
    }

    pub fn kind(&self) -> ObjKind {
        self.inner.data.read().kind()
    }

    /// Whether this object was opted out of wrapping via `mark_raw`.
    pub fn is_skipped(&self) -> bool {
        self.inner.skip.load(Ordering::Relaxed)
    }

    pub(crate) fn set_skip(&self) {
        self.inner.skip.store(true, Ordering::Relaxed);
    }

    pub(crate) fn data(&self) -> &RwLock<ObjData> {
        &self.inner.data
    }

    /// Identity comparison.
    pub fn same(&self, other: &Obj) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .finish()
    }
}

/// A key in the dependency registry: what an effect's read was keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A named property (plain objects and keyed collections).
    Prop(Arc<str>),
    /// A list index.
    Index(usize),
    /// The list length; also the list iteration key.
    Length,
    /// "Iterate over all entries" sentinel for non-indexed owners.
    Iterate,
    /// "Iterate over map keys" sentinel for keyed collections.
    KeyIterate,
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Prop(Arc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Prop(Arc::from(s.as_str()))
    }
}

impl From<Arc<str>> for Key {
    fn from(s: Arc<str>) -> Self {
        Key::Prop(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

/// Error from typed extraction out of a [`Value`].
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

/// The universal slot type flowing through the runtime.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A raw heap object.
    Obj(Obj),
    /// A tracked container handle over a heap object.
    Reactive(Reactive),
    /// A single-value tracked cell.
    Ref(Ref),
}

impl Value {
    /// Convenience constructor for a raw struct-like object.
    pub fn plain<K, I>(entries: I) -> Value
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Obj(Obj::plain_from(entries))
    }

    /// Convenience constructor for a raw list.
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Obj(Obj::list_from(items))
    }

    /// Convenience constructor for a raw keyed collection.
    pub fn keyed<K, I>(entries: I) -> Value
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Obj(Obj::keyed_from(entries))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Obj(_) => "object",
            Value::Reactive(_) => "reactive",
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ref_cell(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

/// SameValueZero comparison: identity for objects/refs, value for scalars,
/// NaN equal to NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.same(b),
            (Value::Reactive(a), Value::Reactive(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Obj(o) => o.fmt(f),
            Value::Reactive(r) => r.fmt(f),
            Value::Ref(_) => write!(f, "Ref(..)"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Obj> for Value {
    fn from(o: Obj) -> Self {
        Value::Obj(o)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

impl TryFrom<Value> for i64 {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_int().ok_or(ValueError::WrongType {
            expected: "int",
            found: v.type_name(),
        })
    }
}

impl TryFrom<Value> for f64 {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_float().ok_or(ValueError::WrongType {
            expected: "float",
            found: v.type_name(),
        })
    }
}

impl TryFrom<Value> for bool {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        v.as_bool().ok_or(ValueError::WrongType {
            expected: "bool",
            found: v.type_name(),
        })
    }
}

impl TryFrom<Value> for String {
    type Error = ValueError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(ValueError::WrongType {
                expected: "string",
                found: other.type_name(),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_ids_are_unique() {
        let a = Obj::plain();
        let b = Obj::plain();
        let c = Obj::list();

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
    }

    #[test]
    fn obj_clone_shares_identity() {
        let a = Obj::plain_from([("x", Value::Int(1))]);
        let b = a.clone();

        assert!(a.same(&b));
        assert_eq!(a.id(), b.id());
        assert_eq!(Value::Obj(a), Value::Obj(b));
    }

    #[test]
    fn distinct_objs_compare_unequal() {
        let a = Obj::plain();
        let b = Obj::plain();
        assert_ne!(Value::Obj(a), Value::Obj(b));
    }

    #[test]
    fn same_value_zero_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(1.0), Value::Float(2.0));
    }

    #[test]
    fn no_cross_type_numeric_equality() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn typed_extraction_errors() {
        let v = Value::Str(Arc::from("hello"));
        let err = i64::try_from(v).unwrap_err();
        assert_eq!(err.to_string(), "expected int, found string");

        assert_eq!(i64::try_from(Value::Int(7)).unwrap(), 7);
        assert_eq!(String::try_from(Value::from("hi")).unwrap(), "hi");
    }

    #[test]
    fn key_conversions() {
        assert_eq!(Key::from("name"), Key::Prop(Arc::from("name")));
        assert_eq!(Key::from(3usize), Key::Index(3));
    }
}
