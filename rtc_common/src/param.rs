//! Named, typed parameter values and the store they are looked up from.
//!
//! Engines never own the parameter store. They see it through
//! [`ParamSource`], which hands out cheap reference-counted snapshots of
//! each value so an accepted configuration can keep using an array after
//! the store has moved on.
//!
//! [`ParamBuffer`] is the in-process store. It can be filled
//! programmatically or deserialized from a TOML table where every entry
//! names its element type:
//!
//! ```toml
//! nacts       = { int = 4 }
//! actMax      = { ushort = [1000, 1000, 1000, 1000] }
//! calmult     = { float = [1.0, 2.0] }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ─── Element Types ──────────────────────────────────────────────────

/// Element type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Signed 32-bit integer.
    Int,
    /// 32-bit IEEE float.
    Float,
    /// Unsigned 16-bit integer.
    UShort,
}

impl DType {
    /// Single-character type code used in diagnostics.
    pub const fn code(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Float => 'f',
            Self::UShort => 'H',
        }
    }

    /// Size of one element in bytes.
    pub const fn elem_size(self) -> usize {
        match self {
            Self::Int | Self::Float => 4,
            Self::UShort => 2,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ─── Values ─────────────────────────────────────────────────────────

/// A typed parameter value. Scalars are one-element arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// `i32` elements.
    Int(Arc<[i32]>),
    /// `f32` elements.
    Float(Arc<[f32]>),
    /// `u16` elements.
    UShort(Arc<[u16]>),
}

impl ParamValue {
    /// Element type of this value.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int(_) => DType::Int,
            Self::Float(_) => DType::Float,
            Self::UShort(_) => DType::UShort,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::UShort(v) => v.len(),
        }
    }

    /// True when the value carries no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload size in bytes.
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().elem_size()
    }

    /// Borrow as `i32` elements.
    pub fn as_ints(&self) -> Option<&Arc<[i32]>> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as `f32` elements.
    pub fn as_floats(&self) -> Option<&Arc<[f32]>> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as `u16` elements.
    pub fn as_ushorts(&self) -> Option<&Arc<[u16]>> {
        match self {
            Self::UShort(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(Arc::from([v]))
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(Arc::from([v]))
    }
}

impl From<Vec<i32>> for ParamValue {
    fn from(v: Vec<i32>) -> Self {
        Self::Int(v.into())
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        Self::Float(v.into())
    }
}

impl From<Vec<u16>> for ParamValue {
    fn from(v: Vec<u16>) -> Self {
        Self::UShort(v.into())
    }
}

impl From<&[i32]> for ParamValue {
    fn from(v: &[i32]) -> Self {
        Self::Int(v.into())
    }
}

impl From<&[f32]> for ParamValue {
    fn from(v: &[f32]) -> Self {
        Self::Float(v.into())
    }
}

impl From<&[u16]> for ParamValue {
    fn from(v: &[u16]) -> Self {
        Self::UShort(v.into())
    }
}

// ─── Source Trait ───────────────────────────────────────────────────

/// Lookup of named parameters.
///
/// Implementations must be cheap to query; engines call [`ParamSource::get`]
/// once per name on every reconfiguration.
pub trait ParamSource {
    /// Current value of `name`, or `None` if the store has no such entry.
    fn get(&self, name: &str) -> Option<ParamValue>;
}

impl<S: ParamSource + ?Sized> ParamSource for &S {
    fn get(&self, name: &str) -> Option<ParamValue> {
        (**self).get(name)
    }
}

impl<S: ParamSource + ?Sized> ParamSource for Arc<S> {
    fn get(&self, name: &str) -> Option<ParamValue> {
        (**self).get(name)
    }
}

// ─── In-Process Store ───────────────────────────────────────────────

/// Map-backed parameter store.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "BTreeMap<String, ParamEntry>")]
pub struct ParamBuffer {
    values: BTreeMap<String, ParamValue>,
}

impl ParamBuffer {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Builder-style [`ParamBuffer::set`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Remove `name`, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.values.remove(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl ParamSource for ParamBuffer {
    fn get(&self, name: &str) -> Option<ParamValue> {
        self.values.get(name).cloned()
    }
}

/// Serialized form of one store entry: `{ int = .. }`, `{ float = .. }` or
/// `{ ushort = .. }`, each holding a scalar or an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamEntry {
    /// `i32` entry.
    Int(OneOrMany<i32>),
    /// `f32` entry.
    Float(OneOrMany<f32>),
    /// `u16` entry.
    UShort(OneOrMany<u16>),
}

/// A scalar or an array in the serialized form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Scalar.
    One(T),
    /// Array.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

impl From<ParamEntry> for ParamValue {
    fn from(entry: ParamEntry) -> Self {
        match entry {
            ParamEntry::Int(v) => v.into_vec().into(),
            ParamEntry::Float(v) => v.into_vec().into(),
            ParamEntry::UShort(v) => v.into_vec().into(),
        }
    }
}

impl From<BTreeMap<String, ParamEntry>> for ParamBuffer {
    fn from(entries: BTreeMap<String, ParamEntry>) -> Self {
        Self {
            values: entries
                .into_iter()
                .map(|(name, entry)| (name, entry.into()))
                .collect(),
        }
    }
}
