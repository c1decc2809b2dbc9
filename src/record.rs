//! # Records
//!
//! The atomic units flowing through a topology. A [`Record`] is either a data
//! [`Tuple`] emitted by a task, or a [`Tick`] injected by the scheduler's
//! timer.
//!
//! Tuple fields are immutable once emitted. They live behind an `Arc`, so
//! fanning a tuple out to several instances (broadcast, or several outbound
//! edges) only bumps a reference count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::topology::InstanceId;

/// A single field value.
///
/// The `Display` form of a value is its string representation; fields
/// grouping hashes that representation, so two values that print the same
/// route the same way.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  /// UTF-8 string.
  Str(String),
  /// Signed integer.
  Int(i64),
  /// Floating point number.
  Float(f64),
  /// Boolean.
  Bool(bool),
}

impl Value {
  /// Returns the string slice if this is a [`Value::Str`].
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  /// Returns the integer if this is a [`Value::Int`].
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Str(s) => f.write_str(s),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(x) => write!(f, "{x}"),
      Value::Bool(b) => write!(f, "{b}"),
    }
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<u64> for Value {
  fn from(i: u64) -> Self {
    Value::Int(i as i64)
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::Float(x)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

/// Ordered mapping from field name to value, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
  /// Creates an empty field set.
  pub fn new() -> Self {
    Self(Vec::new())
  }

  /// Appends a field, replacing an earlier field with the same name.
  pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    let name = name.into();
    let value = value.into();
    match self.0.iter_mut().find(|(n, _)| *n == name) {
      Some(slot) => slot.1 = value,
      None => self.0.push((name, value)),
    }
    self
  }

  /// Looks a field up by name.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
  }

  /// Iterates over `(name, value)` pairs in emission order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v))
  }

  /// Number of fields.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether the field set is empty.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
  K: Into<String>,
  V: Into<Value>,
{
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    iter
      .into_iter()
      .fold(Fields::new(), |fields, (k, v)| fields.with(k, v))
  }
}

/// A data record emitted by a task.
#[derive(Clone, Debug)]
pub struct Tuple {
  source: InstanceId,
  fields: Arc<Fields>,
}

impl Tuple {
  pub(crate) fn new(source: InstanceId, fields: Fields) -> Self {
    Self {
      source,
      fields: Arc::new(fields),
    }
  }

  /// The instance that emitted this tuple.
  pub fn source(&self) -> InstanceId {
    self.source
  }

  /// All fields of the tuple.
  pub fn fields(&self) -> &Fields {
    &self.fields
  }

  /// Looks a field up by name.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.fields.get(name)
  }

  /// Looks a string field up by name.
  pub fn get_str(&self, name: &str) -> Option<&str> {
    self.get(name).and_then(Value::as_str)
  }

  /// Looks an integer field up by name.
  pub fn get_int(&self, name: &str) -> Option<i64> {
    self.get(name).and_then(Value::as_int)
  }
}

/// A timer record delivered to every instance of a ticking task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
  /// Wall-clock time at which the timer fired.
  pub timestamp: DateTime<Utc>,
  /// Per-task sequence number, starting at 1.
  pub sequence: u64,
}

/// What travels through an inbound queue.
#[derive(Clone, Debug)]
pub enum Record {
  /// Data emitted by an upstream task.
  Data(Tuple),
  /// Timer record injected by the scheduler.
  Tick(Tick),
}

impl Record {
  /// Whether this record is a tick.
  pub fn is_tick(&self) -> bool {
    matches!(self, Record::Tick(_))
  }
}
