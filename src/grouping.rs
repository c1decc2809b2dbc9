//! # Grouping Strategies
//!
//! A grouping decides which instance(s) of a consumer task receive a tuple
//! emitted on an edge. It is declared per edge with [`Grouping`] and turned
//! into a [`GroupingStrategy`] object when the topology is built.
//!
//! ## Strategies
//!
//! - **Shuffle**: round-robin over the consumer instances, one cursor per edge
//!   shared by every producer instance
//! - **Fields**: `stable_hash(values) % n`, so equal values always land on the
//!   same instance for the life of the topology
//! - **Broadcast**: every instance
//! - **Global**: always instance 0
//!
//! Ticks never go through a grouping; the scheduler delivers them to every
//! instance of a ticking task.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::RoutingError;
use crate::record::Tuple;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Separator hashed between values when grouping on several fields.
const FIELD_SEPARATOR: u8 = 0xff;

/// 64-bit FNV-1a over a byte slice.
///
/// This is the hash behind fields grouping and must never change: routing of
/// a running topology depends on it.
pub fn stable_hash(bytes: &[u8]) -> u64 {
  fnv1a_extend(FNV_OFFSET_BASIS, bytes)
}

fn fnv1a_extend(mut hash: u64, bytes: &[u8]) -> u64 {
  for byte in bytes {
    hash ^= u64::from(*byte);
    hash = hash.wrapping_mul(FNV_PRIME);
  }
  hash
}

/// Routes tuples of one edge to consumer instance indices.
///
/// Implementations must return indices in `[0, instance_count)` and never an
/// empty set for `instance_count >= 1`.
pub trait GroupingStrategy: Send + Sync {
  /// Computes the destination instances for `tuple`.
  fn route(&self, tuple: &Tuple, instance_count: usize) -> Result<Vec<usize>, RoutingError>;

  /// Fields the strategy reads, checked against the producer's declared
  /// outputs when the topology is built.
  fn required_fields(&self) -> &[String] {
    &[]
  }
}

/// Declarative grouping attached to an edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum Grouping {
  /// Round-robin distribution.
  Shuffle,
  /// Hash partitioning on the named fields.
  Fields(Vec<String>),
  /// Every instance receives every tuple.
  Broadcast,
  /// Everything goes to instance 0.
  Global,
}

impl Grouping {
  /// Fields grouping on a single field.
  pub fn fields(name: impl Into<String>) -> Self {
    Grouping::Fields(vec![name.into()])
  }

  /// Builds the strategy object for one edge.
  ///
  /// `producer` is used in routing error reports.
  pub fn into_strategy(self, producer: &str) -> Arc<dyn GroupingStrategy> {
    match self {
      Grouping::Shuffle => Arc::new(ShuffleGrouping::new()),
      Grouping::Fields(names) => Arc::new(FieldsGrouping::new(producer, names)),
      Grouping::Broadcast => Arc::new(BroadcastGrouping),
      Grouping::Global => Arc::new(GlobalGrouping),
    }
  }
}

impl fmt::Display for Grouping {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Grouping::Shuffle => f.write_str("shuffle"),
      Grouping::Fields(names) => write!(f, "fields({})", names.join(", ")),
      Grouping::Broadcast => f.write_str("broadcast"),
      Grouping::Global => f.write_str("global"),
    }
  }
}

/// Round-robin grouping.
#[derive(Debug, Default)]
pub struct ShuffleGrouping {
  cursor: AtomicUsize,
}

impl ShuffleGrouping {
  /// Creates a grouping starting at instance 0.
  pub fn new() -> Self {
    Self::default()
  }
}

impl GroupingStrategy for ShuffleGrouping {
  fn route(&self, _tuple: &Tuple, instance_count: usize) -> Result<Vec<usize>, RoutingError> {
    let next = self.cursor.fetch_add(1, Ordering::Relaxed);
    Ok(vec![next % instance_count.max(1)])
  }
}

/// Hash partitioning on one or more fields.
#[derive(Debug)]
pub struct FieldsGrouping {
  producer: String,
  names: Vec<String>,
}

impl FieldsGrouping {
  /// Creates a fields grouping for tuples emitted by `producer`.
  pub fn new(producer: impl Into<String>, names: Vec<String>) -> Self {
    Self {
      producer: producer.into(),
      names,
    }
  }

  /// Hash of the grouped values of `tuple`.
  pub fn key_hash(&self, tuple: &Tuple) -> Result<u64, RoutingError> {
    let mut hash = FNV_OFFSET_BASIS;
    for (i, name) in self.names.iter().enumerate() {
      let value = tuple.get(name).ok_or_else(|| RoutingError::MissingField {
        producer: self.producer.clone(),
        field: name.clone(),
      })?;
      if i > 0 {
        hash = fnv1a_extend(hash, &[FIELD_SEPARATOR]);
      }
      hash = fnv1a_extend(hash, value.to_string().as_bytes());
    }
    Ok(hash)
  }
}

impl GroupingStrategy for FieldsGrouping {
  fn route(&self, tuple: &Tuple, instance_count: usize) -> Result<Vec<usize>, RoutingError> {
    let hash = self.key_hash(tuple)?;
    Ok(vec![(hash % instance_count.max(1) as u64) as usize])
  }

  fn required_fields(&self) -> &[String] {
    &self.names
  }
}

/// Sends every tuple to every instance.
#[derive(Debug, Default)]
pub struct BroadcastGrouping;

impl GroupingStrategy for BroadcastGrouping {
  fn route(&self, _tuple: &Tuple, instance_count: usize) -> Result<Vec<usize>, RoutingError> {
    Ok((0..instance_count).collect())
  }
}

/// Sends every tuple to instance 0.
#[derive(Debug, Default)]
pub struct GlobalGrouping;

impl GroupingStrategy for GlobalGrouping {
  fn route(&self, _tuple: &Tuple, _instance_count: usize) -> Result<Vec<usize>, RoutingError> {
    Ok(vec![0])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::Fields;
  use crate::topology::{InstanceId, TaskId};

  fn tuple(fields: Fields) -> Tuple {
    Tuple::new(InstanceId::new(TaskId(0), 0), fields)
  }

  fn word(w: &str) -> Tuple {
    tuple(Fields::new().with("word", w))
  }

  #[test]
  fn test_fnv1a_reference_values() {
    assert_eq!(stable_hash(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(stable_hash(b"a"), 0xaf63_dc4c_8601_ec8c);
    assert_eq!(stable_hash(b"foobar"), 0x8594_4171_f739_67e8);
  }

  #[test]
  fn test_single_field_route_is_hash_mod_n() {
    let grouping = FieldsGrouping::new("split", vec!["word".to_string()]);
    for n in 1..=7 {
      let expected = (stable_hash(b"heron") % n as u64) as usize;
      assert_eq!(grouping.route(&word("heron"), n).unwrap(), vec![expected]);
    }
  }

  #[test]
  fn test_fields_grouping_is_deterministic() {
    let grouping = Grouping::fields("word").into_strategy("split");
    for w in ["the", "cat", "sat", "ran", "heron"] {
      for n in 1..=8 {
        let first = grouping.route(&word(w), n).unwrap();
        let second = grouping.route(&word(w), n).unwrap();
        assert_eq!(first, second);
      }
    }
  }

  #[test]
  fn test_fields_grouping_ignores_other_fields() {
    let grouping = Grouping::fields("word").into_strategy("split");
    let a = tuple(Fields::new().with("word", "cat").with("line", 1i64));
    let b = tuple(Fields::new().with("line", 99i64).with("word", "cat"));
    assert_eq!(grouping.route(&a, 5).unwrap(), grouping.route(&b, 5).unwrap());
  }

  #[test]
  fn test_shuffle_and_fields_cover_range_with_one_destination() {
    let shuffle = ShuffleGrouping::new();
    let fields = FieldsGrouping::new("split", vec!["word".to_string()]);
    for n in 1..=9 {
      for i in 0..50 {
        let t = word(&format!("w{i}"));
        for dests in [shuffle.route(&t, n).unwrap(), fields.route(&t, n).unwrap()] {
          assert_eq!(dests.len(), 1);
          assert!(dests[0] < n);
        }
      }
    }
  }

  #[test]
  fn test_shuffle_round_robins() {
    let shuffle = ShuffleGrouping::new();
    let picks: Vec<usize> = (0..6)
      .map(|_| shuffle.route(&word("x"), 3).unwrap()[0])
      .collect();
    assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
  }

  #[test]
  fn test_missing_field_is_a_routing_error() {
    let grouping = Grouping::fields("word").into_strategy("split");
    let err = grouping
      .route(&tuple(Fields::new().with("sentence", "x")), 2)
      .unwrap_err();
    assert_eq!(
      err,
      RoutingError::MissingField {
        producer: "split".to_string(),
        field: "word".to_string(),
      }
    );
  }

  #[test]
  fn test_multi_field_grouping_separates_values() {
    let grouping = FieldsGrouping::new("p", vec!["a".to_string(), "b".to_string()]);
    let ab_c = tuple(Fields::new().with("a", "ab").with("b", "c"));
    let a_bc = tuple(Fields::new().with("a", "a").with("b", "bc"));
    assert_ne!(grouping.key_hash(&ab_c).unwrap(), grouping.key_hash(&a_bc).unwrap());
  }

  #[test]
  fn test_broadcast_and_global() {
    assert_eq!(BroadcastGrouping.route(&word("x"), 3).unwrap(), vec![0, 1, 2]);
    assert_eq!(GlobalGrouping.route(&word("x"), 3).unwrap(), vec![0]);
  }

  #[test]
  fn test_grouping_serde_shape() {
    let json = serde_json::to_string(&Grouping::fields("word")).unwrap();
    assert_eq!(json, r#"{"type":"fields","fields":["word"]}"#);
    let parsed: Grouping = serde_json::from_str(r#"{"type":"shuffle"}"#).unwrap();
    assert_eq!(parsed, Grouping::Shuffle);
  }
}
