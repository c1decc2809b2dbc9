//! Topology and task configuration.
//!
//! Every knob the runtime reads is an explicit field here, validated when the
//! topology is built. Configuration can be written in code with the `with_*`
//! methods or loaded from JSON:
//!
//! ```json
//! {
//!   "queue": { "capacity": 256, "overflow": "drop_oldest" },
//!   "shutdown": "drain",
//!   "tasks": { "word_count": { "parallelism": 4 } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::RuntimeError;

/// Default inbound queue capacity per task instance.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default pause between `next_tuple` calls when a source reports it is idle.
pub const DEFAULT_SOURCE_IDLE_BACKOFF_MS: u64 = 1;

/// What a producer does when a bounded inbound queue is full.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
  /// Wait until the consumer frees a slot.
  #[default]
  Block,
  /// Discard the incoming record.
  DropNewest,
  /// Evict the oldest queued data record to make room. Ticks are never evicted.
  DropOldest,
}

/// Bound and overflow behaviour of every inbound queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Maximum queued records per instance. `None` lets queues grow without bound.
  pub capacity: Option<usize>,
  /// Policy applied when `capacity` is reached.
  pub overflow: OverflowPolicy,
}

impl QueueConfig {
  /// Bounded queue with the given capacity and policy.
  pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
    Self {
      capacity: Some(capacity),
      overflow,
    }
  }

  /// Queue that never applies backpressure.
  pub fn unbounded() -> Self {
    Self {
      capacity: None,
      overflow: OverflowPolicy::Block,
    }
  }
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self::bounded(DEFAULT_QUEUE_CAPACITY, OverflowPolicy::Block)
  }
}

/// What happens to queued records on shutdown.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
  /// Stop every instance right away; queued records are dropped.
  #[default]
  Abandon,
  /// Stop sources and timers, then let each stage empty its queues before
  /// stopping the next one.
  Drain,
}

/// Per-task settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
  /// Number of concurrently running instances.
  pub parallelism: u32,
  /// Seconds between tick records. `None` means the task never receives ticks.
  pub tick_interval_secs: Option<u32>,
}

impl TaskConfig {
  /// Configuration with the given parallelism and no ticks.
  pub fn new(parallelism: u32) -> Self {
    Self {
      parallelism,
      tick_interval_secs: None,
    }
  }

  /// Sets the parallelism.
  pub fn with_parallelism(mut self, parallelism: u32) -> Self {
    self.parallelism = parallelism;
    self
  }

  /// Sets the tick interval in seconds.
  pub fn with_tick_interval_secs(mut self, secs: u32) -> Self {
    self.tick_interval_secs = Some(secs);
    self
  }

  /// Tick interval as a duration, if configured.
  pub fn tick_interval(&self) -> Option<Duration> {
    self
      .tick_interval_secs
      .map(|secs| Duration::from_secs(u64::from(secs)))
  }
}

impl Default for TaskConfig {
  fn default() -> Self {
    Self::new(1)
  }
}

/// Per-task override from a [`TopologyConfig`].
///
/// Only the fields that are set replace the declared [`TaskConfig`]; the rest
/// of the declaration is kept.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOverride {
  /// Replacement parallelism.
  pub parallelism: Option<u32>,
  /// Replacement tick interval in seconds.
  pub tick_interval_secs: Option<u32>,
}

impl TaskOverride {
  /// Overrides the parallelism.
  pub fn with_parallelism(mut self, parallelism: u32) -> Self {
    self.parallelism = Some(parallelism);
    self
  }

  /// Overrides the tick interval.
  pub fn with_tick_interval_secs(mut self, secs: u32) -> Self {
    self.tick_interval_secs = Some(secs);
    self
  }

  /// Lays the set fields over `declared`.
  pub fn apply(&self, declared: TaskConfig) -> TaskConfig {
    TaskConfig {
      parallelism: self.parallelism.unwrap_or(declared.parallelism),
      tick_interval_secs: self.tick_interval_secs.or(declared.tick_interval_secs),
    }
  }
}

impl From<TaskConfig> for TaskOverride {
  fn from(config: TaskConfig) -> Self {
    Self {
      parallelism: Some(config.parallelism),
      tick_interval_secs: config.tick_interval_secs,
    }
  }
}

/// Topology-wide settings, plus optional per-task overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
  /// Inbound queue settings shared by every instance.
  pub queue: QueueConfig,
  /// Shutdown behaviour.
  pub shutdown: ShutdownPolicy,
  /// Pause between polls of an idle source, in milliseconds.
  pub source_idle_backoff_ms: Option<u64>,
  /// Overrides keyed by task name, applied when the topology is built.
  pub tasks: HashMap<String, TaskOverride>,
}

impl TopologyConfig {
  /// Parses a configuration from a JSON string.
  pub fn from_json_str(json: &str) -> Result<Self, RuntimeError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Reads and parses a JSON configuration file.
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  /// Sets the queue configuration.
  pub fn with_queue(mut self, queue: QueueConfig) -> Self {
    self.queue = queue;
    self
  }

  /// Sets the shutdown policy.
  pub fn with_shutdown(mut self, shutdown: ShutdownPolicy) -> Self {
    self.shutdown = shutdown;
    self
  }

  /// Sets the idle backoff for sources.
  pub fn with_source_idle_backoff(mut self, backoff: Duration) -> Self {
    self.source_idle_backoff_ms = Some(backoff.as_millis() as u64);
    self
  }

  /// Overrides the configuration of one task.
  ///
  /// A full [`TaskConfig`] is accepted too; its tick interval only applies
  /// when set.
  pub fn with_task(mut self, name: impl Into<String>, task: impl Into<TaskOverride>) -> Self {
    self.tasks.insert(name.into(), task.into());
    self
  }

  /// Idle backoff for sources.
  pub fn source_idle_backoff(&self) -> Duration {
    Duration::from_millis(
      self
        .source_idle_backoff_ms
        .unwrap_or(DEFAULT_SOURCE_IDLE_BACKOFF_MS),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_bounded_block_and_abandon() {
    let config = TopologyConfig::default();
    assert_eq!(config.queue.capacity, Some(DEFAULT_QUEUE_CAPACITY));
    assert_eq!(config.queue.overflow, OverflowPolicy::Block);
    assert_eq!(config.shutdown, ShutdownPolicy::Abandon);
    assert_eq!(config.source_idle_backoff(), Duration::from_millis(1));
  }

  #[test]
  fn test_parse_json_with_overrides() {
    let config = TopologyConfig::from_json_str(
      r#"{
        "queue": { "capacity": 8, "overflow": "drop_oldest" },
        "shutdown": "drain",
        "tasks": { "word_count_bolt": { "parallelism": 4, "tick_interval_secs": 3 } }
      }"#,
    )
    .unwrap();

    assert_eq!(config.queue, QueueConfig::bounded(8, OverflowPolicy::DropOldest));
    assert_eq!(config.shutdown, ShutdownPolicy::Drain);
    let task = config.tasks["word_count_bolt"];
    assert_eq!(task.parallelism, Some(4));
    assert_eq!(task.tick_interval_secs, Some(3));
  }

  #[test]
  fn test_partial_task_override_keeps_declared_tick() {
    let config =
      TopologyConfig::from_json_str(r#"{ "tasks": { "count": { "parallelism": 4 } } }"#).unwrap();
    let declared = TaskConfig::new(2).with_tick_interval_secs(3);
    let effective = config.tasks["count"].apply(declared);
    assert_eq!(effective.parallelism, 4);
    assert_eq!(effective.tick_interval(), Some(Duration::from_secs(3)));
    assert_eq!(config.queue, QueueConfig::default());
  }

  #[test]
  fn test_override_replaces_tick_only_when_set() {
    let declared = TaskConfig::new(2).with_tick_interval_secs(3);
    let faster = TaskOverride::default().with_tick_interval_secs(1);
    assert_eq!(faster.apply(declared), TaskConfig::new(2).with_tick_interval_secs(1));
    assert_eq!(TaskOverride::from(TaskConfig::new(5)).apply(declared), TaskConfig::new(5).with_tick_interval_secs(3));
  }

  #[test]
  fn test_invalid_json_is_a_config_error() {
    let err = TopologyConfig::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, RuntimeError::Config(_)));
  }
}
