//! # Error Handling
//!
//! Error taxonomy for building and running topologies.
//!
//! - **BuildError**: the declared graph is invalid. Fatal, the topology never starts.
//! - **RoutingError**: a single tuple could not be routed (e.g. it lacks a grouped
//!   field). The tuple is dropped and the producing instance keeps running.
//! - **TaskError**: what user components return from their callbacks.
//! - **TaskFailure**: a task instance failed (error or panic). Fatal to that
//!   instance only; reported to the [`Runtime`](crate::runtime::Runtime).
//! - **RuntimeError**: misuse of the runtime lifecycle or bad configuration.

use serde::Serialize;
use thiserror::Error;

/// Error type returned by [`Source`](crate::task::Source) and
/// [`Processor`](crate::task::Processor) callbacks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Errors detected while building a topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// No task was declared.
  #[error("topology '{0}' declares no tasks")]
  Empty(String),

  /// The topology configures bounded queues with room for nothing.
  #[error("topology '{0}' configures a queue capacity of zero")]
  InvalidQueueCapacity(String),

  /// Two tasks share a name.
  #[error("duplicate task name: {0}")]
  DuplicateName(String),

  /// A task was configured with a parallelism of zero.
  #[error("task '{task}' must have a positive parallelism")]
  InvalidParallelism {
    /// Offending task.
    task: String,
  },

  /// A task was configured with a zero tick interval.
  #[error("task '{task}' must have a positive tick interval")]
  InvalidTickInterval {
    /// Offending task.
    task: String,
  },

  /// A processor declares no inputs.
  #[error("processor '{task}' declares no inputs")]
  MissingInputs {
    /// Offending task.
    task: String,
  },

  /// A source declares inputs.
  #[error("source '{task}' cannot declare inputs")]
  SourceWithInputs {
    /// Offending task.
    task: String,
  },

  /// An input references a task that was never declared.
  #[error("task '{task}' reads from unknown task '{upstream}'")]
  UnknownUpstream {
    /// Consumer declaring the input.
    task: String,
    /// Name that could not be resolved.
    upstream: String,
  },

  /// The edges do not form a DAG.
  #[error("cycle detected between tasks: {}", .tasks.join(", "))]
  Cycle {
    /// Tasks that could not be ordered because they sit on or behind a cycle.
    tasks: Vec<String>,
  },

  /// A fields grouping names a field its producer does not declare.
  #[error("task '{consumer}' groups on field '{field}' which '{producer}' does not emit")]
  InvalidField {
    /// Upstream task.
    producer: String,
    /// Downstream task declaring the grouping.
    consumer: String,
    /// Missing field.
    field: String,
  },
}

/// Errors raised while routing one tuple.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
  /// The tuple lacks a field its outbound grouping hashes on.
  #[error("tuple from '{producer}' has no field '{field}' required by fields grouping")]
  MissingField {
    /// Producing task.
    producer: String,
    /// Missing field.
    field: String,
  },

  /// A grouping picked an instance index outside `[0, instance_count)`.
  #[error("grouping on edge {producer} -> {consumer} picked instance {index} of {instance_count}")]
  InvalidDestination {
    /// Producing task.
    producer: String,
    /// Consuming task.
    consumer: String,
    /// Index returned by the strategy.
    index: usize,
    /// Number of consumer instances.
    instance_count: usize,
  },
}

/// Report of a task instance that stopped because of an unrecoverable error.
///
/// Sent by the instance loop when a callback returns `Err` or panics.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[error("task '{task}' instance {instance} failed: {error}")]
pub struct TaskFailure {
  /// Task name.
  pub task: String,
  /// Instance index within the task.
  pub instance: usize,
  /// Error description (from the returned error or the panic payload).
  pub error: String,
}

/// Errors raised by the runtime lifecycle.
#[derive(Debug, Error)]
pub enum RuntimeError {
  /// `start` was called twice.
  #[error("topology '{0}' is already running")]
  AlreadyStarted(String),

  /// `shutdown` was called before `start`.
  #[error("topology '{0}' has not been started")]
  NotStarted(String),

  /// Configuration could not be parsed.
  #[error("invalid configuration: {0}")]
  Config(#[from] serde_json::Error),

  /// Configuration file could not be read.
  #[error("failed to read configuration: {0}")]
  Io(#[from] std::io::Error),

  /// The topology failed validation.
  #[error(transparent)]
  Build(#[from] BuildError),
}
