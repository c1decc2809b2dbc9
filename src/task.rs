//! # Tasks
//!
//! User components run inside task instances. A topology has two kinds:
//!
//! - **[`Source`]**: no inbound edges; produces tuples at its own pace
//! - **[`Processor`]**: consumes tuples from its inbound queue, plus tick
//!   records if the task has a tick interval
//!
//! Each instance owns its component exclusively. State kept in a component is
//! never touched by another instance, so fields grouping is enough to keep
//! per-key aggregation correct without locks.
//!
//! Components emit through an [`Emitter`], which buffers tuples in the
//! instance's outbox. The scheduler drains the outbox after every callback and
//! routes each tuple along the task's outbound edges.
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use topoweave::error::TaskError;
//! use topoweave::record::{Fields, Tuple};
//! use topoweave::task::{Emitter, Processor};
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl Processor for Upper {
//!   async fn process(&mut self, tuple: &Tuple, emitter: &mut Emitter) -> Result<(), TaskError> {
//!     let word = tuple.get_str("word").ok_or("missing word")?;
//!     emitter.emit(Fields::new().with("word", word.to_uppercase()));
//!     Ok(())
//!   }
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::TaskError;
use crate::record::{Fields, Tick, Tuple};
use crate::topology::InstanceId;

/// Lifecycle of a task instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
  /// Instantiated, not yet running.
  Created,
  /// Processing records.
  Running,
  /// Terminal: shut down or failed.
  Stopped,
}

impl fmt::Display for TaskState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskState::Created => f.write_str("created"),
      TaskState::Running => f.write_str("running"),
      TaskState::Stopped => f.write_str("stopped"),
    }
  }
}

/// Shared, lock-free view of one instance's [`TaskState`].
#[derive(Clone, Debug)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
  const CREATED: u8 = 0;
  const RUNNING: u8 = 1;
  const STOPPED: u8 = 2;

  pub(crate) fn new() -> Self {
    Self(Arc::new(AtomicU8::new(Self::CREATED)))
  }

  pub(crate) fn get(&self) -> TaskState {
    match self.0.load(Ordering::Acquire) {
      Self::CREATED => TaskState::Created,
      Self::RUNNING => TaskState::Running,
      _ => TaskState::Stopped,
    }
  }

  /// Moves `Created -> Running`. Returns false if the instance already left `Created`.
  pub(crate) fn start(&self) -> bool {
    self
      .0
      .compare_exchange(
        Self::CREATED,
        Self::RUNNING,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
  }

  pub(crate) fn stop(&self) {
    self.0.store(Self::STOPPED, Ordering::Release);
  }
}

/// What a call to [`Source::next_tuple`] achieved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceStatus {
  /// Zero or more tuples were emitted; poll again right away.
  Emitted,
  /// Nothing available right now; poll again after the idle backoff.
  Idle,
  /// The source will never produce again. The instance stays running until shutdown.
  Exhausted,
}

/// Identity and placement of the instance a component runs in.
#[derive(Clone, Debug)]
pub struct TaskContext {
  topology: Arc<str>,
  task: Arc<str>,
  instance: InstanceId,
  parallelism: usize,
}

impl TaskContext {
  pub(crate) fn new(
    topology: Arc<str>,
    task: Arc<str>,
    instance: InstanceId,
    parallelism: usize,
  ) -> Self {
    Self {
      topology,
      task,
      instance,
      parallelism,
    }
  }

  /// Name of the topology.
  pub fn topology_name(&self) -> &str {
    &self.topology
  }

  /// Name of the task this instance belongs to.
  pub fn task_name(&self) -> &str {
    &self.task
  }

  /// Handle of this instance.
  pub fn instance(&self) -> InstanceId {
    self.instance
  }

  /// Index of this instance within its task, in `[0, parallelism)`.
  pub fn instance_index(&self) -> usize {
    self.instance.index
  }

  /// Number of instances of this task.
  pub fn parallelism(&self) -> usize {
    self.parallelism
  }
}

/// Outbox of one task instance.
///
/// Tuples emitted during a callback are routed by the scheduler once the
/// callback returns.
#[derive(Debug)]
pub struct Emitter {
  source: InstanceId,
  outbox: Vec<Tuple>,
}

impl Emitter {
  pub(crate) fn new(source: InstanceId) -> Self {
    Self {
      source,
      outbox: Vec::new(),
    }
  }

  /// Emits one tuple downstream.
  pub fn emit(&mut self, fields: impl Into<Fields>) {
    self.outbox.push(Tuple::new(self.source, fields.into()));
  }

  /// Number of tuples waiting to be routed.
  pub fn pending(&self) -> usize {
    self.outbox.len()
  }

  /// Takes every buffered tuple, leaving the outbox empty.
  pub fn drain(&mut self) -> Vec<Tuple> {
    std::mem::take(&mut self.outbox)
  }
}

/// A task with no inbound edges that originates tuples.
#[async_trait]
pub trait Source: Send {
  /// Called once before the first `next_tuple`.
  async fn open(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
    Ok(())
  }

  /// Emits zero or more tuples.
  async fn next_tuple(&mut self, emitter: &mut Emitter) -> Result<SourceStatus, TaskError>;

  /// Called once when the instance stops, unless it failed.
  async fn close(&mut self) {}
}

/// A task that consumes tuples and may emit further tuples.
#[async_trait]
pub trait Processor: Send {
  /// Called once before the first record is delivered.
  async fn prepare(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
    Ok(())
  }

  /// Handles one data tuple.
  async fn process(&mut self, tuple: &Tuple, emitter: &mut Emitter) -> Result<(), TaskError>;

  /// Handles one tick record. Must not wait for further input.
  async fn tick(&mut self, _tick: &Tick, _emitter: &mut Emitter) -> Result<(), TaskError> {
    Ok(())
  }

  /// Called once when the instance stops, unless it failed.
  async fn cleanup(&mut self) {}
}

/// Builds one source component per instance.
pub type SourceFactory = Arc<dyn Fn(&TaskContext) -> Box<dyn Source> + Send + Sync>;

/// Builds one processor component per instance.
pub type ProcessorFactory = Arc<dyn Fn(&TaskContext) -> Box<dyn Processor> + Send + Sync>;

/// The component a task runs, along with how to build it.
#[derive(Clone)]
pub enum Component {
  /// Source factory.
  Source(SourceFactory),
  /// Processor factory.
  Processor(ProcessorFactory),
}

impl Component {
  /// Kind of task this component makes.
  pub fn kind(&self) -> TaskKind {
    match self {
      Component::Source(_) => TaskKind::Source,
      Component::Processor(_) => TaskKind::Processor,
    }
  }
}

impl fmt::Debug for Component {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Component::{:?}", self.kind())
  }
}

/// Kind of a task definition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
  /// Originates tuples.
  Source,
  /// Consumes tuples.
  Processor,
}
