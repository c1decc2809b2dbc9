//! # Topology
//!
//! The static DAG of task definitions, their parallelism and the grouping of
//! every edge. A topology is declared with a [`TopologyBuilder`], validated by
//! [`TopologyBuilder::build`], and handed read-only to the
//! [`Runtime`](crate::runtime::Runtime).
//!
//! Task names are resolved to [`TaskId`] handles at build time; nothing on the
//! execution path looks a task up by name.
//!
//! ## Example
//!
//! ```rust,no_run
//! use topoweave::grouping::Grouping;
//! use topoweave::topology::{TaskDeclaration, TopologyBuilder};
//! use topoweave::word_count::{SentenceSource, SplitSentence, WordCount};
//!
//! let topology = TopologyBuilder::new("word_count")
//!   .add(TaskDeclaration::source("sentences", |_| SentenceSource::random()).outputs(["sentence"]))
//!   .add(
//!     TaskDeclaration::processor("split", |_| SplitSentence)
//!       .parallelism(2)
//!       .input("sentences", Grouping::fields("sentence"))
//!       .outputs(["word"]),
//!   )
//!   .add(
//!     TaskDeclaration::processor("count", |_| WordCount::new())
//!       .parallelism(2)
//!       .tick_interval_secs(3)
//!       .input("split", Grouping::fields("word"))
//!       .outputs(["word", "count"]),
//!   )
//!   .build()?;
//! # Ok::<(), topoweave::error::BuildError>(())
//! ```

mod builder;
mod graph;


pub use builder::{TaskDeclaration, TopologyBuilder};
pub use graph::{Edge, TaskDefinition, Topology};

use std::fmt;

/// Handle of a task definition: its position in [`Topology::tasks`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Handle of one running instance of a task.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceId {
  /// Task the instance belongs to.
  pub task: TaskId,
  /// Index within the task, in `[0, parallelism)`.
  pub index: usize,
}

impl InstanceId {
  /// Creates an instance handle.
  pub fn new(task: TaskId, index: usize) -> Self {
    Self { task, index }
  }
}

impl fmt::Display for InstanceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}[{}]", self.task, self.index)
  }
}
