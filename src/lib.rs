//! # topoweave
//!
//! A minimal stream-topology execution core in pure Rust.
//!
//! A topology is a DAG of *sources*, which originate tuples, and
//! *processors*, which consume tuples and may emit more. Every task runs as
//! one or more parallel instances; the grouping declared on each edge decides
//! which downstream instance receives each tuple. Tasks may also ask for
//! periodic tick records, delivered independently of data, to flush local
//! aggregation state.
//!
//! ## Key Features
//!
//! - **Validated graphs**: names, parallelism, cycles and grouped fields are
//!   checked before anything runs
//! - **Groupings**: shuffle, fields (stable hash), broadcast, global, or your own
//! - **Tick records**: per-task timers feeding every instance
//! - **Isolation**: a failing instance stops alone and is reported
//! - **Async-first**: every instance is a tokio task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topoweave::config::TopologyConfig;
//! use topoweave::submit::{ClusterConfig, LocalSubmitter, Submitter};
//! use topoweave::word_count;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = word_count::topology(TopologyConfig::default())?;
//! let mut runtime = LocalSubmitter.submit(topology, ClusterConfig::local()).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! let report = runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Typed configuration of topologies, tasks and queues.
pub mod config;
/// Error types for building and running topologies.
pub mod error;
/// Routing strategies deciding which instances receive a tuple.
pub mod grouping;
/// Per-instance counters.
pub mod metrics;
/// Bounded inbound queues of task instances.
pub mod queue;
/// Records carried between tasks.
pub mod record;
/// Lifecycle of a running topology.
pub mod runtime;
mod scheduler;
/// Handing topologies over for execution.
pub mod submit;
/// Component traits and task state.
pub mod task;
/// Declaration and validation of the task graph.
pub mod topology;
/// The word count topology.
pub mod word_count;

pub use config::{OverflowPolicy, QueueConfig, ShutdownPolicy, TaskConfig, TaskOverride, TopologyConfig};
pub use error::{BuildError, RoutingError, RuntimeError, TaskError, TaskFailure};
pub use grouping::{Grouping, GroupingStrategy};
pub use record::{Fields, Record, Tick, Tuple, Value};
pub use runtime::{RunReport, Runtime};
pub use task::{Emitter, Processor, Source, SourceStatus, TaskContext, TaskState};
pub use topology::{InstanceId, TaskDeclaration, TaskId, Topology, TopologyBuilder};
