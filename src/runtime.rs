//! # Runtime
//!
//! Owns one [`Topology`] and the lifecycle of its task instances.
//!
//! ## Lifecycle
//!
//! - [`Runtime::new`] creates every instance's queue, state and counters;
//!   instances are `Created`
//! - [`Runtime::start`] spawns the instances in topological order (sources
//!   before their consumers) and the tick timers; instances become `Running`
//! - [`Runtime::shutdown`] stops everything according to the topology's
//!   [`ShutdownPolicy`] and returns a [`RunReport`]; instances are `Stopped`
//!
//! Task failures do not stop the runtime. They are surfaced through
//! [`Runtime::next_failure`] and collected in the final report.
//!
//! There is no process-wide state: several runtimes may run side by side.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use topoweave::config::TopologyConfig;
//! use topoweave::runtime::Runtime;
//! use topoweave::word_count;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let topology = word_count::topology(TopologyConfig::default())?;
//! let mut runtime = Runtime::new(topology);
//! runtime.start().await?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! let report = runtime.shutdown().await?;
//! println!("{:?}", report.metrics);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShutdownPolicy;
use crate::error::{RuntimeError, TaskFailure};
use crate::metrics::{InstanceMetrics, InstanceSnapshot, MetricsSnapshot};
use crate::queue::InstanceQueue;
use crate::scheduler::{InstanceRuntime, Router, run_tick_timer};
use crate::task::{Component, StateCell, TaskContext, TaskKind, TaskState};
use crate::topology::{InstanceId, TaskId, Topology};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
  Created,
  Running,
  Stopped,
}

struct InstanceSlot {
  queue: Option<Arc<InstanceQueue>>,
  state: StateCell,
  metrics: Arc<InstanceMetrics>,
  handle: Option<JoinHandle<()>>,
}

/// Summary returned by [`Runtime::shutdown`].
#[derive(Clone, Debug)]
pub struct RunReport {
  /// Every instance failure seen during the run.
  pub failures: Vec<TaskFailure>,
  /// Counters at the time every instance had stopped.
  pub metrics: MetricsSnapshot,
  /// Records still queued when the queues were abandoned.
  pub abandoned: usize,
}

/// Runs one topology.
pub struct Runtime {
  topology: Arc<Topology>,
  phase: Phase,
  slots: Vec<Vec<InstanceSlot>>,
  timers: Vec<JoinHandle<()>>,
  shutdown: CancellationToken,
  failures_tx: mpsc::UnboundedSender<TaskFailure>,
  failures_rx: mpsc::UnboundedReceiver<TaskFailure>,
  failures: Vec<TaskFailure>,
}

impl Runtime {
  /// Creates the instances of `topology` without starting them.
  pub fn new(topology: Topology) -> Self {
    let queue_config = topology.config().queue;
    let slots = topology
      .tasks()
      .iter()
      .map(|task| {
        (0..task.parallelism())
          .map(|_| InstanceSlot {
            queue: match task.kind() {
              TaskKind::Source => None,
              TaskKind::Processor => Some(Arc::new(InstanceQueue::new(queue_config))),
            },
            state: StateCell::new(),
            metrics: Arc::new(InstanceMetrics::default()),
            handle: None,
          })
          .collect()
      })
      .collect();
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();

    Self {
      topology: Arc::new(topology),
      phase: Phase::Created,
      slots,
      timers: Vec::new(),
      shutdown: CancellationToken::new(),
      failures_tx,
      failures_rx,
      failures: Vec::new(),
    }
  }

  /// The topology this runtime runs.
  pub fn topology(&self) -> &Topology {
    &self.topology
  }

  /// Spawns every instance and tick timer on the current tokio runtime.
  pub async fn start(&mut self) -> Result<(), RuntimeError> {
    if self.phase != Phase::Created {
      return Err(RuntimeError::AlreadyStarted(self.topology.name().to_string()));
    }
    self.phase = Phase::Running;

    let topology = Arc::clone(&self.topology);
    let queues = self.queues();
    let router = Arc::new(Router::new(&topology, &queues));
    let idle_backoff = topology.config().source_idle_backoff();
    info!(topology = %topology.name(), tasks = topology.tasks().len(), "starting topology");

    for &task_id in topology.topological_order() {
      let task = topology.task(task_id);
      for (index, slot) in self.slots[task_id.0].iter_mut().enumerate() {
        let ctx = TaskContext::new(
          topology.shared_name(),
          task.shared_name(),
          InstanceId::new(task_id, index),
          task.parallelism(),
        );
        let instance = InstanceRuntime {
          ctx: ctx.clone(),
          queue: slot.queue.clone(),
          state: slot.state.clone(),
          metrics: Arc::clone(&slot.metrics),
          router: Arc::clone(&router),
          failures: self.failures_tx.clone(),
        };
        let handle = match task.component() {
          Component::Source(factory) => {
            let source = factory(&ctx);
            let shutdown = self.shutdown.clone();
            tokio::spawn(instance.run_source(source, shutdown, idle_backoff))
          }
          Component::Processor(factory) => {
            let processor = factory(&ctx);
            tokio::spawn(instance.run_processor(processor))
          }
        };
        slot.handle = Some(handle);
      }
    }

    for task in topology.tasks() {
      let Some(interval) = task.config().tick_interval() else {
        continue;
      };
      if task.kind() == TaskKind::Source {
        warn!(task = %task.name(), "tick interval ignored on a source");
        continue;
      }
      self.timers.push(tokio::spawn(run_tick_timer(
        task.shared_name(),
        interval,
        queues[task.id().0].clone(),
        self.shutdown.clone(),
      )));
    }

    Ok(())
  }

  /// Waits for the next instance failure.
  ///
  /// Pending while every instance is healthy.
  pub async fn next_failure(&mut self) -> Option<TaskFailure> {
    let failure = self.failures_rx.recv().await?;
    self.failures.push(failure.clone());
    Some(failure)
  }

  /// Returns an already reported failure without waiting.
  pub fn try_next_failure(&mut self) -> Option<TaskFailure> {
    let failure = self.failures_rx.try_recv().ok()?;
    self.failures.push(failure.clone());
    Some(failure)
  }

  /// State of instance `index` of the task named `task`.
  pub fn instance_state(&self, task: &str, index: usize) -> Option<TaskState> {
    let task = self.topology.task_by_name(task)?;
    self.slots[task.id().0]
      .get(index)
      .map(|slot| slot.state.get())
  }

  /// Current counters of every instance.
  pub fn metrics(&self) -> MetricsSnapshot {
    let instances = self
      .topology
      .tasks()
      .iter()
      .flat_map(|task| {
        self.slots[task.id().0]
          .iter()
          .enumerate()
          .map(move |(index, slot)| InstanceSnapshot {
            task: task.name().to_string(),
            instance: index,
            counters: slot.metrics.snapshot(),
          })
      })
      .collect();
    MetricsSnapshot { instances }
  }

  /// Stops every instance and timer.
  ///
  /// With [`ShutdownPolicy::Abandon`] all queues are closed at once and their
  /// content dropped. With [`ShutdownPolicy::Drain`] sources and timers stop
  /// first, then each processor stage empties its queues, in topological
  /// order, before the next stage is closed.
  pub async fn shutdown(&mut self) -> Result<RunReport, RuntimeError> {
    if self.phase != Phase::Running {
      return Err(RuntimeError::NotStarted(self.topology.name().to_string()));
    }
    self.phase = Phase::Stopped;
    let policy = self.topology.config().shutdown;
    info!(topology = %self.topology.name(), ?policy, "shutting down topology");

    self.shutdown.cancel();
    for timer in self.timers.drain(..) {
      if let Err(err) = timer.await {
        warn!(error = %err, "tick timer ended abnormally");
      }
    }

    let mut abandoned = 0;
    match policy {
      ShutdownPolicy::Abandon => {
        for slot in self.slots.iter().flatten() {
          if let Some(queue) = &slot.queue {
            abandoned += queue.close(false);
          }
        }
        for task in self.topology.topological_order().to_vec() {
          self.join_task(task).await;
        }
      }
      ShutdownPolicy::Drain => {
        for task in self.topology.topological_order().to_vec() {
          for slot in &self.slots[task.0] {
            if let Some(queue) = &slot.queue {
              queue.close(true);
            }
          }
          self.join_task(task).await;
        }
      }
    }
    if abandoned > 0 {
      debug!(topology = %self.topology.name(), abandoned, "abandoned queued records");
    }

    while let Ok(failure) = self.failures_rx.try_recv() {
      self.failures.push(failure);
    }
    info!(topology = %self.topology.name(), failures = self.failures.len(), "topology stopped");

    Ok(RunReport {
      failures: self.failures.clone(),
      metrics: self.metrics(),
      abandoned,
    })
  }

  async fn join_task(&mut self, task: TaskId) {
    for (index, slot) in self.slots[task.0].iter_mut().enumerate() {
      if let Some(handle) = slot.handle.take() {
        if let Err(err) = handle.await {
          warn!(task = %self.topology.task(task).name(), instance = index, error = %err, "instance ended abnormally");
        }
      }
      slot.state.stop();
    }
  }

  fn queues(&self) -> Vec<Vec<Arc<InstanceQueue>>> {
    self
      .slots
      .iter()
      .map(|slots| slots.iter().filter_map(|slot| slot.queue.clone()).collect())
      .collect()
  }
}

impl Drop for Runtime {
  fn drop(&mut self) {
    if self.phase == Phase::Running {
      self.shutdown.cancel();
      for slot in self.slots.iter().flatten() {
        if let Some(queue) = &slot.queue {
          queue.close(false);
        }
      }
    }
  }
}
