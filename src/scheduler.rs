//! # Scheduler and Router
//!
//! Drives records through a running topology.
//!
//! - **[`Router`]**: immutable routing table built at start. After every call
//!   into a component, the instance's outbox is drained and each tuple is
//!   routed along every outbound edge of the producing task.
//! - **Instance loops**: one tokio task per instance. Sources are polled until
//!   shutdown; processors pop their inbound queue until it is closed.
//! - **Tick timers**: one tokio task per ticking task definition, pushing a
//!   [`Tick`] into every instance queue on each interval boundary.
//!
//! A tuple is routed all-or-nothing: the destinations on every edge are
//! computed first, and if any grouping fails the tuple is dropped and counted
//! as a routing error.
//!
//! A callback returning `Err` or panicking stops that instance only. Its queue
//! is closed, so producers stop delivering to it, and a [`TaskFailure`] is
//! reported to the runtime. There is no restart.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RoutingError, TaskError, TaskFailure};
use crate::grouping::GroupingStrategy;
use crate::metrics::InstanceMetrics;
use crate::queue::{Admission, InstanceQueue, QueueClosed};
use crate::record::{Record, Tick, Tuple};
use crate::task::{Emitter, Processor, Source, SourceStatus, StateCell, TaskContext};
use crate::topology::{TaskId, Topology};

/// One outbound edge of a producer, resolved to the consumer's queues.
struct Route {
  consumer: Arc<str>,
  strategy: Arc<dyn GroupingStrategy>,
  queues: Vec<Arc<InstanceQueue>>,
}

/// Routing table of a running topology, indexed by producer [`TaskId`].
pub struct Router {
  producers: Vec<Arc<str>>,
  routes: Vec<Vec<Route>>,
}

impl Router {
  /// Resolves every edge of `topology` to the inbound queues of its consumer.
  ///
  /// `queues[task][index]` is the queue of instance `index` of `task`; sources
  /// have no queues.
  pub(crate) fn new(topology: &Topology, queues: &[Vec<Arc<InstanceQueue>>]) -> Self {
    let producers = topology
      .tasks()
      .iter()
      .map(|task| task.shared_name())
      .collect();
    let routes = topology
      .tasks()
      .iter()
      .map(|task| {
        topology
          .outbound(task.id())
          .map(|edge| Route {
            consumer: topology.task(edge.consumer).shared_name(),
            strategy: Arc::clone(edge.strategy()),
            queues: queues[edge.consumer.0].clone(),
          })
          .collect()
      })
      .collect();
    Self { producers, routes }
  }

  /// Routes the tuples emitted by one instance of `producer`.
  pub(crate) async fn route(&self, producer: TaskId, tuples: Vec<Tuple>, metrics: &InstanceMetrics) {
    let routes = &self.routes[producer.0];
    for tuple in tuples {
      let destinations = match self.destinations(producer, routes, &tuple) {
        Ok(destinations) => destinations,
        Err(err) => {
          warn!(producer = %self.producers[producer.0], source = %tuple.source(), error = %err, "dropping unroutable tuple");
          metrics.record_routing_error();
          continue;
        }
      };

      let mut accepted = false;
      for queue in destinations {
        match queue.push(Record::Data(tuple.clone())).await {
          Ok(Admission::Enqueued) => accepted = true,
          Ok(admission) => {
            trace!(producer = %self.producers[producer.0], ?admission, "queue overflow");
            metrics.record_overflow_drop();
            accepted |= admission == Admission::DroppedOldest;
          }
          Err(QueueClosed) => metrics.record_undeliverable(),
        }
      }
      if accepted {
        metrics.record_out(1);
      }
    }
  }

  fn destinations<'a>(
    &self,
    producer: TaskId,
    routes: &'a [Route],
    tuple: &Tuple,
  ) -> Result<Vec<&'a Arc<InstanceQueue>>, RoutingError> {
    let mut destinations = Vec::new();
    for route in routes {
      let instance_count = route.queues.len();
      for index in route.strategy.route(tuple, instance_count)? {
        let queue = route
          .queues
          .get(index)
          .ok_or_else(|| RoutingError::InvalidDestination {
            producer: self.producers[producer.0].to_string(),
            consumer: route.consumer.to_string(),
            index,
            instance_count,
          })?;
        destinations.push(queue);
      }
    }
    Ok(destinations)
  }
}

/// Everything an instance loop needs besides its component.
pub(crate) struct InstanceRuntime {
  pub(crate) ctx: TaskContext,
  pub(crate) queue: Option<Arc<InstanceQueue>>,
  pub(crate) state: StateCell,
  pub(crate) metrics: Arc<InstanceMetrics>,
  pub(crate) router: Arc<Router>,
  pub(crate) failures: mpsc::UnboundedSender<TaskFailure>,
}

impl InstanceRuntime {
  /// Polls `source` until shutdown.
  pub(crate) async fn run_source(
    self,
    mut source: Box<dyn Source>,
    shutdown: CancellationToken,
    idle_backoff: Duration,
  ) {
    if !self.state.start() {
      return;
    }
    info!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), "source started");

    let task = self.ctx.instance().task;
    let mut emitter = Emitter::new(self.ctx.instance());
    let outcome = AssertUnwindSafe(async {
      source.open(&self.ctx).await?;
      loop {
        let status = tokio::select! {
          biased;
          _ = shutdown.cancelled() => break,
          status = source.next_tuple(&mut emitter) => status?,
        };
        self.router.route(task, emitter.drain(), &self.metrics).await;

        match status {
          SourceStatus::Emitted => tokio::task::yield_now().await,
          SourceStatus::Idle => {
            tokio::select! {
              biased;
              _ = shutdown.cancelled() => break,
              _ = tokio::time::sleep(idle_backoff) => {}
            }
          }
          SourceStatus::Exhausted => {
            debug!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), "source exhausted");
            shutdown.cancelled().await;
            break;
          }
        }
      }
      Ok::<(), TaskError>(())
    })
    .catch_unwind()
    .await;

    if self.settle(outcome) {
      source.close().await;
    }
    self.state.stop();
    info!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), "source stopped");
  }

  /// Feeds `processor` from the inbound queue until the queue is closed.
  pub(crate) async fn run_processor(self, mut processor: Box<dyn Processor>) {
    if !self.state.start() {
      return;
    }
    let Some(queue) = self.queue.clone() else {
      self.state.stop();
      return;
    };
    info!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), "processor started");

    let task = self.ctx.instance().task;
    let mut emitter = Emitter::new(self.ctx.instance());
    let outcome = AssertUnwindSafe(async {
      processor.prepare(&self.ctx).await?;
      while let Some(record) = queue.pop().await {
        match record {
          Record::Data(tuple) => {
            self.metrics.record_in();
            processor.process(&tuple, &mut emitter).await?;
          }
          Record::Tick(tick) => {
            self.metrics.record_tick();
            trace!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), sequence = tick.sequence, "tick");
            processor.tick(&tick, &mut emitter).await?;
          }
        }
        self.router.route(task, emitter.drain(), &self.metrics).await;
      }
      Ok::<(), TaskError>(())
    })
    .catch_unwind()
    .await;

    if self.settle(outcome) {
      processor.cleanup().await;
    }
    self.state.stop();
    info!(task = %self.ctx.task_name(), instance = self.ctx.instance_index(), "processor stopped");
  }

  /// Reports a failed run. Returns true if the run ended cleanly.
  fn settle(&self, outcome: Result<Result<(), TaskError>, Box<dyn Any + Send>>) -> bool {
    let message = match outcome {
      Ok(Ok(())) => return true,
      Ok(Err(err)) => err.to_string(),
      Err(panic) => panic_message(panic.as_ref()),
    };

    let failure = TaskFailure {
      task: self.ctx.task_name().to_string(),
      instance: self.ctx.instance_index(),
      error: message,
    };
    error!(task = %failure.task, instance = failure.instance, error = %failure.error, "task instance failed");

    if let Some(queue) = &self.queue {
      let dropped = queue.close(false);
      if dropped > 0 {
        debug!(task = %failure.task, instance = failure.instance, dropped, "dropped queued records of failed instance");
      }
    }
    // The runtime may already be gone during teardown.
    let _ = self.failures.send(failure);
    false
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("panicked: {message}")
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("panicked: {message}")
  } else {
    "panicked".to_string()
  }
}

/// Pushes a tick into every queue of one task every `interval` until shutdown.
///
/// The first tick fires one full interval after start.
pub(crate) async fn run_tick_timer(
  task: Arc<str>,
  interval: Duration,
  queues: Vec<Arc<InstanceQueue>>,
  shutdown: CancellationToken,
) {
  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut sequence = 0u64;
  debug!(task = %task, interval_ms = interval.as_millis() as u64, "tick timer started");

  loop {
    tokio::select! {
      biased;
      _ = shutdown.cancelled() => break,
      _ = ticker.tick() => {
        sequence += 1;
        let tick = Tick { timestamp: Utc::now(), sequence };
        let delivered = queues
          .iter()
          .filter(|queue| queue.push_control(Record::Tick(tick)).is_ok())
          .count();
        trace!(task = %task, sequence, delivered, "tick delivered");
        if delivered == 0 {
          debug!(task = %task, "no live instance left; tick timer exiting");
          break;
        }
      }
    }
  }
}
