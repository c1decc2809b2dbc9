//! Per-instance counters for observing a running topology.
//!
//! Every task instance owns an [`InstanceMetrics`]; the scheduler records what
//! the instance received, emitted and dropped. [`Runtime::metrics`] returns a
//! serializable [`MetricsSnapshot`] of all instances.
//!
//! [`Runtime::metrics`]: crate::runtime::Runtime::metrics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one task instance.
#[derive(Debug, Default)]
pub struct InstanceMetrics {
  records_in: AtomicU64,
  ticks_in: AtomicU64,
  records_out: AtomicU64,
  routing_errors: AtomicU64,
  overflow_dropped: AtomicU64,
  undeliverable: AtomicU64,
}

impl InstanceMetrics {
  /// Records a data tuple taken from the inbound queue.
  pub fn record_in(&self) {
    self.records_in.fetch_add(1, Ordering::Relaxed);
  }

  /// Records a tick taken from the inbound queue.
  pub fn record_tick(&self) {
    self.ticks_in.fetch_add(1, Ordering::Relaxed);
  }

  /// Records tuples accepted by at least one downstream queue.
  pub fn record_out(&self, count: u64) {
    self.records_out.fetch_add(count, Ordering::Relaxed);
  }

  /// Records a tuple dropped because it could not be routed.
  pub fn record_routing_error(&self) {
    self.routing_errors.fetch_add(1, Ordering::Relaxed);
  }

  /// Records a record dropped by a queue's overflow policy.
  pub fn record_overflow_drop(&self) {
    self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
  }

  /// Records a delivery to an instance that has stopped.
  pub fn record_undeliverable(&self) {
    self.undeliverable.fetch_add(1, Ordering::Relaxed);
  }

  /// Current values.
  pub fn snapshot(&self) -> CounterSnapshot {
    CounterSnapshot {
      records_in: self.records_in.load(Ordering::Relaxed),
      ticks_in: self.ticks_in.load(Ordering::Relaxed),
      records_out: self.records_out.load(Ordering::Relaxed),
      routing_errors: self.routing_errors.load(Ordering::Relaxed),
      overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
      undeliverable: self.undeliverable.load(Ordering::Relaxed),
    }
  }
}

/// Point-in-time copy of an [`InstanceMetrics`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CounterSnapshot {
  /// Data tuples received.
  pub records_in: u64,
  /// Ticks received.
  pub ticks_in: u64,
  /// Tuples emitted and accepted by at least one downstream queue.
  pub records_out: u64,
  /// Tuples dropped on routing errors.
  pub routing_errors: u64,
  /// Records this instance lost to a full downstream queue.
  pub overflow_dropped: u64,
  /// Records this instance addressed to a stopped downstream instance.
  pub undeliverable: u64,
}

/// Counters of one instance, labelled.
#[derive(Clone, Debug, Serialize)]
pub struct InstanceSnapshot {
  /// Task name.
  pub task: String,
  /// Instance index.
  pub instance: usize,
  /// Counter values.
  #[serde(flatten)]
  pub counters: CounterSnapshot,
}

/// Counters of every instance of a topology.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
  /// One entry per instance, in task then index order.
  pub instances: Vec<InstanceSnapshot>,
}

impl MetricsSnapshot {
  /// Sum of the counters of every instance of `task`.
  pub fn task_totals(&self, task: &str) -> CounterSnapshot {
    self
      .instances
      .iter()
      .filter(|i| i.task == task)
      .fold(CounterSnapshot::default(), |acc, i| CounterSnapshot {
        records_in: acc.records_in + i.counters.records_in,
        ticks_in: acc.ticks_in + i.counters.ticks_in,
        records_out: acc.records_out + i.counters.records_out,
        routing_errors: acc.routing_errors + i.counters.routing_errors,
        overflow_dropped: acc.overflow_dropped + i.counters.overflow_dropped,
        undeliverable: acc.undeliverable + i.counters.undeliverable,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_counters_and_totals() {
    let a = InstanceMetrics::default();
    a.record_in();
    a.record_in();
    a.record_out(3);
    a.record_routing_error();
    let b = InstanceMetrics::default();
    b.record_tick();
    b.record_overflow_drop();

    let snapshot = MetricsSnapshot {
      instances: vec![
        InstanceSnapshot {
          task: "split".to_string(),
          instance: 0,
          counters: a.snapshot(),
        },
        InstanceSnapshot {
          task: "split".to_string(),
          instance: 1,
          counters: b.snapshot(),
        },
      ],
    };

    let totals = snapshot.task_totals("split");
    assert_eq!(totals.records_in, 2);
    assert_eq!(totals.ticks_in, 1);
    assert_eq!(totals.records_out, 3);
    assert_eq!(totals.routing_errors, 1);
    assert_eq!(totals.overflow_dropped, 1);
    assert_eq!(snapshot.task_totals("count"), CounterSnapshot::default());
  }
}
