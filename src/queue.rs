//! # Inbound Queues
//!
//! Every task instance owns one [`InstanceQueue`]. Many upstream instances
//! (and the tick timer) push into it concurrently; only the owning instance
//! pops from it. Delivery is FIFO.
//!
//! ## Bound and overflow
//!
//! A queue is bounded unless configured otherwise. When it is full, the
//! configured [`OverflowPolicy`] applies:
//!
//! - **Block**: the producer waits until the consumer frees a slot
//! - **DropNewest**: the incoming record is discarded
//! - **DropOldest**: the oldest queued data record is evicted to make room
//!
//! Ticks bypass the bound so the timer never waits on a slow consumer.
//!
//! ## Closing
//!
//! Closing a queue rejects further pushes. With `drain` the consumer still
//! receives what is queued; otherwise queued records are dropped at once.

use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::Notify;

use crate::config::{OverflowPolicy, QueueConfig};
use crate::record::Record;

/// The queue was closed; the record was not delivered.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("inbound queue is closed")]
pub struct QueueClosed;

/// Outcome of a successful push.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
  /// The record was appended.
  Enqueued,
  /// The queue was full; the incoming record was discarded.
  DroppedNewest,
  /// The queue was full; the oldest data record was evicted and the incoming one appended.
  DroppedOldest,
}

#[derive(Debug, Default)]
struct QueueState {
  records: VecDeque<Record>,
  closed: bool,
}

/// Multi-producer, single-consumer inbound queue of one task instance.
#[derive(Debug)]
pub struct InstanceQueue {
  state: Mutex<QueueState>,
  capacity: Option<usize>,
  overflow: OverflowPolicy,
  readable: Notify,
  writable: Notify,
}

impl InstanceQueue {
  /// Creates an empty queue.
  pub fn new(config: QueueConfig) -> Self {
    Self {
      state: Mutex::new(QueueState::default()),
      capacity: config.capacity,
      overflow: config.overflow,
      readable: Notify::new(),
      writable: Notify::new(),
    }
  }

  /// Pushes a data record, applying the bound and overflow policy.
  pub async fn push(&self, record: Record) -> Result<Admission, QueueClosed> {
    loop {
      let writable = self.writable.notified();
      tokio::pin!(writable);
      writable.as_mut().enable();

      {
        let mut state = self.state.lock();
        if state.closed {
          return Err(QueueClosed);
        }
        let full = self
          .capacity
          .is_some_and(|capacity| state.records.len() >= capacity);
        if !full {
          state.records.push_back(record);
          drop(state);
          self.readable.notify_one();
          return Ok(Admission::Enqueued);
        }
        match self.overflow {
          OverflowPolicy::DropNewest => return Ok(Admission::DroppedNewest),
          OverflowPolicy::DropOldest => {
            // Ticks are never evicted; with only ticks queued the incoming record goes.
            let Some(oldest) = state.records.iter().position(|r| !r.is_tick()) else {
              return Ok(Admission::DroppedNewest);
            };
            state.records.remove(oldest);
            state.records.push_back(record);
            drop(state);
            self.readable.notify_one();
            return Ok(Admission::DroppedOldest);
          }
          OverflowPolicy::Block => {}
        }
      }

      writable.await;
    }
  }

  /// Pushes a control record (tick) regardless of the bound.
  pub fn push_control(&self, record: Record) -> Result<(), QueueClosed> {
    let mut state = self.state.lock();
    if state.closed {
      return Err(QueueClosed);
    }
    state.records.push_back(record);
    drop(state);
    self.readable.notify_one();
    Ok(())
  }

  /// Waits for the next record. Returns `None` once the queue is closed and
  /// has nothing left to hand out.
  pub async fn pop(&self) -> Option<Record> {
    loop {
      let readable = self.readable.notified();
      tokio::pin!(readable);
      readable.as_mut().enable();

      {
        let mut state = self.state.lock();
        if let Some(record) = state.records.pop_front() {
          drop(state);
          self.writable.notify_one();
          return Some(record);
        }
        if state.closed {
          return None;
        }
      }

      readable.await;
    }
  }

  /// Rejects further pushes. Unless `drain` is set, queued records are
  /// dropped; returns how many.
  pub fn close(&self, drain: bool) -> usize {
    let dropped = {
      let mut state = self.state.lock();
      state.closed = true;
      if drain {
        0
      } else {
        let dropped = state.records.len();
        state.records.clear();
        dropped
      }
    };
    self.readable.notify_waiters();
    self.writable.notify_waiters();
    dropped
  }

  /// Whether the queue has been closed.
  pub fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  /// Number of queued records.
  pub fn len(&self) -> usize {
    self.state.lock().records.len()
  }

  /// Whether nothing is queued.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{Fields, Tick, Tuple};
  use crate::topology::{InstanceId, TaskId};
  use chrono::Utc;
  use std::sync::Arc;
  use std::time::Duration;

  fn data(n: i64) -> Record {
    Record::Data(Tuple::new(
      InstanceId::new(TaskId(0), 0),
      Fields::new().with("n", n),
    ))
  }

  fn n_of(record: Record) -> i64 {
    match record {
      Record::Data(tuple) => tuple.get_int("n").unwrap(),
      Record::Tick(_) => -1,
    }
  }

  fn tick() -> Record {
    Record::Tick(Tick {
      timestamp: Utc::now(),
      sequence: 1,
    })
  }

  #[tokio::test]
  async fn test_fifo() {
    let queue = InstanceQueue::new(QueueConfig::default());
    for n in 0..5 {
      assert_eq!(queue.push(data(n)).await, Ok(Admission::Enqueued));
    }
    for n in 0..5 {
      assert_eq!(n_of(queue.pop().await.unwrap()), n);
    }
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_drop_newest_when_full() {
    let queue = InstanceQueue::new(QueueConfig::bounded(2, OverflowPolicy::DropNewest));
    queue.push(data(1)).await.unwrap();
    queue.push(data(2)).await.unwrap();
    assert_eq!(queue.push(data(3)).await, Ok(Admission::DroppedNewest));
    assert_eq!(n_of(queue.pop().await.unwrap()), 1);
    assert_eq!(n_of(queue.pop().await.unwrap()), 2);
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_drop_oldest_when_full() {
    let queue = InstanceQueue::new(QueueConfig::bounded(2, OverflowPolicy::DropOldest));
    queue.push(data(1)).await.unwrap();
    queue.push(data(2)).await.unwrap();
    assert_eq!(queue.push(data(3)).await, Ok(Admission::DroppedOldest));
    assert_eq!(n_of(queue.pop().await.unwrap()), 2);
    assert_eq!(n_of(queue.pop().await.unwrap()), 3);
  }

  #[tokio::test]
  async fn test_drop_oldest_never_evicts_ticks() {
    let queue = InstanceQueue::new(QueueConfig::bounded(2, OverflowPolicy::DropOldest));
    queue.push_control(tick()).unwrap();
    queue.push(data(1)).await.unwrap();
    assert_eq!(queue.push(data(2)).await, Ok(Admission::DroppedOldest));
    assert!(queue.pop().await.unwrap().is_tick());
    assert_eq!(n_of(queue.pop().await.unwrap()), 2);
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_drop_oldest_with_only_ticks_drops_incoming() {
    let queue = InstanceQueue::new(QueueConfig::bounded(1, OverflowPolicy::DropOldest));
    queue.push_control(tick()).unwrap();
    assert_eq!(queue.push(data(1)).await, Ok(Admission::DroppedNewest));
    assert_eq!(queue.len(), 1);
    assert!(queue.pop().await.unwrap().is_tick());
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_block_waits_for_consumer() {
    let queue = Arc::new(InstanceQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
    queue.push(data(1)).await.unwrap();

    let producer = {
      let queue = Arc::clone(&queue);
      tokio::spawn(async move { queue.push(data(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_finished());
    assert_eq!(queue.len(), 1);

    assert_eq!(n_of(queue.pop().await.unwrap()), 1);
    assert_eq!(producer.await.unwrap(), Ok(Admission::Enqueued));
    assert_eq!(n_of(queue.pop().await.unwrap()), 2);
  }

  #[tokio::test]
  async fn test_control_records_bypass_bound() {
    let queue = InstanceQueue::new(QueueConfig::bounded(1, OverflowPolicy::DropNewest));
    queue.push(data(1)).await.unwrap();
    queue.push_control(tick()).unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(n_of(queue.pop().await.unwrap()), 1);
    assert!(queue.pop().await.unwrap().is_tick());
  }

  #[tokio::test]
  async fn test_close_abandon_drops_queued() {
    let queue = InstanceQueue::new(QueueConfig::default());
    queue.push(data(1)).await.unwrap();
    queue.push(data(2)).await.unwrap();
    assert_eq!(queue.close(false), 2);
    assert!(queue.pop().await.is_none());
    assert_eq!(queue.push(data(3)).await, Err(QueueClosed));
    assert_eq!(queue.push_control(tick()), Err(QueueClosed));
  }

  #[tokio::test]
  async fn test_close_drain_hands_out_queued() {
    let queue = InstanceQueue::new(QueueConfig::default());
    queue.push(data(1)).await.unwrap();
    assert_eq!(queue.close(true), 0);
    assert_eq!(n_of(queue.pop().await.unwrap()), 1);
    assert!(queue.pop().await.is_none());
  }

  #[tokio::test]
  async fn test_close_wakes_blocked_consumer_and_producer() {
    let queue = Arc::new(InstanceQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
    let consumer = {
      let queue = Arc::clone(&queue);
      tokio::spawn(async move { queue.pop().await.is_none() })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.close(false);
    assert!(consumer.await.unwrap());

    let full = Arc::new(InstanceQueue::new(QueueConfig::bounded(1, OverflowPolicy::Block)));
    full.push(data(1)).await.unwrap();
    let producer = {
      let full = Arc::clone(&full);
      tokio::spawn(async move { full.push(data(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    full.close(true);
    assert_eq!(producer.await.unwrap(), Err(QueueClosed));
  }
}
