//! # Word Count
//!
//! The canonical three-stage topology:
//!
//! ```text
//! random_sentence_spout (1) --fields(sentence)--> split_sentence_bolt (2)
//!                           --fields(word)-----> word_count_bolt (2, tick 3s)
//! ```
//!
//! Fields grouping on `word` sends every occurrence of a word to the same
//! counter instance, so each counter's map is the authoritative count for its
//! share of the words. Counters flush on every tick: one `{word, count}` tuple
//! per word seen since the previous flush, then the map is cleared.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{TaskConfig, TopologyConfig};
use crate::error::{BuildError, TaskError};
use crate::grouping::Grouping;
use crate::record::{Fields, Tick, Tuple};
use crate::task::{Emitter, Processor, Source, SourceStatus, TaskContext};
use crate::topology::{TaskDeclaration, Topology, TopologyBuilder};

/// Name of the word count topology.
pub const TOPOLOGY_NAME: &str = "word_count_topology";
/// Name of the sentence source task.
pub const SENTENCE_SPOUT: &str = "random_sentence_spout";
/// Name of the splitter task.
pub const SPLIT_BOLT: &str = "split_sentence_bolt";
/// Name of the counter task.
pub const COUNT_BOLT: &str = "word_count_bolt";
/// Seconds between two counter flushes.
pub const EMIT_FREQUENCY_SECS: u32 = 3;

/// Sentences the random source picks from.
pub const SENTENCES: [&str; 5] = [
  "the cow jumped over the moon",
  "an apple a day keeps the doctor away",
  "four score and seven years ago",
  "snow white and the seven dwarfs",
  "i am at two with nature",
];

const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

enum Sentences {
  Random { rng: StdRng, interval: Duration },
  Scripted(VecDeque<String>),
}

/// Emits one `sentence` tuple per call.
pub struct SentenceSource {
  sentences: Sentences,
}

impl SentenceSource {
  /// Picks from [`SENTENCES`] forever, one sentence every 100ms.
  pub fn random() -> Self {
    Self {
      sentences: Sentences::Random {
        rng: StdRng::from_entropy(),
        interval: DEFAULT_EMIT_INTERVAL,
      },
    }
  }

  /// Like [`random`](Self::random) but reproducible.
  pub fn seeded(seed: u64) -> Self {
    Self {
      sentences: Sentences::Random {
        rng: StdRng::seed_from_u64(seed),
        interval: DEFAULT_EMIT_INTERVAL,
      },
    }
  }

  /// Emits each of `sentences` once, in order, then reports exhaustion.
  pub fn scripted<I, S>(sentences: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      sentences: Sentences::Scripted(sentences.into_iter().map(Into::into).collect()),
    }
  }

  /// Changes the pause between two random sentences. No effect on scripted sources.
  pub fn with_interval(mut self, every: Duration) -> Self {
    if let Sentences::Random { interval, .. } = &mut self.sentences {
      *interval = every;
    }
    self
  }
}

#[async_trait]
impl Source for SentenceSource {
  async fn next_tuple(&mut self, emitter: &mut Emitter) -> Result<SourceStatus, TaskError> {
    match &mut self.sentences {
      Sentences::Random { rng, interval } => {
        tokio::time::sleep(*interval).await;
        if let Some(sentence) = SENTENCES.choose(rng) {
          emitter.emit(Fields::new().with("sentence", *sentence));
        }
        Ok(SourceStatus::Emitted)
      }
      Sentences::Scripted(queue) => match queue.pop_front() {
        Some(sentence) => {
          emitter.emit(Fields::new().with("sentence", sentence));
          Ok(SourceStatus::Emitted)
        }
        None => Ok(SourceStatus::Exhausted),
      },
    }
  }
}

/// Splits each `sentence` on whitespace into `word` tuples.
#[derive(Clone, Copy, Debug, Default)]
pub struct SplitSentence;

#[async_trait]
impl Processor for SplitSentence {
  async fn process(&mut self, tuple: &Tuple, emitter: &mut Emitter) -> Result<(), TaskError> {
    let sentence = tuple
      .get_str("sentence")
      .ok_or("tuple has no string field 'sentence'")?;
    for word in sentence.split_whitespace() {
      emitter.emit(Fields::new().with("word", word));
    }
    Ok(())
  }
}

/// Counts `word` tuples and flushes the counts on every tick.
#[derive(Debug, Default)]
pub struct WordCount {
  task: String,
  instance: usize,
  counts: HashMap<String, u64>,
}

impl WordCount {
  /// Creates a counter with an empty map.
  pub fn new() -> Self {
    Self::default()
  }

  /// Counts accumulated since the last flush.
  pub fn counts(&self) -> &HashMap<String, u64> {
    &self.counts
  }
}

#[async_trait]
impl Processor for WordCount {
  async fn prepare(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
    self.task = ctx.task_name().to_string();
    self.instance = ctx.instance_index();
    Ok(())
  }

  async fn process(&mut self, tuple: &Tuple, _emitter: &mut Emitter) -> Result<(), TaskError> {
    let word = tuple
      .get_str("word")
      .ok_or("tuple has no string field 'word'")?;
    *self.counts.entry(word.to_string()).or_default() += 1;
    Ok(())
  }

  async fn tick(&mut self, tick: &Tick, emitter: &mut Emitter) -> Result<(), TaskError> {
    if self.counts.is_empty() {
      debug!(task = %self.task, instance = self.instance, sequence = tick.sequence, "nothing to flush");
      return Ok(());
    }

    let mut counts: Vec<(String, u64)> = self.counts.drain().collect();
    counts.sort_unstable();
    info!(
      task = %self.task,
      instance = self.instance,
      sequence = tick.sequence,
      at = %tick.timestamp,
      words = counts.len(),
      "flushing word counts: {counts:?}"
    );
    for (word, count) in counts {
      emitter.emit(Fields::new().with("word", word).with("count", count));
    }
    Ok(())
  }
}

/// Declares the word count topology.
///
/// Per-task entries in `config` override the defaults below by task name.
pub fn topology(config: TopologyConfig) -> Result<Topology, BuildError> {
  TopologyBuilder::new(TOPOLOGY_NAME)
    .with_config(config)
    .add(
      TaskDeclaration::source(SENTENCE_SPOUT, |_| SentenceSource::random())
        .config(TaskConfig::new(1))
        .outputs(["sentence"]),
    )
    .add(
      TaskDeclaration::processor(SPLIT_BOLT, |_| SplitSentence)
        .config(TaskConfig::new(2))
        .input(SENTENCE_SPOUT, Grouping::fields("sentence"))
        .outputs(["word"]),
    )
    .add(
      TaskDeclaration::processor(COUNT_BOLT, |_| WordCount::new())
        .config(TaskConfig::new(2).with_tick_interval_secs(EMIT_FREQUENCY_SECS))
        .input(SPLIT_BOLT, Grouping::fields("word"))
        .outputs(["word", "count"]),
    )
    .build()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::topology::{InstanceId, TaskId};
  use chrono::Utc;

  fn tuple(fields: Fields) -> Tuple {
    Tuple::new(InstanceId::new(TaskId(0), 0), fields)
  }

  fn tick(sequence: u64) -> Tick {
    Tick {
      timestamp: Utc::now(),
      sequence,
    }
  }

  fn emitter() -> Emitter {
    Emitter::new(InstanceId::new(TaskId(1), 0))
  }

  #[tokio::test]
  async fn test_split_sentence_emits_one_tuple_per_word() {
    let mut split = SplitSentence;
    let mut out = emitter();
    split
      .process(&tuple(Fields::new().with("sentence", "the  cat\tsat ")), &mut out)
      .await
      .unwrap();
    let words: Vec<String> = out
      .drain()
      .iter()
      .map(|t| t.get_str("word").unwrap().to_string())
      .collect();
    assert_eq!(words, ["the", "cat", "sat"]);
  }

  #[tokio::test]
  async fn test_split_sentence_rejects_tuple_without_sentence() {
    let mut split = SplitSentence;
    let result = split
      .process(&tuple(Fields::new().with("text", "hello")), &mut emitter())
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_word_count_flushes_and_clears() {
    let mut counter = WordCount::new();
    let mut out = emitter();
    for word in ["the", "cat", "the"] {
      counter
        .process(&tuple(Fields::new().with("word", word)), &mut out)
        .await
        .unwrap();
    }
    assert_eq!(out.pending(), 0);
    assert_eq!(counter.counts().get("the"), Some(&2));

    counter.tick(&tick(1), &mut out).await.unwrap();
    let flushed: HashMap<String, i64> = out
      .drain()
      .iter()
      .map(|t| (t.get_str("word").unwrap().to_string(), t.get_int("count").unwrap()))
      .collect();
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed["the"], 2);
    assert_eq!(flushed["cat"], 1);
    assert!(counter.counts().is_empty());

    counter.tick(&tick(2), &mut out).await.unwrap();
    assert_eq!(out.pending(), 0);
  }

  #[tokio::test]
  async fn test_scripted_source_exhausts() {
    let mut source = SentenceSource::scripted(["a b", "c"]);
    let mut out = emitter();
    assert_eq!(source.next_tuple(&mut out).await.unwrap(), SourceStatus::Emitted);
    assert_eq!(source.next_tuple(&mut out).await.unwrap(), SourceStatus::Emitted);
    assert_eq!(source.next_tuple(&mut out).await.unwrap(), SourceStatus::Exhausted);
    let sentences: Vec<String> = out
      .drain()
      .iter()
      .map(|t| t.get_str("sentence").unwrap().to_string())
      .collect();
    assert_eq!(sentences, ["a b", "c"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_random_source_picks_known_sentences() {
    let mut source = SentenceSource::seeded(7).with_interval(Duration::from_millis(5));
    let mut out = emitter();
    for _ in 0..20 {
      assert_eq!(source.next_tuple(&mut out).await.unwrap(), SourceStatus::Emitted);
    }
    let tuples = out.drain();
    assert_eq!(tuples.len(), 20);
    for t in tuples {
      assert!(SENTENCES.contains(&t.get_str("sentence").unwrap()));
    }
  }

  #[test]
  fn test_topology_shape() {
    let topology = topology(TopologyConfig::default()).unwrap();
    assert_eq!(topology.name(), TOPOLOGY_NAME);
    let spout = topology.task_by_name(SENTENCE_SPOUT).unwrap();
    let split = topology.task_by_name(SPLIT_BOLT).unwrap();
    let count = topology.task_by_name(COUNT_BOLT).unwrap();
    assert_eq!(spout.parallelism(), 1);
    assert_eq!(split.parallelism(), 2);
    assert_eq!(count.parallelism(), 2);
    assert_eq!(count.config().tick_interval(), Some(Duration::from_secs(3)));
    assert_eq!(split.config().tick_interval(), None);

    let groupings: Vec<String> = topology
      .edges()
      .iter()
      .map(|edge| edge.grouping.as_ref().unwrap().to_string())
      .collect();
    assert_eq!(groupings.len(), 2);
    assert_eq!(topology.topological_order()[0], spout.id());
  }

  #[test]
  fn test_topology_honours_overrides() {
    let config = TopologyConfig::default().with_task(COUNT_BOLT, TaskConfig::new(4).with_tick_interval_secs(1));
    let topology = topology(config).unwrap();
    let count = topology.task_by_name(COUNT_BOLT).unwrap();
    assert_eq!(count.parallelism(), 4);
    assert_eq!(count.config().tick_interval(), Some(Duration::from_secs(1)));
  }

  #[test]
  fn test_parallelism_override_keeps_flush_tick() {
    let config =
      TopologyConfig::from_json_str(r#"{ "tasks": { "word_count_bolt": { "parallelism": 4 } } }"#).unwrap();
    let topology = topology(config).unwrap();
    let count = topology.task_by_name(COUNT_BOLT).unwrap();
    assert_eq!(count.parallelism(), 4);
    assert_eq!(count.config().tick_interval(), Some(Duration::from_secs(3)));
  }
}
