use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use super::TaskId;
use crate::config::{TaskConfig, TopologyConfig};
use crate::grouping::{Grouping, GroupingStrategy};
use crate::task::{Component, TaskKind};

/// A validated task definition.
#[derive(Clone, Debug)]
pub struct TaskDefinition {
  id: TaskId,
  name: Arc<str>,
  component: Component,
  config: TaskConfig,
  outputs: Vec<String>,
}

impl TaskDefinition {
  pub(crate) fn new(
    id: TaskId,
    name: String,
    component: Component,
    config: TaskConfig,
    outputs: Vec<String>,
  ) -> Self {
    Self {
      id,
      name: name.into(),
      component,
      config,
      outputs,
    }
  }

  /// Handle of this task.
  pub fn id(&self) -> TaskId {
    self.id
  }

  /// Task name.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    Arc::clone(&self.name)
  }

  /// Source or processor.
  pub fn kind(&self) -> TaskKind {
    self.component.kind()
  }

  pub(crate) fn component(&self) -> &Component {
    &self.component
  }

  /// Effective configuration, overrides applied.
  pub fn config(&self) -> &TaskConfig {
    &self.config
  }

  /// Number of instances.
  pub fn parallelism(&self) -> usize {
    self.config.parallelism as usize
  }

  /// Declared output fields.
  pub fn outputs(&self) -> &[String] {
    &self.outputs
  }
}

/// A resolved edge between two tasks.
#[derive(Clone)]
pub struct Edge {
  /// Upstream task.
  pub producer: TaskId,
  /// Downstream task.
  pub consumer: TaskId,
  /// Declared grouping; `None` for custom strategies.
  pub grouping: Option<Grouping>,
  pub(crate) strategy: Arc<dyn GroupingStrategy>,
}

impl Edge {
  /// Strategy object routing this edge.
  pub fn strategy(&self) -> &Arc<dyn GroupingStrategy> {
    &self.strategy
  }
}

impl fmt::Debug for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Edge")
      .field("producer", &self.producer)
      .field("consumer", &self.consumer)
      .field("grouping", &self.grouping)
      .finish()
  }
}

/// Immutable, validated topology.
#[derive(Clone, Debug)]
pub struct Topology {
  name: Arc<str>,
  tasks: Vec<TaskDefinition>,
  edges: Vec<Edge>,
  order: Vec<TaskId>,
  config: TopologyConfig,
}

impl Topology {
  pub(crate) fn new(
    name: String,
    tasks: Vec<TaskDefinition>,
    edges: Vec<Edge>,
    order: Vec<TaskId>,
    config: TopologyConfig,
  ) -> Self {
    Self {
      name: name.into(),
      tasks,
      edges,
      order,
      config,
    }
  }

  /// Topology name.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    Arc::clone(&self.name)
  }

  /// Task definitions, indexed by [`TaskId`].
  pub fn tasks(&self) -> &[TaskDefinition] {
    &self.tasks
  }

  /// Task definition by handle.
  pub fn task(&self, id: TaskId) -> &TaskDefinition {
    &self.tasks[id.0]
  }

  /// Task definition by name.
  pub fn task_by_name(&self, name: &str) -> Option<&TaskDefinition> {
    self.tasks.iter().find(|task| task.name() == name)
  }

  /// All edges.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Edges leaving `task`.
  pub fn outbound(&self, task: TaskId) -> impl Iterator<Item = &Edge> {
    self.edges.iter().filter(move |edge| edge.producer == task)
  }

  /// Edges entering `task`.
  pub fn inbound(&self, task: TaskId) -> impl Iterator<Item = &Edge> {
    self.edges.iter().filter(move |edge| edge.consumer == task)
  }

  /// Tasks ordered so that every producer precedes its consumers.
  pub fn topological_order(&self) -> &[TaskId] {
    &self.order
  }

  /// Topology-wide configuration.
  pub fn config(&self) -> &TopologyConfig {
    &self.config
  }
}

/// Kahn's algorithm over `task_count` tasks.
///
/// Ties are broken by declaration order. On failure returns the tasks that
/// could not be ordered, in declaration order.
pub(crate) fn topological_sort(task_count: usize, edges: &[Edge]) -> Result<Vec<TaskId>, Vec<TaskId>> {
  let mut in_degree = vec![0usize; task_count];
  let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); task_count];

  for edge in edges {
    adjacency[edge.producer.0].push(edge.consumer.0);
    in_degree[edge.consumer.0] += 1;
  }

  let mut queue: VecDeque<usize> = (0..task_count).filter(|&i| in_degree[i] == 0).collect();
  let mut order = Vec::with_capacity(task_count);

  while let Some(task) = queue.pop_front() {
    order.push(TaskId(task));
    for &next in &adjacency[task] {
      in_degree[next] -= 1;
      if in_degree[next] == 0 {
        queue.push_back(next);
      }
    }
  }

  if order.len() != task_count {
    return Err(
      (0..task_count)
        .filter(|&i| in_degree[i] > 0)
        .map(TaskId)
        .collect(),
    );
  }

  Ok(order)
}
