//! Fluent construction and validation of a [`Topology`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use super::graph::{Edge, TaskDefinition, Topology, topological_sort};
use super::TaskId;
use crate::config::{TaskConfig, TopologyConfig};
use crate::error::BuildError;
use crate::grouping::{Grouping, GroupingStrategy};
use crate::task::{Component, Processor, Source, TaskContext, TaskKind};

/// Grouping declared on one input.
#[derive(Clone)]
enum InputGrouping {
  Declared(Grouping),
  Custom(Arc<dyn GroupingStrategy>),
}

#[derive(Clone)]
struct InputDeclaration {
  upstream: String,
  grouping: InputGrouping,
}

/// Declaration of one task: its component, configuration, inputs and
/// declared output fields.
#[derive(Clone)]
pub struct TaskDeclaration {
  name: String,
  component: Component,
  config: TaskConfig,
  inputs: Vec<InputDeclaration>,
  outputs: Vec<String>,
}

impl TaskDeclaration {
  /// Declares a source. `factory` is called once per instance.
  pub fn source<S, F>(name: impl Into<String>, factory: F) -> Self
  where
    S: Source + 'static,
    F: Fn(&TaskContext) -> S + Send + Sync + 'static,
  {
    Self::with_component(
      name,
      Component::Source(Arc::new(move |ctx: &TaskContext| {
        Box::new(factory(ctx)) as Box<dyn Source>
      })),
    )
  }

  /// Declares a processor. `factory` is called once per instance.
  pub fn processor<P, F>(name: impl Into<String>, factory: F) -> Self
  where
    P: Processor + 'static,
    F: Fn(&TaskContext) -> P + Send + Sync + 'static,
  {
    Self::with_component(
      name,
      Component::Processor(Arc::new(move |ctx: &TaskContext| {
        Box::new(factory(ctx)) as Box<dyn Processor>
      })),
    )
  }

  fn with_component(name: impl Into<String>, component: Component) -> Self {
    Self {
      name: name.into(),
      component,
      config: TaskConfig::default(),
      inputs: Vec::new(),
      outputs: Vec::new(),
    }
  }

  /// Task name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Replaces the whole task configuration.
  pub fn config(mut self, config: TaskConfig) -> Self {
    self.config = config;
    self
  }

  /// Sets the number of instances.
  pub fn parallelism(mut self, parallelism: u32) -> Self {
    self.config.parallelism = parallelism;
    self
  }

  /// Delivers a tick record to every instance every `secs` seconds.
  pub fn tick_interval_secs(mut self, secs: u32) -> Self {
    self.config.tick_interval_secs = Some(secs);
    self
  }

  /// Declares the fields this task may emit.
  pub fn outputs<I, S>(mut self, fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.outputs = fields.into_iter().map(Into::into).collect();
    self
  }

  /// Reads from `upstream` with the given grouping.
  pub fn input(mut self, upstream: impl Into<String>, grouping: Grouping) -> Self {
    self.inputs.push(InputDeclaration {
      upstream: upstream.into(),
      grouping: InputGrouping::Declared(grouping),
    });
    self
  }

  /// Reads from `upstream` with a user supplied strategy.
  pub fn custom_input(
    mut self,
    upstream: impl Into<String>,
    strategy: Arc<dyn GroupingStrategy>,
  ) -> Self {
    self.inputs.push(InputDeclaration {
      upstream: upstream.into(),
      grouping: InputGrouping::Custom(strategy),
    });
    self
  }
}

/// Builder for a [`Topology`].
///
/// Tasks are registered in order; inputs may name tasks registered later,
/// every reference is resolved and checked in [`build`](Self::build).
pub struct TopologyBuilder {
  name: String,
  config: TopologyConfig,
  tasks: Vec<TaskDeclaration>,
}

impl TopologyBuilder {
  /// Creates an empty builder.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      config: TopologyConfig::default(),
      tasks: Vec::new(),
    }
  }

  /// Uses `config` for the topology; its per-task entries override the
  /// configuration of the matching declarations.
  pub fn with_config(mut self, config: TopologyConfig) -> Self {
    self.config = config;
    self
  }

  /// Registers a task.
  pub fn add(mut self, task: TaskDeclaration) -> Self {
    self.tasks.push(task);
    self
  }

  /// Validates the declarations and produces the immutable topology.
  ///
  /// # Errors
  ///
  /// Checks run in this order and the first failure is returned:
  /// empty topology, zero queue capacity, duplicate names, parallelism, tick intervals, inputs on
  /// sources or missing on processors, unknown upstreams, cycles, and fields
  /// groupings naming fields their producer does not declare.
  pub fn build(self) -> Result<Topology, BuildError> {
    let TopologyBuilder {
      name,
      config,
      tasks,
    } = self;

    if tasks.is_empty() {
      return Err(BuildError::Empty(name));
    }
    if config.queue.capacity == Some(0) {
      return Err(BuildError::InvalidQueueCapacity(name));
    }

    let mut index: HashMap<&str, TaskId> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
      if index.insert(task.name.as_str(), TaskId(i)).is_some() {
        return Err(BuildError::DuplicateName(task.name.clone()));
      }
    }

    let mut configs = Vec::with_capacity(tasks.len());
    for task in &tasks {
      let task_config = match config.tasks.get(&task.name) {
        Some(task_override) => task_override.apply(task.config),
        None => task.config,
      };
      if task_config.parallelism == 0 {
        return Err(BuildError::InvalidParallelism {
          task: task.name.clone(),
        });
      }
      if task_config.tick_interval_secs == Some(0) {
        return Err(BuildError::InvalidTickInterval {
          task: task.name.clone(),
        });
      }
      match (task.component.kind(), task.inputs.is_empty()) {
        (TaskKind::Source, false) => {
          return Err(BuildError::SourceWithInputs {
            task: task.name.clone(),
          });
        }
        (TaskKind::Processor, true) => {
          return Err(BuildError::MissingInputs {
            task: task.name.clone(),
          });
        }
        _ => {}
      }
      configs.push(task_config);
    }

    let mut edges = Vec::new();
    for (consumer, task) in tasks.iter().enumerate() {
      for input in &task.inputs {
        let producer =
          *index
            .get(input.upstream.as_str())
            .ok_or_else(|| BuildError::UnknownUpstream {
              task: task.name.clone(),
              upstream: input.upstream.clone(),
            })?;
        let (grouping, strategy) = match &input.grouping {
          InputGrouping::Declared(grouping) => (
            Some(grouping.clone()),
            grouping.clone().into_strategy(&input.upstream),
          ),
          InputGrouping::Custom(strategy) => (None, Arc::clone(strategy)),
        };
        edges.push(Edge {
          producer,
          consumer: TaskId(consumer),
          grouping,
          strategy,
        });
      }
    }

    let order = topological_sort(tasks.len(), &edges).map_err(|stuck| BuildError::Cycle {
      tasks: stuck.iter().map(|id| tasks[id.0].name.clone()).collect(),
    })?;

    for edge in &edges {
      let producer = &tasks[edge.producer.0];
      let declared: HashSet<&str> = producer.outputs.iter().map(String::as_str).collect();
      if let Some(field) = edge
        .strategy
        .required_fields()
        .iter()
        .find(|field| !declared.contains(field.as_str()))
      {
        return Err(BuildError::InvalidField {
          producer: producer.name.clone(),
          consumer: tasks[edge.consumer.0].name.clone(),
          field: field.clone(),
        });
      }
    }

    let definitions = tasks
      .into_iter()
      .zip(configs)
      .enumerate()
      .map(|(i, (task, task_config))| {
        TaskDefinition::new(
          TaskId(i),
          task.name,
          task.component,
          task_config,
          task.outputs,
        )
      })
      .collect();

    let topology = Topology::new(name, definitions, edges, order, config);
    debug!(
      topology = %topology.name(),
      tasks = topology.tasks().len(),
      edges = topology.edges().len(),
      "topology built"
    );
    Ok(topology)
  }
}
