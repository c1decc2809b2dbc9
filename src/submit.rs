//! Submission boundary between a built topology and whatever runs it.
//!
//! A [`Submitter`] receives a validated [`Topology`] together with the
//! deployment settings of a [`ClusterConfig`]. [`LocalSubmitter`] runs it
//! in-process on the current tokio runtime; remote submitters live outside
//! this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::topology::Topology;

/// Where and how a topology should be deployed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
  /// Target cluster; `local` for in-process execution.
  pub cluster: String,
  /// Role the topology runs as.
  pub role: Option<String>,
  /// Deployment environment.
  pub environment: Option<String>,
  /// Free-form settings forwarded to the submitter.
  pub extra: HashMap<String, String>,
}

impl ClusterConfig {
  /// Settings for in-process execution.
  pub fn local() -> Self {
    Self {
      cluster: "local".to_string(),
      ..Self::default()
    }
  }

  /// Sets the role.
  pub fn with_role(mut self, role: impl Into<String>) -> Self {
    self.role = Some(role.into());
    self
  }

  /// Sets the environment.
  pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
    self.environment = Some(environment.into());
    self
  }
}

/// Hands a topology over for execution.
#[async_trait]
pub trait Submitter: Send + Sync {
  /// Starts `topology` and returns the runtime driving it.
  async fn submit(&self, topology: Topology, cluster: ClusterConfig) -> Result<Runtime, RuntimeError>;
}

/// Runs topologies in the calling process.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalSubmitter;

#[async_trait]
impl Submitter for LocalSubmitter {
  async fn submit(&self, topology: Topology, cluster: ClusterConfig) -> Result<Runtime, RuntimeError> {
    info!(
      topology = %topology.name(),
      cluster = %cluster.cluster,
      role = ?cluster.role,
      environment = ?cluster.environment,
      "submitting topology locally"
    );
    let mut runtime = Runtime::new(topology);
    runtime.start().await?;
    Ok(runtime)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cluster_config_defaults_missing_fields() {
    let config: ClusterConfig = serde_json::from_str(r#"{"cluster": "aurora", "role": "www"}"#).unwrap();
    assert_eq!(config.cluster, "aurora");
    assert_eq!(config.role.as_deref(), Some("www"));
    assert_eq!(config.environment, None);
    assert!(config.extra.is_empty());
  }

  #[test]
  fn test_local_builder() {
    let config = ClusterConfig::local()
      .with_role("ops")
      .with_environment("devel");
    assert_eq!(config.cluster, "local");
    assert_eq!(config.role.as_deref(), Some("ops"));
    assert_eq!(config.environment.as_deref(), Some("devel"));
  }
}
