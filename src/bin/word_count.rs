//! Runs the word count topology in-process.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use topoweave::config::TopologyConfig;
use topoweave::submit::{ClusterConfig, LocalSubmitter, Submitter};
use topoweave::word_count;

/// Word count topology: random sentences, split into words, counted per word.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// Topology configuration file (JSON)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Seconds to run before shutting down; runs until Ctrl-C when omitted
  #[arg(short, long)]
  duration_secs: Option<u64>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, default_value = "info")]
  log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let args = Args::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("topoweave={},word_count={}", args.log_level, args.log_level).into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = match &args.config {
    Some(path) => {
      info!(path = %path.display(), "loading topology configuration");
      TopologyConfig::from_json_file(path)?
    }
    None => TopologyConfig::default(),
  };

  let topology = word_count::topology(config)?;
  let mut runtime = LocalSubmitter
    .submit(topology, ClusterConfig::local())
    .await?;

  let deadline = async {
    match args.duration_secs {
      Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
      None => std::future::pending().await,
    }
  };
  tokio::pin!(deadline);

  loop {
    tokio::select! {
      _ = &mut deadline => break,
      result = tokio::signal::ctrl_c() => {
        result?;
        info!("interrupted");
        break;
      }
      Some(failure) = runtime.next_failure() => {
        warn!(%failure, "task instance stopped");
      }
    }
  }

  let report = runtime.shutdown().await?;
  println!("{}", serde_json::to_string_pretty(&report.metrics)?);
  for failure in &report.failures {
    eprintln!("{failure}");
  }
  Ok(())
}
