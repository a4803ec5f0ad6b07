//! mlkube - deploy registered models to Kubernetes and query them.
//!
//! This is the entry point for the `mlkube` binary.
//!
//! # Commands
//!
//! - `mlkube server` subscribes to the model event stream and keeps one
//!   `Deployment` + `Service` pair per model version
//! - `mlkube predict` sends a table to a deployed model version and prints
//!   the predictions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mlkube_bus::{Dispatcher, RedisTransport};
use mlkube_client::{ResilientInvoker, TabularBody};
use mlkube_core::{CanonicalName, RegistryInfo};
use mlkube_deploy::{
    ClusterResolver, DeployConfig, DockerCliPipeline, KubeCluster, ModelEventHandler, Reconciler,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mlkube - MLflow models on Kubernetes.
#[derive(Parser, Debug)]
#[command(name = "mlkube")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a kubeconfig file. In-cluster or default config otherwise.
    #[arg(long, global = true, env = "KUBERNETES_CONFIG_PATH")]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy and remove models as lifecycle events arrive.
    Server {
        /// Event stream to subscribe to.
        #[arg(long, env = "MODELS_EVENT_URI")]
        event_target: String,
    },
    /// Run a prediction against a deployed model version.
    Predict {
        /// Registered model name.
        #[arg(long)]
        model: String,

        /// Model version.
        #[arg(long)]
        version: String,

        /// Input table in split orientation. Read from stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the predictions. Stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so `predict` output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mlkube=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DeployConfig::from_env();
    let cluster = connect_cluster(args.kubeconfig.as_deref(), &config.namespace).await?;

    match args.command {
        Command::Server { event_target } => serve(&event_target, cluster, config).await,
        Command::Predict {
            model,
            version,
            input,
            output,
        } => predict(cluster, &model, &version, input.as_deref(), output.as_deref()).await,
    }
}

async fn connect_cluster(
    kubeconfig: Option<&Path>,
    namespace: &str,
) -> anyhow::Result<KubeCluster> {
    let cluster = match kubeconfig {
        Some(path) => KubeCluster::from_kubeconfig(path, namespace).await,
        None => KubeCluster::try_default(namespace).await,
    }
    .context("failed to connect to Kubernetes")?;

    tracing::info!(namespace = %cluster.namespace(), "Connected to Kubernetes cluster");
    Ok(cluster)
}

// ============================================================================
// Server
// ============================================================================

async fn serve(
    event_target: &str,
    cluster: KubeCluster,
    config: DeployConfig,
) -> anyhow::Result<()> {
    tracing::info!(
        namespace = %config.namespace,
        image_tag = %config.image_tag,
        replicas = config.replicas,
        "Loaded deployment configuration"
    );

    let registry = RegistryInfo::from_env().context("registry credentials are incomplete")?;
    tracing::info!(
        registry = %registry.registry,
        namespace = %registry.namespace,
        "Using image registry"
    );

    let reconciler = Arc::new(Reconciler::new(
        cluster,
        DockerCliPipeline::new(registry),
        config,
    ));

    let transport = RedisTransport::connect(event_target)
        .await
        .with_context(|| format!("failed to connect to {event_target}"))?;

    let mut dispatcher = Dispatcher::new(transport);
    dispatcher
        .register(Arc::new(ModelEventHandler::new(reconciler)))
        .await
        .context("failed to subscribe to model events")?;

    let stop = dispatcher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            stop.stop();
        }
    });

    tracing::info!(event_target, "Listening for model events");
    dispatcher.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}

// ============================================================================
// Predict
// ============================================================================

async fn predict(
    cluster: KubeCluster,
    model: &str,
    version: &str,
    input: Option<&Path>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let (name, renamed) = CanonicalName::for_model_version(model, version)?;
    if renamed {
        tracing::debug!(model, version, name = %name, "Model name canonicalized");
    }

    let body = read_input(input).await?;
    tracing::debug!(name = %name, rows = body.num_rows(), "Sending prediction request");

    let mut invoker = ResilientInvoker::new(name.as_str(), ClusterResolver::new(cluster))?;
    let predictions = invoker
        .invoke(&body)
        .await
        .with_context(|| format!("prediction against {name} failed"))?;

    write_output(output, &predictions).await
}

async fn read_input(path: Option<&Path>) -> anyhow::Result<TabularBody> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read stdin")?;
            raw
        }
    };

    serde_json::from_str(&raw).context("input is not a table with `columns` and `data`")
}

async fn write_output(path: Option<&Path>, predictions: &TabularBody) -> anyhow::Result<()> {
    let mut rendered = serde_json::to_string_pretty(predictions)?;
    rendered.push('\n');

    match path {
        Some(path) => tokio::fs::write(path, rendered)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(rendered.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_reads_event_target() {
        let args = Args::try_parse_from([
            "mlkube",
            "server",
            "--event-target",
            "redis://localhost:6379",
            "--kubeconfig",
            "/tmp/kubeconfig",
        ])
        .unwrap();

        assert_eq!(args.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        match args.command {
            Command::Server { event_target } => assert_eq!(event_target, "redis://localhost:6379"),
            Command::Predict { .. } => panic!("expected server"),
        }
    }

    #[test]
    fn predict_takes_short_io_flags() {
        let args = Args::try_parse_from([
            "mlkube",
            "predict",
            "--model",
            "iris-rf",
            "--version",
            "1",
            "-i",
            "in.json",
            "-o",
            "out.json",
        ])
        .unwrap();

        match args.command {
            Command::Predict {
                model,
                version,
                input,
                output,
            } => {
                assert_eq!(model, "iris-rf");
                assert_eq!(version, "1");
                assert_eq!(input, Some(PathBuf::from("in.json")));
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            Command::Server { .. } => panic!("expected predict"),
        }
    }

    #[test]
    fn predict_requires_version() {
        assert!(Args::try_parse_from(["mlkube", "predict", "--model", "iris-rf"]).is_err());
    }

    #[tokio::test]
    async fn input_and_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        tokio::fs::write(&input, r#"{"columns": ["x"], "data": [[1.5]]}"#)
            .await
            .unwrap();

        let body = read_input(Some(&input)).await.unwrap();
        assert_eq!(body.columns, vec!["x".to_string()]);
        assert_eq!(body.data, vec![vec![json!(1.5)]]);

        let output = dir.path().join("out.json");
        write_output(Some(&output), &body).await.unwrap();
        let written: TabularBody =
            serde_json::from_str(&tokio::fs::read_to_string(&output).await.unwrap()).unwrap();
        assert_eq!(written, body);
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        tokio::fs::write(&input, "[1, 2, 3]").await.unwrap();

        assert!(read_input(Some(&input)).await.is_err());
    }
}
