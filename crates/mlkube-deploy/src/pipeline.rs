//! Model image build and push.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use mlkube_core::{CanonicalName, ImageReference, RegistryInfo};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PipelineError;

/// Turns a model artifact into a pushed container image.
#[async_trait]
pub trait ImagePipeline: Send + Sync {
    /// Build an image serving `model_uri` and push it as `name:tag`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Build`] or [`PipelineError::Push`] carrying
    /// the underlying tool's message.
    async fn build_and_push(
        &self,
        name: &CanonicalName,
        tag: &str,
        model_uri: &str,
    ) -> Result<ImageReference, PipelineError>;
}

#[async_trait]
impl<P: ImagePipeline + ?Sized> ImagePipeline for Arc<P> {
    async fn build_and_push(
        &self,
        name: &CanonicalName,
        tag: &str,
        model_uri: &str,
    ) -> Result<ImageReference, PipelineError> {
        (**self).build_and_push(name, tag, model_uri).await
    }
}

/// Builds with the `mlflow` CLI and pushes with the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCliPipeline {
    registry: RegistryInfo,
    build_program: String,
    build_args: Vec<String>,
    docker_program: String,
}

impl DockerCliPipeline {
    /// Pipeline pushing to `registry` with the stock commands.
    #[must_use]
    pub fn new(registry: RegistryInfo) -> Self {
        Self {
            registry,
            build_program: "mlflow".to_string(),
            build_args: vec!["models".to_string(), "build-docker".to_string()],
            docker_program: "docker".to_string(),
        }
    }

    /// Replace the build command. `-m <uri> -n <image>` is appended to `args`.
    #[must_use]
    pub fn with_build_command(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.build_program = program.into();
        self.build_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the `docker` executable.
    #[must_use]
    pub fn with_docker_program(mut self, program: impl Into<String>) -> Self {
        self.docker_program = program.into();
        self
    }

    /// Registry images are pushed to.
    #[must_use]
    pub fn registry(&self) -> &RegistryInfo {
        &self.registry
    }
}

#[async_trait]
impl ImagePipeline for DockerCliPipeline {
    async fn build_and_push(
        &self,
        name: &CanonicalName,
        tag: &str,
        model_uri: &str,
    ) -> Result<ImageReference, PipelineError> {
        let image = self.registry.image_reference(name, tag);
        let image_str = image.to_string();

        info!(image = %image_str, model_uri, "Building model image");
        let mut build_args = self.build_args.clone();
        build_args.extend(["-m".to_string(), model_uri.to_string()]);
        build_args.extend(["-n".to_string(), image_str.clone()]);
        run(&self.build_program, &build_args, None)
            .await
            .map_err(PipelineError::Build)?;

        debug!(registry = %self.registry.registry, "Logging in to registry");
        let login_args = [
            "login".to_string(),
            self.registry.registry.clone(),
            "--username".to_string(),
            self.registry.username.clone(),
            "--password-stdin".to_string(),
        ];
        run(
            &self.docker_program,
            &login_args,
            Some(&self.registry.password),
        )
        .await
        .map_err(PipelineError::Push)?;

        info!(image = %image_str, "Pushing model image");
        run(&self.docker_program, &["push".to_string(), image_str], None)
            .await
            .map_err(PipelineError::Push)?;

        Ok(image)
    }
}

/// Run `program` to completion, returning its stderr on failure.
async fn run(program: &str, args: &[String], stdin: Option<&str>) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // A program that exits without reading is judged by its exit status
        match pipe.write_all(input.as_bytes()).await {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(format!("failed to write to {program}: {e}"));
            }
            _ => {}
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("failed to wait for {program}: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Err(format!("{program} exited with {}", output.status))
    } else {
        Err(stderr)
    }
}

/// A pipeline that records requests instead of running tools.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// A recorded build request.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct BuildRequest {
        /// Canonical name.
        pub name: String,
        /// Image tag.
        pub tag: String,
        /// Model artifact location.
        pub model_uri: String,
    }

    /// A mock pipeline computing references without building anything.
    pub struct MockPipeline {
        registry: RegistryInfo,
        builds: Mutex<Vec<BuildRequest>>,
        failure: Mutex<Option<PipelineError>>,
    }

    impl Default for MockPipeline {
        fn default() -> Self {
            Self::new(RegistryInfo {
                username: "mlkube".to_string(),
                password: "mlkube".to_string(),
                registry: "registry.local".to_string(),
                namespace: "models".to_string(),
            })
        }
    }

    impl MockPipeline {
        /// Create a mock pipeline pushing to `registry`.
        #[must_use]
        pub fn new(registry: RegistryInfo) -> Self {
            Self {
                registry,
                builds: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
            }
        }

        /// Fail every following build with `error`, or succeed again on `None`.
        pub fn fail_with(&self, error: Option<PipelineError>) {
            *self.failure.lock() = error;
        }

        /// Build requests received so far, including failed ones.
        #[must_use]
        pub fn builds(&self) -> Vec<BuildRequest> {
            self.builds.lock().clone()
        }
    }

    #[async_trait]
    impl ImagePipeline for MockPipeline {
        async fn build_and_push(
            &self,
            name: &CanonicalName,
            tag: &str,
            model_uri: &str,
        ) -> Result<ImageReference, PipelineError> {
            self.builds.lock().push(BuildRequest {
                name: name.to_string(),
                tag: tag.to_string(),
                model_uri: model_uri.to_string(),
            });

            if let Some(error) = self.failure.lock().clone() {
                return Err(error);
            }
            Ok(self.registry.image_reference(name, tag))
        }
    }
}
