//! Helper environment: a disposable container that shares the target
//! container's volumes and a persistent snapshot volume, used to run file
//! operations without any tooling inside the target itself.

use crate::bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use crate::bollard::exec::{CreateExecOptions, StartExecResults};
use crate::bollard::image::BuildImageOptions;
use crate::bollard::models::{ExecInspectResponse, HostConfig};
use crate::bollard::volume::CreateVolumeOptions;
use crate::bollard::Docker;
use crate::{is_status, scope, ExecutorError};
use async_trait::async_trait;
use ds_common::{ExecContext, Result, SnapshotError, TargetControl, HELPER_BASE_PATH};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// Recipe for the helper image. The container idles in `sh` so that
/// commands can be exec'd into it.
pub const HELPER_DOCKERFILE: &str = "FROM alpine:3
RUN apk add --no-cache rsync
WORKDIR /mnt/ds
CMD [\"sh\"]
";

/// Seconds the engine waits for a container to stop before killing it.
const STOP_TIMEOUT_SECS: i64 = 2;

/// Image, volume and container all share this name, so every namespace gets
/// its own isolated set.
pub fn resource_name(namespace: &str) -> String {
    format!("ds-{namespace}")
}

/// Label on the helper container naming the target whose volumes it mounts.
const TARGET_LABEL: &str = "ds.target";

/// `true` if a helper carrying `labels` mounts the volumes of `target`.
fn bound_to(labels: Option<&HashMap<String, String>>, target: &str) -> bool {
    labels
        .and_then(|labels| labels.get(TARGET_LABEL))
        .is_some_and(|bound| bound == target)
}

/// Exit code of a finished exec, or `None` while it is still running.
fn finished_exit_code(exec_id: &str, inspect: &ExecInspectResponse) -> Option<Result<i64>> {
    if inspect.running == Some(true) {
        return None;
    }
    Some(inspect.exit_code.ok_or_else(|| {
        SnapshotError::Internal(format!("exec {exec_id} finished without an exit code"))
    }))
}

/// Tar archive holding only the helper Dockerfile, used as build context.
fn build_context() -> std::result::Result<Vec<u8>, ExecutorError> {
    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(HELPER_DOCKERFILE.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, HELPER_DOCKERFILE.as_bytes())?;
    Ok(builder.into_inner()?)
}

/// Gets or creates the helper resources for one namespace.
#[derive(Clone)]
pub struct HelperManager {
    docker: Arc<Docker>,
    namespace: String,
}

impl HelperManager {
    pub fn new(docker: Arc<Docker>, namespace: impl Into<String>) -> Self {
        Self {
            docker,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn image_tag(&self) -> String {
        resource_name(&self.namespace)
    }

    pub fn volume_name(&self) -> String {
        resource_name(&self.namespace)
    }

    pub fn container_name(&self) -> String {
        resource_name(&self.namespace)
    }

    /// Start/stop control over target containers, sharing this manager's client.
    pub fn targets(&self) -> DockerTargets {
        DockerTargets::new(self.docker.clone())
    }

    /// Ensures image, volume and helper container exist and the container is
    /// running. Image and volume are reused as they are; a leftover helper is
    /// reused only if it mounts `target_container`.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn acquire(&self, target_container: &str) -> Result<HelperSession> {
        if target_container.is_empty() {
            return Err(SnapshotError::Config(
                "no target container configured, set `container_name` in ds.yaml".to_string(),
            ));
        }

        self.ensure_image().await?;
        self.ensure_volume().await?;
        let container = self.ensure_container(target_container).await?;

        match self
            .docker
            .start_container(&container, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            // Already running
            Err(e) if is_status(&e, 304) => {}
            Err(e) => return Err(ExecutorError::StartFailed(e).into()),
        }

        info!(%container, "Helper container ready");
        Ok(HelperSession::new(self.docker.clone(), container))
    }

    async fn ensure_image(&self) -> Result<()> {
        let tag = self.image_tag();
        match self.docker.inspect_image(&tag).await {
            Ok(_) => {
                debug!(%tag, "Helper image already present");
                return Ok(());
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(ExecutorError::DockerApi(e).into()),
        }

        info!(%tag, "Building helper image...");
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.clone(),
            rm: true,
            ..Default::default()
        };
        let context = build_context()?;
        let mut stream = self.docker.build_image(options, None, Some(context.into()));

        while let Some(step) = stream.next().await {
            let info = step.map_err(ExecutorError::DockerApi)?;
            if let Some(message) = info.error {
                return Err(ExecutorError::ImageBuildFailed(message).into());
            }
            if let Some(line) = info.stream {
                debug!(%tag, "{}", line.trim_end());
            }
        }

        info!(%tag, "Helper image built");
        Ok(())
    }

    async fn ensure_volume(&self) -> Result<()> {
        let volume_name = self.volume_name();

        // Check if volume already exists
        match self.docker.inspect_volume(&volume_name).await {
            Ok(_) => {
                debug!(%volume_name, "Snapshot volume already exists");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => {
                let mut labels = HashMap::new();
                labels.insert("ds.namespace".to_string(), self.namespace.clone());

                let create_options = CreateVolumeOptions {
                    name: volume_name.clone(),
                    driver: "local".to_string(),
                    labels,
                    ..Default::default()
                };
                self.docker
                    .create_volume(create_options)
                    .await
                    .map_err(ExecutorError::VolumeCreationFailed)?;
                info!(%volume_name, "Created snapshot volume");
                Ok(())
            }
            Err(e) => Err(ExecutorError::DockerApi(e).into()),
        }
    }

    async fn ensure_container(&self, target_container: &str) -> Result<String> {
        let name = self.container_name();

        match self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(existing) => {
                let labels = existing.config.as_ref().and_then(|c| c.labels.as_ref());
                if bound_to(labels, target_container) {
                    debug!(container = %name, "Reusing helper container");
                    return Ok(name);
                }
                warn!(
                    container = %name,
                    target = %target_container,
                    "Leftover helper mounts another target, recreating it"
                );
                remove_container(&self.docker, &name).await?;
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(ExecutorError::DockerApi(e).into()),
        }

        if !self.targets().exists(target_container).await? {
            return Err(SnapshotError::TargetNotFound(target_container.to_string()));
        }

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                self.volume_name(),
                HELPER_BASE_PATH
            )]),
            volumes_from: Some(vec![target_container.to_string()]),
            auto_remove: Some(false),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert("ds.namespace".to_string(), self.namespace.clone());
        labels.insert(TARGET_LABEL.to_string(), target_container.to_string());

        let config = Config {
            image: Some(self.image_tag()),
            working_dir: Some(HELPER_BASE_PATH.to_string()),
            tty: Some(true),
            open_stdin: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(ExecutorError::CreationFailed)?;

        info!(container = %name, target = %target_container, "Created helper container");
        Ok(name)
    }
}

/// A held helper container. Commands run through [`ExecContext`] until
/// [`HelperSession::release`] force-removes the container.
///
/// Dropping a session that was never released removes the container too.
pub struct HelperSession {
    docker: Arc<Docker>,
    container: RwLock<Option<String>>,
}

impl HelperSession {
    fn new(docker: Arc<Docker>, container: String) -> Self {
        Self {
            docker,
            container: RwLock::new(Some(container)),
        }
    }

    pub async fn container_name(&self) -> Option<String> {
        self.container.read().await.clone()
    }

    /// Force-removes the helper container. Stopping it instead can hang on
    /// in-flight I/O. Image and volume are left in place. Calling this again
    /// is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self) -> Result<()> {
        let Some(container) = self.container.write().await.take() else {
            return Ok(());
        };

        remove_container(&self.docker, &container).await?;
        info!(%container, "Helper container removed");
        Ok(())
    }

    async fn held(&self) -> Result<String> {
        self.container
            .read()
            .await
            .clone()
            .ok_or(SnapshotError::HelperNotAcquired)
    }

    /// Runs `sh -c command`, feeding raw output chunks to `on_output`, and
    /// returns the exit code.
    async fn exec(
        &self,
        command: &str,
        on_output: &mut (dyn for<'a> FnMut(&'a [u8]) + Send),
    ) -> Result<i64> {
        let container = self.held().await?;

        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["sh", "-c", command]),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&container, exec_config)
            .await
            .map_err(ExecutorError::ExecFailed)?;

        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(ExecutorError::ExecFailed)?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(ExecutorError::ExecFailed)? {
                        LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                            on_output(&message);
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SnapshotError::Internal(
                    "exec started detached, no output attached".to_string(),
                ));
            }
        }

        self.exit_code(&exec.id).await
    }

    /// The output stream can close a moment before the engine records the
    /// exit code, so poll briefly while the exec still reports running.
    async fn exit_code(&self, exec_id: &str) -> Result<i64> {
        for _ in 0..50 {
            let inspect = self
                .docker
                .inspect_exec(exec_id)
                .await
                .map_err(ExecutorError::ExecFailed)?;
            if let Some(exit_code) = finished_exit_code(exec_id, &inspect) {
                return exit_code;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Err(SnapshotError::Internal(format!(
            "exec {exec_id} did not report an exit code"
        )))
    }
}

#[async_trait]
impl ExecContext for HelperSession {
    async fn run(&self, command: &str) -> Result<String> {
        let mut collected = Vec::new();
        let exit_code = self
            .exec(command, &mut |chunk: &[u8]| collected.extend_from_slice(chunk))
            .await?;
        let output = String::from_utf8_lossy(&collected).to_string();

        if exit_code != 0 {
            return Err(SnapshotError::CommandFailed {
                command: command.to_string(),
                exit_code,
                output,
            });
        }
        Ok(output)
    }

    async fn run_streaming(
        &self,
        command: &str,
        on_output: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<()> {
        let mut last_chunk = String::new();
        let exit_code = self
            .exec(command, &mut |chunk: &[u8]| {
                let text = String::from_utf8_lossy(chunk);
                on_output(&text);
                last_chunk = text.into_owned();
            })
            .await?;

        if exit_code != 0 {
            return Err(SnapshotError::CommandFailed {
                command: command.to_string(),
                exit_code,
                output: last_chunk,
            });
        }
        Ok(())
    }

    /// Killing the helper is the only way to stop a command exec'd into it.
    async fn halt(&self) -> Result<()> {
        self.release().await
    }
}

impl Drop for HelperSession {
    fn drop(&mut self) {
        if let Some(container) = self.container.get_mut().take() {
            let docker = self.docker.clone();
            scope::run_cleanup("helper container", async move {
                if let Err(e) = remove_container(&docker, &container).await {
                    error!(%container, error = %e, "Failed to remove helper container");
                }
            });
        }
    }
}

async fn remove_container(docker: &Docker, container: &str) -> Result<()> {
    let remove_opts = Some(RemoveContainerOptions {
        force: true,
        ..Default::default()
    });
    match docker.remove_container(container, remove_opts).await {
        Ok(()) => Ok(()),
        Err(e) if is_status(&e, 404) => {
            warn!(%container, "Helper container already gone");
            Ok(())
        }
        Err(e) => Err(ExecutorError::RemovalFailed(e).into()),
    }
}

/// [`TargetControl`] over containers managed by the local Docker engine.
#[derive(Clone)]
pub struct DockerTargets {
    docker: Arc<Docker>,
}

impl DockerTargets {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl TargetControl for DockerTargets {
    async fn exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(ExecutorError::DockerApi(e).into()),
        }
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => Ok(inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(ExecutorError::DockerApi(e).into()),
        }
    }

    #[instrument(skip(self))]
    async fn freeze(&self, name: &str) -> Result<()> {
        info!("Stopping container {}...", name);
        match self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(SnapshotError::TargetNotFound(name.to_string())),
            Err(e) => Err(ExecutorError::StopFailed(e).into()),
        }
    }

    #[instrument(skip(self))]
    async fn unfreeze(&self, name: &str) -> Result<()> {
        info!("Starting container {}...", name);
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(SnapshotError::TargetNotFound(name.to_string())),
            Err(e) => Err(ExecutorError::StartFailed(e).into()),
        }
    }
}
