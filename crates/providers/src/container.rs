use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::HostConfig;
use bollard::Docker;
use thiserror::Error;

use pool_core::{PoolConfig, Provider};

/// `PoolConfig` defaults for the container backend: 30s create timeout
/// (image already local in the common case), 10s shutdown timeout to give
/// `docker stop` room before the engine escalates to `forceTerminate`.
pub fn pool_config_defaults() -> PoolConfig {
    PoolConfig::default()
        .with_create_timeout(Duration::from_secs(30))
        .with_shutdown_timeout(Duration::from_secs(10))
        .with_name_prefix("pool-container")
}

/// Fixed by design: the entrypoint command run inside every container.
/// Scripts must be named accordingly; a `scriptFiles[0]` other than
/// `index.js` is logged, not rejected, since the container still mounts
/// every file the caller listed.
const ENTRYPOINT_FILE: &str = "index.js";
const CONTAINER_INTERNAL_PORT: u16 = 9000;
const WORKDIR: &str = "/usr/src/app";

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("docker daemon error: {0}")]
    Docker(#[from] DockerError),
    #[error("container did not report a running state")]
    NotRunning,
}

#[derive(Clone)]
pub struct ContainerHandle {
    pub container_id: String,
}

pub struct ContainerConfig {
    pub image: String,
    pub name_prefix: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "node:20-slim".to_string(),
            name_prefix: "pool-container".to_string(),
        }
    }
}

impl ContainerConfig {
    /// Overlay `POOL_CONTAINER_IMAGE` / `POOL_CONTAINER_NAME_PREFIX` onto
    /// `Self::default()`, matching `PoolConfig::from_env`'s idiom.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            image: utils::env::overlay_string("POOL_CONTAINER_IMAGE", default.image),
            name_prefix: utils::env::overlay_string(
                "POOL_CONTAINER_NAME_PREFIX",
                default.name_prefix,
            ),
        }
    }
}

/// Creates one container per pooled instance, bind-mounting the script
/// directory's files into the image's workdir and fixing the container's
/// internal port at 9000 regardless of the requested host port.
pub struct ContainerProvider {
    docker: Docker,
    config: ContainerConfig,
}

impl ContainerProvider {
    pub fn connect(config: ContainerConfig) -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, config })
    }
}

#[async_trait]
impl Provider for ContainerProvider {
    type Handle = ContainerHandle;
    type Error = ContainerError;

    async fn create(
        &self,
        port: u16,
        name: &str,
        script_dir: &Path,
        script_files: &[String],
    ) -> Result<Self::Handle, Self::Error> {
        if script_files.first().map(String::as_str) != Some(ENTRYPOINT_FILE) {
            tracing::debug!(
                name,
                first_file = ?script_files.first(),
                "scriptFiles[0] does not match the fixed container entrypoint index.js"
            );
        }

        let binds: Vec<String> = script_files
            .iter()
            .map(|file| {
                format!(
                    "{}:{}/{}",
                    script_dir.join(file).display(),
                    WORKDIR,
                    file
                )
            })
            .collect();

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            format!("{CONTAINER_INTERNAL_PORT}/tcp"),
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{CONTAINER_INTERNAL_PORT}/tcp"), HashMap::new());

        let config = Config {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                "node".to_string(),
                ENTRYPOINT_FILE.to_string(),
                CONTAINER_INTERNAL_PORT.to_string(),
            ]),
            working_dir: Some(WORKDIR.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(binds),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("{}-{}", self.config.name_prefix, name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    platform: None,
                }),
                config,
            )
            .await?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        let inspect = self.docker.inspect_container(&created.id, None).await?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        if !running {
            return Err(ContainerError::NotRunning);
        }

        Ok(ContainerHandle {
            container_id: created.id,
        })
    }

    async fn is_alive(&self, handle: &Self::Handle) -> bool {
        match self.docker.inspect_container(&handle.container_id, None).await {
            Ok(inspect) => inspect
                .state
                .as_ref()
                .and_then(|state| state.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error> {
        match self
            .docker
            .stop_container(&handle.container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => {}
            // 304: already stopped. Success, not an error, per §4.6.
            Err(DockerError::DockerResponseServerError { status_code: 304, .. }) => {}
            Err(err) => return Err(err.into()),
        }
        self.remove(&handle.container_id).await
    }

    async fn force_terminate(&self, handle: &Self::Handle) {
        if let Err(err) = self
            .docker
            .remove_container(
                &handle.container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!(error = %err, container_id = %handle.container_id, "force remove failed");
        }
    }
}

impl ContainerProvider {
    async fn remove(&self, container_id: &str) -> Result<(), ContainerError> {
        match self
            .docker
            .remove_container(container_id, Some(RemoveContainerOptions::default()))
            .await
        {
            Ok(()) => Ok(()),
            // 404: not found. Idempotent success, per the engine's
            // termination policy swallowing NotFound on remove.
            Err(DockerError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
