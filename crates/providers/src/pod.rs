use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ConfigMap, EnvVar, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;

use pool_core::{PoolConfig, Provider};

use crate::command::{kill_group_now, terminate_group};

/// Name of the cluster config object every pooled script is published
/// into. One config object serves the whole pool; each pod mounts the
/// same object and only reads the files it needs.
const SCRIPTS_CONFIG_MAP: &str = "scripts";
/// Internal port the workload binds inside the pod, regardless of the
/// host port the caller requested.
const DEFAULT_POD_PORT: u16 = 9000;
const WORKSPACE_DIR: &str = "/app";
const MOUNT_DIR: &str = "/scripts";

/// `PoolConfig` defaults for the pod backend: 60s create timeout (image
/// pull plus `npm install` inside the pod is slower than any other
/// backend) and 15s shutdown timeout.
pub fn pool_config_defaults() -> PoolConfig {
    PoolConfig::default()
        .with_create_timeout(Duration::from_secs(60))
        .with_shutdown_timeout(Duration::from_secs(15))
        .with_name_prefix("pool-pod")
}

#[derive(Debug, Error)]
pub enum PodError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("pod did not report phase Running within the create timeout")]
    NotRunning,
    #[error("failed to spawn kubectl port-forward: {0}")]
    PortForwardSpawn(#[source] std::io::Error),
    #[error("port-forward exited before the tunnel was confirmed")]
    PortForwardNotReady,
}

/// Backend-specific reference for a pod instance: the pod's own name
/// (namespace is fixed per-provider) plus the side-channel port-forward
/// child that tunnels the host port into the pod.
#[derive(Clone)]
pub struct PodHandle {
    pub pod_name: String,
    side_channel: std::sync::Arc<Mutex<Option<command_group::AsyncGroupChild>>>,
}

pub struct PodConfig {
    pub namespace: String,
    pub name_prefix: String,
    pub image: String,
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name_prefix: "pool-pod".to_string(),
            image: "node:20-slim".to_string(),
        }
    }
}

impl PodConfig {
    /// Overlay `POOL_POD_NAMESPACE` / `POOL_POD_NAME_PREFIX` /
    /// `POOL_POD_IMAGE` onto `Self::default()`.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            namespace: utils::env::overlay_string("POOL_POD_NAMESPACE", default.namespace),
            name_prefix: utils::env::overlay_string("POOL_POD_NAME_PREFIX", default.name_prefix),
            image: utils::env::overlay_string("POOL_POD_IMAGE", default.image),
        }
    }
}

/// Cluster-orchestrated backend: publishes script contents to a shared
/// `ConfigMap`, submits one pod per instance that mounts it, waits for
/// `Running`, then opens a local `kubectl port-forward` as the
/// instance's side-channel.
pub struct PodProvider {
    client: Client,
    config: PodConfig,
}

impl PodProvider {
    pub async fn connect(config: PodConfig) -> Result<Self, PodError> {
        let client = Client::try_default().await?;
        Ok(Self { client, config })
    }

    fn configmap_api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pod_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// `npm install --omit=dev --no-audit --no-fund` needs a
    /// `package.json`; the source script directory is never expected to
    /// ship one, so the provider synthesizes a minimal one pinning the
    /// single runtime dependency the HTTP demonstration server relies on.
    fn synthesize_package_json() -> String {
        r#"{"name":"pool-script","version":"0.0.0","private":true,"dependencies":{"express":"^4.18.2"}}"#
            .to_string()
    }
}

#[async_trait]
impl Provider for PodProvider {
    type Handle = PodHandle;
    type Error = PodError;

    fn requires_existing_script_dir(&self) -> bool {
        // The pod provider ships script contents via the cluster config
        // object in `prepare`; the path only needs to resolve locally so
        // `prepare` can read the files, not exist as a durable artifact.
        true
    }

    async fn prepare(&self, script_dir: &Path, script_files: &[String]) -> Result<(), Self::Error> {
        let api = self.configmap_api();

        let mut data = BTreeMap::new();
        for file in script_files {
            match tokio::fs::read_to_string(script_dir.join(file)).await {
                Ok(contents) => {
                    data.insert(file.clone(), contents);
                }
                Err(err) => {
                    tracing::warn!(file, error = %err, "script file missing from script_dir, skipping config object key");
                }
            }
        }
        data.insert("package.json".to_string(), Self::synthesize_package_json());

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SCRIPTS_CONFIG_MAP.to_string()),
                namespace: Some(self.config.namespace.clone()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        match api.get(SCRIPTS_CONFIG_MAP).await {
            Ok(_) => {
                api.replace(SCRIPTS_CONFIG_MAP, &PostParams::default(), &config_map)
                    .await?;
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                api.create(&PostParams::default(), &config_map).await?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn create(
        &self,
        port: u16,
        name: &str,
        _script_dir: &Path,
        _script_files: &[String],
    ) -> Result<Self::Handle, Self::Error> {
        let pod_name = format!("{}-{}", self.config.name_prefix, name);
        let pod_api = self.pod_api();

        let install_and_run = format!(
            "cp {MOUNT_DIR}/* {WORKSPACE_DIR}/ && cd {WORKSPACE_DIR} && npm install --omit=dev --no-audit --no-fund && node index.js"
        );

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "pool-engine".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![Container {
                    name: "workload".to_string(),
                    image: Some(self.config.image.clone()),
                    command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), install_and_run]),
                    env: Some(vec![
                        EnvVar {
                            name: "NODE_ENV".to_string(),
                            value: Some("production".to_string()),
                            ..Default::default()
                        },
                        EnvVar {
                            name: "PORT".to_string(),
                            value: Some(DEFAULT_POD_PORT.to_string()),
                            ..Default::default()
                        },
                    ]),
                    volume_mounts: Some(vec![VolumeMount {
                        name: "scripts".to_string(),
                        mount_path: MOUNT_DIR.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: "scripts".to_string(),
                    config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                        name: Some(SCRIPTS_CONFIG_MAP.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        pod_api.create(&PostParams::default(), &pod).await?;

        // Poll phase rather than watch: the engine already races this
        // whole call against `create_timeout`, so a simple poll loop
        // keeps the adapter free of its own timeout bookkeeping.
        loop {
            let fetched = pod_api.get(&pod_name).await?;
            let phase = fetched
                .status
                .as_ref()
                .and_then(|status| status.phase.clone());
            match phase.as_deref() {
                Some("Running") => break,
                Some("Failed") => return Err(PodError::NotRunning),
                _ => sleep(Duration::from_millis(500)).await,
            }
        }

        let side_channel = spawn_port_forward(&pod_name, &self.config.namespace, port).await?;

        Ok(PodHandle {
            pod_name,
            side_channel: std::sync::Arc::new(Mutex::new(Some(side_channel))),
        })
    }

    async fn is_alive(&self, handle: &Self::Handle) -> bool {
        match self.pod_api().get(&handle.pod_name).await {
            Ok(pod) => pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .map(|phase| phase == "Running")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error> {
        terminate_side_channel(handle).await;
        match self
            .pod_api()
            .delete(&handle.pod_name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn force_terminate(&self, handle: &Self::Handle) {
        force_kill_side_channel(handle).await;
        let grace = DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };
        if let Err(err) = self.pod_api().delete(&handle.pod_name, &grace).await {
            if !matches!(&err, kube::Error::Api(response) if response.code == 404) {
                tracing::warn!(error = %err, pod = %handle.pod_name, "force delete failed");
            }
        }
    }
}

/// Spawns `kubectl port-forward pod/<name> <port>:<defaultPodPort> -n
/// <namespace>` as the instance's side-channel. Confirms the tunnel is
/// up by waiting for the first line of stdout, mirroring how the
/// subprocess provider confirms workload readiness.
async fn spawn_port_forward(
    pod_name: &str,
    namespace: &str,
    port: u16,
) -> Result<command_group::AsyncGroupChild, PodError> {
    use command_group::AsyncCommandGroup;
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut child = tokio::process::Command::new("kubectl")
        .arg("port-forward")
        .arg(format!("pod/{pod_name}"))
        .arg(format!("{port}:{DEFAULT_POD_PORT}"))
        .arg("-n")
        .arg(namespace)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .group_spawn()
        .map_err(PodError::PortForwardSpawn)?;

    let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
    let mut first_line = String::new();
    let read = stdout
        .read_line(&mut first_line)
        .await
        .map_err(PodError::PortForwardSpawn)?;
    if read == 0 {
        return Err(PodError::PortForwardNotReady);
    }
    tracing::debug!(pod = pod_name, %first_line, "port-forward tunnel confirmed");

    let stderr = child.stderr.take().expect("piped stderr");
    let pod_name = pod_name.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => tracing::debug!(pod = %pod_name, line = line.trim_end(), "port-forward stderr"),
            }
        }
    });

    Ok(child)
}

/// The port-forward side-channel gets SIGTERM and is dropped from
/// tracking before the pod itself is deleted.
async fn terminate_side_channel(handle: &PodHandle) {
    let mut guard = handle.side_channel.lock().await;
    if let Some(mut child) = guard.take() {
        let _ = terminate_group(&mut child, nix::sys::signal::Signal::SIGTERM).await;
    }
}

async fn force_kill_side_channel(handle: &PodHandle) {
    let mut guard = handle.side_channel.lock().await;
    if let Some(mut child) = guard.take() {
        kill_group_now(&mut child).await;
    }
}
