use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use nix::sys::signal::Signal;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use pool_core::Provider;

use crate::command::{kill_group_now, terminate_group};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("interpreter exited before announcing readiness")]
    ExitedBeforeReady,
    #[error("failed to read interpreter stdout: {0}")]
    Stdout(#[source] std::io::Error),

    #[error("failed to terminate subprocess: {0}")]
    Terminate(#[source] std::io::Error),
}

/// A running child interpreter, held behind a mutex so `terminate` and
/// `force_terminate` can both reach into the same `AsyncGroupChild`.
#[derive(Clone)]
pub struct ProcessHandle {
    child: Arc<Mutex<AsyncGroupChild>>,
}

/// Spawns the host script interpreter as a subprocess. "Ready" is the
/// first chunk of stdout, not a structured handshake — the workload is
/// expected to print something (even a blank line) as soon as it starts
/// listening.
pub struct ProcessProvider {
    interpreter: String,
}

impl ProcessProvider {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for ProcessProvider {
    fn default() -> Self {
        Self::new("node")
    }
}

#[async_trait]
impl Provider for ProcessProvider {
    type Handle = ProcessHandle;
    type Error = ProcessError;

    async fn create(
        &self,
        port: u16,
        name: &str,
        script_dir: &Path,
        script_files: &[String],
    ) -> Result<Self::Handle, Self::Error> {
        let script_path = script_dir.join(&script_files[0]);

        let mut child = Command::new(&self.interpreter)
            .arg(&script_path)
            .arg(port.to_string())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .group_spawn()
            .map_err(ProcessError::Spawn)?;

        let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let mut first_line = String::new();
        let read = stdout
            .read_line(&mut first_line)
            .await
            .map_err(ProcessError::Stdout)?;
        if read == 0 {
            return Err(ProcessError::ExitedBeforeReady);
        }
        tracing::debug!(name, %first_line, "subprocess announced readiness");

        // Keep draining stdout/stderr in the background so the pipes
        // never back up and stall the workload; log each further line at
        // debug, matching this lineage's executor logging style.
        let stderr = child.stderr.take().expect("piped stderr");
        let name_owned = name.to_string();
        tokio::spawn(drain_output(stdout, name_owned.clone(), "stdout"));
        tokio::spawn(drain_output(BufReader::new(stderr), name_owned, "stderr"));

        Ok(ProcessHandle {
            child: Arc::new(Mutex::new(child)),
        })
    }

    async fn is_alive(&self, handle: &Self::Handle) -> bool {
        let mut child = handle.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error> {
        let mut child = handle.child.lock().await;
        terminate_group(&mut child, Signal::SIGTERM)
            .await
            .map_err(ProcessError::Terminate)
    }

    async fn force_terminate(&self, handle: &Self::Handle) {
        let mut child = handle.child.lock().await;
        kill_group_now(&mut child).await;
    }
}

async fn drain_output<R>(mut reader: BufReader<R>, name: String, stream: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => tracing::debug!(name = %name, stream, line = line.trim_end(), "subprocess output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).expect("create script");
        file.write_all(body.as_bytes()).expect("write script");
        name.to_string()
    }

    async fn wait_until_dead(provider: &ProcessProvider, handle: &ProcessHandle) {
        for _ in 0..200 {
            if !provider.is_alive(handle).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subprocess did not report finished");
    }

    #[tokio::test]
    async fn create_succeeds_once_interpreter_prints_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "serve.sh", "echo ready\nsleep 30\n");

        let provider = ProcessProvider::new("sh");
        let handle = provider
            .create(8080, "pool-8080-1", dir.path(), &[script])
            .await
            .unwrap();

        assert!(provider.is_alive(&handle).await);
        provider.force_terminate(&handle).await;
        wait_until_dead(&provider, &handle).await;
    }

    #[tokio::test]
    async fn create_fails_when_interpreter_exits_before_printing_anything() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit.sh", "exit 0\n");

        let provider = ProcessProvider::new("sh");
        let err = provider.create(8080, "pool-8080-1", dir.path(), &[script]).await;

        assert!(matches!(err, Err(ProcessError::ExitedBeforeReady)));
    }

    #[tokio::test]
    async fn terminate_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "serve.sh", "echo ready\nsleep 30\n");

        let provider = ProcessProvider::new("sh");
        let handle = provider
            .create(8080, "pool-8080-1", dir.path(), &[script])
            .await
            .unwrap();

        provider.terminate(&handle).await.unwrap();
        wait_until_dead(&provider, &handle).await;
    }

    #[tokio::test]
    async fn force_terminate_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "serve.sh", "echo ready\nsleep 30\n");

        let provider = ProcessProvider::new("sh");
        let handle = provider
            .create(8080, "pool-8080-1", dir.path(), &[script])
            .await
            .unwrap();

        provider.force_terminate(&handle).await;
        wait_until_dead(&provider, &handle).await;
    }
}
