use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use pool_core::Provider;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("worker exited before signaling readiness")]
    ExitedBeforeReady,
}

/// What an in-process worker actually does once spawned. Implementations
/// run on the pool's own tokio runtime — this is the in-process backend,
/// so there is no child process or container to isolate the workload,
/// only a spawned task.
///
/// `serve` must send on `ready` as soon as it has bound `port` and is
/// prepared to accept work, then run until cancelled. The provider
/// aborts the task rather than asking it to stop cooperatively —
/// termination for this backend is unconditional, the same as aborting
/// any other in-process worker.
pub trait ThreadWorker: Send + Sync + 'static {
    fn serve(
        &self,
        port: u16,
        script_dir: PathBuf,
        script_files: Vec<String>,
        ready: oneshot::Sender<()>,
    ) -> BoxFuture<'static, ()>;
}

/// In-process backend: spawns `W::serve` as a tokio task per instance and
/// tracks it with a `JoinHandle`. Liveness is `!handle.is_finished()`;
/// termination aborts the task, since cooperative shutdown isn't part of
/// the `ThreadWorker` contract.
pub struct ThreadProvider<W: ThreadWorker> {
    worker: Arc<W>,
}

impl<W: ThreadWorker> ThreadProvider<W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker: Arc::new(worker),
        }
    }
}

#[derive(Clone)]
pub struct ThreadHandle {
    task: Arc<Mutex<JoinHandle<()>>>,
}

#[async_trait]
impl<W: ThreadWorker> Provider for ThreadProvider<W> {
    type Handle = ThreadHandle;
    type Error = ThreadError;

    async fn create(
        &self,
        port: u16,
        name: &str,
        script_dir: &Path,
        script_files: &[String],
    ) -> Result<Self::Handle, Self::Error> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = self.worker.clone();
        let script_dir = script_dir.to_path_buf();
        let script_files = script_files.to_vec();
        let task = tokio::spawn(async move { worker.serve(port, script_dir, script_files, ready_tx).await });

        if ready_rx.await.is_err() {
            tracing::warn!(name, "worker task ended before signaling readiness");
            return Err(ThreadError::ExitedBeforeReady);
        }

        Ok(ThreadHandle {
            task: Arc::new(Mutex::new(task)),
        })
    }

    async fn is_alive(&self, handle: &Self::Handle) -> bool {
        !handle.task.lock().await.is_finished()
    }

    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error> {
        let task = handle.task.lock().await;
        task.abort();
        Ok(())
    }

    async fn force_terminate(&self, handle: &Self::Handle) {
        handle.task.lock().await.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Signals ready immediately, then blocks forever until the provider
    /// aborts its task.
    struct ForeverWorker;

    impl ThreadWorker for ForeverWorker {
        fn serve(
            &self,
            _port: u16,
            _script_dir: PathBuf,
            _script_files: Vec<String>,
            ready: oneshot::Sender<()>,
        ) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = ready.send(());
                std::future::pending::<()>().await;
            })
        }
    }

    /// Drops `ready` without sending, simulating a worker that exits
    /// before it ever announces it is listening.
    struct NeverReadyWorker;

    impl ThreadWorker for NeverReadyWorker {
        fn serve(
            &self,
            _port: u16,
            _script_dir: PathBuf,
            _script_files: Vec<String>,
            _ready: oneshot::Sender<()>,
        ) -> BoxFuture<'static, ()> {
            Box::pin(async move {})
        }
    }

    #[tokio::test]
    async fn create_succeeds_once_worker_signals_ready() {
        let provider = ThreadProvider::new(ForeverWorker);
        let handle = provider
            .create(8080, "pool-8080-1", Path::new("/scripts"), &["index.js".to_string()])
            .await
            .unwrap();
        assert!(provider.is_alive(&handle).await);
    }

    #[tokio::test]
    async fn create_fails_when_worker_exits_before_ready() {
        let provider = ThreadProvider::new(NeverReadyWorker);
        let err = provider
            .create(8080, "pool-8080-1", Path::new("/scripts"), &["index.js".to_string()])
            .await;
        assert!(matches!(err, Err(ThreadError::ExitedBeforeReady)));
    }

    /// Aborting a task only schedules cancellation; the runtime needs a
    /// few more polls before `is_finished()` reports it. Poll with a
    /// short bound instead of a single `yield_now`.
    async fn wait_until_dead<W: ThreadWorker>(provider: &ThreadProvider<W>, handle: &ThreadHandle) {
        for _ in 0..100 {
            if !provider.is_alive(handle).await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        panic!("task did not report finished after abort");
    }

    #[tokio::test]
    async fn terminate_aborts_the_running_task() {
        let provider = ThreadProvider::new(ForeverWorker);
        let handle = provider
            .create(8080, "pool-8080-1", Path::new("/scripts"), &["index.js".to_string()])
            .await
            .unwrap();
        provider.terminate(&handle).await.unwrap();
        wait_until_dead(&provider, &handle).await;
    }

    #[tokio::test]
    async fn force_terminate_aborts_the_running_task() {
        let provider = ThreadProvider::new(ForeverWorker);
        let handle = provider
            .create(8080, "pool-8080-1", Path::new("/scripts"), &["index.js".to_string()])
            .await
            .unwrap();
        provider.force_terminate(&handle).await;
        wait_until_dead(&provider, &handle).await;
    }
}
