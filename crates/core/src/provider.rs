use std::path::Path;

use async_trait::async_trait;

/// A backend-specific adapter: thread, subprocess, container or pod. The
/// engine depends on nothing beyond this contract.
///
/// `Handle` must be `Clone` so the engine can take a cheap snapshot of an
/// instance's backend reference, release the pool's internal lock, and
/// then call the (possibly slow, I/O-bound) provider methods without
/// holding that lock across an `.await` — handles are expected to be thin
/// (a pid, a container id, an `Arc<Mutex<Child>>`), never the workload
/// itself.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether `acquire` should verify `script_dir` exists on the local
    /// filesystem before calling `create`. Backends that ship the script
    /// contents elsewhere (e.g. the pod provider, which publishes them to
    /// a cluster config object in `prepare`) may still want the check;
    /// override to `false` only if the path is meaningless for this
    /// backend.
    fn requires_existing_script_dir(&self) -> bool {
        true
    }

    /// Called once per `acquire` before `create`, only for providers that
    /// need it. Default is a no-op success.
    async fn prepare(&self, script_dir: &Path, script_files: &[String]) -> Result<(), Self::Error> {
        let _ = (script_dir, script_files);
        Ok(())
    }

    /// Start a new backend instance serving on host-local `port`. Must not
    /// return until the instance is externally reachable.
    async fn create(
        &self,
        port: u16,
        name: &str,
        script_dir: &Path,
        script_files: &[String],
    ) -> Result<Self::Handle, Self::Error>;

    /// Synchronous-in-spirit, non-blocking best-effort liveness check.
    /// Must tolerate "instance vanished" by returning `false`, never by
    /// raising.
    async fn is_alive(&self, handle: &Self::Handle) -> bool;

    /// Graceful stop and resource release. May block; the engine races
    /// this against `shutdown_timeout`.
    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error>;

    /// Unconditional kill / force-remove. Best-effort: the engine logs
    /// failures, it never raises them.
    async fn force_terminate(&self, handle: &Self::Handle);
}
