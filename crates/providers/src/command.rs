use std::time::Duration;

use command_group::AsyncGroupChild;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::time::timeout;

/// How long a process group gets to react to the polite signal before
/// `terminate_group` escalates to `SIGKILL`. Mirrors this lineage's own
/// subprocess teardown budget.
const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Send `signal` to `child`'s whole process group (it must have been
/// spawned via `AsyncCommandGroup::group_spawn` so the OS assigned it a
/// fresh group), then escalate to `SIGKILL` if it hasn't exited within
/// `GRACE_PERIOD`.
pub async fn terminate_group(child: &mut AsyncGroupChild, signal: Signal) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let pgid = Pid::from_raw(pid as i32);
    let _ = signal::killpg(pgid, signal);

    match timeout(GRACE_PERIOD, child.wait()).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => {
            tracing::warn!(pid, "process group ignored signal, sending SIGKILL");
            let _ = signal::killpg(pgid, Signal::SIGKILL);
            child.wait().await.map(|_| ())
        }
    }
}

/// Unconditional kill, no grace period. Used by `forceTerminate`.
pub async fn kill_group_now(child: &mut AsyncGroupChild) {
    if let Some(pid) = child.id() {
        let _ = signal::killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.wait().await;
}
