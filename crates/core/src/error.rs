use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use utils::freeport::FreePortError;

/// Errors the pool engine itself can raise, generic over the active
/// provider's own error type `E`. Everything the engine can recover from
/// (create-timeout-with-degrade, prepare-failure-with-degrade) never
/// reaches this type in the first place — it is logged and swallowed at
/// the call site instead.
#[derive(Debug, Error)]
pub enum PoolError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error("pool is shutting down")]
    ShuttingDown,

    #[error("pool is empty and no instance could be created or recovered")]
    PoolEmpty,

    #[error("script directory must be a non-empty path")]
    EmptyScriptDir,

    #[error("script file list must be non-empty")]
    EmptyScriptFiles,

    #[error("script directory does not exist: {0}")]
    ScriptDirNotFound(PathBuf),

    #[error("prepare failed: {0}")]
    PrepareFailed(#[source] E),

    #[error("create failed: {0}")]
    CreateFailed(#[source] E),

    #[error("create timed out after {0:?}")]
    CreateTimeout(Duration),

    #[error(transparent)]
    FreePort(#[from] FreePortError),
}
