/// Waits for either Ctrl+C or, on unix, SIGTERM. Mirrors the shutdown
/// trigger used by this lineage's own HTTP entrypoints so embedding
/// services see the same signal-driven shutdown semantics from the pool
/// engine as they do from the rest of the stack.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received ctrl-c, shutting down pool");
        }
        _ = terminate => {
            tracing::info!("received sigterm, shutting down pool");
        }
    }
}
