use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant as TokioInstant};

use utils::clock::now_millis;
use utils::naming::instance_name;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::instance::{Acquired, HealthCheckResult, InstanceInfo, PoolInfo, Record};
use crate::provider::Provider;
use crate::signal::wait_for_termination;

/// A capacity-bounded pool of ephemeral, backend-provided instances.
/// Generic over `Provider`; see that trait for what a backend adapter
/// must supply. Construct with [`Pool::new`], which returns an `Arc`
/// because the pool spawns a background task (the shutdown-signal
/// listener) that holds a weak reference back to it. The idle reaper is
/// armed lazily, on the first `acquire` call, not at construction.
pub struct Pool<P: Provider> {
    provider: P,
    config: PoolConfig,
    instances: Mutex<Vec<Record<P>>>,
    start: TokioInstant,
    last_request_ms: AtomicI64,
    shutting_down: AtomicBool,
    reaper_armed: AtomicBool,
    self_weak: OnceLock<Weak<Pool<P>>>,
    signal_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<P: Provider> Pool<P> {
    pub fn new(provider: P, config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            provider,
            config,
            instances: Mutex::new(Vec::new()),
            start: TokioInstant::now(),
            last_request_ms: AtomicI64::new(0),
            shutting_down: AtomicBool::new(false),
            reaper_armed: AtomicBool::new(false),
            self_weak: OnceLock::new(),
            signal_handle: std::sync::Mutex::new(None),
        });
        let _ = pool.self_weak.set(Arc::downgrade(&pool));
        pool.arm_signal_listener();
        pool
    }

    fn weak_self(&self) -> Weak<Pool<P>> {
        self.self_weak.get().cloned().unwrap_or_else(Weak::new)
    }

    fn elapsed_ms(&self) -> i64 {
        self.start.elapsed().as_millis() as i64
    }

    fn arm_signal_listener(&self) {
        let weak = self.weak_self();
        let handle = tokio::spawn(async move {
            wait_for_termination().await;
            if let Some(pool) = weak.upgrade() {
                pool.shutdown().await;
            }
        });
        *self.signal_handle.lock().unwrap() = Some(handle);
    }

    /// Arms the idle reaper exactly once per pool lifetime. A second call
    /// is a no-op, matching `reaperArmed`'s false→true-once semantics.
    fn arm_reaper(&self) {
        if self.reaper_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = self.weak_self();
        let period = self.config.idle_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                if pool.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                pool.reap_tick().await;
            }
        });
    }

    /// Removes and terminates at most one instance per tick — the oldest
    /// (head of the list) — once the pool has gone a full `idleInterval`
    /// without any `acquire` call. Opportunistic, not fair: a busy pool
    /// that goes quiet drains gradually, one tick at a time.
    async fn reap_tick(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let idle_ms = self.config.idle_interval.as_millis() as i64;
        let now_ms = self.elapsed_ms();
        let last_request_ms = self.last_request_ms.load(Ordering::SeqCst);
        if now_ms - last_request_ms <= idle_ms {
            return;
        }
        let head = {
            let mut instances = self.instances.lock().await;
            if instances.is_empty() {
                return;
            }
            instances.remove(0)
        };
        tracing::info!(name = %head.name, port = head.port, "reaping idle instance");
        self.terminate_instance(head.handle).await;
    }

    /// Graceful-then-forced termination of one instance, bounded by
    /// `shutdown_timeout`. Shared by the reaper, selection-time
    /// self-healing and shutdown.
    async fn terminate_instance(&self, handle: P::Handle) {
        match timeout(self.config.shutdown_timeout, self.provider.terminate(&handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "graceful terminate failed, forcing");
                self.provider.force_terminate(&handle).await;
            }
            Err(_) => {
                tracing::warn!("graceful terminate timed out, forcing");
                self.provider.force_terminate(&handle).await;
            }
        }
    }

    /// Acquire an instance for the given script workload. If the pool is
    /// below capacity this opportunistically creates one more instance
    /// first; either way it then selects among whatever instances exist
    /// via a time-rotating index, self-healing past any dead one it
    /// finds along the way.
    pub async fn acquire(
        &self,
        script_dir: impl AsRef<Path>,
        script_files: Vec<String>,
    ) -> Result<Acquired<P>, PoolError<P::Error>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        let script_dir = script_dir.as_ref().to_path_buf();
        if script_dir.as_os_str().is_empty() {
            return Err(PoolError::EmptyScriptDir);
        }
        if script_files.is_empty() {
            return Err(PoolError::EmptyScriptFiles);
        }
        if self.provider.requires_existing_script_dir() && !script_dir.is_dir() {
            return Err(PoolError::ScriptDirNotFound(script_dir));
        }

        self.last_request_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
        self.arm_reaper();

        if let Err(err) = self.attempt_scale_up(&script_dir, &script_files).await {
            let empty = self.instances.lock().await.is_empty();
            if empty {
                return Err(err);
            }
            tracing::warn!(error = %err, "scale-up failed, continuing with existing instances");
        }

        self.select(script_dir, script_files, 0).await
    }

    /// Step 5 of acquire: if below `max_pool_size`, prepare + create one
    /// more instance. Guards against the concurrent-creation race with a
    /// post-create double check: if another `acquire` filled the pool
    /// while this `create` was in flight, the freshly created instance is
    /// torn back down and discarded rather than kept.
    async fn attempt_scale_up(
        &self,
        script_dir: &Path,
        script_files: &[String],
    ) -> Result<(), PoolError<P::Error>> {
        if self.instances.lock().await.len() >= self.config.max_pool_size {
            return Ok(());
        }

        self.provider
            .prepare(script_dir, script_files)
            .await
            .map_err(PoolError::PrepareFailed)?;

        let port = utils::freeport::allocate()?;
        let name = instance_name(&self.config.name_prefix, port);

        let handle = timeout(
            self.config.create_timeout,
            self.provider.create(port, &name, script_dir, script_files),
        )
        .await
        .map_err(|_| PoolError::CreateTimeout(self.config.create_timeout))?
        .map_err(PoolError::CreateFailed)?;

        let mut instances = self.instances.lock().await;
        if instances.len() >= self.config.max_pool_size {
            drop(instances);
            tracing::warn!(name = %name, port, "pool filled concurrently, discarding freshly created instance");
            self.terminate_instance(handle).await;
            return Ok(());
        }
        tracing::info!(name = %name, port, "created instance");
        instances.push(Record::new(name, port, handle, now_millis()));
        Ok(())
    }

    /// Steps 6-8 of acquire: pick instance at the time-rotating index
    /// `now_seconds mod len`, self-heal (evict + retry) if it is dead.
    /// Recursion is bounded by `max_pool_size`, an upper bound on how
    /// many distinct instances a single acquire could ever find dead.
    fn select<'a>(
        &'a self,
        script_dir: PathBuf,
        script_files: Vec<String>,
        depth: usize,
    ) -> BoxFuture<'a, Result<Acquired<P>, PoolError<P::Error>>> {
        Box::pin(async move {
            if depth >= self.config.max_pool_size.max(1) {
                return Err(PoolError::PoolEmpty);
            }

            let (name, handle) = {
                let instances = self.instances.lock().await;
                let len = instances.len();
                if len == 0 {
                    return Err(PoolError::PoolEmpty);
                }
                let now_seconds = (self.elapsed_ms() / 1000).max(0) as usize;
                let index = now_seconds % len;
                let record = &instances[index];
                (record.name.clone(), record.handle.clone())
            };

            if self.provider.is_alive(&handle).await {
                let mut instances = self.instances.lock().await;
                if let Some(record) = instances.iter_mut().find(|record| record.name == name) {
                    record.touch(now_millis());
                    return Ok(Acquired {
                        name: record.name.clone(),
                        port: record.port,
                        handle: record.handle.clone(),
                    });
                }
                // Selected instance vanished between the snapshot above and
                // this re-lock (e.g. the reaper took it); retry selection.
                drop(instances);
                return self.select(script_dir, script_files, depth + 1).await;
            }

            tracing::warn!(name = %name, "evicting dead instance found at selection time");
            let removed = {
                let mut instances = self.instances.lock().await;
                instances
                    .iter()
                    .position(|record| record.name == name)
                    .map(|index| instances.remove(index))
            };
            if let Some(record) = removed {
                self.terminate_instance(record.handle).await;
            }
            self.select(script_dir, script_files, depth + 1).await
        })
    }

    /// Snapshot of the pool's current occupants. Does not probe
    /// liveness; see [`Pool::health_check`] for that.
    pub async fn pool_info(&self) -> PoolInfo {
        let instances = self.instances.lock().await;
        PoolInfo {
            pool_size: instances.len(),
            max_pool_size: self.config.max_pool_size,
            shutting_down: self.shutting_down.load(Ordering::SeqCst),
            reaper_armed: self.reaper_armed.load(Ordering::SeqCst),
            instances: instances
                .iter()
                .map(|record| InstanceInfo {
                    name: record.name.clone(),
                    port: record.port,
                    created_at_ms: record.created_at_ms,
                    last_used_ms: record.last_used_ms,
                    alive: None,
                })
                .collect(),
        }
    }

    /// Probe every pooled instance's liveness, evicting and
    /// force-terminating any found dead.
    pub async fn health_check(&self) -> HealthCheckResult {
        let candidates = {
            let mut instances = self.instances.lock().await;
            std::mem::take(&mut *instances)
        };
        let mut dead_removed = 0usize;
        let mut survivors = Vec::with_capacity(candidates.len());
        for record in candidates {
            if self.provider.is_alive(&record.handle).await {
                survivors.push(record);
            } else {
                dead_removed += 1;
                self.provider.force_terminate(&record.handle).await;
            }
        }
        let total = survivors.len();
        {
            let mut instances = self.instances.lock().await;
            *instances = survivors;
        }
        HealthCheckResult {
            total,
            dead_removed,
            healthy: total > 0 || !self.shutting_down.load(Ordering::SeqCst),
        }
    }

    /// Gracefully drain every instance (race each against
    /// `shutdown_timeout`, force-terminate on timeout/error) but leave the
    /// pool armed and usable afterwards. Distinct from [`Pool::shutdown`],
    /// which additionally stops accepting new `acquire` calls.
    pub async fn stop_all(&self) {
        let drained = {
            let mut instances = self.instances.lock().await;
            std::mem::take(&mut *instances)
        };
        futures::future::join_all(
            drained
                .into_iter()
                .map(|record| self.terminate_instance(record.handle)),
        )
        .await;
    }

    /// Immediately force-remove every instance without attempting a
    /// graceful terminate first. Use when the caller already knows the
    /// instances are unreachable or unrecoverable.
    pub async fn clear(&self) {
        let drained = {
            let mut instances = self.instances.lock().await;
            std::mem::take(&mut *instances)
        };
        futures::future::join_all(
            drained
                .into_iter()
                .map(|record| async move { self.provider.force_terminate(&record.handle).await }),
        )
        .await;
    }

    /// Stop accepting new `acquire` calls and drain the pool. Idempotent:
    /// a second call observes `shutting_down` already set and returns
    /// immediately, making no further provider calls.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("pool shutting down");
        self.stop_all().await;
        // Release the process-signal handler registered at construction.
        // Self-aborting is harmless when shutdown runs inside the signal
        // listener's own task: the abort is only scheduled, and the task
        // is about to finish regardless.
        if let Some(handle) = self.signal_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Escape hatch onto the underlying provider, for callers that need
    /// backend-specific operations the pool contract doesn't expose.
    pub fn provider(&self) -> &P {
        &self.provider
    }
}
