use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Internal bookkeeping for one pooled backend instance. Never exposed
/// directly; `Pool` hands callers the public views below instead.
pub(crate) struct Record<P: Provider> {
    pub(crate) name: String,
    pub(crate) port: u16,
    pub(crate) handle: P::Handle,
    pub(crate) created_at_ms: i64,
    pub(crate) last_used_ms: i64,
}

impl<P: Provider> Record<P> {
    pub(crate) fn new(name: String, port: u16, handle: P::Handle, now_ms: i64) -> Self {
        Self {
            name,
            port,
            handle,
            created_at_ms: now_ms,
            last_used_ms: now_ms,
        }
    }

    pub(crate) fn touch(&mut self, now_ms: i64) {
        self.last_used_ms = now_ms;
    }
}

/// Handle returned to a caller of `Pool::acquire`. Carries everything
/// needed to address the instance plus the provider's own handle, for
/// callers that need backend-specific escape hatches (e.g. streaming logs
/// from a container).
pub struct Acquired<P: Provider> {
    pub name: String,
    pub port: u16,
    pub handle: P::Handle,
}

// Written by hand rather than derived: `#[derive(Clone)]` would add a
// spurious `P: Clone` bound even though only `P::Handle` needs it.
impl<P: Provider> Clone for Acquired<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            port: self.port,
            handle: self.handle.clone(),
        }
    }
}

/// Snapshot of one pooled instance, for `Pool::pool_info`. `alive` is left
/// `None` here — filling it in would mean probing every instance just to
/// answer a status query; `Pool::health_check` is the call that actually
/// probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: String,
    pub port: u16,
    pub created_at_ms: i64,
    pub last_used_ms: i64,
    pub alive: Option<bool>,
}

/// Snapshot of the whole pool, for `Pool::pool_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_size: usize,
    pub max_pool_size: usize,
    pub shutting_down: bool,
    pub reaper_armed: bool,
    pub instances: Vec<InstanceInfo>,
}

/// Result of `Pool::health_check`: how many instances remain after
/// pruning the dead ones found during the probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub total: usize,
    pub dead_removed: usize,
    pub healthy: bool,
}
