use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use pool_core::Provider;

#[derive(Debug, Error)]
pub enum MockError {
    #[error("mock create failure")]
    CreateFailed,
}

#[derive(Clone)]
pub struct MockHandle {
    pub id: usize,
}

/// Hand-written fake backend, in the style of this lineage's own
/// `MockProcessInspector`: an `Arc`-shared bit of state the test can poke
/// directly (mark an instance dead, make the next N creates fail or hang)
/// alongside the trait implementation under test.
pub struct MockProvider {
    next_id: AtomicUsize,
    dead: Mutex<HashSet<usize>>,
    fail_next_creates: AtomicUsize,
    create_delay: Mutex<Option<Duration>>,
    pub created_count: AtomicUsize,
    pub terminated: Mutex<Vec<usize>>,
    pub force_terminated: Mutex<Vec<usize>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            dead: Mutex::new(HashSet::new()),
            fail_next_creates: AtomicUsize::new(0),
            create_delay: Mutex::new(None),
            created_count: AtomicUsize::new(0),
            terminated: Mutex::new(Vec::new()),
            force_terminated: Mutex::new(Vec::new()),
        }
    }

    pub async fn mark_dead(&self, id: usize) {
        self.dead.lock().await.insert(id);
    }

    pub fn fail_next_create(&self) {
        self.fail_next_creates.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn delay_next_create(&self, delay: Duration) {
        *self.create_delay.lock().await = Some(delay);
    }
}

#[async_trait]
impl Provider for MockProvider {
    type Handle = MockHandle;
    type Error = MockError;

    async fn create(
        &self,
        _port: u16,
        _name: &str,
        _script_dir: &Path,
        _script_files: &[String],
    ) -> Result<Self::Handle, Self::Error> {
        let delay = self.create_delay.lock().await.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_creates.load(Ordering::SeqCst) > 0 {
            self.fail_next_creates.fetch_sub(1, Ordering::SeqCst);
            return Err(MockError::CreateFailed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created_count.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle { id })
    }

    async fn is_alive(&self, handle: &Self::Handle) -> bool {
        !self.dead.lock().await.contains(&handle.id)
    }

    async fn terminate(&self, handle: &Self::Handle) -> Result<(), Self::Error> {
        self.terminated.lock().await.push(handle.id);
        Ok(())
    }

    async fn force_terminate(&self, handle: &Self::Handle) {
        self.force_terminated.lock().await.push(handle.id);
    }
}
