//! Named mutex serializing mutations of a shared parent object
//!
//! Children of a vApp (networks, VMs, disks) are modified through the parent,
//! so concurrent operations on siblings must not interleave. Each parent gets
//! its own lock keyed by its composite identity; unrelated parents proceed in
//! parallel.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::context::OperationContext;
use crate::provider::{ProviderError, ProviderResult};

/// Composite key of a lockable parent, e.g. `vdc:prod|vapp:web`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Build a key from `(scope, name)` segments; every name must be non-empty
    pub fn new(segments: &[(&str, &str)]) -> ProviderResult<Self> {
        if segments.is_empty() {
            return Err(ProviderError::internal("lock key has no segments"));
        }
        let mut parts = Vec::with_capacity(segments.len());
        for (scope, name) in segments {
            if name.trim().is_empty() {
                return Err(ProviderError::internal(format!(
                    "cannot build lock key: missing {} identity",
                    scope
                )));
            }
            parts.push(format!("{}:{}", scope, name));
        }
        Ok(Self(parts.join("|")))
    }

    /// Key of a vApp inside a VDC
    pub fn vapp(vdc: &str, vapp: &str) -> ProviderResult<Self> {
        Self::new(&[("vdc", vdc), ("vapp", vapp)])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of per-key locks shared by every resource of a provider instance
#[derive(Debug, Default)]
pub struct NamedMutex {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl NamedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting at most until the context deadline.
    ///
    /// The returned guard releases the lock when dropped, on every exit path.
    pub async fn lock(
        self: &Arc<Self>,
        ctx: &OperationContext,
        key: &LockKey,
    ) -> ProviderResult<NamedGuard> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!("acquiring lock {}", key);
        let guard = match ctx.run(mutex.lock_owned()).await {
            Ok(guard) => guard,
            Err(interrupted) => {
                self.prune(key);
                return Err(ProviderError::from(interrupted)
                    .context(format!("waiting for lock {}", key)));
            }
        };
        debug!("acquired lock {}", key);

        Ok(NamedGuard {
            guard: Some(guard),
            key: key.clone(),
            table: Arc::clone(self),
        })
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop the table entry when nobody holds or waits for it
    fn prune(&self, key: &LockKey) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Scoped holder of a named lock
pub struct NamedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    table: Arc<NamedMutex>,
}

impl NamedGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for NamedGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedGuard").field("key", &self.key).finish()
    }
}

impl Drop for NamedGuard {
    fn drop(&mut self) {
        // Release first so the strong count only reflects waiters
        drop(self.guard.take());
        self.table.prune(&self.key);
        debug!("released lock {}", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Verb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ctx() -> OperationContext {
        OperationContext::new(Verb::Create, Duration::from_secs(60))
    }

    #[test]
    fn vapp_key_format() {
        let key = LockKey::vapp("prod", "web").unwrap();
        assert_eq!(key.as_str(), "vdc:prod|vapp:web");
    }

    #[test]
    fn empty_identity_is_rejected() {
        let err = LockKey::vapp("prod", "").unwrap_err();
        assert_eq!(err.kind, crate::provider::ErrorKind::Internal);
        assert!(err.message.contains("vapp"));
        assert!(LockKey::new(&[]).is_err());
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let table = Arc::new(NamedMutex::new());
        let key = LockKey::vapp("vdc1", "app1").unwrap();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = table.clone();
            let key = key.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = table.lock(&ctx(), &key).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_wait() {
        let table = Arc::new(NamedMutex::new());
        let a = LockKey::vapp("vdc1", "a").unwrap();
        let b = LockKey::vapp("vdc1", "b").unwrap();

        let _held = table.lock(&ctx(), &a).await.unwrap();
        let short = OperationContext::new(Verb::Create, Duration::from_millis(50));
        let other = table.lock(&short, &b).await;
        assert!(other.is_ok());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn release_wakes_the_next_waiter() {
        let table = Arc::new(NamedMutex::new());
        let key = LockKey::vapp("vdc1", "a").unwrap();
        let held = table.lock(&ctx(), &key).await.unwrap();

        let op = ctx();
        let mut waiting = tokio_test::task::spawn(table.lock(&op, &key));
        tokio_test::assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let guard = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(guard.key(), &key);
        drop(guard);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_on_held_key_times_out() {
        let table = Arc::new(NamedMutex::new());
        let key = LockKey::vapp("vdc1", "a").unwrap();

        let held = table.lock(&ctx(), &key).await.unwrap();
        let short = OperationContext::new(Verb::Update, Duration::from_secs(1));
        let err = table.lock(&short, &key).await.unwrap_err();
        assert_eq!(err.kind, crate::provider::ErrorKind::Timeout);

        drop(held);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn guard_released_on_error_path() {
        let table = Arc::new(NamedMutex::new());
        let key = LockKey::vapp("vdc1", "a").unwrap();

        async fn failing(table: &Arc<NamedMutex>, key: &LockKey) -> ProviderResult<()> {
            let _guard = table.lock(&ctx(), key).await?;
            Err(ProviderError::new("remote failure"))
        }

        assert!(failing(&table, &key).await.is_err());
        let again = OperationContext::new(Verb::Create, Duration::from_millis(50));
        assert!(table.lock(&again, &key).await.is_ok());
    }
}
