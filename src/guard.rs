//! Per-adaptation run exclusivity and reprocess throttling.
//!
//! The lock is a row in `adaptation_locks` keyed by adaptation id. It is
//! taken with an insert-if-absent and never waited on: a second caller
//! simply learns who holds it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use chapmap_core::store::Store;

/// Proof that the caller holds an adaptation lock.
///
/// Give it back with [`ConcurrencyGuard::release`].
#[derive(Debug)]
#[must_use = "a lock handle must be released"]
pub struct LockHandle {
    adaptation_id: i64,
    holder: String,
}

impl LockHandle {
    pub fn adaptation_id(&self) -> i64 {
        self.adaptation_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

/// Outcome of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    Ready,
    /// Retry after this many seconds, always in `1..=cooldown`.
    Wait { seconds: u64 },
}

/// Milliseconds in `secs` seconds, saturating at `i64::MAX`.
pub fn window_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Cooldown state given the last activity time.
pub fn cooldown_remaining(last: DateTime<Utc>, now: DateTime<Utc>, cooldown_secs: u64) -> Cooldown {
    if cooldown_secs == 0 {
        return Cooldown::Ready;
    }
    let window = window_ms(cooldown_secs);
    let elapsed_ms = (now - last).num_milliseconds().max(0);
    if elapsed_ms >= window {
        return Cooldown::Ready;
    }
    let remaining_ms = (window - elapsed_ms) as u64;
    let seconds = remaining_ms.div_ceil(1000).clamp(1, cooldown_secs);
    Cooldown::Wait { seconds }
}

pub struct ConcurrencyGuard {
    store: Arc<dyn Store>,
}

impl ConcurrencyGuard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Take the adaptation lock for `holder` without blocking.
    pub async fn try_acquire(&self, adaptation_id: i64, holder: &str) -> Result<Option<LockHandle>> {
        let acquired = self
            .store
            .try_insert_lock(adaptation_id, holder, Utc::now())
            .await?;
        Ok(acquired.then(|| LockHandle {
            adaptation_id,
            holder: holder.to_string(),
        }))
    }

    /// Current holder of the lock, if any.
    pub async fn holder(&self, adaptation_id: i64) -> Result<Option<String>> {
        Ok(self.store.get_lock(adaptation_id).await?.map(|l| l.holder))
    }

    pub async fn release(&self, handle: LockHandle) -> Result<()> {
        self.store
            .delete_lock(handle.adaptation_id, &handle.holder)
            .await
    }

    /// Whether a new run may start now.
    ///
    /// The last activity is the active pointer's `updated_at`, or the most
    /// recent run's `started_at` when no run is in flight.
    pub async fn check_cooldown(
        &self,
        adaptation_id: i64,
        cooldown_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Cooldown> {
        if cooldown_secs == 0 {
            return Ok(Cooldown::Ready);
        }
        let last = match self.store.get_active_pointer(adaptation_id).await? {
            Some(pointer) => Some(pointer.updated_at),
            None => self
                .store
                .get_last_run(adaptation_id)
                .await?
                .map(|r| r.started_at),
        };
        Ok(match last {
            Some(last) => cooldown_remaining(last, now, cooldown_secs),
            None => Cooldown::Ready,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chapmap_core::models::NewRun;
    use chapmap_core::store::memory::InMemoryStore;
    use chrono::Duration;

    #[test]
    fn test_cooldown_remaining_bounds() {
        let now = Utc::now();
        assert_eq!(cooldown_remaining(now, now, 0), Cooldown::Ready);
        assert_eq!(
            cooldown_remaining(now, now, 60),
            Cooldown::Wait { seconds: 60 }
        );
        assert_eq!(
            cooldown_remaining(now - Duration::milliseconds(59_500), now, 60),
            Cooldown::Wait { seconds: 1 }
        );
        assert_eq!(
            cooldown_remaining(now - Duration::seconds(20), now, 60),
            Cooldown::Wait { seconds: 40 }
        );
        assert_eq!(
            cooldown_remaining(now - Duration::seconds(60), now, 60),
            Cooldown::Ready
        );
        // Clock skew: a future timestamp waits the full window, never more.
        assert_eq!(
            cooldown_remaining(now + Duration::seconds(30), now, 60),
            Cooldown::Wait { seconds: 60 }
        );
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let now = Utc::now();
        assert_eq!(window_ms(u64::MAX), i64::MAX);
        assert_eq!(window_ms(60), 60_000);
        match cooldown_remaining(now, now, u64::MAX) {
            Cooldown::Wait { seconds } => assert!(seconds > 1_000_000_000),
            Cooldown::Ready => panic!("a huge cooldown must not read as ready"),
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let guard = ConcurrencyGuard::new(store);

        let first = guard.try_acquire(1, "run-a").await.unwrap().unwrap();
        assert!(guard.try_acquire(1, "run-b").await.unwrap().is_none());
        assert_eq!(guard.holder(1).await.unwrap().as_deref(), Some("run-a"));

        // Other adaptations are independent.
        let other = guard.try_acquire(2, "run-c").await.unwrap().unwrap();

        guard.release(first).await.unwrap();
        assert!(guard.holder(1).await.unwrap().is_none());
        let again = guard.try_acquire(1, "run-b").await.unwrap().unwrap();
        assert_eq!(again.holder(), "run-b");
        guard.release(again).await.unwrap();
        guard.release(other).await.unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_falls_back_to_last_run() {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .create_run(&NewRun {
                run_id: "r1".into(),
                adaptation_id: 4,
                detected_count: 1,
                target_count: 1,
                started_at: now - Duration::seconds(10),
            })
            .await
            .unwrap();
        let guard = ConcurrencyGuard::new(store);

        match guard.check_cooldown(4, 60, now).await.unwrap() {
            Cooldown::Wait { seconds } => assert_eq!(seconds, 50),
            Cooldown::Ready => panic!("expected a wait"),
        }
        assert_eq!(guard.check_cooldown(4, 0, now).await.unwrap(), Cooldown::Ready);
        assert_eq!(guard.check_cooldown(5, 60, now).await.unwrap(), Cooldown::Ready);
    }
}
