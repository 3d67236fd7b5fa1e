use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use cabflow_core::directory::{DirectoryError, EmployeeDirectory};
use cabflow_core::domain::employee::{EmployeeId, EmployeeProfile};

struct CacheEntry {
    profile: Option<EmployeeProfile>,
    fetched_at: Instant,
}

/// TTL cache in front of a directory. Misses are cached too, so an unknown
/// id does not hit SAP on every page load. Errors are never cached. Expired
/// entries are dropped whenever a fresh lookup is stored.
pub struct CachedDirectory<D> {
    inner: D,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl<D> CachedDirectory<D>
where
    D: EmployeeDirectory,
{
    pub fn new(inner: D, ttl: Duration) -> Self {
        Self { inner, ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn invalidate(&self, employee_id: &EmployeeId) {
        self.entries.write().await.remove(&cache_key(employee_id));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<D> EmployeeDirectory for CachedDirectory<D>
where
    D: EmployeeDirectory,
{
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, DirectoryError> {
        let key = cache_key(employee_id);
        if let Some(entry) = self.entries.read().await.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(event_name = "directory.cache.hit", employee_id = %employee_id);
                return Ok(entry.profile.clone());
            }
        }

        let profile = self.inner.find_employee(employee_id).await?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(event_name = "directory.cache.purged", purged = before - entries.len());
        }
        entries.insert(key, CacheEntry { profile: profile.clone(), fetched_at: Instant::now() });
        Ok(profile)
    }
}

fn cache_key(employee_id: &EmployeeId) -> String {
    employee_id.0.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::CachedDirectory;
    use cabflow_core::directory::{DirectoryError, EmployeeDirectory};
    use cabflow_core::domain::employee::{EmployeeId, EmployeeProfile};

    #[derive(Default)]
    struct CountingDirectory {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl EmployeeDirectory for CountingDirectory {
        async fn find_employee(
            &self,
            employee_id: &EmployeeId,
        ) -> Result<Option<EmployeeProfile>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DirectoryError::Transport("connection reset".to_string()));
            }
            if employee_id.0 != "E1001" {
                return Ok(None);
            }
            Ok(Some(EmployeeProfile {
                employee_id: employee_id.clone(),
                display_name: "Asha Rao".to_string(),
                email: "asha@example.com".to_string(),
                phone: None,
                department: "Finance".to_string(),
                location: "Mumbai".to_string(),
                manager: None,
            }))
        }
    }

    #[tokio::test]
    async fn hits_and_misses_are_cached_until_invalidated() {
        let cache = CachedDirectory::new(CountingDirectory::default(), Duration::from_secs(60));
        let known = EmployeeId("E1001".to_string());
        let unknown = EmployeeId("E404".to_string());

        assert!(cache.find_employee(&known).await.expect("first").is_some());
        let padded = EmployeeId("e1001 ".to_string());
        assert!(cache.find_employee(&padded).await.expect("hit").is_some());
        assert!(cache.find_employee(&unknown).await.expect("miss").is_none());
        assert!(cache.find_employee(&unknown).await.expect("cached miss").is_none());
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);

        cache.invalidate(&known).await;
        cache.find_employee(&known).await.expect("refetch");
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched_and_errors_are_not_cached() {
        let cache = CachedDirectory::new(CountingDirectory::default(), Duration::ZERO);
        let known = EmployeeId("E1001".to_string());
        cache.find_employee(&known).await.expect("first");
        cache.find_employee(&known).await.expect("second");
        assert_eq!(cache.inner.calls.load(Ordering::SeqCst), 2);

        let failing = CachedDirectory::new(
            CountingDirectory { fail: true, ..Default::default() },
            Duration::from_secs(60),
        );
        assert!(failing.find_employee(&known).await.is_err());
        assert!(failing.find_employee(&known).await.is_err());
        assert!(failing.is_empty().await);
        assert_eq!(failing.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_entries_are_purged_when_new_lookups_land() {
        let cache = CachedDirectory::new(CountingDirectory::default(), Duration::ZERO);
        for id in ["E1001", "E404", "E405", "E406"] {
            cache.find_employee(&EmployeeId(id.to_string())).await.expect("lookup");
            assert_eq!(cache.len().await, 1);
        }

        let fresh = CachedDirectory::new(CountingDirectory::default(), Duration::from_secs(60));
        for id in ["E1001", "E404", "E405"] {
            fresh.find_employee(&EmployeeId(id.to_string())).await.expect("lookup");
        }
        assert_eq!(fresh.len().await, 3);
    }
}
