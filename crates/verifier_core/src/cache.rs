//! Result cache
//!
//! TTL-bounded cache of verdicts keyed by the normalized address, in
//! front of the probing engine. Concurrent fetches of the same address
//! share one underlying probe through a per-address lock registry, so
//! a burst of requests never multiplies network work.
//!
//! The cache owns a reference to the prober; storage is abstracted
//! behind [`VerdictStore`] so the persistence layer stays a
//! collaborator.

use crate::Verdict;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Anything that can produce a verdict for an address
#[async_trait]
pub trait Prober: Send + Sync {
    async fn categorize(&self, email: &str) -> Verdict;
}

/// One persisted cache row: the serialized verdict plus its write time
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVerdict {
    pub address: String,
    pub json: String,
    pub cached_at: DateTime<Utc>,
}

/// Persistence contract for cache rows; all writes are upserts keyed
/// by address
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn find(&self, address: &str) -> anyhow::Result<Option<CachedVerdict>>;
    async fn upsert(
        &self,
        address: &str,
        json: &str,
        cached_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
    async fn expired_before(&self, threshold: DateTime<Utc>) -> anyhow::Result<Vec<String>>;
    async fn all(&self) -> anyhow::Result<Vec<CachedVerdict>>;
}

/// Default cache row time-to-live in days
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// TTL cache over a [`VerdictStore`], with per-address single-flight
pub struct VerdictCache<P, S> {
    prober: Arc<P>,
    store: S,
    ttl: Duration,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl<P: Prober, S: VerdictStore> VerdictCache<P, S> {
    pub fn new(prober: Arc<P>, store: S, ttl_days: i64) -> Self {
        Self {
            prober,
            store,
            ttl: Duration::days(ttl_days),
            inflight: DashMap::new(),
        }
    }

    /// Serve `email` from the cache, probing on a miss or an expired row
    ///
    /// Concurrent calls for the same address while a probe is in flight
    /// share that probe's result.
    pub async fn fetch(&self, email: &str) -> Verdict {
        let address = normalize(email);

        if let Some(verdict) = self.lookup_fresh(&address).await {
            debug!("Cache hit for {}", address);
            return verdict;
        }

        let gate = self
            .inflight
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // A concurrent probe may have filled the row while we waited
        let verdict = match self.lookup_fresh(&address).await {
            Some(verdict) => verdict,
            None => self.probe_and_persist(email, &address).await,
        };

        drop(guard);
        self.inflight
            .remove_if(&address, |_, gate| Arc::strong_count(gate) <= 2);
        verdict
    }

    /// Re-probe `email` unconditionally and upsert the result
    pub async fn refresh(&self, email: &str) -> Verdict {
        let address = normalize(email);

        let gate = self
            .inflight
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        let verdict = self.probe_and_persist(email, &address).await;

        drop(guard);
        self.inflight
            .remove_if(&address, |_, gate| Arc::strong_count(gate) <= 2);
        verdict
    }

    /// Upsert a verdict with `cachedAt = now`
    pub async fn store(&self, email: &str, verdict: &Verdict) -> anyhow::Result<()> {
        let address = normalize(email);
        let json = serde_json::to_string(verdict)?;
        self.store.upsert(&address, &json, Utc::now()).await
    }

    /// Addresses whose rows have outlived the TTL
    pub async fn expired_addresses(&self) -> anyhow::Result<Vec<String>> {
        self.store.expired_before(Utc::now() - self.ttl).await
    }

    /// Cached verdicts whose category matches `category`,
    /// case-insensitively
    pub async fn all_by_category(&self, category: &str) -> anyhow::Result<Vec<Verdict>> {
        let rows = self.store.all().await?;
        let mut verdicts = Vec::new();
        for row in rows {
            match serde_json::from_str::<Verdict>(&row.json) {
                Ok(verdict) if verdict.category.matches_label(category) => verdicts.push(verdict),
                Ok(_) => {}
                Err(err) => warn!("Skipping corrupt cache row for {}: {}", row.address, err),
            }
        }
        Ok(verdicts)
    }

    async fn lookup_fresh(&self, address: &str) -> Option<Verdict> {
        let row = match self.store.find(address).await {
            Ok(row) => row?,
            Err(err) => {
                warn!("Cache lookup failed for {}: {}", address, err);
                return None;
            }
        };
        if Utc::now() - row.cached_at >= self.ttl {
            return None;
        }
        match serde_json::from_str(&row.json) {
            Ok(verdict) => Some(verdict),
            Err(err) => {
                // Treated as a miss; the row stays until the next upsert
                warn!("Corrupt cache row for {}: {}", address, err);
                None
            }
        }
    }

    async fn probe_and_persist(&self, email: &str, address: &str) -> Verdict {
        let verdict = self.prober.categorize(email).await;
        match serde_json::to_string(&verdict) {
            Ok(json) => {
                if let Err(err) = self.store.upsert(address, &json, Utc::now()).await {
                    warn!("Failed to persist verdict for {}: {}", address, err);
                }
            }
            Err(err) => warn!("Failed to serialize verdict for {}: {}", address, err),
        }
        verdict
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Category;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct StubProber {
        calls: AtomicUsize,
        delay: StdDuration,
    }

    impl StubProber {
        fn new(delay: StdDuration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for StubProber {
        async fn categorize(&self, email: &str) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut verdict = Verdict::new(email);
            verdict.category = Category::Valid;
            verdict.smtp_code = 250;
            verdict
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: std::sync::Mutex<HashMap<String, CachedVerdict>>,
    }

    #[async_trait]
    impl VerdictStore for MemoryStore {
        async fn find(&self, address: &str) -> anyhow::Result<Option<CachedVerdict>> {
            Ok(self.rows.lock().unwrap().get(address).cloned())
        }

        async fn upsert(
            &self,
            address: &str,
            json: &str,
            cached_at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.rows.lock().unwrap().insert(
                address.to_string(),
                CachedVerdict {
                    address: address.to_string(),
                    json: json.to_string(),
                    cached_at,
                },
            );
            Ok(())
        }

        async fn expired_before(&self, threshold: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|row| row.cached_at < threshold)
                .map(|row| row.address.clone())
                .collect())
        }

        async fn all(&self) -> anyhow::Result<Vec<CachedVerdict>> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
    }

    fn cache_with(
        delay: StdDuration,
        ttl_days: i64,
    ) -> (Arc<VerdictCache<StubProber, MemoryStore>>, Arc<StubProber>) {
        let prober = Arc::new(StubProber::new(delay));
        let cache = Arc::new(VerdictCache::new(
            prober.clone(),
            MemoryStore::default(),
            ttl_days,
        ));
        (cache, prober)
    }

    #[tokio::test]
    async fn test_fetch_probes_once_then_serves_from_cache() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 30);

        let first = cache.fetch("user@example.com").await;
        let second = cache.fetch("user@example.com").await;

        assert_eq!(prober.call_count(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_store_fetch_roundtrip() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 30);

        let mut verdict = Verdict::new("user@example.com");
        verdict.category = Category::UserNotFound;
        verdict.smtp_code = 550;
        verdict.transcript = Some(">> RCPT TO:<user@example.com>\n<< 550 no".to_string());

        cache.store("user@example.com", &verdict).await.unwrap();
        let fetched = cache.fetch("user@example.com").await;

        assert_eq!(fetched, verdict);
        assert_eq!(prober.call_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_row_triggers_reprobe() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 0);

        let verdict = Verdict::new("user@example.com");
        cache.store("user@example.com", &verdict).await.unwrap();

        let fetched = cache.fetch("user@example.com").await;
        assert_eq!(prober.call_count(), 1);
        assert_eq!(fetched.category, Category::Valid);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_probe() {
        let (cache, prober) = cache_with(StdDuration::from_millis(100), 30);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(
                async move { cache.fetch("user@example.com").await },
            ));
        }

        let mut verdicts = Vec::new();
        for handle in handles {
            verdicts.push(handle.await.unwrap());
        }

        assert_eq!(prober.call_count(), 1);
        for verdict in &verdicts[1..] {
            assert_eq!(verdict, &verdicts[0]);
        }
    }

    #[tokio::test]
    async fn test_corrupt_row_is_treated_as_miss() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 30);

        cache
            .store
            .upsert("user@example.com", "{not json", Utc::now())
            .await
            .unwrap();

        let fetched = cache.fetch("user@example.com").await;
        assert_eq!(prober.call_count(), 1);
        assert_eq!(fetched.category, Category::Valid);
    }

    #[tokio::test]
    async fn test_refresh_always_reprobes() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 30);

        cache.fetch("user@example.com").await;
        cache.refresh("user@example.com").await;

        assert_eq!(prober.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_normalizes_the_address_key() {
        let (cache, prober) = cache_with(StdDuration::ZERO, 30);

        cache.fetch("User@Example.COM").await;
        cache.fetch("  user@example.com ").await;

        assert_eq!(prober.call_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_addresses() {
        let (cache, _prober) = cache_with(StdDuration::ZERO, 30);

        cache
            .store
            .upsert("old@example.com", "{}", Utc::now() - Duration::days(45))
            .await
            .unwrap();
        cache
            .store
            .upsert("new@example.com", "{}", Utc::now())
            .await
            .unwrap();

        let expired = cache.expired_addresses().await.unwrap();
        assert_eq!(expired, vec!["old@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_all_by_category_is_case_insensitive() {
        let (cache, _prober) = cache_with(StdDuration::ZERO, 30);

        let mut valid = Verdict::new("a@example.com");
        valid.category = Category::Valid;
        let mut catch_all = Verdict::new("b@example.com");
        catch_all.category = Category::CatchAll;
        catch_all.catch_all = true;

        cache.store("a@example.com", &valid).await.unwrap();
        cache.store("b@example.com", &catch_all).await.unwrap();

        let found = cache.all_by_category("catch-all").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "b@example.com");

        let found = cache.all_by_category("VALID").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "a@example.com");
    }
}
