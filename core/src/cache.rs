use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use solroute_commons::metrics::RouterMetrics;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, warn};

use crate::error::{RouterError, RouterResult};
use crate::keys::cache_type;
use crate::model::{NormalizedQuote, RouteResponse};

/// Extra slack a waiter grants the leader before giving up, so the
/// leader's own factory timeout fires first.
const WAITER_GRACE: Duration = Duration::from_millis(500);

/// Values the cache may hold. Absent values are never cached even when the
/// factory succeeds.
pub trait CacheValue: Clone {
    fn is_cacheable(&self) -> bool {
        true
    }
}

impl<V: Clone> CacheValue for Option<V> {
    fn is_cacheable(&self) -> bool {
        self.is_some()
    }
}

impl CacheValue for NormalizedQuote {}
impl CacheValue for RouteResponse {}
impl CacheValue for String {}
impl CacheValue for u64 {}

/// Where a fetched value came from, for hit-ratio accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Served from the TTL cache.
    Cache,
    /// Produced by this caller's own factory invocation.
    Fresh,
    /// Joined another caller's in-flight factory invocation.
    Coalesced,
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub origin: FetchOrigin,
}

impl<T> Fetched<T> {
    pub fn was_cached(&self) -> bool {
        self.origin == FetchOrigin::Cache
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    cached_at: Instant,
    ttl: Duration,
}

impl<T: Clone> CacheEntry<T> {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

struct Flight<T> {
    /// Distinguishes this flight from a successor under the same key, so a
    /// swept leader cannot finalize a flight it no longer owns.
    id: u64,
    tx: broadcast::Sender<RouterResult<T>>,
    /// Leader plus every waiter that joined.
    count: u64,
    started_at: Instant,
}

/// Aggregate hit/miss counters for one cache instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// TTL cache with request coalescing.
///
/// `get_with_coalescing` guarantees at most one concurrent factory
/// invocation per key across the process; concurrent callers for the same
/// key subscribe to the in-flight result. Factory failures propagate to
/// every waiter and nothing is cached for them.
pub struct CoalescingCache<T: CacheValue + Send + Sync + 'static> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    flights: Mutex<HashMap<String, Flight<T>>>,
    next_flight_id: std::sync::atomic::AtomicU64,
    stats: std::sync::Mutex<CacheStats>,
    max_entries: usize,
    metrics: Arc<RouterMetrics>,
}

impl<T: CacheValue + Send + Sync + 'static> CoalescingCache<T> {
    pub fn new(metrics: Arc<RouterMetrics>) -> Self {
        Self::with_capacity(metrics, 10_000)
    }

    pub fn with_capacity(metrics: Arc<RouterMetrics>, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            next_flight_id: std::sync::atomic::AtomicU64::new(0),
            stats: std::sync::Mutex::new(CacheStats::default()),
            max_entries,
            metrics,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|entry| !entry.is_expired()).map(|entry| entry.value.clone())
    }

    /// `ttl` of zero means do not cache. Absent values are dropped.
    pub async fn set(&self, key: &str, value: T, ttl: Duration) {
        if ttl.is_zero() || !value.is_cacheable() {
            return;
        }
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            entries.retain(|_, entry| !entry.is_expired());
            if entries.len() >= self.max_entries {
                // Still full: drop the oldest entry.
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    pub async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().expect("cache stats poisoned")
    }

    fn record_hit(&self, key: &str) {
        self.stats.lock().expect("cache stats poisoned").hits += 1;
        self.metrics.cache.hits.with_label_values(&[cache_type(key)]).inc();
    }

    fn record_miss(&self, key: &str) {
        self.stats.lock().expect("cache stats poisoned").misses += 1;
        self.metrics.cache.misses.with_label_values(&[cache_type(key)]).inc();
    }

    fn record_coalesced(&self, key: &str) {
        self.stats.lock().expect("cache stats poisoned").coalesced += 1;
        self.metrics
            .cache
            .coalesced_requests
            .with_label_values(&[cache_type(key)])
            .inc();
    }

    /// Single-flight fetch.
    ///
    /// 1. Cache hit → returned as-is.
    /// 2. An in-flight factory for the key → subscribe and wait for its
    ///    result.
    /// 3. Otherwise this caller becomes the leader: runs `factory` under
    ///    `coalesce_timeout`, caches a success for `ttl`, publishes the
    ///    outcome to all waiters.
    ///
    /// A waiter whose flight failed retries once as a fresh attempt.
    pub async fn get_with_coalescing<F, Fut>(
        &self,
        key: &str,
        factory: F,
        coalesce_timeout: Duration,
        ttl: Duration,
    ) -> RouterResult<Fetched<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RouterResult<T>>,
    {
        let mut allow_retry = true;
        loop {
            let mut leader_flight_id: Option<u64> = None;
            if let Some(value) = self.get(key).await {
                self.record_hit(key);
                return Ok(Fetched {
                    value,
                    origin: FetchOrigin::Cache,
                });
            }
            self.record_miss(key);

            let subscription = {
                let mut flights = self.flights.lock().await;
                match flights.get_mut(key) {
                    Some(flight) => {
                        flight.count += 1;
                        Some(flight.tx.subscribe())
                    }
                    None => {
                        let (tx, _) = broadcast::channel(1);
                        let id = self
                            .next_flight_id
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        flights.insert(
                            key.to_string(),
                            Flight {
                                id,
                                tx,
                                count: 1,
                                started_at: Instant::now(),
                            },
                        );
                        self.metrics
                            .cache
                            .inflight
                            .with_label_values(&[cache_type(key)])
                            .inc();
                        leader_flight_id = Some(id);
                        None
                    }
                }
            };

            match subscription {
                Some(mut rx) => {
                    self.record_coalesced(key);
                    match tokio::time::timeout(coalesce_timeout + WAITER_GRACE, rx.recv()).await {
                        Ok(Ok(Ok(value))) => {
                            return Ok(Fetched {
                                value,
                                origin: FetchOrigin::Coalesced,
                            });
                        }
                        Ok(Ok(Err(err))) if allow_retry => {
                            debug!("coalesced flight for {} failed, retrying once: {}", key, err);
                            allow_retry = false;
                            continue;
                        }
                        Ok(Ok(Err(err))) => return Err(err),
                        Ok(Err(_closed)) if allow_retry => {
                            // Flight swept or leader dropped; go again.
                            allow_retry = false;
                            continue;
                        }
                        Ok(Err(_closed)) => {
                            return Err(RouterError::external_service("coalesced flight abandoned")
                                .with_context(format!("key={key}")));
                        }
                        Err(_elapsed) => {
                            return Err(RouterError::external_service("coalesced wait timed out")
                                .with_context(format!("key={key} timeout={}ms", coalesce_timeout.as_millis())));
                        }
                    }
                }
                None => {
                    let flight_id = leader_flight_id.unwrap_or_default();
                    return self.lead_flight(key, flight_id, &factory, coalesce_timeout, ttl).await;
                }
            }
        }
    }

    async fn lead_flight<F, Fut>(
        &self,
        key: &str,
        flight_id: u64,
        factory: &F,
        coalesce_timeout: Duration,
        ttl: Duration,
    ) -> RouterResult<Fetched<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = RouterResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(coalesce_timeout, factory()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(RouterError::external_service("factory timed out")
                .with_context(format!("key={key} timeout={}ms", coalesce_timeout.as_millis()))),
        };

        if let Ok(value) = &result {
            self.set(key, value.clone(), ttl).await;
        }

        // Remove the flight before publishing so late arrivals start a new
        // one instead of joining a finished flight. A successor flight
        // created after a sweep belongs to another leader and stays put.
        let flight = {
            let mut flights = self.flights.lock().await;
            match flights.get(key) {
                Some(flight) if flight.id == flight_id => flights.remove(key),
                _ => None,
            }
        };
        if let Some(flight) = flight {
            let label = cache_type(key);
            let waiters = flight.count.saturating_sub(1);
            self.metrics.cache.inflight.with_label_values(&[label]).dec();
            self.metrics
                .cache
                .requests_saved
                .with_label_values(&[label])
                .inc_by(waiters);
            self.metrics
                .cache
                .coalesce_duration
                .with_label_values(&[label])
                .observe(started.elapsed().as_secs_f64());
            let _ = flight.tx.send(result.clone());
        }

        result.map(|value| Fetched {
            value,
            origin: FetchOrigin::Fresh,
        })
    }

    /// Removes single-flight entries whose factory never settled and
    /// expired cache rows. Dropping the sender detaches all waiters.
    pub async fn sweep_stale(&self, max_flight_age: Duration) {
        let mut swept = 0u64;
        {
            let mut flights = self.flights.lock().await;
            let before = flights.len();
            flights.retain(|key, flight| {
                let stale = flight.started_at.elapsed() > max_flight_age;
                if stale {
                    warn!("sweeping stale coalesce flight key={} waiters={}", key, flight.count - 1);
                    self.metrics
                        .cache
                        .inflight
                        .with_label_values(&[cache_type(key)])
                        .dec();
                }
                !stale
            });
            swept += (before - flights.len()) as u64;
        }
        {
            let mut entries = self.entries.write().await;
            entries.retain(|_, entry| !entry.is_expired());
        }
        if swept > 0 {
            self.metrics.cache.swept_entries.inc_by(swept as f64);
        }
    }
}

/// Periodic sweep of stale flights; entries older than ten minutes are
/// abandoned and their waiters detached.
pub fn spawn_sweeper<T: CacheValue + Send + Sync + 'static>(
    cache: Arc<CoalescingCache<T>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    const MAX_FLIGHT_AGE: Duration = Duration::from_secs(600);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            cache.sweep_stale(MAX_FLIGHT_AGE).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Arc<CoalescingCache<String>> {
        Arc::new(CoalescingCache::new(Arc::new(RouterMetrics::new())))
    }

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let c = cache();
        c.set("route:SOL:USDC:1", "meta".to_string(), Duration::from_secs(5)).await;
        assert_eq!(c.get("route:SOL:USDC:1").await.as_deref(), Some("meta"));
        assert!(c.has("route:SOL:USDC:1").await);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let c = cache();
        c.set("route:SOL:USDC:1", "meta".to_string(), Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(c.get("route:SOL:USDC:1").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_cached() {
        let c = cache();
        c.set("route:SOL:USDC:1", "meta".to_string(), Duration::ZERO).await;
        assert_eq!(c.get("route:SOL:USDC:1").await, None);
    }

    #[tokio::test]
    async fn absent_values_are_not_cached() {
        let metrics = Arc::new(RouterMetrics::new());
        let c: CoalescingCache<Option<String>> = CoalescingCache::new(metrics);
        c.set("provider_quote:jupiter:SOL:USDC:1:50", None, Duration::from_secs(5)).await;
        assert_eq!(c.get("provider_quote:jupiter:SOL:USDC:1:50").await, None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let c = cache();
        c.set("route:SOL:USDC:1", "meta".to_string(), Duration::from_secs(5)).await;
        c.delete("route:SOL:USDC:1").await;
        assert!(!c.has("route:SOL:USDC:1").await);
    }

    #[tokio::test]
    async fn concurrent_callers_invoke_factory_exactly_once() {
        let c = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                c.get_with_coalescing(
                    "route:SOL:USDC:1000",
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok("best-route".to_string())
                        }
                    },
                    Duration::from_secs(2),
                    Duration::from_secs(5),
                )
                .await
            }));
        }

        let mut fresh = 0;
        for handle in handles {
            let fetched = handle.await.expect("join").expect("fetch");
            assert_eq!(fetched.value, "best-route");
            if fetched.origin == FetchOrigin::Fresh {
                fresh += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn factory_error_propagates_to_all_waiters_and_caches_nothing() {
        let c = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                c.get_with_coalescing(
                    "provider_quote:jupiter:SOL:USDC:1000:50",
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Err::<String, _>(RouterError::external_service("upstream down"))
                        }
                    },
                    Duration::from_secs(2),
                    Duration::from_secs(5),
                )
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.expect("join").is_err());
        }
        // Leader once, plus at most one fallback retry per waiter.
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert!(!c.has("provider_quote:jupiter:SOL:USDC:1000:50").await);
    }

    #[tokio::test]
    async fn successful_factory_result_is_cached_once() {
        let c = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                }
            }
        };

        let first = c
            .get_with_coalescing("quote:SOL:USDC:1:50", factory.clone(), Duration::from_secs(1), Duration::from_secs(5))
            .await
            .expect("first");
        assert_eq!(first.origin, FetchOrigin::Fresh);

        let second = c
            .get_with_coalescing("quote:SOL:USDC:1:50", factory, Duration::from_secs(1), Duration::from_secs(5))
            .await
            .expect("second");
        assert_eq!(second.origin, FetchOrigin::Cache);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_still_coalesces_but_does_not_cache() {
        let c = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                }
            }
        };

        c.get_with_coalescing("route:SOL:USDC:9", factory.clone(), Duration::from_secs(1), Duration::ZERO)
            .await
            .expect("first");
        c.get_with_coalescing("route:SOL:USDC:9", factory, Duration::from_secs(1), Duration::ZERO)
            .await
            .expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn factory_timeout_surfaces_external_service_error() {
        let c = cache();
        let err = c
            .get_with_coalescing(
                "route:SOL:USDC:1",
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("never".to_string())
                },
                Duration::from_millis(30),
                Duration::from_secs(5),
            )
            .await
            .expect_err("must time out");
        assert_eq!(err.code(), solroute_commons::error::ErrorCode::ExternalServiceError);
        assert!(err.context().unwrap_or_default().contains("route:SOL:USDC:1"));
    }

    #[tokio::test]
    async fn sweeper_detaches_waiters_of_stale_flights() {
        let c = cache();

        let waiter = {
            let c = c.clone();
            tokio::spawn(async move {
                c.get_with_coalescing(
                    "route:stuck",
                    || async {
                        // Never settles within the test.
                        tokio::time::sleep(Duration::from_secs(600)).await;
                        Ok("never".to_string())
                    },
                    Duration::from_secs(120),
                    Duration::from_secs(5),
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        c.sweep_stale(Duration::from_millis(10)).await;

        // A second caller after the sweep starts a fresh flight.
        let fetched = c
            .get_with_coalescing(
                "route:stuck",
                || async { Ok("fresh".to_string()) },
                Duration::from_secs(1),
                Duration::ZERO,
            )
            .await
            .expect("fresh flight");
        assert_eq!(fetched.value, "fresh");

        waiter.abort();
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let c = cache();
        c.set("route:SOL:USDC:1", "v".to_string(), Duration::from_secs(5)).await;
        let _ = c
            .get_with_coalescing("route:SOL:USDC:1", || async { Ok("v".to_string()) }, Duration::from_secs(1), Duration::ZERO)
            .await;
        let _ = c
            .get_with_coalescing("route:SOL:USDC:2", || async { Ok("w".to_string()) }, Duration::from_secs(1), Duration::ZERO)
            .await;

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
