//! Population and patient-scoped result cache (§4.G): two TTL-bounded
//! maps, single-flight computation, and version-counter invalidation in
//! place of wildcard delete.

pub mod key;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use common::ids::PatientId;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("in-flight computation was canceled")]
    Canceled,
    #[error("upstream computation failed: {0}")]
    Upstream(String),
}

struct Entry<V> {
    value: V,
    patient: Option<PatientId>,
    inserted_at: Instant,
}

/// One TTL-bounded region (population or patient-scoped). Isolation holds
/// even under a hash collision: every entry carries the patient id it was
/// computed for, checked before the value is ever returned.
struct Region<V> {
    ttl: Duration,
    entries: Mutex<HashMap<u64, Entry<V>>>,
    in_flight: StdMutex<HashMap<u64, Arc<Notify>>>,
}

impl<V: Clone> Region<V> {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()), in_flight: StdMutex::new(HashMap::new()) }
    }

    async fn lookup(&self, hashed: u64, patient: Option<PatientId>) -> Option<V> {
        let guard = self.entries.lock().await;
        let entry = guard.get(&hashed)?;
        if entry.patient != patient {
            return None;
        }
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn store(&self, hashed: u64, patient: Option<PatientId>, value: V) {
        let mut guard = self.entries.lock().await;
        guard.insert(hashed, Entry { value, patient, inserted_at: Instant::now() });
    }

    /// Single-flight `get`-or-`compute`. Concurrent misses for the same key
    /// await the leader's in-flight slot instead of recomputing; if the
    /// leader's future is dropped (e.g. a caller-side deadline), the guard's
    /// `Drop` still wakes every waiter so none of them hang.
    async fn get_or_compute<F, Fut>(
        &self,
        hashed: u64,
        patient: Option<PatientId>,
        compute: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, CacheError>>,
    {
        if let Some(value) = self.lookup(hashed, patient).await {
            return Ok(value);
        }

        loop {
            let existing = {
                let mut flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                match flight.get(&hashed) {
                    Some(notify) => Some(notify.clone()),
                    None => {
                        flight.insert(hashed, Arc::new(Notify::new()));
                        None
                    }
                }
            };

            let Some(notify) = existing else { break };
            notify.notified().await;
            if let Some(value) = self.lookup(hashed, patient).await {
                return Ok(value);
            }
            // leader's computation failed or was canceled; retry as the new leader
        }

        let notify = {
            let flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            flight.get(&hashed).expect("just inserted").clone()
        };
        let _guard = FlightGuard { region: self, hashed, notify };
        let result = compute().await;
        if let Ok(ref value) = result {
            self.store(hashed, patient, value.clone()).await;
        }
        result
    }
}

struct FlightGuard<'a, V> {
    region: &'a Region<V>,
    hashed: u64,
    notify: Arc<Notify>,
}

impl<'a, V> Drop for FlightGuard<'a, V> {
    fn drop(&mut self) {
        let mut flight = self.region.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        flight.remove(&self.hashed);
        self.notify.notify_waiters();
    }
}

/// A generic capability object, constructor-injected rather than a global
/// singleton. `pro-core` holds one `Cache<V>` per result shape it wants to
/// memoize (cohort aggregates, construct scores, item values, composite
/// scores), each with its own population/patient TTLs.
pub struct Cache<V> {
    population: Region<V>,
    patient_scoped: Region<V>,
    population_version: AtomicU64,
    patient_versions: Mutex<HashMap<PatientId, Arc<AtomicU64>>>,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub fn new(population_ttl: Duration, patient_ttl: Duration) -> Self {
        Self {
            population: Region::new(population_ttl),
            patient_scoped: Region::new(patient_ttl),
            population_version: AtomicU64::new(0),
            patient_versions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_compute_population<F, Fut>(
        &self,
        family: &str,
        parts: &[&str],
        compute: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, CacheError>>,
    {
        let version = self.population_version.load(Ordering::Acquire);
        let hashed = key::stable_hash(&(family, Option::<PatientId>::None, parts, version));
        self.population.get_or_compute(hashed, None, compute).await
    }

    pub async fn get_or_compute_patient<F, Fut>(
        &self,
        family: &str,
        patient: PatientId,
        parts: &[&str],
        compute: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, CacheError>>,
    {
        let version = self.patient_version(patient).await;
        let hashed = key::stable_hash(&(family, Some(patient), parts, version));
        self.patient_scoped.get_or_compute(hashed, Some(patient), compute).await
    }

    async fn patient_version(&self, patient: PatientId) -> u64 {
        let mut versions = self.patient_versions.lock().await;
        versions.entry(patient).or_insert_with(|| Arc::new(AtomicU64::new(0))).load(Ordering::Acquire)
    }

    /// Bumps the global population version; all `agg:*` keys computed
    /// against the old version become unreachable without a delete pass.
    pub fn invalidate_population(&self) {
        self.population_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Bumps one patient's version; their `pscores:*`/`pitem:*`/`pcomp:*`
    /// keys become unreachable without a delete pass.
    pub async fn invalidate_patient(&self, patient: PatientId) {
        let mut versions = self.patient_versions.lock().await;
        versions.entry(patient).or_insert_with(|| Arc::new(AtomicU64::new(0))).fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cache() -> Cache<i64> {
        Cache::new(Duration::from_secs(3600), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn population_hit_avoids_recompute() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = cache
                .get_or_compute_population("agg", &["construct:c1", "bucket:0"], || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn patient_isolation_holds_across_distinct_patients() {
        let cache = cache();
        let patient_a = PatientId::new();
        let patient_b = PatientId::new();

        cache.get_or_compute_patient("pscores", patient_a, &["c1"], || async { Ok(1) }).await.unwrap();
        let value = cache.get_or_compute_patient("pscores", patient_b, &["c1"], || async { Ok(2) }).await.unwrap();

        assert_eq!(value, 2);
        let value_a = cache.get_or_compute_patient("pscores", patient_a, &["c1"], || async { Ok(999) }).await.unwrap();
        assert_eq!(value_a, 1, "patient A's cached entry must not be shadowed by patient B's key");
    }

    #[tokio::test]
    async fn invalidate_population_forces_recompute() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(7)
        };
        cache.get_or_compute_population("agg", &["c1"], || run(calls.clone())).await.unwrap();
        cache.invalidate_population();
        cache.get_or_compute_population("agg", &["c1"], || run(calls.clone())).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_patient_forces_recompute_for_that_patient_only() {
        let cache = cache();
        let patient_a = PatientId::new();
        let patient_b = PatientId::new();
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls_a = calls_a.clone();
            cache
                .get_or_compute_patient("pscores", patient_a, &["c1"], || async move {
                    calls_a.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
        }
        cache.invalidate_patient(patient_a).await;
        {
            let calls_a = calls_a.clone();
            cache
                .get_or_compute_patient("pscores", patient_a, &["c1"], || async move {
                    calls_a.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
        }
        {
            let calls_b = calls_b.clone();
            cache
                .get_or_compute_patient("pscores", patient_b, &["c1"], || async move {
                    calls_b.fetch_add(1, Ordering::SeqCst);
                    Ok(2)
                })
                .await
                .unwrap();
        }

        assert_eq!(calls_a.load(Ordering::SeqCst), 2, "invalidated patient recomputes");
        assert_eq!(calls_b.load(Ordering::SeqCst), 1, "untouched patient still hits");
    }

    #[tokio::test]
    async fn concurrent_misses_single_flight_to_one_computation() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute_population("agg", &["c1"], || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(5)
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn degradation_surfaces_upstream_error_without_caching_it() {
        let cache = cache();
        let first = cache
            .get_or_compute_population("agg", &["c1"], || async {
                Err::<i64, _>(CacheError::Upstream("store unavailable".into()))
            })
            .await;
        assert!(first.is_err());

        let second = cache.get_or_compute_population("agg", &["c1"], || async { Ok(3) }).await.unwrap();
        assert_eq!(second, 3, "a failed computation is never cached");
    }
}
