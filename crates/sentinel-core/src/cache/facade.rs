//! Cache API used by the analysis modules

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use super::store::{CacheEntry, CacheStats, CacheStore, Invalidation, NewEntry};
use crate::clock::SharedClock;
use crate::error::{Result, SentinelError};
use crate::freshness::{CostEstimates, FreshnessPolicy};

/// Freshness-aware cache over the durable store
///
/// Lookups never fail on a plain miss: `get` returns `Ok(None)` when the
/// entry is absent, expired, real-time, or cannot be decoded into the
/// requested type. Only storage failures surface as errors.
#[derive(Clone)]
pub struct CacheFacade {
    store: CacheStore,
    policy: Arc<FreshnessPolicy>,
    estimates: Arc<CostEstimates>,
    clock: SharedClock,
}

impl CacheFacade {
    pub fn new(
        store: CacheStore,
        policy: FreshnessPolicy,
        estimates: CostEstimates,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
            estimates: Arc::new(estimates),
            clock,
        }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Whether the data behind `key` has to be fetched again.
    ///
    /// True for real-time kinds, for keys with no row, and for rows at least
    /// one TTL old.
    pub async fn should_refresh(&self, key: &CacheKey) -> Result<bool> {
        self.should_refresh_at(key, self.clock.now()).await
    }

    async fn should_refresh_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<bool> {
        let ttl = self.policy.ttl(&key.data_kind);
        if ttl.is_zero() {
            return Ok(true);
        }

        match self.store.created_at(&key.digest()).await? {
            Some(created_at) => Ok(now - created_at >= ttl),
            None => Ok(true),
        }
    }

    /// Read a fresh payload, decoded into `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let now = self.clock.now();
        if self.should_refresh_at(key, now).await? {
            debug!("Cache miss for {}", key);
            return Ok(None);
        }

        let digest = key.digest();
        let Some(raw) = self.store.fresh_payload(&digest, now).await? else {
            debug!("Cache miss for {} (expired)", key);
            return Ok(None);
        };

        let value = match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("Discarding unreadable cache payload for {}: {}", key, err);
                return Ok(None);
            }
        };

        let listed = self.estimates.listed(&key.data_kind);
        let fallback = self.estimates.default_saving();
        match self.store.record_hit(&digest, now, listed, fallback).await? {
            Some(saved) => {
                debug!("Cache hit for {} (saved {:.3})", key, saved);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Store a payload, replacing whatever was cached under `key`.
    ///
    /// `cost` is what producing the payload cost; later hits on this entry
    /// count it as saved when the kind has no listed estimate.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, payload: &T, cost: f64) -> Result<()> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(SentinelError::InvalidPayload(format!(
                "fetch cost for {key} must be a non-negative number, got {cost}"
            )));
        }

        let payload = serde_json::to_string(payload)?;
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl(&key.data_kind);

        self.store
            .put(NewEntry {
                key: key.digest(),
                data_kind: key.data_kind.clone(),
                subject: key.subject.clone(),
                payload,
                fetch_cost: cost,
                created_at: now,
                expires_at,
            })
            .await?;

        debug!("Cached {} until {}", key, expires_at);
        Ok(())
    }

    /// Return the cached value or fetch, store and return a new one.
    ///
    /// A failed fetch leaves the cache untouched.
    pub async fn get_or_fetch<T, F, Fut, E>(&self, key: &CacheKey, cost: f64, fetcher: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<SentinelError>,
    {
        if let Some(value) = self.get::<T>(key).await? {
            return Ok(value);
        }

        let value = fetcher().await?;
        self.set(key, &value, cost).await?;
        Ok(value)
    }

    /// Inspect the row behind `key`, fresh or not.
    pub async fn entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let Some(stored) = self.store.load(&key.digest()).await? else {
            return Ok(None);
        };

        let payload = match serde_json::from_str(&stored.payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Cache row for {} holds unreadable payload: {}", key, err);
                return Ok(None);
            }
        };

        Ok(Some(CacheEntry {
            key: stored.key,
            data_kind: stored.data_kind,
            subject: stored.subject,
            payload,
            fetch_cost: stored.fetch_cost,
            created_at: stored.created_at,
            accessed_at: stored.accessed_at,
            expires_at: stored.expires_at,
            access_count: stored.access_count,
            cost_saved: stored.cost_saved,
        }))
    }

    /// Drop cached rows so the next read refetches.
    ///
    /// With both arguments every variant of that kind for that subject goes,
    /// whatever extra params it was stored with. With neither argument
    /// nothing is deleted.
    pub async fn force_refresh(&self, data_kind: Option<&str>, subject: Option<&str>) -> Result<usize> {
        let target = match (data_kind, subject) {
            (Some(data_kind), Some(subject)) => Invalidation::KindAndSubject {
                data_kind: data_kind.to_string(),
                subject: subject.to_string(),
            },
            (Some(data_kind), None) => Invalidation::Kind(data_kind.to_string()),
            (None, Some(subject)) => Invalidation::Subject(subject.to_string()),
            (None, None) => {
                debug!("force_refresh called without kind or subject, nothing to do");
                return Ok(0);
            }
        };

        let removed = self.store.invalidate(target).await?;
        info!(
            "Invalidated {} cache rows (kind={:?}, subject={:?})",
            removed, data_kind, subject
        );
        Ok(removed)
    }

    /// Purge rows past their expiry
    pub async fn clear_stale(&self) -> Result<usize> {
        let removed = self.store.delete_expired(self.clock.now()).await?;
        info!("Cleared {} stale cache rows", removed);
        Ok(removed)
    }

    pub async fn get_stats(&self) -> Result<CacheStats> {
        let now = self.clock.now();
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        self.store.stats(now, day_start).await
    }
}
