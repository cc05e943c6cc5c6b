use super::cache::{Clock, SystemClock, TtlCache};
use super::domain::DistrictId;
use super::fetcher::{CalendarSource, FetchError};
use crate::config::{CacheConfig, RetryConfig};
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Explicit retry configuration applied around every calendar fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.delay_secs))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Exact request a cached payload answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalendarRequest {
    pub district: DistrictId,
    pub date: NaiveDate,
}

pub type CalendarPayload = Arc<Vec<Value>>;

/// The only path from the pipeline to the network: retries transient
/// failures and memoizes successes for the cache TTL.
///
/// Concurrent misses on the same key each reach upstream; nothing
/// de-duplicates in-flight requests.
pub struct CachedCalendar<S, C = SystemClock> {
    source: S,
    policy: RetryPolicy,
    cache: TtlCache<CalendarRequest, CalendarPayload, C>,
}

impl<S> CachedCalendar<S, SystemClock>
where
    S: CalendarSource,
{
    pub fn from_config(source: S, retry: &RetryConfig, cache: &CacheConfig) -> Self {
        Self::new(
            source,
            RetryPolicy::from_config(retry),
            TtlCache::new(Duration::from_secs(cache.ttl_secs), cache.capacity),
        )
    }
}

impl<S, C> CachedCalendar<S, C>
where
    S: CalendarSource,
    C: Clock,
{
    pub fn new(
        source: S,
        policy: RetryPolicy,
        cache: TtlCache<CalendarRequest, CalendarPayload, C>,
    ) -> Self {
        Self {
            source,
            policy,
            cache,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub async fn centers(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<CalendarPayload, FetchError> {
        let request = CalendarRequest { district, date };
        if let Some(payload) = self.cache.get(&request) {
            debug!(%district, %date, "calendar served from cache");
            return Ok(payload);
        }

        let payload = Arc::new(self.fetch_with_retry(district, date).await?);
        self.cache.insert(request, Arc::clone(&payload));
        Ok(payload)
    }

    async fn fetch_with_retry(
        &self,
        district: DistrictId,
        date: NaiveDate,
    ) -> Result<Vec<Value>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch_calendar(district, date).await {
                Ok(centers) => return Ok(centers),
                Err(error) if self.policy.should_retry(&error, attempt) => {
                    warn!(
                        %district,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        %error,
                        "transient upstream failure, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
