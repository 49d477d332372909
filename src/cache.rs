// Availability cache: per-date entries with a TTL, composed into ranges on demand
// Concurrent misses for the same date share one in-flight fetch

use crate::aggregator::{DateAggregator, RangeAggregator};
use crate::availability::{DateRange, DateResult, RangeResult};
use crate::config::CacheConfig;
use crate::error::AvailabilityError;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub coalesced_count: AtomicUsize,
    pub expired_count: AtomicUsize,
    pub invalidated_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub in_flight_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub coalesced_count: usize,
    pub expired_count: usize,
    pub invalidated_count: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: DateResult,
    created_at: DateTime<Utc>,
}

impl CacheEntry {
    // Dead once `now - created_at >= ttl`
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        age < ttl
    }
}

type SharedFetch = Shared<BoxFuture<'static, DateResult>>;

struct InFlight {
    ticket: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<NaiveDate, CacheEntry>,
    in_flight: HashMap<NaiveDate, InFlight>,
    next_ticket: u64,
}

impl CacheState {
    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.next_ticket
    }
}

enum Lookup {
    Hit(DateResult),
    Pending(SharedFetch),
    Miss,
}

struct CacheInner {
    state: Mutex<CacheState>,
    stats: CacheStats,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheInner {
    fn lookup(&self, state: &mut CacheState, date: NaiveDate, now: DateTime<Utc>, ttl: Duration) -> Lookup {
        if let Some(entry) = state.entries.get(&date) {
            if entry.is_fresh(now, ttl) {
                self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                return Lookup::Hit(entry.result.clone());
            }
            // A shorter per-call TTL skips the entry; only the default TTL kills it
            if !entry.is_fresh(now, self.config.default_ttl()) {
                state.entries.remove(&date);
                self.stats.expired_count.fetch_add(1, Ordering::SeqCst);
            }
        }

        match state.in_flight.get(&date) {
            Some(in_flight) => {
                self.stats.coalesced_count.fetch_add(1, Ordering::SeqCst);
                Lookup::Pending(in_flight.fetch.clone())
            }
            None => {
                self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
                Lookup::Miss
            }
        }
    }

    // Stores a finished fetch unless it was cleared or invalidated while running
    fn complete(&self, date: NaiveDate, ticket: u64, result: &DateResult) {
        let mut state = self.state.lock();
        let registered = state
            .in_flight
            .get(&date)
            .is_some_and(|in_flight| in_flight.ticket == ticket);
        if !registered {
            debug!(%date, "discarding fetch superseded by cache invalidation");
            return;
        }

        state.in_flight.remove(&date);
        let created_at = self.clock.now();
        state.entries.insert(
            date,
            CacheEntry {
                result: result.clone(),
                created_at,
            },
        );
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.default_ttl();
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh(now, ttl));
        let purged = before - state.entries.len();
        self.stats.expired_count.fetch_add(purged, Ordering::SeqCst);
        purged
    }
}

pub struct AvailabilityCache {
    inner: Arc<CacheInner>,
    date_aggregator: Arc<DateAggregator>,
    range_aggregator: Arc<RangeAggregator>,
}

impl AvailabilityCache {
    pub fn new(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        date_aggregator: Arc<DateAggregator>,
        range_aggregator: Arc<RangeAggregator>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                stats: CacheStats::default(),
                clock,
                config,
            }),
            date_aggregator,
            range_aggregator,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.config.default_ttl()
    }

    // The bool is true when the result was served from the cache
    pub async fn get_or_fetch(&self, date: NaiveDate, ttl: Option<Duration>) -> (DateResult, bool) {
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        let now = self.inner.clock.now();

        let fetch = {
            let mut state = self.inner.state.lock();
            match self.inner.lookup(&mut state, date, now, ttl) {
                Lookup::Hit(result) => {
                    debug!(%date, "cache hit");
                    return (result, true);
                }
                Lookup::Pending(fetch) => {
                    debug!(%date, "joining in-flight fetch");
                    fetch
                }
                Lookup::Miss => {
                    debug!(%date, "cache miss");
                    self.register_date_fetch(&mut state, date)
                }
            }
        };

        (fetch.await, false)
    }

    // Fresh dates come from the cache; the rest are fetched together under the range ceiling.
    // Returns the range and how many of its dates were served from the cache.
    pub async fn get_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        ttl: Option<Duration>,
    ) -> Result<(RangeResult, usize), AvailabilityError> {
        let range = DateRange::new(start, end)?;
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        let now = self.inner.clock.now();

        let mut data = BTreeMap::new();
        let mut pending = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let mut missing = Vec::new();
            for date in range.dates() {
                match self.inner.lookup(&mut state, date, now, ttl) {
                    Lookup::Hit(result) => {
                        data.insert(date, result);
                    }
                    Lookup::Pending(fetch) => pending.push((date, fetch)),
                    Lookup::Miss => missing.push(date),
                }
            }
            if !missing.is_empty() {
                pending.extend(self.register_range_fetch(&mut state, missing));
            }
        }

        let cached_dates = data.len();
        debug!(%start, %end, cached_dates, fetching = pending.len(), "range lookup");

        let fetched = join_all(
            pending
                .into_iter()
                .map(|(date, fetch)| async move { (date, fetch.await) }),
        )
        .await;
        data.extend(fetched);

        Ok((RangeResult { start, end, data }, cached_dates))
    }

    fn register_date_fetch(&self, state: &mut CacheState, date: NaiveDate) -> SharedFetch {
        let ticket = state.issue_ticket();
        let inner = Arc::clone(&self.inner);
        let aggregator = Arc::clone(&self.date_aggregator);

        // Own task: finishes and stores its result even when every caller stops waiting
        let task = tokio::spawn(async move {
            let result = aggregator.aggregate(date).await;
            inner.complete(date, ticket, &result);
            result
        });
        let fetch = task
            .map(move |joined| joined.unwrap_or_else(|_| DateResult::failed(date)))
            .boxed()
            .shared();

        state.in_flight.insert(
            date,
            InFlight {
                ticket,
                fetch: fetch.clone(),
            },
        );
        fetch
    }

    // One batch fetch for all missing dates, exposed per date so single-date lookups can join it
    fn register_range_fetch(
        &self,
        state: &mut CacheState,
        dates: Vec<NaiveDate>,
    ) -> Vec<(NaiveDate, SharedFetch)> {
        let tickets: Vec<(NaiveDate, u64)> = dates
            .iter()
            .map(|&date| (date, state.issue_ticket()))
            .collect();
        let inner = Arc::clone(&self.inner);
        let aggregator = Arc::clone(&self.range_aggregator);
        let batch_tickets = tickets.clone();

        let task = tokio::spawn(async move {
            let results = aggregator.aggregate_dates(&dates).await;
            for (date, ticket) in batch_tickets {
                if let Some(result) = results.get(&date) {
                    inner.complete(date, ticket, result);
                }
            }
            Arc::new(results)
        });
        let batch = task
            .map(|joined| joined.unwrap_or_default())
            .boxed()
            .shared();

        tickets
            .into_iter()
            .map(|(date, ticket)| {
                let fetch = batch
                    .clone()
                    .map(move |results| {
                        results
                            .get(&date)
                            .cloned()
                            .unwrap_or_else(|| DateResult::failed(date))
                    })
                    .boxed()
                    .shared();
                state.in_flight.insert(
                    date,
                    InFlight {
                        ticket,
                        fetch: fetch.clone(),
                    },
                );
                (date, fetch)
            })
            .collect()
    }

    // Drops every entry and detaches in-flight fetches so they are not stored
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.in_flight.clear();
        self.inner
            .stats
            .invalidated_count
            .fetch_add(removed, Ordering::SeqCst);
        removed
    }

    pub fn invalidate(&self, date: NaiveDate) -> bool {
        let mut state = self.inner.state.lock();
        state.in_flight.remove(&date);
        let removed = state.entries.remove(&date).is_some();
        if removed {
            self.inner.stats.invalidated_count.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    // Eager sweep using the default TTL
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    // Periodic sweep; stops on its own once the cache is dropped
    pub fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let inner: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.cleanup_interval().max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired cache entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsReport {
        let (items_count, in_flight_count) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.in_flight.len())
        };
        let stats = &self.inner.stats;

        CacheStatsReport {
            items_count,
            in_flight_count,
            hit_count: stats.hit_count.load(Ordering::SeqCst),
            miss_count: stats.miss_count.load(Ordering::SeqCst),
            coalesced_count: stats.coalesced_count.load(Ordering::SeqCst),
            expired_count: stats.expired_count.load(Ordering::SeqCst),
            invalidated_count: stats.invalidated_count.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::AvailabilityCount;
    use crate::category::CampCategory;
    use crate::fetcher::SlotFetcher;
    use crate::pool::WorkerPool;
    use async_trait::async_trait;
    use chrono::TimeZone;

    const CATEGORIES: usize = CampCategory::ALL.len();

    // Returns a different random count on every call
    struct RandomFetcher {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl SlotFetcher for RandomFetcher {
        async fn fetch(&self, _date: NaiveDate, _category: CampCategory) -> AvailabilityCount {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            AvailabilityCount::Available(rand::random::<u32>() % 1000)
        }
    }

    struct Harness {
        cache: AvailabilityCache,
        fetcher: Arc<RandomFetcher>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(delay: Duration) -> Self {
            Self::with_config(CacheConfig::default(), delay)
        }

        fn with_config(config: CacheConfig, delay: Duration) -> Self {
            let fetcher = Arc::new(RandomFetcher {
                calls: AtomicUsize::new(0),
                delay,
            });
            let clock = Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            ));
            let date_aggregator = Arc::new(DateAggregator::new(
                fetcher.clone(),
                WorkerPool::new(4, Duration::from_secs(5)),
            ));
            let range_aggregator = Arc::new(RangeAggregator::new(
                fetcher.clone(),
                WorkerPool::new(8, Duration::from_secs(10)),
            ));
            let cache = AvailabilityCache::new(config, clock.clone(), date_aggregator, range_aggregator);

            Self {
                cache,
                fetcher,
                clock,
            }
        }

        fn aggregations(&self) -> usize {
            self.fetcher.calls.load(Ordering::SeqCst) / CATEGORIES
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_hits_cache() {
        let harness = Harness::new(Duration::ZERO);
        let day = date("2024-05-01");

        let (first, first_cached) = harness.cache.get_or_fetch(day, None).await;
        let (second, second_cached) = harness.cache.get_or_fetch(day, None).await;

        assert!(!first_cached);
        assert!(second_cached);
        assert_eq!(first, second);
        assert_eq!(harness.aggregations(), 1);

        let stats = harness.cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.items_count, 1);
    }

    #[tokio::test]
    async fn test_entry_dies_exactly_at_ttl() {
        let harness = Harness::new(Duration::ZERO);
        let day = date("2024-05-01");
        let ttl = Some(Duration::from_secs(300));

        harness.cache.get_or_fetch(day, ttl).await;

        harness.clock.advance(Duration::from_secs(299));
        assert!(harness.cache.get_or_fetch(day, ttl).await.1);

        harness.clock.advance(Duration::from_secs(1));
        let (_, cached) = harness.cache.get_or_fetch(day, ttl).await;
        assert!(!cached);
        assert_eq!(harness.aggregations(), 2);
        assert_eq!(harness.cache.stats().expired_count, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_forces_fetch() {
        let harness = Harness::new(Duration::ZERO);
        let day = date("2024-05-01");

        harness.cache.get_or_fetch(day, None).await;
        let (_, cached) = harness.cache.get_or_fetch(day, Some(Duration::ZERO)).await;

        assert!(!cached);
        assert_eq!(harness.aggregations(), 2);
        assert_eq!(harness.cache.stats().expired_count, 0);
    }

    #[tokio::test]
    async fn test_short_ttl_leaves_entry_for_other_callers() {
        let harness = Harness::new(Duration::from_millis(50));
        let day = date("2024-05-01");
        let (stored, _) = harness.cache.get_or_fetch(day, None).await;

        let ((_, forced_cached), (default_result, default_cached)) = tokio::join!(
            harness.cache.get_or_fetch(day, Some(Duration::ZERO)),
            harness.cache.get_or_fetch(day, None)
        );

        assert!(!forced_cached);
        assert!(default_cached);
        assert_eq!(default_result, stored);
        assert_eq!(harness.cache.stats().expired_count, 0);
    }

    #[tokio::test]
    async fn test_abandoned_miss_does_not_hold_pool_slots() {
        let harness = Harness::new(Duration::from_millis(200));
        let first = date("2024-05-01");
        let second = date("2024-05-02");

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), harness.cache.get_or_fetch(first, None)).await;
        assert!(abandoned.is_err());

        let other =
            tokio::time::timeout(Duration::from_secs(3), harness.cache.get_or_fetch(second, None)).await;
        assert!(other.is_ok());

        // The abandoned fetch still ran to completion and was stored
        let (_, cached) = harness.cache.get_or_fetch(first, None).await;
        assert!(cached);
        assert_eq!(harness.aggregations(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_range_does_not_hold_pool_slots() {
        let harness = Harness::new(Duration::from_millis(200));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            harness.cache.get_range(date("2024-05-01"), date("2024-05-03"), None),
        )
        .await;
        assert!(abandoned.is_err());

        let other = tokio::time::timeout(
            Duration::from_secs(3),
            harness.cache.get_range(date("2024-06-01"), date("2024-06-03"), None),
        )
        .await;
        let (range, _) = other.unwrap().unwrap();
        assert_eq!(range.len(), 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let (_, from_cache) = harness
            .cache
            .get_range(date("2024-05-01"), date("2024-05-03"), None)
            .await
            .unwrap();
        assert_eq!(from_cache, 3);
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let harness = Harness::new(Duration::ZERO);
        let day = date("2024-05-01");

        harness.cache.get_or_fetch(day, None).await;
        assert_eq!(harness.cache.clear(), 1);
        assert!(harness.cache.is_empty());

        let (_, cached) = harness.cache.get_or_fetch(day, None).await;
        assert!(!cached);
        assert_eq!(harness.aggregations(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_single_date() {
        let harness = Harness::new(Duration::ZERO);
        let first = date("2024-05-01");
        let second = date("2024-05-02");

        harness.cache.get_or_fetch(first, None).await;
        harness.cache.get_or_fetch(second, None).await;

        assert!(harness.cache.invalidate(first));
        assert!(!harness.cache.invalidate(first));
        assert!(!harness.cache.get_or_fetch(first, None).await.1);
        assert!(harness.cache.get_or_fetch(second, None).await.1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let harness = Harness::new(Duration::from_millis(50));
        let day = date("2024-05-01");

        let ((a, a_cached), (b, b_cached)) = tokio::join!(
            harness.cache.get_or_fetch(day, None),
            harness.cache.get_or_fetch(day, None)
        );

        assert!(!a_cached);
        assert!(!b_cached);
        assert_eq!(a, b);
        assert_eq!(harness.aggregations(), 1);

        let stats = harness.cache.stats();
        assert_eq!(stats.coalesced_count, 1);
        assert_eq!(stats.in_flight_count, 0);
        assert_eq!(stats.items_count, 1);
    }

    #[tokio::test]
    async fn test_clear_during_fetch_is_not_stored() {
        let harness = Harness::new(Duration::from_millis(50));
        let day = date("2024-05-01");

        let fetch = harness.cache.get_or_fetch(day, None);
        let clear = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            harness.cache.clear();
        };
        let ((_, cached), ()) = tokio::join!(fetch, clear);

        assert!(!cached);
        assert!(harness.cache.is_empty());
        assert!(!harness.cache.get_or_fetch(day, None).await.1);
        assert_eq!(harness.aggregations(), 2);
    }

    #[tokio::test]
    async fn test_range_reuses_cached_dates() {
        let harness = Harness::new(Duration::ZERO);
        let cached_day = date("2024-05-02");
        let (cached_result, _) = harness.cache.get_or_fetch(cached_day, None).await;

        let (range, from_cache) = harness
            .cache
            .get_range(date("2024-05-01"), date("2024-05-03"), None)
            .await
            .unwrap();

        assert_eq!(from_cache, 1);
        assert_eq!(range.len(), 3);
        assert_eq!(range.get(cached_day), Some(&cached_result));
        assert_eq!(harness.aggregations(), 3);
        assert_eq!(harness.cache.len(), 3);

        let (_, from_cache) = harness
            .cache
            .get_range(date("2024-05-01"), date("2024-05-03"), None)
            .await
            .unwrap();
        assert_eq!(from_cache, 3);
        assert_eq!(harness.aggregations(), 3);
    }

    #[tokio::test]
    async fn test_range_joins_in_flight_date() {
        let harness = Harness::new(Duration::from_millis(50));
        let first = date("2024-05-01");
        let second = date("2024-05-02");

        let ((single, _), range) = tokio::join!(
            harness.cache.get_or_fetch(first, None),
            harness.cache.get_range(first, second, None)
        );
        let (range, from_cache) = range.unwrap();

        assert_eq!(from_cache, 0);
        assert_eq!(range.get(first), Some(&single));
        assert_eq!(harness.aggregations(), 2);
        assert_eq!(harness.cache.stats().coalesced_count, 1);
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected_before_fetching() {
        let harness = Harness::new(Duration::ZERO);

        let result = harness
            .cache
            .get_range(date("2024-05-03"), date("2024-05-01"), None)
            .await;

        assert!(matches!(result, Err(AvailabilityError::InvalidRange(_))));
        assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let harness = Harness::new(Duration::ZERO);
        harness.cache.get_or_fetch(date("2024-05-01"), None).await;
        harness.clock.advance(Duration::from_secs(200));
        harness.cache.get_or_fetch(date("2024-05-02"), None).await;

        harness.clock.advance(Duration::from_secs(100));
        assert_eq!(harness.cache.purge_expired(), 1);
        assert_eq!(harness.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_expired_entries() {
        let config = CacheConfig {
            default_ttl_seconds: 60,
            cleanup_interval_seconds: 1,
        };
        let harness = Harness::with_config(config, Duration::ZERO);
        harness.cache.get_or_fetch(date("2024-05-01"), None).await;
        harness.clock.advance(Duration::from_secs(61));

        let handle = harness.cache.spawn_cleanup_task();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(harness.cache.is_empty());
        handle.abort();
    }
}
