// Composition root and query surface consumed by the presentation layer

use crate::aggregator::{DateAggregator, RangeAggregator};
use crate::availability::{parse_date, DateRange, DateResult, RangeResult};
use crate::cache::{AvailabilityCache, CacheStatsReport, Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::error::{AvailabilityError, ConfigError};
use crate::fetcher::{HttpSlotFetcher, SlotFetcher};
use crate::pool::WorkerPool;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct DateResponse {
    #[serde(flatten)]
    pub result: DateResult,
    pub cached: bool,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeResponse {
    #[serde(flatten)]
    pub result: RangeResult,
    pub cached_dates: usize,
    pub processing_time_ms: u64,
}

pub struct CampAvailabilityService {
    config: ServiceConfig,
    date_aggregator: Arc<DateAggregator>,
    range_aggregator: Arc<RangeAggregator>,
    cache: AvailabilityCache,
}

impl CampAvailabilityService {
    pub fn new(config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let fetcher = HttpSlotFetcher::new(config.upstream.clone())?;
        Self::with_fetcher(config, Arc::new(fetcher), Arc::new(SystemClock))
    }

    pub fn with_fetcher(
        config: ServiceConfig,
        fetcher: Arc<dyn SlotFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let date_pool = WorkerPool::new(config.pool.date_concurrency, config.pool.date_backstop());
        let range_pool = WorkerPool::new(config.pool.range_concurrency, config.pool.range_backstop());
        let date_aggregator = Arc::new(DateAggregator::new(Arc::clone(&fetcher), date_pool));
        let range_aggregator = Arc::new(RangeAggregator::new(fetcher, range_pool));
        let cache = AvailabilityCache::new(
            config.cache.clone(),
            clock,
            Arc::clone(&date_aggregator),
            Arc::clone(&range_aggregator),
        );

        info!(
            date_concurrency = config.pool.date_concurrency,
            range_concurrency = config.pool.range_concurrency,
            ttl_seconds = config.cache.default_ttl_seconds,
            "camp availability service ready"
        );

        Ok(Self {
            config,
            date_aggregator,
            range_aggregator,
            cache,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // Always goes upstream and leaves the cache untouched
    pub async fn get_single_date(&self, date: NaiveDate) -> DateResponse {
        let started = Instant::now();
        let result = self.date_aggregator.aggregate(date).await;
        DateResponse {
            result,
            cached: false,
            processing_time_ms: elapsed_ms(started),
        }
    }

    pub async fn get_single_date_cached(&self, date: NaiveDate, ttl: Option<Duration>) -> DateResponse {
        let started = Instant::now();
        let (result, cached) = self.cache.get_or_fetch(date, ttl).await;
        DateResponse {
            result,
            cached,
            processing_time_ms: elapsed_ms(started),
        }
    }

    pub async fn get_single_date_str(&self, date: &str) -> Result<DateResponse, AvailabilityError> {
        let date = parse_date(date)?;
        Ok(self.get_single_date_cached(date, None).await)
    }

    // Composed from per-date cache entries
    pub async fn get_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeResponse, AvailabilityError> {
        let started = Instant::now();
        let (result, cached_dates) = self.cache.get_range(start, end, None).await?;
        Ok(RangeResponse {
            result,
            cached_dates,
            processing_time_ms: elapsed_ms(started),
        })
    }

    pub async fn get_date_range_str(&self, start: &str, end: &str) -> Result<RangeResponse, AvailabilityError> {
        let range = DateRange::parse(start, end)?;
        self.get_date_range(range.start(), range.end()).await
    }

    // Bypasses the cache entirely
    pub async fn fetch_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeResponse, AvailabilityError> {
        let started = Instant::now();
        let result = self.range_aggregator.aggregate(start, end).await?;
        Ok(RangeResponse {
            result,
            cached_dates: 0,
            processing_time_ms: elapsed_ms(started),
        })
    }

    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "cache cleared");
        removed
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        self.cache.stats()
    }

    pub fn spawn_cache_cleanup(&self) -> JoinHandle<()> {
        self.cache.spawn_cleanup_task()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
