// Fan-out of upstream fetches: every category of one date, or the date x category cross product
// Results are assembled by key only after every cell has a count or the sentinel

use crate::availability::{AvailabilityCount, DateRange, DateResult, RangeResult};
use crate::category::CampCategory;
use crate::error::AvailabilityError;
use crate::fetcher::SlotFetcher;
use crate::pool::WorkerPool;
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

// Runs one cell through the pool, mapping a backstop expiry to the sentinel
async fn fetch_cell(
    fetcher: &dyn SlotFetcher,
    pool: &WorkerPool,
    date: NaiveDate,
    category: CampCategory,
) -> AvailabilityCount {
    match pool.run(fetcher.fetch(date, category)).await {
        Some(count) => count,
        None => {
            warn!(
                %date,
                %category,
                backstop_ms = pool.backstop().as_millis() as u64,
                "backstop timeout elapsed, abandoning fetch"
            );
            AvailabilityCount::Error
        }
    }
}

pub struct DateAggregator {
    fetcher: Arc<dyn SlotFetcher>,
    pool: WorkerPool,
}

impl DateAggregator {
    pub fn new(fetcher: Arc<dyn SlotFetcher>, pool: WorkerPool) -> Self {
        Self { fetcher, pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn aggregate(&self, date: NaiveDate) -> DateResult {
        let started = Instant::now();
        let fetcher = self.fetcher.as_ref();
        let pool = &self.pool;

        let counts = join_all(CampCategory::ALL.into_iter().map(|category| async move {
            (category, fetch_cell(fetcher, pool, date, category).await)
        }))
        .await;

        let result = DateResult::from_counts(date, counts, Some(Utc::now()));
        info!(
            %date,
            failed = result.data.values().filter(|c| c.is_error()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "date processed"
        );
        result
    }
}

pub struct RangeAggregator {
    fetcher: Arc<dyn SlotFetcher>,
    pool: WorkerPool,
}

impl RangeAggregator {
    pub fn new(fetcher: Arc<dyn SlotFetcher>, pool: WorkerPool) -> Self {
        Self { fetcher, pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    // Fails before any request is issued when the range is inverted
    pub async fn aggregate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeResult, AvailabilityError> {
        let range = DateRange::new(start, end)?;
        let started = Instant::now();
        let data = self.aggregate_dates(&range.dates()).await;

        info!(
            %start,
            %end,
            dates = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "range processed"
        );
        Ok(RangeResult { start, end, data })
    }

    // Cross product of `dates` and every category under the range ceiling
    pub async fn aggregate_dates(&self, dates: &[NaiveDate]) -> BTreeMap<NaiveDate, DateResult> {
        let fetcher = self.fetcher.as_ref();
        let pool = &self.pool;

        let cells = dates.iter().flat_map(move |&date| {
            CampCategory::ALL.into_iter().map(move |category| async move {
                (date, category, fetch_cell(fetcher, pool, date, category).await)
            })
        });
        let outcomes = join_all(cells).await;

        let mut per_date: BTreeMap<NaiveDate, Vec<(CampCategory, AvailabilityCount)>> = dates
            .iter()
            .map(|&date| (date, Vec::with_capacity(CampCategory::ALL.len())))
            .collect();
        for (date, category, count) in outcomes {
            per_date.entry(date).or_default().push((category, count));
        }

        let fetched_at = Utc::now();
        per_date
            .into_iter()
            .map(|(date, counts)| (date, DateResult::from_counts(date, counts, Some(fetched_at))))
            .collect()
    }
}
