// Availability data model: per-cell counts, per-date records and date ranges

use crate::category::CampCategory;
use crate::error::AvailabilityError;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Free sites for one (date, category) cell, or the error sentinel.
// Serialized as a bare integer where -1 marks a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum AvailabilityCount {
    Available(u32),
    Error,
}

impl AvailabilityCount {
    pub const ERROR_SENTINEL: i64 = -1;

    pub fn is_error(&self) -> bool {
        matches!(self, AvailabilityCount::Error)
    }

    pub fn count(&self) -> Option<u32> {
        match self {
            AvailabilityCount::Available(n) => Some(*n),
            AvailabilityCount::Error => None,
        }
    }
}

impl From<usize> for AvailabilityCount {
    fn from(n: usize) -> Self {
        AvailabilityCount::Available(u32::try_from(n).unwrap_or(u32::MAX))
    }
}

impl From<i64> for AvailabilityCount {
    fn from(value: i64) -> Self {
        match u32::try_from(value) {
            Ok(n) => AvailabilityCount::Available(n),
            Err(_) => AvailabilityCount::Error,
        }
    }
}

impl From<AvailabilityCount> for i64 {
    fn from(value: AvailabilityCount) -> Self {
        match value {
            AvailabilityCount::Available(n) => i64::from(n),
            AvailabilityCount::Error => AvailabilityCount::ERROR_SENTINEL,
        }
    }
}

impl fmt::Display for AvailabilityCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityCount::Available(n) => write!(f, "{}", n),
            AvailabilityCount::Error => f.write_str("error"),
        }
    }
}

// One date's availability across every category.
// Always holds exactly one entry per category once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateResult {
    pub date: NaiveDate,
    pub data: BTreeMap<CampCategory, AvailabilityCount>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl DateResult {
    // Categories missing from `counts` are recorded as failed
    pub fn from_counts(
        date: NaiveDate,
        counts: impl IntoIterator<Item = (CampCategory, AvailabilityCount)>,
        fetched_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut data: BTreeMap<CampCategory, AvailabilityCount> = CampCategory::ALL
            .into_iter()
            .map(|category| (category, AvailabilityCount::Error))
            .collect();
        for (category, count) in counts {
            data.insert(category, count);
        }

        Self {
            date,
            data,
            fetched_at,
        }
    }

    // Every category marked failed
    pub fn failed(date: NaiveDate) -> Self {
        Self::from_counts(date, Vec::<(CampCategory, AvailabilityCount)>::new(), None)
    }

    pub fn get(&self, category: CampCategory) -> AvailabilityCount {
        self.data
            .get(&category)
            .copied()
            .unwrap_or(AvailabilityCount::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.data.values().any(AvailabilityCount::is_error)
    }

    pub fn all_failed(&self) -> bool {
        self.data.values().all(AvailabilityCount::is_error)
    }

    // Sum of successful counts; failed cells contribute nothing
    pub fn total_available(&self) -> u32 {
        self.data.values().filter_map(AvailabilityCount::count).sum()
    }
}

// Date-ordered results covering every date of the requested range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub data: BTreeMap<NaiveDate, DateResult>,
}

impl RangeResult {
    pub fn get(&self, date: NaiveDate) -> Option<&DateResult> {
        self.data.get(&date)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.data.keys().copied()
    }
}

// Inclusive, validated calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AvailabilityError> {
        if start > end {
            return Err(AvailabilityError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, AvailabilityError> {
        let start_date = parse_date(start)
            .map_err(|_| AvailabilityError::InvalidRange(format!("malformed start date '{}'", start)))?;
        let end_date = parse_date(end)
            .map_err(|_| AvailabilityError::InvalidRange(format!("malformed end date '{}'", end)))?;
        Self::new(start_date, end_date)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates = Vec::with_capacity(self.num_days());
        let mut current = self.start;
        while current <= self.end {
            dates.push(current);
            match current.checked_add_days(Days::new(1)) {
                Some(next) => current = next,
                None => break,
            }
        }
        dates
    }
}

pub fn parse_date(input: &str) -> Result<NaiveDate, AvailabilityError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
        .map_err(|_| AvailabilityError::InvalidDate(input.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
