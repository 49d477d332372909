// Campsite availability: concurrent scraping, aggregation and a TTL cache

pub mod aggregator;
pub mod availability;
pub mod cache;
pub mod category;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod pool;
pub mod service;

// Re-export key types for convenience
pub use aggregator::{DateAggregator, RangeAggregator};
pub use availability::{AvailabilityCount, DateRange, DateResult, RangeResult};
pub use cache::{AvailabilityCache, CacheStatsReport, Clock, ManualClock, SystemClock};
pub use category::CampCategory;
pub use config::{CacheConfig, PoolConfig, ServiceConfig, UpstreamConfig};
pub use error::{AvailabilityError, ConfigError};
pub use fetcher::{FetchError, HttpSlotFetcher, SlotFetcher};
pub use parser::count_available_slots;
pub use pool::WorkerPool;
pub use service::{CampAvailabilityService, DateResponse, RangeResponse};
