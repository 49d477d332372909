// Service configuration: upstream protocol, worker pools and cache

use crate::category::CampCategory;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub organization_code: String,
    pub part_code: String,
    pub day_count: u32,
    pub app_kind: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub request_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.gunpouc.or.kr/rest/camp/search".to_string(),
            organization_code: "GUNPO04".to_string(),
            part_code: "02".to_string(),
            day_count: 1,
            app_kind: "1001".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"
                .to_string(),
            accept_language: "ko-KR,ko;q=0.8,en-US;q=0.5,en;q=0.3".to_string(),
            request_timeout_ms: 4000,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// Concurrency ceilings and backstop timeouts for the two aggregators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub date_concurrency: usize,
    pub date_backstop_ms: u64,
    pub range_concurrency: usize,
    pub range_backstop_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            date_concurrency: 4,
            date_backstop_ms: 5000,
            range_concurrency: 8,
            range_backstop_ms: 10000,
        }
    }
}

impl PoolConfig {
    pub fn date_backstop(&self) -> Duration {
        Duration::from_millis(self.date_backstop_ms)
    }

    pub fn range_backstop(&self) -> Duration {
        Duration::from_millis(self.range_backstop_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub upstream: UpstreamConfig,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
}

impl ServiceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let request_timeout_ms = self.upstream.request_timeout_ms;
        let pool = &self.pool;

        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if pool.date_concurrency < CampCategory::ALL.len() {
            return Err(ConfigError::Invalid(format!(
                "date_concurrency ({}) must cover all {} categories",
                pool.date_concurrency,
                CampCategory::ALL.len()
            )));
        }
        if pool.range_concurrency <= pool.date_concurrency {
            return Err(ConfigError::Invalid(format!(
                "range_concurrency ({}) must exceed date_concurrency ({})",
                pool.range_concurrency, pool.date_concurrency
            )));
        }
        if pool.date_backstop_ms <= request_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "date_backstop_ms ({}) must exceed request_timeout_ms ({})",
                pool.date_backstop_ms, request_timeout_ms
            )));
        }
        if pool.range_backstop_ms < pool.date_backstop_ms {
            return Err(ConfigError::Invalid(format!(
                "range_backstop_ms ({}) must be at least date_backstop_ms ({})",
                pool.range_backstop_ms, pool.date_backstop_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.pool.date_backstop() > config.upstream.request_timeout());
        assert!(config.pool.range_backstop() > config.pool.date_backstop());
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServiceConfig::from_json_str(
            r#"{ "cache": { "default_ttl_seconds": 30 }, "pool": { "range_concurrency": 16 } }"#,
        )
        .unwrap();

        assert_eq!(config.cache.default_ttl_seconds, 30);
        assert_eq!(config.cache.cleanup_interval_seconds, 60);
        assert_eq!(config.pool.range_concurrency, 16);
        assert_eq!(config.pool.date_concurrency, 4);
        assert_eq!(config.upstream.organization_code, "GUNPO04");
    }

    #[test]
    fn test_backstop_must_exceed_request_timeout() {
        let mut config = ServiceConfig::default();
        config.pool.date_backstop_ms = config.upstream.request_timeout_ms;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_date_ceiling_must_cover_categories() {
        let mut config = ServiceConfig::default();
        config.pool.date_concurrency = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_range_ceiling_must_be_higher() {
        let result = ServiceConfig::from_json_str(r#"{ "pool": { "range_concurrency": 4 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = ServiceConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
