// Upstream fetcher: one GET per (date, category), counted with the slot parser
// Failures are logged and folded into the error sentinel; nothing is raised to callers

use crate::availability::{format_date, AvailabilityCount};
use crate::category::CampCategory;
use crate::config::UpstreamConfig;
use crate::error::ConfigError;
use crate::parser::count_available_slots;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(u16),
}

#[async_trait]
pub trait SlotFetcher: Send + Sync + 'static {
    async fn fetch(&self, date: NaiveDate, category: CampCategory) -> AvailabilityCount;
}

// Shares one keep-alive client across all concurrent fetches
pub struct HttpSlotFetcher {
    client: Client,
    config: UpstreamConfig,
}

impl HttpSlotFetcher {
    pub fn new(config: UpstreamConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(&config.accept)
                .map_err(|e| ConfigError::Invalid(format!("accept header: {}", e)))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| ConfigError::Invalid(format!("accept-language header: {}", e)))?,
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client, config })
    }

    pub fn query_params(&self, date: NaiveDate, category: CampCategory) -> Vec<(&'static str, String)> {
        vec![
            ("comcd", self.config.organization_code.clone()),
            ("part_cd", self.config.part_code.clone()),
            ("place_cd", category.code().to_string()),
            ("sdate", format_date(date)),
            ("edate", String::new()),
            ("edate_dsp", String::new()),
            ("day_cnt", self.config.day_count.to_string()),
            ("appkind", self.config.app_kind.clone()),
        ]
    }

    async fn try_fetch(&self, date: NaiveDate, category: CampCategory) -> Result<usize, FetchError> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&self.query_params(date, category))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(count_available_slots(&body))
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.config.request_timeout_ms)
        } else if let Some(status) = error.status() {
            FetchError::UpstreamStatus(status.as_u16())
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl SlotFetcher for HttpSlotFetcher {
    async fn fetch(&self, date: NaiveDate, category: CampCategory) -> AvailabilityCount {
        match self.try_fetch(date, category).await {
            Ok(count) => {
                debug!(%date, %category, count, "fetched availability");
                AvailabilityCount::from(count)
            }
            Err(e) => {
                warn!(%date, %category, error = %e, "availability fetch failed");
                AvailabilityCount::Error
            }
        }
    }
}
