use anyhow::{anyhow, Context};
use std::time::Duration;

use enrichsync_connect::DEFAULT_TIMEOUT_SECS;
use enrichsync_core::constants::{DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS};
use enrichsync_core::{EngineConfig, EntityKind, ListQuery};

pub struct Config {
    pub api_url: String,
    pub api_token: String,
    pub entity_kind: EntityKind,
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub poll_interval: Duration,
    pub poll_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = var("ENRICHSYNC_API_URL").unwrap_or_else(|| "http://localhost:8080".into());
        let api_token = var("ENRICHSYNC_API_TOKEN")
            .ok_or_else(|| anyhow!("ENRICHSYNC_API_TOKEN must be set"))?;
        let entity_kind = match var("ENRICHSYNC_ENTITY_KIND") {
            Some(kind) => kind
                .parse::<EntityKind>()
                .map_err(|e| anyhow!("Invalid ENRICHSYNC_ENTITY_KIND: {}", e))?,
            None => EntityKind::Contact,
        };

        let page = parse_number(&var, "ENRICHSYNC_PAGE")?.unwrap_or(1);
        let page_size = parse_number(&var, "ENRICHSYNC_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        let poll_interval_ms = parse_number(&var, "ENRICHSYNC_POLL_INTERVAL_MS")?
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let poll_timeout_ms: Option<u64> = parse_number(&var, "ENRICHSYNC_POLL_TIMEOUT_MS")?;
        let request_timeout_ms = parse_number(&var, "ENRICHSYNC_REQUEST_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS * 1000);

        Ok(Self {
            api_url,
            api_token,
            entity_kind,
            page,
            page_size,
            search: var("ENRICHSYNC_SEARCH"),
            poll_interval: Duration::from_millis(poll_interval_ms),
            poll_timeout: poll_timeout_ms.map(Duration::from_millis),
            request_timeout: Duration::from_millis(request_timeout_ms),
            log_format: var("ENRICHSYNC_LOG_FORMAT").unwrap_or_else(|| "text".into()),
        })
    }

    /// Engine settings; the poll budget defaults to ten intervals.
    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::default().with_poll_interval(self.poll_interval);
        match self.poll_timeout {
            Some(timeout) => config.with_max_poll_duration(timeout),
            None => config,
        }
    }

    pub fn initial_query(&self) -> ListQuery {
        let query = ListQuery::new(self.page, self.page_size);
        match &self.search {
            Some(search) => query.with_search(search.clone()),
            None => query,
        }
    }
}

fn parse_number<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("Invalid {}: '{}'", key, value))
        })
        .transpose()
}
