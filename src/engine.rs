//! Client for the managed engine's admin API.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::Error;

/// Stat suffix counting a listener's open downstream connections.
const ACTIVE_CONNECTIONS_SUFFIX: &str = ".downstream_cx_active";

/// Talks to the engine's admin listener.
#[derive(Debug, Clone)]
pub struct EngineAdmin {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    stats: Vec<Stat>,
}

#[derive(Debug, Deserialize)]
struct Stat {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: Option<u64>,
}

impl EngineAdmin {
    /// Create a client for the admin API at `base_url` (e.g. "http://127.0.0.1:19000").
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Stop inbound listeners from accepting, letting open connections finish.
    pub async fn drain_inbound(&self) -> Result<(), Error> {
        self.post("/drain_listeners?inboundonly&graceful").await
    }

    /// Ask the engine to exit now.
    pub async fn quit(&self) -> Result<(), Error> {
        self.post("/quitquitquit").await
    }

    /// Total open downstream connections across all listeners except the
    /// admin listener.
    pub async fn active_connections(&self) -> Result<u64, Error> {
        let url = format!(
            "{}/stats?format=json&filter=downstream_cx_active",
            self.base_url
        );
        let response = self.client.get(&url).send().await?;
        ensure_success(&url, response.status())?;
        let stats: StatsResponse = response.json().await?;

        Ok(stats
            .stats
            .iter()
            .filter(|stat| counts_as_active(&stat.name))
            .filter_map(|stat| stat.value)
            .sum())
    }

    async fn post(&self, path: &str) -> Result<(), Error> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).send().await?;
        ensure_success(&url, response.status())
    }
}

fn counts_as_active(name: &str) -> bool {
    name.starts_with("listener.")
        && name.ends_with(ACTIVE_CONNECTIONS_SUFFIX)
        && !name.starts_with("listener.admin.")
}

/// Turn a non-2xx status into an [`Error::Upstream`] naming `url`.
pub(crate) fn ensure_success(url: &str, status: StatusCode) -> Result<(), Error> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Upstream {
            url: url.to_string(),
            reason: format!("unexpected status {}", status),
        })
    }
}
