use crate::config::SensorConfig;
use crate::error::Error;
use crate::sensor::{SensorReading, SensorSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// States Home Assistant uses when no plate is present
const EMPTY_STATES: [&str; 3] = ["none", "unknown", "unavailable"];

#[derive(Debug, Deserialize)]
struct EntityState {
    state: Option<String>,
    last_changed: Option<DateTime<Utc>>,
}

/// Polls a Home Assistant entity through the REST API
#[derive(Clone)]
pub struct HomeAssistantSensor {
    client: Client,
    url: String,
    token: String,
}

impl HomeAssistantSensor {
    pub fn new(config: &SensorConfig) -> Result<Self> {
        if config.entity_id.is_empty() {
            return Err(Error::Config("sensor.entity_id is required".to_string()).into());
        }
        let base = url::Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid sensor.base_url: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build sensor HTTP client")?;

        Ok(Self {
            client,
            url: format!(
                "{}/states/{}",
                base.as_str().trim_end_matches('/'),
                config.entity_id
            ),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl SensorSource for HomeAssistantSensor {
    async fn latest(&self) -> Result<Option<SensorReading>> {
        let resp = self
            .client
            .get(&self.url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        if !resp.status().is_success() {
            return Err(Error::Sensor(format!("GET {} → {}", self.url, resp.status())).into());
        }

        let entity: EntityState = resp.json().await.context("deserialising entity state")?;
        let Some(state) = entity.state.map(|s| s.trim().to_string()) else {
            return Ok(None);
        };

        if state.is_empty() || EMPTY_STATES.iter().any(|e| state.eq_ignore_ascii_case(e)) {
            return Ok(None);
        }

        Ok(Some(SensorReading {
            plate: state,
            last_changed: entity.last_changed,
        }))
    }
}
