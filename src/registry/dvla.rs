//! UK DVLA vehicle enquiry service.

use crate::config::RegistryConfig;
use crate::db::models::{VehicleAttributes, UNKNOWN};
use crate::error::Error;
use crate::plate::NormalizedPlate;
use crate::registry::{RegistryLookup, VehicleRegistry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnquiryRequest<'a> {
    registration_number: &'a str,
}

/// Response body; every field may be missing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnquiryResponse {
    make: Option<String>,
    #[serde(alias = "color")]
    colour: Option<String>,
    fuel_type: Option<String>,
    mot_status: Option<String>,
    tax_status: Option<String>,
    year_of_manufacture: Option<i32>,
    tax_due_date: Option<String>,
    mot_expiry_date: Option<String>,
}

fn text(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn date(value: Option<String>) -> Option<NaiveDate> {
    let value = value?;
    match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!("Ignoring malformed registry date {:?}: {}", value, e);
            None
        }
    }
}

impl From<EnquiryResponse> for VehicleAttributes {
    fn from(response: EnquiryResponse) -> Self {
        Self {
            make: text(response.make),
            color: text(response.colour),
            fuel_type: text(response.fuel_type),
            mot_status: text(response.mot_status),
            tax_status: text(response.tax_status),
            year_of_manufacture: response.year_of_manufacture,
            tax_due_date: date(response.tax_due_date),
            mot_expiry_date: date(response.mot_expiry_date),
        }
    }
}

/// HTTP client for the vehicle enquiry API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct DvlaRegistryClient {
    client: Client,
    url: String,
    api_key: String,
}

impl DvlaRegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build registry HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn enquire(&self, plate: &NormalizedPlate) -> Result<Option<EnquiryResponse>> {
        let resp = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .json(&EnquiryRequest {
                registration_number: plate.as_str(),
            })
            .send()
            .await
            .context("POST vehicle enquiry failed")?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.json().await.context("deserialising vehicle enquiry")?;
                Ok(Some(body))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Registry(format!("vehicle enquiry → {}", status)).into()),
        }
    }
}

#[async_trait]
impl VehicleRegistry for DvlaRegistryClient {
    async fn lookup(&self, plate: &NormalizedPlate) -> RegistryLookup {
        match self.enquire(plate).await {
            Ok(Some(response)) => {
                debug!("[{}] Registry returned {:?}", plate, response);
                RegistryLookup::Found(response.into())
            }
            Ok(None) => RegistryLookup::NotFound,
            Err(e) => RegistryLookup::TransientFailure(format!("{:#}", e)),
        }
    }
}
