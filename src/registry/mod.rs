use crate::config::{RegistryConfig, RegistryProvider};
use crate::db::models::VehicleAttributes;
use crate::plate::NormalizedPlate;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod dvla;

pub use dvla::DvlaRegistryClient;

/// Answer from a vehicle registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryLookup {
    Found(VehicleAttributes),
    NotFound,
    TransientFailure(String),
}

/// Vehicle data lookup keyed by normalized plate.
///
/// Implementations never retry; callers decide how often to ask.
#[async_trait]
pub trait VehicleRegistry: Send + Sync {
    async fn lookup(&self, plate: &NormalizedPlate) -> RegistryLookup;
}

/// Registry for regions without a lookup API
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRegistry;

#[async_trait]
impl VehicleRegistry for DisabledRegistry {
    async fn lookup(&self, _plate: &NormalizedPlate) -> RegistryLookup {
        RegistryLookup::NotFound
    }
}

/// Build the registry selected in the configuration
pub fn from_config(config: &RegistryConfig) -> Result<Arc<dyn VehicleRegistry>> {
    match config.provider {
        RegistryProvider::Dvla => {
            if config.api_key.is_empty() {
                log::warn!("DVLA registry selected without an api_key; lookups will be refused");
            }
            Ok(Arc::new(DvlaRegistryClient::new(config)?))
        }
        RegistryProvider::Disabled => {
            log::info!("Vehicle registry disabled");
            Ok(Arc::new(DisabledRegistry))
        }
    }
}
