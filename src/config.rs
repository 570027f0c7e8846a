//! Application configuration.
//!
//! Plain structs populated from environment variables with sensible
//! defaults; each subsystem owns its own config type and this module only
//! composes them.

use std::str::FromStr;

use crate::purchase::{OrchestratorConfig, ReconcilerConfig};
use crate::routing::RouterConfig;
use crate::vendors::clubkonnect::ClubkonnectConfig;
use crate::vendors::epins::EpinsConfig;
use crate::vendors::shago::ShagoConfig;
use crate::vendors::types::VendorName;
use crate::vendors::vtpass::VtpassConfig;

#[derive(Debug, Clone)]
pub struct VendorsConfig {
    pub enabled: Vec<VendorName>,
    pub vtpass: VtpassConfig,
    pub clubkonnect: ClubkonnectConfig,
    pub shago: ShagoConfig,
    pub epins: EpinsConfig,
}

impl Default for VendorsConfig {
    fn default() -> Self {
        Self {
            enabled: VendorName::all().to_vec(),
            vtpass: VtpassConfig::default(),
            clubkonnect: ClubkonnectConfig::default(),
            shago: ShagoConfig::default(),
            epins: EpinsConfig::default(),
        }
    }
}

impl VendorsConfig {
    pub fn from_env() -> Self {
        let enabled_raw = std::env::var("ENABLED_VENDORS")
            .unwrap_or_else(|_| "vtpass,clubkonnect,shago,epins".to_string());
        let mut enabled = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            if let Ok(vendor) = VendorName::from_str(value) {
                if !enabled.contains(&vendor) {
                    enabled.push(vendor);
                }
            } else {
                tracing::warn!(vendor = value, "unknown vendor in ENABLED_VENDORS, ignoring");
            }
        }

        Self {
            enabled,
            vtpass: VtpassConfig::from_env(),
            clubkonnect: ClubkonnectConfig::from_env(),
            shago: ShagoConfig::from_env(),
            epins: EpinsConfig::from_env(),
        }
    }
}

/// Top-level configuration for wiring the core at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub vendors: VendorsConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
    pub reconciler: ReconcilerConfig,
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            vendors: VendorsConfig::from_env(),
            router: RouterConfig::from_env(),
            orchestrator: OrchestratorConfig::from_env(),
            reconciler: ReconcilerConfig::from_env(),
            database_url: std::env::var("DATABASE_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_all_vendors() {
        let config = VendorsConfig::default();
        assert_eq!(config.enabled.len(), VendorName::all().len());
    }
}
