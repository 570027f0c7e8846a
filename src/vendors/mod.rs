//! Upstream vendor adapters.
//!
//! Each supplier hides its own auth scheme, request shape and status
//! vocabulary behind [`VendorAdapter`]; the rest of the core only ever sees
//! canonical types.

pub mod clubkonnect;
pub mod epins;
pub mod error;
pub mod http;
pub mod shago;
pub mod types;
pub mod vtpass;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::VendorsConfig;
use crate::vendors::error::{VendorError, VendorResult};
use crate::vendors::types::{
    CustomerInfo, Network, Plan, ServiceKind, VendorBalance, VendorName, VendorOrder,
    VendorOutcome, VerifyRequest,
};

/// Capability set implemented by every upstream supplier.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn name(&self) -> VendorName;

    /// Services this vendor can fulfil.
    fn services(&self) -> &'static [ServiceKind];

    /// Acquire or refresh credentials. A no-op for static-key vendors.
    async fn authenticate(&self) -> VendorResult<()>;

    async fn is_authenticated(&self) -> bool;

    /// Float balance; doubles as the health probe.
    async fn balance(&self) -> VendorResult<VendorBalance>;

    async fn plans(&self, service: ServiceKind, network: Option<Network>)
        -> VendorResult<Vec<Plan>>;

    /// Whether [`verify_customer`](Self::verify_customer) is available.
    /// Callers must check before calling.
    fn supports_verification(&self) -> bool {
        false
    }

    async fn verify_customer(&self, _request: &VerifyRequest) -> VendorResult<CustomerInfo> {
        Err(VendorError::VerificationUnsupported {
            vendor: self.name().to_string(),
        })
    }

    async fn purchase(&self, order: &VendorOrder) -> VendorResult<VendorOutcome>;

    async fn query_status(&self, reference: &str) -> VendorResult<VendorOutcome>;

    /// Whether this vendor is known to sometimes complete an order after its
    /// HTTP response has timed out. When true, the orchestrator leaves the
    /// entry pending for reconciliation instead of refunding on timeout.
    fn pending_on_timeout(&self) -> bool {
        false
    }
}

/// Holds the configured adapters, keyed by name.
pub struct VendorRegistry {
    adapters: HashMap<VendorName, Arc<dyn VendorAdapter>>,
}

impl VendorRegistry {
    /// Build adapters for every enabled vendor. A vendor whose adapter fails
    /// to initialise (bad or missing credentials) is skipped with a warning —
    /// the router simply never routes to it — but an empty registry is a hard
    /// error.
    pub fn from_config(config: &VendorsConfig) -> VendorResult<Self> {
        let mut adapters: HashMap<VendorName, Arc<dyn VendorAdapter>> = HashMap::new();
        for vendor in &config.enabled {
            let built: VendorResult<Arc<dyn VendorAdapter>> = match vendor {
                VendorName::Vtpass => vtpass::VtpassAdapter::new(config.vtpass.clone())
                    .map(|a| Arc::new(a) as Arc<dyn VendorAdapter>),
                VendorName::Clubkonnect => {
                    clubkonnect::ClubkonnectAdapter::new(config.clubkonnect.clone())
                        .map(|a| Arc::new(a) as Arc<dyn VendorAdapter>)
                }
                VendorName::Shago => shago::ShagoAdapter::new(config.shago.clone())
                    .map(|a| Arc::new(a) as Arc<dyn VendorAdapter>),
                VendorName::Epins => epins::EpinsAdapter::new(config.epins.clone())
                    .map(|a| Arc::new(a) as Arc<dyn VendorAdapter>),
            };
            match built {
                Ok(adapter) => {
                    adapters.insert(*vendor, adapter);
                }
                Err(err) => {
                    tracing::warn!(vendor = %vendor, error = %err, "vendor adapter failed to initialise, skipping");
                }
            }
        }
        if adapters.is_empty() {
            return Err(VendorError::Validation {
                message: "no vendor adapter could be initialised".to_string(),
                field: Some("vendors".to_string()),
            });
        }
        Ok(Self { adapters })
    }

    /// Registry over caller-constructed adapters; used by tests with mocks.
    pub fn from_adapters(list: Vec<Arc<dyn VendorAdapter>>) -> Self {
        Self {
            adapters: list.into_iter().map(|a| (a.name(), a)).collect(),
        }
    }

    pub fn get(&self, vendor: VendorName) -> Option<Arc<dyn VendorAdapter>> {
        self.adapters.get(&vendor).cloned()
    }

    pub fn names(&self) -> Vec<VendorName> {
        self.adapters.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VendorName, &Arc<dyn VendorAdapter>)> {
        self.adapters.iter()
    }
}
