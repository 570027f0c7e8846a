//! Provider routing and vendor health.

pub mod health;
pub mod router;

pub use health::{HealthManager, HealthState, VendorHealth};
pub use router::{default_vendor, ProviderRouter, RouterConfig, RoutingMode, RoutingRule};
