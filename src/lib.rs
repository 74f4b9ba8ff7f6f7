pub mod api;
pub mod config;
pub mod errors;
pub mod factor;
pub mod feeds;
pub mod models;
pub mod scan;
pub mod sink;
pub mod types;

pub use config::{AppConfig, PricingParams, ScanConfig};
pub use errors::{EngineError, EngineResult};
pub use factor::composite::CompositeWeights;
pub use feeds::MarketDataProvider;
pub use models::PricingModel;
pub use types::*;
