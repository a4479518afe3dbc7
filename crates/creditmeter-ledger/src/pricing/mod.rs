//! Pricing module
//!
//! Provides credit cost calculation:
//! - FeatureCatalog: static base costs and plan eligibility
//! - CostCalculator: multiplicative modifiers over the base cost

pub mod calculator;
pub mod catalog;

pub use calculator::{AppliedModifier, CostCalculator, CostContext, CostQuote, Modifier};
pub use catalog::{
    Complexity, Eligibility, FeatureCatalog, FeatureCost, FeatureSpec, PlanLimits,
    CATALOG_VERSION,
};
