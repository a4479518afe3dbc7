//! Cost calculator
//!
//! Turns a feature and its request context into a whole number of credits:
//!
//! ```text
//! cost = max(1, ceil(base × Π factors))
//! ```
//!
//! Factors are exact decimals, so the product does not depend on the order
//! the modifiers are applied in and `10 × 1.1` stays 11.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::catalog::FeatureCatalog;
use crate::config::PricingSettings;

/// Request properties that adjust the base cost
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostContext {
    /// Priority processing requested
    pub priority: bool,
    /// Payload size in megabytes
    pub payload_mb: Option<Decimal>,
    /// Target framework of generated code
    pub target: Option<String>,
    /// Follow-up iteration on earlier work
    pub is_iteration: bool,
}

impl CostContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self) -> Self {
        self.priority = true;
        self
    }

    pub fn with_payload_mb(mut self, mb: Decimal) -> Self {
        self.payload_mb = Some(mb);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn as_iteration(mut self) -> Self {
        self.is_iteration = true;
        self
    }
}

/// Cost modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Priority,
    LargePayload,
    ComplexTarget,
    Iteration,
}

/// Modifier applied to a quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedModifier {
    pub modifier: Modifier,
    pub factor: Decimal,
}

/// Cost breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    pub feature: String,
    pub base_cost: u64,
    pub modifiers: Vec<AppliedModifier>,
    /// Product of all applied factors
    pub multiplier: Decimal,
    /// Credits to debit
    pub final_cost: u64,
}

/// Pure cost calculator over the feature catalog
#[derive(Debug, Clone)]
pub struct CostCalculator {
    catalog: Arc<FeatureCatalog>,
    settings: PricingSettings,
}

impl CostCalculator {
    pub fn new(catalog: Arc<FeatureCatalog>, settings: PricingSettings) -> Self {
        Self { catalog, settings }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &PricingSettings {
        &self.settings
    }

    /// Final credit cost
    pub fn calculate(&self, feature: &str, context: &CostContext) -> u64 {
        self.quote(feature, context).final_cost
    }

    /// Final credit cost with its breakdown
    #[instrument(skip(self, context))]
    pub fn quote(&self, feature: &str, context: &CostContext) -> CostQuote {
        let base_cost = self.catalog.cost(feature).base_cost;
        let modifiers = self.modifiers_for(context);

        // Saturates instead of overflowing on out-of-range factors
        let multiplier = modifiers.iter().fold(Decimal::ONE, |acc, m| {
            acc.checked_mul(m.factor).unwrap_or(Decimal::MAX)
        });
        let final_cost = Decimal::from(base_cost)
            .checked_mul(multiplier)
            .map_or(u64::MAX, Self::round_cost);

        debug!(
            base_cost,
            multiplier = %multiplier,
            final_cost,
            "Cost calculated"
        );

        CostQuote {
            feature: feature.to_string(),
            base_cost,
            modifiers,
            multiplier,
            final_cost,
        }
    }

    /// Modifiers that apply to a context, each with its factor
    pub fn modifiers_for(&self, context: &CostContext) -> Vec<AppliedModifier> {
        let s = &self.settings;
        let mut applied = Vec::with_capacity(4);

        if context.priority {
            applied.push(AppliedModifier {
                modifier: Modifier::Priority,
                factor: s.priority_multiplier,
            });
        }
        if context
            .payload_mb
            .is_some_and(|mb| mb > s.large_payload_threshold_mb)
        {
            applied.push(AppliedModifier {
                modifier: Modifier::LargePayload,
                factor: s.large_payload_multiplier,
            });
        }
        if context
            .target
            .as_deref()
            .is_some_and(|t| self.is_complex_target(t))
        {
            applied.push(AppliedModifier {
                modifier: Modifier::ComplexTarget,
                factor: s.complex_target_multiplier,
            });
        }
        if context.is_iteration {
            applied.push(AppliedModifier {
                modifier: Modifier::Iteration,
                factor: s.iteration_multiplier,
            });
        }

        applied
    }

    fn is_complex_target(&self, target: &str) -> bool {
        let target = target.trim();
        self.settings
            .complex_targets
            .iter()
            .any(|t| t.eq_ignore_ascii_case(target))
    }

    /// Ceiling with a floor of one credit
    fn round_cost(raw: Decimal) -> u64 {
        raw.ceil().to_u64().unwrap_or(u64::MAX).max(1)
    }
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self::new(Arc::new(FeatureCatalog::new()), PricingSettings::default())
    }
}
