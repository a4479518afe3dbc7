//! Creditmeter configuration
//!
//! Every component takes its settings through its constructor. Values come
//! from `CREDITMETER_*` environment variables (a `.env` file is honoured)
//! layered over the defaults below.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Largest accepted cost modifier
pub const MAX_MULTIPLIER: Decimal = dec!(100);

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditMeterConfig {
    /// Ledger settings
    pub ledger: LedgerSettings,
    /// Cost calculation settings
    pub pricing: PricingSettings,
    /// Payment reconciliation settings
    pub payments: PaymentSettings,
    /// Usage history settings
    pub usage: UsageSettings,
}

impl CreditMeterConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        // Ledger settings
        if let Some(v) = parse_var(&lookup, "CREDITMETER_FREE_CREDITS")? {
            cfg.ledger.free_credits = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_MAX_DEBIT_ATTEMPTS")? {
            cfg.ledger.max_debit_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_RETRY_BACKOFF_MS")? {
            cfg.ledger.retry_backoff_ms = v;
        }

        // Pricing settings
        if let Some(v) = parse_var(&lookup, "CREDITMETER_PRIORITY_MULTIPLIER")? {
            cfg.pricing.priority_multiplier = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_LARGE_PAYLOAD_MULTIPLIER")? {
            cfg.pricing.large_payload_multiplier = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_LARGE_PAYLOAD_THRESHOLD_MB")? {
            cfg.pricing.large_payload_threshold_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_COMPLEX_TARGET_MULTIPLIER")? {
            cfg.pricing.complex_target_multiplier = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_ITERATION_MULTIPLIER")? {
            cfg.pricing.iteration_multiplier = v;
        }
        if let Some(targets) = lookup("CREDITMETER_COMPLEX_TARGETS") {
            cfg.pricing.complex_targets = targets
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_ENFORCE_PLAN_ELIGIBILITY")? {
            cfg.pricing.enforce_plan_eligibility = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_ENFORCE_PLAN_LIMITS")? {
            cfg.pricing.enforce_plan_limits = v;
        }

        // Payment settings; the processor's conventional name is accepted as fallback
        cfg.payments.webhook_secret = lookup("CREDITMETER_WEBHOOK_SECRET")
            .or_else(|| lookup("STRIPE_WEBHOOK_SECRET"))
            .filter(|s| !s.trim().is_empty());
        if let Some(v) = parse_var(&lookup, "CREDITMETER_WEBHOOK_TOLERANCE_SECS")? {
            cfg.payments.tolerance_secs = v;
        }

        // Usage settings
        if let Some(v) = parse_var(&lookup, "CREDITMETER_HISTORY_PAGE_SIZE")? {
            cfg.usage.default_page_size = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_HISTORY_MAX_PAGE_SIZE")? {
            cfg.usage.max_page_size = v;
        }
        if let Some(v) = parse_var(&lookup, "CREDITMETER_ANALYTICS_WINDOW_DAYS")? {
            cfg.usage.analytics_window_days = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        if self.ledger.max_debit_attempts == 0 {
            bail!("max_debit_attempts must be at least 1");
        }
        let p = &self.pricing;
        for (name, value) in [
            ("priority_multiplier", p.priority_multiplier),
            ("large_payload_multiplier", p.large_payload_multiplier),
            ("complex_target_multiplier", p.complex_target_multiplier),
            ("iteration_multiplier", p.iteration_multiplier),
        ] {
            if value <= Decimal::ZERO {
                bail!("{name} must be positive, got {value}");
            }
            if value > MAX_MULTIPLIER {
                bail!("{name} must be at most {MAX_MULTIPLIER}, got {value}");
            }
        }
        if self.payments.tolerance_secs <= 0 {
            bail!("webhook tolerance must be positive");
        }
        if self.usage.default_page_size == 0 || self.usage.default_page_size > self.usage.max_page_size {
            bail!(
                "history page size {} must be between 1 and {}",
                self.usage.default_page_size,
                self.usage.max_page_size
            );
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(None),
    }
}

/// Credit ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Balance granted when an account is materialized
    pub free_credits: u64,
    /// Compare-and-swap attempts per operation (first try included)
    pub max_debit_attempts: u32,
    /// Backoff before a retry, multiplied by the attempt number
    pub retry_backoff_ms: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            free_credits: creditmeter_common::DEFAULT_FREE_CREDITS,
            max_debit_attempts: creditmeter_common::DEFAULT_MAX_DEBIT_ATTEMPTS,
            retry_backoff_ms: 5,
        }
    }
}

/// Cost modifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    pub priority_multiplier: Decimal,
    pub large_payload_multiplier: Decimal,
    /// Payloads strictly above this size are large
    pub large_payload_threshold_mb: Decimal,
    pub complex_target_multiplier: Decimal,
    pub iteration_multiplier: Decimal,
    /// Target frameworks billed as complex (matched case-insensitively)
    pub complex_targets: Vec<String>,
    /// Refuse features the account's plan does not include
    pub enforce_plan_eligibility: bool,
    /// Refuse requests beyond the plan's size and priority limits
    pub enforce_plan_limits: bool,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            priority_multiplier: dec!(1.5),
            large_payload_multiplier: dec!(1.2),
            large_payload_threshold_mb: dec!(10),
            complex_target_multiplier: dec!(1.1),
            iteration_multiplier: dec!(0.8),
            complex_targets: vec![
                "React Native".to_string(),
                "Flutter".to_string(),
                "Angular".to_string(),
            ],
            enforce_plan_eligibility: true,
            enforce_plan_limits: true,
        }
    }
}

/// Payment reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Shared webhook secret. No default: reconciliation refuses to start without one.
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    /// Accepted age of a webhook signature
    pub tolerance_secs: i64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            tolerance_secs: creditmeter_common::WEBHOOK_TOLERANCE_SECS,
        }
    }
}

/// Usage history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSettings {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Trailing window for monthly analytics
    pub analytics_window_days: i64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            default_page_size: creditmeter_common::DEFAULT_HISTORY_LIMIT,
            max_page_size: creditmeter_common::MAX_HISTORY_LIMIT,
            analytics_window_days: creditmeter_common::ANALYTICS_WINDOW_DAYS,
        }
    }
}
