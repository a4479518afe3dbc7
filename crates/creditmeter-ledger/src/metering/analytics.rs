//! Usage analytics
//!
//! Aggregates a user's usage records by feature and by calendar month.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use creditmeter_common::UsageRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Usage of one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureUsage {
    /// Number of billed requests
    pub count: u64,
    /// Credits charged
    pub total_credits: u64,
    /// Share of all credits charged, in percent (2 dp)
    pub percentage: Decimal,
}

/// Aggregated usage of one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageAnalytics {
    pub total_credits_used: u64,
    pub total_requests: u64,
    pub usage_by_feature: BTreeMap<String, FeatureUsage>,
    /// Credits per `YYYY-MM` within the trailing window
    pub monthly_usage: BTreeMap<String, u64>,
    /// Feature with the most requests; ties go to the lexically first name
    pub most_used_feature: Option<String>,
}

impl UsageAnalytics {
    /// Aggregate records as of `now` (Unix millis)
    pub fn compute(records: &[UsageRecord], now: i64, window_days: i64) -> Self {
        let mut analytics = UsageAnalytics::default();
        let window_start = now.saturating_sub(window_days.saturating_mul(MILLIS_PER_DAY));

        for record in records {
            analytics.total_requests += 1;
            analytics.total_credits_used += record.credits_charged;

            let entry = analytics
                .usage_by_feature
                .entry(record.feature.clone())
                .or_insert(FeatureUsage {
                    count: 0,
                    total_credits: 0,
                    percentage: Decimal::ZERO,
                });
            entry.count += 1;
            entry.total_credits += record.credits_charged;

            if record.timestamp >= window_start {
                if let Some(key) = month_key(record.timestamp) {
                    *analytics.monthly_usage.entry(key).or_default() += record.credits_charged;
                }
            }
        }

        if analytics.total_credits_used > 0 {
            let total = Decimal::from(analytics.total_credits_used);
            for usage in analytics.usage_by_feature.values_mut() {
                usage.percentage =
                    (Decimal::from(usage.total_credits) * Decimal::ONE_HUNDRED / total).round_dp(2);
            }
        }

        analytics.most_used_feature = analytics
            .usage_by_feature
            .iter()
            .fold(None::<(&String, u64)>, |best, (name, usage)| match best {
                Some((_, count)) if count >= usage.count => best,
                _ => Some((name, usage.count)),
            })
            .map(|(name, _)| name.clone());

        analytics
    }
}

/// `YYYY-MM` of a Unix millis timestamp (UTC)
pub fn month_key(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(timestamp).map(|t| t.format("%Y-%m").to_string())
}

/// Start of the calendar month containing `timestamp` (UTC, Unix millis)
pub fn month_start(timestamp: i64) -> i64 {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .and_then(|t| t.date_naive().with_day(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
        .unwrap_or(timestamp)
}
