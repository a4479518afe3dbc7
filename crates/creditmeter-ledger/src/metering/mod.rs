//! Metering module
//!
//! Provides usage recording and aggregation:
//! - UsageRecorder: appends one record per committed debit, serves history
//! - UsageAnalytics: per-feature and per-month aggregation

pub mod analytics;
pub mod recorder;

pub use analytics::{month_key, month_start, FeatureUsage, UsageAnalytics};
pub use recorder::{
    AppendOutcome, InMemoryUsageStore, RecorderMetrics, UsageHistory, UsageRecorder, UsageStore,
};
