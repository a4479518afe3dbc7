//! Usage recorder
//!
//! Appends one immutable record per committed debit and answers history
//! queries. An append that fails is logged and reported as a degraded
//! outcome; it never undoes or fails the debit it describes.

use async_trait::async_trait;
use creditmeter_common::{InputType, Result, UsageRecord};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::analytics::{month_start, UsageAnalytics};
use crate::config::UsageSettings;
use crate::ledger::StoreError;

/// One page of usage history, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHistory {
    pub records: Vec<UsageRecord>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Trait for usage storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a record
    async fn append(&self, record: UsageRecord) -> std::result::Result<(), StoreError>;

    /// A page of a user's records, newest first
    async fn page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> std::result::Result<UsageHistory, StoreError>;

    /// A user's records at or after `since` (Unix millis), any order
    async fn records_since(
        &self,
        user_id: &str,
        since: i64,
    ) -> std::result::Result<Vec<UsageRecord>, StoreError>;
}

/// In-memory usage store
#[derive(Default)]
pub struct InMemoryUsageStore {
    by_user: DashMap<String, Vec<UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_records(&self) -> usize {
        self.by_user.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn append(&self, record: UsageRecord) -> std::result::Result<(), StoreError> {
        self.by_user
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn page(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> std::result::Result<UsageHistory, StoreError> {
        let mut records = self
            .by_user
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        let total_count = records.len();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        let records = records.into_iter().skip(offset).take(limit).collect();

        Ok(UsageHistory {
            records,
            total_count,
            limit,
            offset,
        })
    }

    async fn records_since(
        &self,
        user_id: &str,
        since: i64,
    ) -> std::result::Result<Vec<UsageRecord>, StoreError> {
        Ok(self
            .by_user
            .get(user_id)
            .map(|r| {
                r.value()
                    .iter()
                    .filter(|rec| rec.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Result of appending a usage record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded(UsageRecord),
    /// The record was lost; the debit stands
    Degraded { warning: String },
}

impl AppendOutcome {
    pub fn warning(&self) -> Option<&str> {
        match self {
            AppendOutcome::Recorded(_) => None,
            AppendOutcome::Degraded { warning } => Some(warning),
        }
    }
}

/// Recorder metrics
#[derive(Debug, Default)]
pub struct RecorderMetrics {
    pub records_appended: AtomicU64,
    pub append_failures: AtomicU64,
}

/// Usage recorder
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
    settings: UsageSettings,
    metrics: RecorderMetrics,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>, settings: UsageSettings) -> Self {
        Self {
            store,
            settings,
            metrics: RecorderMetrics::default(),
        }
    }

    /// Recorder over a fresh in-memory store
    pub fn in_memory(settings: UsageSettings) -> Self {
        Self::new(Arc::new(InMemoryUsageStore::new()), settings)
    }

    pub fn metrics(&self) -> &RecorderMetrics {
        &self.metrics
    }

    /// Append a record for a committed debit
    pub async fn append(
        &self,
        user_id: &str,
        feature: &str,
        credits_charged: u64,
        model: &str,
        input_type: InputType,
    ) -> AppendOutcome {
        let record = UsageRecord::new(user_id, feature, credits_charged)
            .with_model(model)
            .with_input_type(input_type);
        self.append_record(record).await
    }

    /// Append a prepared record
    #[instrument(skip(self, record), fields(user_id = %record.user_id, feature = %record.feature))]
    pub async fn append_record(&self, record: UsageRecord) -> AppendOutcome {
        match self.store.append(record.clone()).await {
            Ok(()) => {
                self.metrics.records_appended.fetch_add(1, Ordering::Relaxed);
                debug!(credits = record.credits_charged, "Usage recorded");
                AppendOutcome::Recorded(record)
            }
            Err(e) => {
                self.metrics.append_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    credits = record.credits_charged,
                    "Usage record lost, debit stands"
                );
                AppendOutcome::Degraded {
                    warning: format!("usage record not saved: {e}"),
                }
            }
        }
    }

    /// Usage history, newest first
    ///
    /// `limit` defaults to the configured page size and is capped at the
    /// configured maximum.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<UsageHistory> {
        let limit = limit
            .unwrap_or(self.settings.default_page_size)
            .clamp(1, self.settings.max_page_size);
        Ok(self.store.page(user_id, limit, offset).await?)
    }

    /// Aggregated analytics as of `now` (Unix millis)
    pub async fn analytics(&self, user_id: &str, now: i64) -> Result<UsageAnalytics> {
        let records = self.store.records_since(user_id, i64::MIN).await?;
        Ok(UsageAnalytics::compute(
            &records,
            now,
            self.settings.analytics_window_days,
        ))
    }

    /// Every record of a user, newest first
    pub async fn all_records(&self, user_id: &str) -> Result<Vec<UsageRecord>> {
        let mut records = self.store.records_since(user_id, i64::MIN).await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Credits charged in the calendar month containing `now`
    pub async fn credits_this_month(&self, user_id: &str, now: i64) -> Result<u64> {
        let records = self.store.records_since(user_id, month_start(now)).await?;
        Ok(records.iter().map(|r| r.credits_charged).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditmeter_common::CreditMeterError;

    fn recorder() -> UsageRecorder {
        UsageRecorder::in_memory(UsageSettings::default())
    }

    #[tokio::test]
    async fn test_append_and_history_newest_first() {
        let recorder = recorder();
        for (i, feature) in ["a", "b", "c"].iter().enumerate() {
            let record = UsageRecord::new("alice", *feature, 1).at(1_000 + i as i64);
            assert!(matches!(
                recorder.append_record(record).await,
                AppendOutcome::Recorded(_)
            ));
        }

        let history = recorder.history("alice", None, 0).await.unwrap();
        assert_eq!(history.total_count, 3);
        assert_eq!(history.limit, 50);
        let features: Vec<_> = history.records.iter().map(|r| r.feature.as_str()).collect();
        assert_eq!(features, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_history_pagination_and_cap() {
        let recorder = recorder();
        for i in 0..5 {
            let record = UsageRecord::new("alice", "url_screenshot", 1).at(i);
            recorder.append_record(record).await;
        }

        let page = recorder.history("alice", Some(2), 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].timestamp, 2);
        assert_eq!(page.total_count, 5);

        let capped = recorder.history("alice", Some(10_000), 0).await.unwrap();
        assert_eq!(capped.limit, 100);

        let past_end = recorder.history("alice", Some(10), 50).await.unwrap();
        assert!(past_end.records.is_empty());
        assert_eq!(past_end.total_count, 5);
    }

    #[tokio::test]
    async fn test_append_failure_is_degraded_not_error() {
        let mut store = MockUsageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("disk full".into())));

        let recorder = UsageRecorder::new(Arc::new(store), UsageSettings::default());
        let outcome = recorder.append("alice", "url_screenshot", 1, "shots", InputType::Url).await;

        assert!(outcome.warning().unwrap().contains("disk full"));
        assert_eq!(recorder.metrics().append_failures.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.metrics().records_appended.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_query_failure_surfaces_as_storage_error() {
        let mut store = MockUsageStore::new();
        store
            .expect_page()
            .returning(|_, _, _| Err(StoreError::Unavailable("timeout".into())));

        let recorder = UsageRecorder::new(Arc::new(store), UsageSettings::default());
        let err = recorder.history("alice", None, 0).await.unwrap_err();
        assert!(matches!(err, CreditMeterError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_credits_this_month() {
        let recorder = recorder();
        // 2024-03-15T12:00:00Z
        let now = 1_710_504_000_000;
        recorder
            .append_record(UsageRecord::new("alice", "x", 3).at(now - 1000))
            .await;
        recorder
            .append_record(UsageRecord::new("alice", "x", 5).at(now - 30 * 86_400_000))
            .await;

        assert_eq!(recorder.credits_this_month("alice", now).await.unwrap(), 3);
        assert_eq!(recorder.analytics("alice", now).await.unwrap().total_credits_used, 8);
    }
}
