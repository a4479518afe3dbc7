//! CreditMeter service
//!
//! Wires the billable-action flow:
//!
//! ```text
//! authorize -> quote -> plan check -> check_and_debit -> work -> usage append
//! ```
//!
//! Work only runs after a committed debit. A debit is never refunded
//! implicitly; a caller whose work failed gets the [`Charge`] back and
//! decides whether to [`CreditMeter::compensate`] it.

use creditmeter_common::security::AuditLogger;
use creditmeter_common::{
    Account, CatalogError, CreditMeterError, FeatureType, Identity, IdentityError, InputType,
    PaymentError, PaymentRecord, Plan, Result, UsageRecord,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::billing::PaymentReconciler;
use crate::config::CreditMeterConfig;
use crate::ledger::{
    Charge, CompensationFailed, CreditLedger, InMemoryLedgerStore, LedgerStore,
};
use crate::metering::{
    AppendOutcome, InMemoryUsageStore, UsageAnalytics, UsageHistory, UsageRecorder, UsageStore,
};
use crate::pricing::{CostCalculator, CostContext, CostQuote, FeatureCatalog, FeatureSpec};

/// A billable request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillableAction {
    /// Account the request claims to bill; must match the caller
    pub user_id: String,
    pub feature: String,
    pub context: CostContext,
    pub model: String,
    pub input_type: InputType,
    pub video_duration_secs: Option<u64>,
    pub batch_size: Option<u64>,
}

impl BillableAction {
    pub fn new(user_id: impl Into<String>, feature: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            feature: feature.into(),
            context: CostContext::default(),
            model: String::new(),
            input_type: InputType::Text,
            video_duration_secs: None,
            batch_size: None,
        }
    }

    pub fn with_context(mut self, context: CostContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_input_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_video_duration(mut self, secs: u64) -> Self {
        self.video_duration_secs = Some(secs);
        self
    }

    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// A committed debit together with its price breakdown
#[derive(Debug)]
pub struct MeteredDebit {
    pub charge: Charge,
    pub quote: CostQuote,
}

/// Result of work that ran after a committed debit
#[derive(Debug)]
pub struct Executed<T> {
    pub output: T,
    pub charge: Charge,
    pub quote: CostQuote,
    pub usage: AppendOutcome,
}

/// Failure of [`CreditMeter::execute`]
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// Nothing was debited and the work did not run
    Refused(CreditMeterError),
    /// The work failed after its debit committed
    WorkFailed { error: E, charge: Charge },
}

impl<E> ExecuteError<E> {
    /// Receipt of the committed debit, if there is one
    pub fn into_charge(self) -> Option<Charge> {
        match self {
            ExecuteError::Refused(_) => None,
            ExecuteError::WorkFailed { charge, .. } => Some(charge),
        }
    }
}

impl<E> From<CreditMeterError> for ExecuteError<E> {
    fn from(err: CreditMeterError) -> Self {
        ExecuteError::Refused(err)
    }
}

impl<E: fmt::Display> fmt::Display for ExecuteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::Refused(e) => write!(f, "{e}"),
            ExecuteError::WorkFailed { error, charge } => write!(
                f,
                "work failed after debiting {} credits: {error}",
                charge.credits()
            ),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ExecuteError<E> {}

/// Account overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSummary {
    pub user_id: String,
    pub credits_remaining: u64,
    pub credits_used: u64,
    pub total_credits_purchased: u64,
    pub plan: Plan,
    pub last_usage_at: Option<i64>,
    pub usage_this_month: u64,
    pub available_features: Vec<FeatureType>,
}

/// Whether a feature is usable on an account's plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAvailability {
    pub feature: String,
    pub plan: Plan,
    pub available: bool,
    pub credit_cost: u64,
}

/// One entry of the merged transaction list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transaction {
    Purchase(PaymentRecord),
    Usage(UsageRecord),
}

impl Transaction {
    pub fn timestamp(&self) -> i64 {
        match self {
            Transaction::Purchase(p) => p.timestamp,
            Transaction::Usage(u) => u.timestamp,
        }
    }
}

/// Credit metering service
pub struct CreditMeter {
    config: CreditMeterConfig,
    calculator: CostCalculator,
    ledger: Arc<CreditLedger>,
    recorder: UsageRecorder,
    audit: Arc<AuditLogger>,
}

impl CreditMeter {
    pub fn new(
        config: CreditMeterConfig,
        ledger_store: Arc<dyn LedgerStore>,
        usage_store: Arc<dyn UsageStore>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let calculator =
            CostCalculator::new(Arc::new(FeatureCatalog::new()), config.pricing.clone());
        let ledger = Arc::new(CreditLedger::new(
            ledger_store,
            config.ledger.clone(),
            audit.clone(),
        ));
        let recorder = UsageRecorder::new(usage_store, config.usage.clone());

        if !config.pricing.enforce_plan_eligibility {
            audit.log_config_change("pricing", "enforce_plan_eligibility", "false");
        }
        if !config.pricing.enforce_plan_limits {
            audit.log_config_change("pricing", "enforce_plan_limits", "false");
        }

        info!(
            catalog = calculator.catalog().version(),
            free_credits = config.ledger.free_credits,
            max_debit_attempts = config.ledger.max_debit_attempts,
            "CreditMeter initialized"
        );

        Self {
            config,
            calculator,
            ledger,
            recorder,
            audit,
        }
    }

    /// Service over in-memory stores
    pub fn in_memory(config: CreditMeterConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryUsageStore::new()),
            Arc::new(AuditLogger::new()),
        )
    }

    pub fn config(&self) -> &CreditMeterConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn recorder(&self) -> &UsageRecorder {
        &self.recorder
    }

    pub fn calculator(&self) -> &CostCalculator {
        &self.calculator
    }

    /// Payment reconciler over this service's ledger
    pub fn reconciler(&self) -> std::result::Result<PaymentReconciler, PaymentError> {
        PaymentReconciler::new(self.ledger.clone(), &self.config.payments, self.audit.clone())
    }

    /// Price a feature without debiting
    pub fn quote(&self, feature: &str, context: &CostContext) -> CostQuote {
        self.calculator.quote(feature, context)
    }

    /// Every catalog entry
    pub fn features(&self) -> &'static [FeatureSpec] {
        self.calculator.catalog().all_features()
    }

    /// Plan to feature table
    pub fn plan_features(&self) -> BTreeMap<Plan, Vec<FeatureType>> {
        self.calculator.catalog().eligibility_table()
    }

    /// Authorize, price and debit an action
    ///
    /// Nothing is debited unless every check passes.
    #[instrument(skip(self, identity, action), fields(actor = %identity.user_id(), user_id = %action.user_id, feature = %action.feature))]
    pub async fn debit(&self, identity: &Identity, action: &BillableAction) -> Result<MeteredDebit> {
        if let Err(e) = identity.authorize_debit(&action.user_id) {
            self.audit
                .log_authorization(identity.user_id(), &action.user_id, "debit", false);
            return Err(e.into());
        }

        let account = self.ledger.read(&action.user_id).await?;
        let quote = self.calculator.quote(&action.feature, &action.context);
        self.check_plan(&account, action)?;

        let charge = self
            .ledger
            .check_and_debit(&action.user_id, quote.final_cost)
            .await?;
        Ok(MeteredDebit { charge, quote })
    }

    /// Debit, run `work`, then record usage
    ///
    /// `work` never runs without a committed debit. When it fails the
    /// charge stands and is handed back with the error.
    pub async fn execute<T, E, F, Fut>(
        &self,
        identity: &Identity,
        action: &BillableAction,
        work: F,
    ) -> std::result::Result<Executed<T>, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let MeteredDebit { charge, quote } = self.debit(identity, action).await?;

        match work().await {
            Ok(output) => {
                let usage = self
                    .recorder
                    .append(
                        &action.user_id,
                        &action.feature,
                        charge.credits(),
                        &action.model,
                        action.input_type,
                    )
                    .await;
                Ok(Executed {
                    output,
                    charge,
                    quote,
                    usage,
                })
            }
            Err(error) => {
                warn!(
                    user_id = %action.user_id,
                    feature = %action.feature,
                    credits = charge.credits(),
                    error = %error,
                    "Metered work failed after debit"
                );
                Err(ExecuteError::WorkFailed { error, charge })
            }
        }
    }

    /// Give back the credits of a committed debit
    ///
    /// The receipt is the authorization: it can only come from a debit of
    /// its own account.
    pub async fn compensate(
        &self,
        charge: Charge,
        reason: &str,
    ) -> std::result::Result<u64, CompensationFailed> {
        self.ledger.compensate(charge, reason).await
    }

    /// Account of `user_id` as seen by `identity`
    pub async fn balance(&self, identity: &Identity, user_id: &str) -> Result<Account> {
        self.authorize_read(identity, user_id)?;
        if identity.user_id() == user_id {
            Ok(self.ledger.read(user_id).await?)
        } else {
            Ok(self.ledger.require_account(user_id).await?)
        }
    }

    /// Usage history, newest first
    pub async fn history(
        &self,
        identity: &Identity,
        user_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<UsageHistory> {
        self.authorize_read(identity, user_id)?;
        self.recorder.history(user_id, limit, offset).await
    }

    /// Usage analytics as of now
    pub async fn analytics(&self, identity: &Identity, user_id: &str) -> Result<UsageAnalytics> {
        self.authorize_read(identity, user_id)?;
        self.recorder.analytics(user_id, now_millis()).await
    }

    /// Account overview
    pub async fn summary(&self, identity: &Identity, user_id: &str) -> Result<CreditSummary> {
        let account = self.balance(identity, user_id).await?;
        let usage_this_month = self
            .recorder
            .credits_this_month(user_id, now_millis())
            .await?;

        Ok(CreditSummary {
            user_id: account.user_id,
            credits_remaining: account.credits_remaining,
            credits_used: account.credits_used,
            total_credits_purchased: account.total_credits_purchased,
            plan: account.plan,
            last_usage_at: account.last_usage_at,
            usage_this_month,
            available_features: self.calculator.catalog().plan_features(account.plan).to_vec(),
        })
    }

    /// Purchases and usage merged, newest first
    pub async fn transactions(&self, identity: &Identity, user_id: &str) -> Result<Vec<Transaction>> {
        self.authorize_read(identity, user_id)?;

        let payments = self.ledger.payment_history(user_id).await?;
        let usage = self.recorder.all_records(user_id).await?;

        let mut merged: Vec<Transaction> = payments
            .into_iter()
            .map(Transaction::Purchase)
            .chain(usage.into_iter().map(Transaction::Usage))
            .collect();
        merged.sort_by_key(|t| std::cmp::Reverse(t.timestamp()));
        Ok(merged)
    }

    /// Whether `feature` is usable on the account's plan
    pub async fn feature_availability(
        &self,
        identity: &Identity,
        user_id: &str,
        feature: &str,
    ) -> Result<FeatureAvailability> {
        let account = self.balance(identity, user_id).await?;
        let catalog = self.calculator.catalog();
        Ok(FeatureAvailability {
            feature: feature.to_string(),
            plan: account.plan,
            available: catalog.is_available(feature, account.plan),
            credit_cost: catalog.cost(feature).base_cost,
        })
    }

    fn authorize_read(&self, identity: &Identity, user_id: &str) -> std::result::Result<(), IdentityError> {
        match identity.authorize_read(user_id) {
            Ok(()) => {
                if identity.user_id() != user_id {
                    self.audit
                        .log_authorization(identity.user_id(), user_id, "read", true);
                }
                Ok(())
            }
            Err(e) => {
                self.audit
                    .log_authorization(identity.user_id(), user_id, "read", false);
                Err(e)
            }
        }
    }

    fn check_plan(&self, account: &Account, action: &BillableAction) -> std::result::Result<(), CatalogError> {
        let pricing = &self.config.pricing;
        let catalog = self.calculator.catalog();
        let plan = account.plan;

        if pricing.enforce_plan_eligibility && !catalog.is_available(&action.feature, plan) {
            return Err(CatalogError::FeatureNotAvailable {
                feature: action.feature.clone(),
                plan: plan.to_string(),
            });
        }

        if !pricing.enforce_plan_limits {
            return Ok(());
        }

        let limits = catalog.plan_limits(plan);
        let exceeded = |limit: String| CatalogError::PlanLimitExceeded {
            plan: plan.to_string(),
            limit,
        };

        if let (Some(max), Some(mb)) = (limits.max_file_size_mb, action.context.payload_mb) {
            if mb > Decimal::from(max) {
                return Err(exceeded(format!("file size {mb} MB over {max} MB")));
            }
        }
        if let (Some(max), Some(secs)) = (limits.max_video_duration_secs, action.video_duration_secs) {
            if secs > max {
                return Err(exceeded(format!("video duration {secs}s over {max}s")));
            }
        }
        if let (Some(max), Some(size)) = (limits.max_batch_size, action.batch_size) {
            if size > max {
                return Err(exceeded(format!("batch size {size} over {max}")));
            }
        }
        if action.context.priority && !limits.priority_processing {
            return Err(exceeded("priority processing".to_string()));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditmeter_common::security::{AuditCategory, MemoryAuditSink};
    use creditmeter_common::{LedgerError, Role};
    use rust_decimal_macros::dec;

    fn config() -> CreditMeterConfig {
        let mut config = CreditMeterConfig::default();
        config.ledger.retry_backoff_ms = 0;
        config
    }

    fn meter() -> CreditMeter {
        CreditMeter::in_memory(config())
    }

    fn user(id: &str) -> Identity {
        Identity::attested(id, Role::User)
    }

    async fn fund(meter: &CreditMeter, user_id: &str, credits: u64, plan: Plan) {
        meter
            .ledger()
            .credit(user_id, credits, &format!("tx_{user_id}"), plan)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_debits_then_records_usage() {
        let meter = meter();
        let alice = user("alice");
        let action = BillableAction::new("alice", "url_screenshot")
            .with_model("shots")
            .with_input_type(InputType::Url);

        let done = meter
            .execute(&alice, &action, || async { Ok::<_, String>("png") })
            .await
            .unwrap();

        assert_eq!(done.output, "png");
        assert_eq!(done.charge.credits(), 1);
        assert_eq!(done.charge.balance_after(), 1);
        assert!(done.usage.warning().is_none());

        let history = meter.history(&alice, "alice", None, 0).await.unwrap();
        assert_eq!(history.total_count, 1);
        assert_eq!(history.records[0].credits_charged, 1);
        assert_eq!(history.records[0].input_type, InputType::Url);
    }

    #[tokio::test]
    async fn test_work_does_not_run_without_credits() {
        let meter = meter();
        let alice = user("alice");
        let action = BillableAction::new("alice", "code_generation_image");

        let first = meter
            .execute(&alice, &action, || async { Ok::<_, String>(()) })
            .await
            .unwrap();
        assert_eq!(first.charge.balance_after(), 0);

        let mut ran = false;
        let err = meter
            .execute(&alice, &action, || {
                ran = true;
                async { Ok::<_, String>(()) }
            })
            .await
            .unwrap_err();

        assert!(!ran);
        match err {
            ExecuteError::Refused(e) => assert_eq!(e.status_code(), 402),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn test_failed_work_keeps_charge_until_compensated() {
        let meter = meter();
        let alice = user("alice");
        let action = BillableAction::new("alice", "code_generation_text");

        let err = meter
            .execute(&alice, &action, || async { Err::<(), _>("model timeout") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model timeout"));

        // No automatic refund
        assert_eq!(meter.balance(&alice, "alice").await.unwrap().credits_remaining, 1);
        assert_eq!(meter.history(&alice, "alice", None, 0).await.unwrap().total_count, 0);

        let charge = err.into_charge().unwrap();
        let balance = meter.compensate(charge, "model timeout").await.unwrap();
        assert_eq!(balance, 2);
    }

    #[tokio::test]
    async fn test_cannot_bill_another_account() {
        let sink = Arc::new(MemoryAuditSink::new());
        let meter = CreditMeter::new(
            config(),
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryUsageStore::new()),
            Arc::new(AuditLogger::silent().with_sink(sink.clone())),
        );
        let mallory = user("mallory");
        let admin = Identity::attested("root", Role::Admin);

        for identity in [&mallory, &admin] {
            let err = meter
                .debit(identity, &BillableAction::new("alice", "url_screenshot"))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 403);
        }

        assert!(meter.ledger().find_account("alice").await.unwrap().is_none());
        assert_eq!(sink.events_in(AuditCategory::Authorization).len(), 2);
    }

    #[tokio::test]
    async fn test_cross_user_reads() {
        let meter = meter();
        let admin = Identity::attested("root", Role::Admin);

        // Users only see their own account
        let err = meter.balance(&user("mallory"), "alice").await.unwrap_err();
        assert!(matches!(
            err,
            CreditMeterError::Identity(IdentityError::Unauthorized { .. })
        ));

        // Admin lookups do not materialize accounts
        let err = meter.balance(&admin, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            CreditMeterError::Ledger(LedgerError::AccountNotFound(_))
        ));

        meter.balance(&user("alice"), "alice").await.unwrap();
        assert_eq!(meter.balance(&admin, "alice").await.unwrap().credits_remaining, 2);
    }

    #[tokio::test]
    async fn test_plan_eligibility() {
        let meter = meter();
        let alice = user("alice");
        let video = BillableAction::new("alice", "webpage_to_video");

        let err = meter.debit(&alice, &video).await.unwrap_err();
        assert!(matches!(
            err,
            CreditMeterError::Catalog(CatalogError::FeatureNotAvailable { .. })
        ));
        // Refused before the ledger moved
        assert_eq!(meter.balance(&alice, "alice").await.unwrap().credits_used, 0);

        fund(&meter, "alice", 20, Plan::Professional).await;
        let debit = meter.debit(&alice, &video).await.unwrap();
        assert_eq!(debit.charge.credits(), 8);
    }

    #[tokio::test]
    async fn test_eligibility_can_be_disabled() {
        let mut config = config();
        config.pricing.enforce_plan_eligibility = false;
        let sink = Arc::new(MemoryAuditSink::new());
        let meter = CreditMeter::new(
            config,
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryUsageStore::new()),
            Arc::new(AuditLogger::silent().with_sink(sink.clone())),
        );
        assert_eq!(sink.events_in(AuditCategory::Configuration).len(), 1);

        let debit = meter
            .debit(&user("alice"), &BillableAction::new("alice", "code_generation_update"))
            .await
            .unwrap();
        assert_eq!(debit.charge.credits(), 1);
    }

    #[tokio::test]
    async fn test_free_plan_limits() {
        let meter = meter();
        let alice = user("alice");

        let big = BillableAction::new("alice", "url_screenshot")
            .with_context(CostContext::new().with_payload_mb(dec!(6)));
        let priority = BillableAction::new("alice", "url_screenshot")
            .with_context(CostContext::new().with_priority());
        let batch = BillableAction::new("alice", "url_screenshot").with_batch_size(4);

        for action in [big, priority, batch] {
            let err = meter.debit(&alice, &action).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    CreditMeterError::Catalog(CatalogError::PlanLimitExceeded { .. })
                ),
                "{err}"
            );
        }

        fund(&meter, "alice", 10, Plan::Starter).await;
        let debit = meter
            .debit(
                &alice,
                &BillableAction::new("alice", "url_screenshot").with_context(
                    CostContext::new()
                        .with_priority()
                        .with_payload_mb(dec!(15)),
                ),
            )
            .await
            .unwrap();
        assert_eq!(debit.quote.multiplier, dec!(1.80));
        assert_eq!(debit.charge.credits(), 2);
    }

    #[tokio::test]
    async fn test_summary_and_transactions() {
        let meter = meter();
        let alice = user("alice");
        fund(&meter, "alice", 50, Plan::Basic).await;

        let action = BillableAction::new("alice", "video_to_scene_graph");
        meter
            .execute(&alice, &action, || async { Ok::<_, String>(()) })
            .await
            .unwrap();

        // Funded before first use: no free allotment
        let summary = meter.summary(&alice, "alice").await.unwrap();
        assert_eq!(summary.credits_remaining, 47);
        assert_eq!(summary.credits_used, 3);
        assert_eq!(summary.total_credits_purchased, 50);
        assert_eq!(summary.plan, Plan::Basic);
        assert_eq!(summary.usage_this_month, 3);
        assert!(summary.last_usage_at.is_some());
        assert!(summary
            .available_features
            .contains(&FeatureType::VideoToSceneGraph));

        let transactions = meter.transactions(&alice, "alice").await.unwrap();
        assert_eq!(transactions.len(), 2);
        assert!(transactions[0].timestamp() >= transactions[1].timestamp());
        let purchases = transactions
            .iter()
            .filter(|t| matches!(t, Transaction::Purchase(_)))
            .count();
        assert_eq!(purchases, 1);

        let analytics = meter.analytics(&alice, "alice").await.unwrap();
        assert_eq!(
            analytics.most_used_feature.as_deref(),
            Some("video_to_scene_graph")
        );
    }

    #[tokio::test]
    async fn test_feature_availability() {
        let meter = meter();
        let alice = user("alice");

        let shot = meter
            .feature_availability(&alice, "alice", "url_screenshot")
            .await
            .unwrap();
        assert!(shot.available);
        assert_eq!(shot.plan, Plan::Free);
        assert_eq!(shot.credit_cost, 1);

        let video = meter
            .feature_availability(&alice, "alice", "webpage_to_video")
            .await
            .unwrap();
        assert!(!video.available);
        assert_eq!(video.credit_cost, 8);

        assert_eq!(meter.plan_features()[&Plan::Enterprise].len(), 10);
        assert_eq!(meter.features().len(), 10);
    }

    #[tokio::test]
    async fn test_reconciler_requires_secret() {
        assert!(matches!(
            meter().reconciler(),
            Err(PaymentError::MissingSecret)
        ));

        let mut config = config();
        config.payments.webhook_secret = Some("whsec_test".into());
        assert!(CreditMeter::in_memory(config).reconciler().is_ok());
    }
}
