//! The per-tenant subscription record.
//!
//! # Design Decisions
//!
//! - **One per tenant**: keyed by `TenantKey`, never hard-deleted
//! - **Money in cents**: invoice amounts are i64 cents (not floats)
//! - **Versioned**: `version` is owned by the record store and bumped on
//!   every successful compare-and-swap; 0 means "never stored"
//! - **Append-only history**: invoices and command audit entries are only
//!   ever appended

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::{TenantKey, Timestamp};

use super::{BillingCycle, Feature, LifecycleState, Plan, SubscriptionStatus};

/// Outcome recorded for an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Paid,
    Failed,
    Open,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "paid" => Some(InvoiceStatus::Paid),
            "failed" => Some(InvoiceStatus::Failed),
            "open" | "draft" => Some(InvoiceStatus::Open),
            "void" => Some(InvoiceStatus::Void),
            "uncollectible" => Some(InvoiceStatus::Uncollectible),
            _ => None,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the invoice history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceEntry {
    pub invoice_ref: String,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub time: Timestamp,
}

impl InvoiceEntry {
    pub fn new(
        invoice_ref: impl Into<String>,
        amount_cents: i64,
        status: InvoiceStatus,
        time: Timestamp,
    ) -> Self {
        Self {
            invoice_ref: invoice_ref.into(),
            amount_cents,
            status,
            time,
        }
    }
}

/// Kind of command recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Subscribed,
    PlanChanged,
    CancelRequested,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Subscribed => "subscribed",
            ChangeAction::PlanChanged => "plan_changed",
            ChangeAction::CancelRequested => "cancel_requested",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribed" => Some(ChangeAction::Subscribed),
            "plan_changed" => Some(ChangeAction::PlanChanged),
            "cancel_requested" => Some(ChangeAction::CancelRequested),
            _ => None,
        }
    }
}

/// Audit entry for a provider-side mutation issued by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionChange {
    pub action: ChangeAction,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub provider_subscription_ref: Option<String>,
    pub time: Timestamp,
}

/// Subscription state of one tenant.
///
/// # Invariants
///
/// - `provider_subscription_ref` is set only for paid plans
/// - `status = Active` implies `next_billing_time` is set
/// - `invoice_history` holds at most one entry per `invoice_ref`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub tenant_key: TenantKey,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub provider_customer_ref: Option<String>,
    pub provider_subscription_ref: Option<String>,
    pub next_billing_time: Option<Timestamp>,
    pub invoice_history: Vec<InvoiceEntry>,
    pub change_log: Vec<SubscriptionChange>,
    /// Provider-side time of the newest state the record reflects.
    pub provider_synced_at: Option<Timestamp>,
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SubscriptionRecord {
    /// The implicit free-plan state of a tenant that never subscribed.
    pub fn free(tenant_key: TenantKey) -> Self {
        let now = Timestamp::now();
        Self {
            tenant_key,
            plan: Plan::Free,
            billing_cycle: BillingCycle::Monthly,
            status: SubscriptionStatus::Expired,
            provider_customer_ref: None,
            provider_subscription_ref: None,
            next_billing_time: None,
            invoice_history: Vec::new(),
            change_log: Vec::new(),
            provider_synced_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        LifecycleState::derive(
            self.status,
            self.provider_subscription_ref.is_some(),
            self.next_billing_time.is_some(),
        )
    }

    /// Plan whose features the tenant can use right now.
    pub fn effective_plan(&self) -> Plan {
        if self.lifecycle().grants_paid_access() {
            self.plan
        } else {
            Plan::Free
        }
    }

    pub fn can_access_feature(&self, feature: Feature) -> bool {
        self.effective_plan().can_access(feature)
    }

    pub fn has_invoice(&self, invoice_ref: &str) -> bool {
        self.invoice_history
            .iter()
            .any(|entry| entry.invoice_ref == invoice_ref)
    }

    /// Appends an invoice unless one with the same ref is already present.
    ///
    /// Returns true if the entry was appended.
    pub fn append_invoice(&mut self, entry: InvoiceEntry) -> bool {
        if self.has_invoice(&entry.invoice_ref) {
            return false;
        }
        self.invoice_history.push(entry);
        true
    }

    /// Records a freshly created paid subscription.
    pub fn activate(
        &mut self,
        plan: Plan,
        billing_cycle: BillingCycle,
        customer_ref: String,
        subscription_ref: String,
        next_billing_time: Timestamp,
    ) {
        self.plan = plan;
        self.billing_cycle = billing_cycle;
        self.status = SubscriptionStatus::Active;
        self.provider_customer_ref = Some(customer_ref);
        self.provider_subscription_ref = Some(subscription_ref);
        self.next_billing_time = Some(next_billing_time);
        self.log_change(ChangeAction::Subscribed);
    }

    /// Records a confirmed cancel-at-period-end.
    ///
    /// `next_billing_time` is kept; `period_end` only fills it if missing.
    pub fn mark_cancel_pending(&mut self, period_end: Option<Timestamp>) {
        self.status = SubscriptionStatus::Canceled;
        if self.next_billing_time.is_none() {
            self.next_billing_time = period_end;
        }
        self.log_change(ChangeAction::CancelRequested);
    }

    /// Records a confirmed plan or cycle change.
    pub fn change_plan(
        &mut self,
        plan: Plan,
        billing_cycle: BillingCycle,
        status: SubscriptionStatus,
        next_billing_time: Option<Timestamp>,
    ) {
        self.plan = plan;
        self.billing_cycle = billing_cycle;
        self.status = status;
        if next_billing_time.is_some() {
            self.next_billing_time = next_billing_time;
        }
        self.log_change(ChangeAction::PlanChanged);
    }

    /// Drops back to the free plan after the provider deleted the subscription.
    pub fn clear_subscription(&mut self) {
        self.plan = Plan::Free;
        self.status = SubscriptionStatus::Expired;
        self.provider_subscription_ref = None;
        self.next_billing_time = None;
    }

    /// Returns true if an event created at `created` is older than the state
    /// the record already reflects and must not change status or dates.
    ///
    /// Events without a provider timestamp are never considered stale; they
    /// apply in receipt order. On equal timestamps a period end earlier than
    /// the current `next_billing_time` is stale.
    pub fn is_stale(&self, created: Option<Timestamp>, period_end: Option<Timestamp>) -> bool {
        let (Some(created), Some(watermark)) = (created, self.provider_synced_at) else {
            return false;
        };
        if created < watermark {
            return true;
        }
        if created == watermark {
            if let (Some(period_end), Some(current)) = (period_end, self.next_billing_time) {
                return period_end < current;
            }
        }
        false
    }

    /// Moves the ordering watermark forward, never backwards.
    ///
    /// Only provider `created` times belong here; local clocks are not
    /// comparable with them.
    pub fn advance_watermark(&mut self, at: Option<Timestamp>) {
        if let Some(at) = at {
            if self.provider_synced_at.map_or(true, |w| at > w) {
                self.provider_synced_at = Some(at);
            }
        }
    }

    /// Last audit entry, if any.
    pub fn last_change(&self) -> Option<&SubscriptionChange> {
        self.change_log.last()
    }

    /// Audits a provider-side mutation that reached the provider after the
    /// record had left the state it was issued from. Nothing but the audit
    /// trail changes; provider webhooks settle the state.
    pub fn log_unapplied(&mut self, action: ChangeAction, plan: Plan, billing_cycle: BillingCycle) {
        self.push_change(action, plan, billing_cycle);
    }

    fn log_change(&mut self, action: ChangeAction) {
        self.push_change(action, self.plan, self.billing_cycle);
    }

    /// Appends an audit entry. The ordering watermark is left alone: it
    /// only ever holds provider-side event times.
    fn push_change(&mut self, action: ChangeAction, plan: Plan, billing_cycle: BillingCycle) {
        self.change_log.push(SubscriptionChange {
            action,
            plan,
            billing_cycle,
            provider_subscription_ref: self.provider_subscription_ref.clone(),
            time: Timestamp::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn active_record() -> SubscriptionRecord {
        let mut record = SubscriptionRecord::free(tenant());
        record.activate(
            Plan::Basic,
            BillingCycle::Monthly,
            "cus_1".into(),
            "sub_1".into(),
            ts(1_706_745_600),
        );
        record
    }

    #[test]
    fn free_record_is_in_none_state() {
        let record = SubscriptionRecord::free(tenant());
        assert_eq!(record.lifecycle(), LifecycleState::None);
        assert_eq!(record.version, 0);
        assert_eq!(record.effective_plan(), Plan::Free);
    }

    #[test]
    fn activate_sets_refs_and_next_billing() {
        let record = active_record();
        assert_eq!(record.lifecycle(), LifecycleState::Active);
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.provider_subscription_ref.as_deref(), Some("sub_1"));
        assert_eq!(record.next_billing_time, Some(ts(1_706_745_600)));
        assert_eq!(record.last_change().unwrap().action, ChangeAction::Subscribed);
    }

    #[test]
    fn cancel_pending_keeps_next_billing_time() {
        let mut record = active_record();
        record.mark_cancel_pending(Some(ts(1_800_000_000)));

        assert_eq!(record.lifecycle(), LifecycleState::CancelPending);
        assert_eq!(record.next_billing_time, Some(ts(1_706_745_600)));
        assert!(record.can_access_feature(Feature::MultiUser));
    }

    #[test]
    fn clear_subscription_returns_to_free() {
        let mut record = active_record();
        record.clear_subscription();

        assert_eq!(record.lifecycle(), LifecycleState::None);
        assert_eq!(record.plan, Plan::Free);
        assert!(record.next_billing_time.is_none());
        assert_eq!(record.provider_customer_ref.as_deref(), Some("cus_1"));
    }

    #[test]
    fn expired_record_only_has_free_features() {
        let mut record = active_record();
        record.status = SubscriptionStatus::Expired;
        assert!(!record.can_access_feature(Feature::MultiUser));
        assert!(record.can_access_feature(Feature::BasicAnalytics));
    }

    #[test]
    fn append_invoice_ignores_duplicate_ref() {
        let mut record = active_record();
        let entry = InvoiceEntry::new("in_1", 2_900, InvoiceStatus::Paid, ts(1_704_067_200));

        assert!(record.append_invoice(entry.clone()));
        assert!(!record.append_invoice(entry));
        assert_eq!(record.invoice_history.len(), 1);
    }

    #[test]
    fn older_event_is_stale() {
        let mut record = active_record();
        record.provider_synced_at = Some(ts(2_000));

        assert!(record.is_stale(Some(ts(1_999)), None));
        assert!(!record.is_stale(Some(ts(2_001)), None));
    }

    #[test]
    fn event_without_timestamp_is_never_stale() {
        let mut record = active_record();
        record.provider_synced_at = Some(ts(2_000));
        assert!(!record.is_stale(None, Some(ts(1))));
    }

    #[test]
    fn equal_timestamp_falls_back_to_period_end() {
        let mut record = active_record();
        record.provider_synced_at = Some(ts(2_000));
        record.next_billing_time = Some(ts(5_000));

        assert!(record.is_stale(Some(ts(2_000)), Some(ts(4_000))));
        assert!(!record.is_stale(Some(ts(2_000)), Some(ts(6_000))));
    }

    #[test]
    fn commands_do_not_touch_watermark() {
        let mut record = active_record();
        record.mark_cancel_pending(None);
        record.change_plan(
            Plan::Pro,
            BillingCycle::Monthly,
            SubscriptionStatus::Active,
            None,
        );
        assert_eq!(record.provider_synced_at, None);
        assert_eq!(record.change_log.len(), 3);
    }

    #[test]
    fn unapplied_change_is_only_audited() {
        let mut record = active_record();
        record.status = SubscriptionStatus::Expired;
        let before = record.clone();

        record.log_unapplied(ChangeAction::PlanChanged, Plan::Pro, BillingCycle::Yearly);

        assert_eq!(record.status, before.status);
        assert_eq!(record.plan, Plan::Basic);
        let last = record.last_change().unwrap();
        assert_eq!(last.action, ChangeAction::PlanChanged);
        assert_eq!(last.plan, Plan::Pro);
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut record = SubscriptionRecord::free(tenant());
        record.advance_watermark(Some(ts(2_000)));
        record.advance_watermark(Some(ts(1_000)));
        record.advance_watermark(None);
        assert_eq!(record.provider_synced_at, Some(ts(2_000)));
    }

    proptest! {
        #[test]
        fn invoice_history_never_holds_duplicate_refs(refs in prop::collection::vec(0u8..8, 0..40)) {
            let mut record = SubscriptionRecord::free(tenant());
            for r in &refs {
                record.append_invoice(InvoiceEntry::new(
                    format!("in_{}", r),
                    100,
                    InvoiceStatus::Paid,
                    ts(1_704_067_200),
                ));
            }

            let mut seen = std::collections::HashSet::new();
            for entry in &record.invoice_history {
                prop_assert!(seen.insert(entry.invoice_ref.clone()));
            }
            let distinct: std::collections::HashSet<_> = refs.iter().collect();
            prop_assert_eq!(record.invoice_history.len(), distinct.len());
        }
    }
}
