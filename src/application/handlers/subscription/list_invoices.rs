//! ListInvoicesHandler - merges the provider's recent invoices into the
//! tenant's invoice history and returns it.

use std::sync::Arc;

use crate::domain::billing::{BillingError, InvoiceEntry, InvoiceStatus};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{PaymentProvider, ProviderInvoice, SubscriptionStore};

use super::reconcile::{ReconcilePolicy, Reconciler};

/// How many recent invoices are fetched from the provider.
pub const INVOICE_FETCH_LIMIT: u8 = 10;

/// Query for a tenant's invoices.
#[derive(Debug, Clone)]
pub struct ListInvoicesQuery {
    pub tenant_key: TenantKey,
}

/// Handler for invoice listing.
///
/// Backfills invoices the webhook path missed. Appends are idempotent by
/// invoice ref, so a webhook entry is never replaced by a backfilled one.
pub struct ListInvoicesHandler {
    reconciler: Reconciler,
}

impl ListInvoicesHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            reconciler: Reconciler::new(store, provider, ReconcilePolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconciler = self.reconciler.with_policy(policy);
        self
    }

    pub async fn handle(&self, query: ListInvoicesQuery) -> Result<Vec<InvoiceEntry>, BillingError> {
        // 1. Find the record
        let record = self.reconciler.load(&query.tenant_key).await?;
        let Some(customer_ref) = record.provider_customer_ref.clone() else {
            return Ok(record.invoice_history);
        };

        // 2. Fetch recent invoices (best-effort)
        let invoices = match self
            .reconciler
            .call_provider(
                "list_invoices",
                self.reconciler
                    .provider()
                    .list_invoices(&customer_ref, INVOICE_FETCH_LIMIT),
            )
            .await
        {
            Ok(invoices) => invoices,
            Err(err) => {
                tracing::warn!(
                    tenant_key = %query.tenant_key,
                    error = %err,
                    "Invoice listing failed; returning stored history"
                );
                return Ok(record.invoice_history);
            }
        };

        // 3. Backfill oldest first so history stays in chronological order
        let mut appended = 0;
        for invoice in invoices.iter().rev() {
            if record.has_invoice(&invoice.id) {
                continue;
            }
            let Some(entry) = to_entry(invoice) else {
                continue;
            };
            if self
                .reconciler
                .store()
                .append_invoice(&query.tenant_key, &entry)
                .await?
            {
                appended += 1;
            }
        }

        if appended == 0 {
            return Ok(record.invoice_history);
        }
        tracing::debug!(tenant_key = %query.tenant_key, appended, "Backfilled invoices");

        // 4. Re-read the merged history
        Ok(self.reconciler.load(&query.tenant_key).await?.invoice_history)
    }
}

fn to_entry(invoice: &ProviderInvoice) -> Option<InvoiceEntry> {
    let status = InvoiceStatus::parse(&invoice.status)?;
    let amount_cents = if status == InvoiceStatus::Paid {
        invoice.amount_paid
    } else {
        invoice.amount_due
    };
    let time = Timestamp::from_unix_secs(invoice.created).unwrap_or_else(Timestamp::now);
    Some(InvoiceEntry::new(invoice.id.clone(), amount_cents, status, time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::domain::billing::{BillingCycle, Plan, SubscriptionRecord};
    use crate::ports::PaymentError;

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    fn invoice(id: &str, status: &str, created: i64) -> ProviderInvoice {
        ProviderInvoice {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            subscription_id: Some("sub_1".to_string()),
            status: status.to_string(),
            amount_paid: if status == "paid" { 2_900 } else { 0 },
            amount_due: 2_900,
            created,
        }
    }

    async fn setup() -> (
        ListInvoicesHandler,
        Arc<InMemorySubscriptionStore>,
        MockPaymentProvider,
    ) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let mut record = SubscriptionRecord::free(tenant());
        record.activate(
            Plan::Basic,
            BillingCycle::Monthly,
            "cus_1".into(),
            "sub_1".into(),
            Timestamp::now(),
        );
        record.append_invoice(InvoiceEntry::new(
            "in_1",
            2_900,
            InvoiceStatus::Paid,
            Timestamp::from_unix_secs(1_000).unwrap(),
        ));
        store.seed(record).await;
        let provider = MockPaymentProvider::new();
        (
            ListInvoicesHandler::new(store.clone(), Arc::new(provider.clone())),
            store,
            provider,
        )
    }

    #[tokio::test]
    async fn backfills_missing_invoices_in_order() {
        let (handler, _, provider) = setup().await;
        provider.add_invoice(invoice("in_1", "paid", 1_000));
        provider.add_invoice(invoice("in_2", "open", 2_000));
        provider.add_invoice(invoice("in_3", "paid", 3_000));

        let history = handler
            .handle(ListInvoicesQuery {
                tenant_key: tenant(),
            })
            .await
            .unwrap();

        let refs: Vec<&str> = history.iter().map(|e| e.invoice_ref.as_str()).collect();
        assert_eq!(refs, vec!["in_1", "in_2", "in_3"]);
        assert_eq!(history[1].status, InvoiceStatus::Open);
        assert_eq!(history[1].amount_cents, 2_900);
    }

    #[tokio::test]
    async fn nothing_new_means_no_write() {
        let (handler, store, provider) = setup().await;
        provider.add_invoice(invoice("in_1", "paid", 1_000));
        let writes = store.write_count();

        let history = handler
            .handle(ListInvoicesQuery {
                tenant_key: tenant(),
            })
            .await
            .unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn provider_failure_returns_stored_history() {
        let (handler, _, provider) = setup().await;
        provider.set_method_error("list_invoices", PaymentError::network("reset"));

        let history = handler
            .handle(ListInvoicesQuery {
                tenant_key: tenant(),
            })
            .await
            .unwrap();

        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn unknown_status_is_skipped() {
        let (handler, _, provider) = setup().await;
        provider.add_invoice(invoice("in_9", "mystery", 9_000));

        let history = handler
            .handle(ListInvoicesQuery {
                tenant_key: tenant(),
            })
            .await
            .unwrap();

        assert!(!history.iter().any(|e| e.invoice_ref == "in_9"));
    }
}
