//! PostgreSQL implementation of SubscriptionStore.
//!
//! One row per tenant in `subscription_records`, invoice history in
//! `subscription_invoices`. Writes are conditional on the `version` column;
//! first creation is an `INSERT ... ON CONFLICT DO NOTHING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::billing::{
    BillingCycle, InvoiceEntry, InvoiceStatus, Plan, SubscriptionChange, SubscriptionRecord,
    SubscriptionStatus,
};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{StoreError, SubscriptionStore};

/// PostgreSQL implementation of the SubscriptionStore port.
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT tenant_key, plan, billing_cycle, status, provider_customer_ref,
                   provider_subscription_ref, next_billing_time, change_log,
                   provider_synced_at, version, created_at, updated_at
            FROM subscription_records
            WHERE {} = $1
            "#,
            column
        );
        let row: Option<RecordRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let invoices = self.load_invoices(&row.tenant_key).await?;
        row.into_record(invoices).map(Some)
    }

    async fn load_invoices(&self, tenant_key: &str) -> Result<Vec<InvoiceEntry>, StoreError> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT invoice_ref, amount_cents, status, invoiced_at
            FROM subscription_invoices
            WHERE tenant_key = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(tenant_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(InvoiceRow::into_entry).collect()
    }
}

/// Database row representation of a subscription record.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    tenant_key: String,
    plan: String,
    billing_cycle: String,
    status: String,
    provider_customer_ref: Option<String>,
    provider_subscription_ref: Option<String>,
    next_billing_time: Option<DateTime<Utc>>,
    change_log: serde_json::Value,
    provider_synced_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self, invoice_history: Vec<InvoiceEntry>) -> Result<SubscriptionRecord, StoreError> {
        let corrupt = |what: &str, value: &str| StoreError::Corrupt(format!("Invalid {}: {}", what, value));

        let change_log: Vec<SubscriptionChange> = serde_json::from_value(self.change_log)
            .map_err(|e| StoreError::Corrupt(format!("Invalid change_log: {}", e)))?;

        Ok(SubscriptionRecord {
            tenant_key: TenantKey::new(&self.tenant_key)
                .map_err(|_| corrupt("tenant_key", &self.tenant_key))?,
            plan: self
                .plan
                .parse::<Plan>()
                .map_err(|_| corrupt("plan", &self.plan))?,
            billing_cycle: self
                .billing_cycle
                .parse::<BillingCycle>()
                .map_err(|_| corrupt("billing_cycle", &self.billing_cycle))?,
            status: SubscriptionStatus::parse(&self.status)
                .ok_or_else(|| corrupt("status", &self.status))?,
            provider_customer_ref: self.provider_customer_ref,
            provider_subscription_ref: self.provider_subscription_ref,
            next_billing_time: self.next_billing_time.map(Timestamp::from_datetime),
            invoice_history,
            change_log,
            provider_synced_at: self.provider_synced_at.map(Timestamp::from_datetime),
            version: u64::try_from(self.version)
                .map_err(|_| corrupt("version", &self.version.to_string()))?,
            created_at: Timestamp::from_datetime(self.created_at),
            updated_at: Timestamp::from_datetime(self.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    invoice_ref: String,
    amount_cents: i64,
    status: String,
    invoiced_at: DateTime<Utc>,
}

impl InvoiceRow {
    fn into_entry(self) -> Result<InvoiceEntry, StoreError> {
        let status = InvoiceStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid invoice status: {}", self.status)))?;
        Ok(InvoiceEntry::new(
            self.invoice_ref,
            self.amount_cents,
            status,
            Timestamp::from_datetime(self.invoiced_at),
        ))
    }
}

fn db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("Version out of range: {}", version)))
}

async fn insert_invoice(
    conn: &mut sqlx::PgConnection,
    tenant_key: &TenantKey,
    entry: &InvoiceEntry,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO subscription_invoices (tenant_key, invoice_ref, amount_cents, status, invoiced_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tenant_key, invoice_ref) DO NOTHING
        "#,
    )
    .bind(tenant_key.as_str())
    .bind(&entry.invoice_ref)
    .bind(entry.amount_cents)
    .bind(entry.status.as_str())
    .bind(entry.time.as_datetime())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn get(&self, tenant_key: &TenantKey) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.load_where("tenant_key", tenant_key.as_str()).await
    }

    async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.load_where("provider_customer_ref", customer_ref).await
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.load_where("provider_subscription_ref", subscription_ref)
            .await
    }

    async fn compare_and_swap(
        &self,
        tenant_key: &TenantKey,
        expected_version: u64,
        record: &SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StoreError> {
        let new_version = expected_version + 1;
        let change_log = serde_json::to_value(&record.change_log)
            .map_err(|e| StoreError::Corrupt(format!("Unencodable change_log: {}", e)))?;
        let now = Timestamp::now();

        let mut tx = self.pool.begin().await?;

        if expected_version == 0 {
            let result = sqlx::query(
                r#"
                INSERT INTO subscription_records (
                    tenant_key, plan, billing_cycle, status, provider_customer_ref,
                    provider_subscription_ref, next_billing_time, change_log,
                    provider_synced_at, version, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (tenant_key) DO NOTHING
                "#,
            )
            .bind(tenant_key.as_str())
            .bind(record.plan.as_str())
            .bind(record.billing_cycle.as_str())
            .bind(record.status.as_str())
            .bind(&record.provider_customer_ref)
            .bind(&record.provider_subscription_ref)
            .bind(record.next_billing_time.map(|t| *t.as_datetime()))
            .bind(&change_log)
            .bind(record.provider_synced_at.map(|t| *t.as_datetime()))
            .bind(db_version(new_version)?)
            .bind(record.created_at.as_datetime())
            .bind(now.as_datetime())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::AlreadyExists(tenant_key.to_string()));
            }
        } else {
            let result = sqlx::query(
                r#"
                UPDATE subscription_records SET
                    plan = $3,
                    billing_cycle = $4,
                    status = $5,
                    provider_customer_ref = $6,
                    provider_subscription_ref = $7,
                    next_billing_time = $8,
                    change_log = $9,
                    provider_synced_at = $10,
                    version = $11,
                    updated_at = $12
                WHERE tenant_key = $1 AND version = $2
                "#,
            )
            .bind(tenant_key.as_str())
            .bind(db_version(expected_version)?)
            .bind(record.plan.as_str())
            .bind(record.billing_cycle.as_str())
            .bind(record.status.as_str())
            .bind(&record.provider_customer_ref)
            .bind(&record.provider_subscription_ref)
            .bind(record.next_billing_time.map(|t| *t.as_datetime()))
            .bind(&change_log)
            .bind(record.provider_synced_at.map(|t| *t.as_datetime()))
            .bind(db_version(new_version)?)
            .bind(now.as_datetime())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let actual: Option<i64> = sqlx::query_scalar(
                    "SELECT version FROM subscription_records WHERE tenant_key = $1",
                )
                .bind(tenant_key.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                    actual: actual.and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
                });
            }
        }

        for entry in &record.invoice_history {
            insert_invoice(&mut tx, tenant_key, entry).await?;
        }

        tx.commit().await?;

        let mut stored = record.clone();
        stored.tenant_key = tenant_key.clone();
        stored.version = new_version;
        stored.updated_at = now;
        Ok(stored)
    }

    async fn append_invoice(
        &self,
        tenant_key: &TenantKey,
        entry: &InvoiceEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM subscription_records WHERE tenant_key = $1 FOR UPDATE",
        )
        .bind(tenant_key.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(tenant_key.to_string()));
        }

        let appended = insert_invoice(&mut tx, tenant_key, entry).await?;
        if appended {
            sqlx::query(
                "UPDATE subscription_records SET version = version + 1, updated_at = NOW() WHERE tenant_key = $1",
            )
            .bind(tenant_key.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(appended)
    }
}
