//! PostgreSQL implementation of WebhookEventRepository.
//!
//! The `event_ref` primary key makes the claim a single atomic upsert: a new
//! ref inserts a pending row, an expired pending row is re-claimed by the
//! conditional `DO UPDATE`, anything else leaves the row untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    ClaimResult, DedupStatus, EventOutcome, StoreError, WebhookEventRecord, WebhookEventRepository,
};

/// PostgreSQL implementation of the WebhookEventRepository port.
pub struct PostgresWebhookEventRepository {
    pool: PgPool,
}

impl PostgresWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    event_ref: String,
    event_type: String,
    status: String,
    outcome: Option<String>,
    received_at: DateTime<Utc>,
    claimed_at: DateTime<Utc>,
    applied_at: Option<DateTime<Utc>>,
    payload: serde_json::Value,
}

impl TryFrom<WebhookEventRow> for WebhookEventRecord {
    type Error = StoreError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let status = DedupStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid dedup status: {}", row.status)))?;
        let outcome = row
            .outcome
            .as_deref()
            .map(|o| {
                EventOutcome::parse(o)
                    .ok_or_else(|| StoreError::Corrupt(format!("Invalid outcome: {}", o)))
            })
            .transpose()?;

        Ok(WebhookEventRecord {
            event_ref: row.event_ref,
            event_type: row.event_type,
            status,
            outcome,
            received_at: Timestamp::from_datetime(row.received_at),
            claimed_at: Timestamp::from_datetime(row.claimed_at),
            applied_at: row.applied_at.map(Timestamp::from_datetime),
            payload: row.payload,
        })
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn find_by_event_ref(
        &self,
        event_ref: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(
            r#"
            SELECT event_ref, event_type, status, outcome, received_at, claimed_at,
                   applied_at, payload
            FROM webhook_events
            WHERE event_ref = $1
            "#,
        )
        .bind(event_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WebhookEventRecord::try_from).transpose()
    }

    async fn try_claim(
        &self,
        record: WebhookEventRecord,
        lease: Duration,
    ) -> Result<ClaimResult, StoreError> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| StoreError::Unavailable(format!("Invalid lease: {}", e)))?;
        let stale_before = *record.claimed_at.as_datetime() - lease;

        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO webhook_events (
                event_ref, event_type, status, outcome, received_at, claimed_at, applied_at, payload
            ) VALUES ($1, $2, 'pending', NULL, $3, $4, NULL, $5)
            ON CONFLICT (event_ref) DO UPDATE SET claimed_at = EXCLUDED.claimed_at
                WHERE webhook_events.status = 'pending'
                  AND webhook_events.claimed_at <= $6
            RETURNING event_ref
            "#,
        )
        .bind(&record.event_ref)
        .bind(&record.event_type)
        .bind(record.received_at.as_datetime())
        .bind(record.claimed_at.as_datetime())
        .bind(&record.payload)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimResult::Claimed);
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM webhook_events WHERE event_ref = $1")
                .bind(&record.event_ref)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status.as_deref().and_then(DedupStatus::parse) {
            Some(DedupStatus::Applied) => ClaimResult::AlreadyApplied,
            // Pending and live, or purged between the two statements
            _ => ClaimResult::InProgress,
        })
    }

    async fn mark_applied(&self, event_ref: &str, outcome: EventOutcome) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'applied', outcome = $2, applied_at = NOW()
            WHERE event_ref = $1
            "#,
        )
        .bind(event_ref)
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(event_ref.to_string()));
        }
        Ok(())
    }

    async fn release(&self, event_ref: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM webhook_events WHERE event_ref = $1 AND status = 'pending'")
            .bind(event_ref)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE received_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, outcome: Option<&str>) -> WebhookEventRow {
        WebhookEventRow {
            event_ref: "evt_1".into(),
            event_type: "invoice.payment_failed".into(),
            status: status.into(),
            outcome: outcome.map(str::to_string),
            received_at: Utc::now(),
            claimed_at: Utc::now(),
            applied_at: None,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn applied_row_converts() {
        let record = WebhookEventRecord::try_from(row("applied", Some("unknown_tenant"))).unwrap();
        assert_eq!(record.status, DedupStatus::Applied);
        assert_eq!(record.outcome, Some(EventOutcome::UnknownTenant));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        assert!(matches!(
            WebhookEventRecord::try_from(row("done", None)),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn unknown_outcome_is_corrupt() {
        assert!(WebhookEventRecord::try_from(row("applied", Some("maybe"))).is_err());
    }
}
