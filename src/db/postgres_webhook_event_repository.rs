use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::webhook_event_repository::WebhookEventRepository;

pub struct PostgresWebhookEventRepository {
    pub pool: PgPool,
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn claim(&self, provider: &str, event_id: &str) -> Result<bool, sqlx::Error> {
        let inserted = sqlx::query(
            "INSERT INTO webhook_events (provider, event_id) VALUES ($1, $2) \
             ON CONFLICT (provider, event_id) DO NOTHING",
        )
        .bind(provider)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(true);
        }

        // Row exists. A NULL processed_at means an earlier attempt died
        // mid-handler; the provider's retry should run the work again.
        let processed_at: Option<OffsetDateTime> = sqlx::query_scalar(
            "SELECT processed_at FROM webhook_events WHERE provider = $1 AND event_id = $2",
        )
        .bind(provider)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(processed_at.is_none())
    }

    async fn mark_processed(&self, provider: &str, event_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_events SET processed_at = now() \
             WHERE provider = $1 AND event_id = $2",
        )
        .bind(provider)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
