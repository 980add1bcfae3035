use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Idempotency record for externally-delivered events, one row per
/// (provider, event id). `processed_at` is stamped only after the handler
/// body completes, so provider retries re-attempt unfinished work.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}
