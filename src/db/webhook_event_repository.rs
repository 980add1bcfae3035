use async_trait::async_trait;

/// Exactly-once gate for externally-delivered events.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Claims (provider, event_id). Returns true when the caller should run
    /// the handler body: first sight, or an earlier attempt that died before
    /// `mark_processed`. Returns false when the event was fully processed.
    async fn claim(&self, provider: &str, event_id: &str) -> Result<bool, sqlx::Error>;

    /// Stamps `processed_at`. Only called after the handler body succeeds.
    async fn mark_processed(&self, provider: &str, event_id: &str) -> Result<(), sqlx::Error>;
}
