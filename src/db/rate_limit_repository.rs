use async_trait::async_trait;
use time::Duration;

/// Minimal DB-backed fixed-window rate limiter for auth-adjacent public
/// endpoints. The in-memory governor in `main` covers everything else.
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Counts a hit against `key`. Returns false when the key is over
    /// `limit` for the current window.
    async fn hit(&self, key: &str, limit: i32, window: Duration) -> Result<bool, sqlx::Error>;
}
