use async_trait::async_trait;
use sqlx::PgPool;
use time::Duration;

use super::rate_limit_repository::RateLimitRepository;

pub struct PostgresRateLimitRepository {
    pub pool: PgPool,
}

#[async_trait]
impl RateLimitRepository for PostgresRateLimitRepository {
    async fn hit(&self, key: &str, limit: i32, window: Duration) -> Result<bool, sqlx::Error> {
        // Single atomic upsert: expired windows reset, live windows count up.
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (key, count, window_ends_at)
            VALUES ($1, 1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET
                count = CASE
                    WHEN rate_limits.window_ends_at < now() THEN 1
                    ELSE rate_limits.count + 1
                END,
                window_ends_at = CASE
                    WHEN rate_limits.window_ends_at < now()
                        THEN now() + make_interval(secs => $2)
                    ELSE rate_limits.window_ends_at
                END
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(window.as_seconds_f64())
        .fetch_one(&self.pool)
        .await?;

        Ok(count <= limit)
    }
}
