use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::user::{AppUser, UserProfilePatch};

use super::user_repository::UserRepository;

const USER_COLUMNS: &str = "id, external_id, email, name, phone, avatar_url, is_super_admin, \
                            is_disabled, last_seen_at, created_at, updated_at";

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

impl PostgresUserRepository {
    async fn touch_existing(
        &self,
        external_id: &str,
        seen_at: OffsetDateTime,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            r#"
            UPDATE app_users
            SET last_seen_at = $2, updated_at = now()
            WHERE external_id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(external_id)
        .bind(seen_at)
        .fetch_optional(&self.pool)
        .await
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<AppUser>, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            "SELECT {USER_COLUMNS} FROM app_users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            "SELECT {USER_COLUMNS} FROM app_users WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_or_create(
        &self,
        external_id: &str,
        seen_at: OffsetDateTime,
    ) -> Result<AppUser, sqlx::Error> {
        if let Some(user) = self.touch_existing(external_id, seen_at).await? {
            return Ok(user);
        }

        let inserted = sqlx::query_as::<_, AppUser>(&format!(
            r#"
            INSERT INTO app_users (external_id, last_seen_at)
            VALUES ($1, $2)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(external_id)
        .bind(seen_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(user) => Ok(user),
            // Lost the first-request race; the winner's row is visible now.
            None => self
                .touch_existing(external_id, seen_at)
                .await?
                .ok_or(sqlx::Error::RowNotFound),
        }
    }

    async fn upsert_from_provider(
        &self,
        external_id: &str,
        profile: &UserProfilePatch,
    ) -> Result<AppUser, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            r#"
            INSERT INTO app_users (external_id, email, name, phone, avatar_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (external_id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, app_users.email),
                name = COALESCE(EXCLUDED.name, app_users.name),
                phone = COALESCE(EXCLUDED.phone, app_users.phone),
                avatar_url = COALESCE(EXCLUDED.avatar_url, app_users.avatar_url),
                updated_at = now()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(external_id)
        .bind(profile.email.as_deref())
        .bind(profile.name.as_deref())
        .bind(profile.phone.as_deref())
        .bind(profile.avatar_url.as_deref())
        .fetch_one(&self.pool)
        .await
    }

    async fn set_super_admin(
        &self,
        user_id: Uuid,
        is_super_admin: bool,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            r#"
            UPDATE app_users
            SET is_super_admin = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(is_super_admin)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_disabled(
        &self,
        user_id: Uuid,
        is_disabled: bool,
    ) -> Result<Option<AppUser>, sqlx::Error> {
        sqlx::query_as::<_, AppUser>(&format!(
            r#"
            UPDATE app_users
            SET is_disabled = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(is_disabled)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<AppUser>, i64), sqlx::Error> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM app_users"));
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM app_users");
        if let Some(term) = search.filter(|t| !t.trim().is_empty()) {
            let pattern = format!("%{}%", term.trim());
            for builder in [&mut query, &mut count] {
                builder
                    .push(" WHERE email ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR name ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR external_id ILIKE ")
                    .push_bind(pattern.clone());
            }
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind((page - 1) * limit);

        let users = query
            .build_query_as::<AppUser>()
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((users, total))
    }
}
