use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::member::MemberRole;
use crate::models::organization::{
    Organization, OrganizationMembershipSummary, OrgSettings, OrgSettingsPatch,
};
use crate::utils::slug::slug_candidates;

use super::organization_repository::{OrganizationRepository, PLACEHOLDER_ORG_NAME};

const ORG_COLUMNS: &str =
    "id, external_id, name, slug, primary_admin_user_id, created_at, updated_at";
const SETTINGS_COLUMNS: &str =
    "organization_id, timezone, currency, features, integration_credentials, updated_at";

const SLUG_ATTEMPTS: usize = 50;

fn is_slug_collision(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .map(|c| c == "organizations_slug_key")
        .unwrap_or(false)
}

pub struct PostgresOrganizationRepository {
    pub pool: PgPool,
}

impl PostgresOrganizationRepository {
    /// Inserts with the first free slug derived from `name`.
    async fn insert_with_slug(
        &self,
        external_id: &str,
        name: &str,
    ) -> Result<Organization, sqlx::Error> {
        for slug in slug_candidates(name).take(SLUG_ATTEMPTS) {
            let result = sqlx::query_as::<_, Organization>(&format!(
                r#"
                INSERT INTO organizations (external_id, name, slug)
                VALUES ($1, $2, $3)
                RETURNING {ORG_COLUMNS}
                "#
            ))
            .bind(external_id)
            .bind(name)
            .bind(&slug)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(org) => return Ok(org),
                Err(err) if is_slug_collision(&err) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(sqlx::Error::Protocol(
            "exhausted slug candidates for organization".into(),
        ))
    }

    async fn rename_with_slug(
        &self,
        org_id: Uuid,
        name: &str,
    ) -> Result<Organization, sqlx::Error> {
        for slug in slug_candidates(name).take(SLUG_ATTEMPTS) {
            let result = sqlx::query_as::<_, Organization>(&format!(
                r#"
                UPDATE organizations
                SET name = $2, slug = $3, updated_at = now()
                WHERE id = $1
                RETURNING {ORG_COLUMNS}
                "#
            ))
            .bind(org_id)
            .bind(name)
            .bind(&slug)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(org) => return Ok(org),
                Err(err) if is_slug_collision(&err) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(sqlx::Error::Protocol(
            "exhausted slug candidates for organization".into(),
        ))
    }
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
    async fn find_by_id(&self, org_id: Uuid) -> Result<Option<Organization>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_or_create_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Organization, sqlx::Error> {
        if let Some(org) = self.find_by_external_id(external_id).await? {
            self.ensure_settings(org.id).await?;
            return Ok(org);
        }

        let created = self
            .insert_with_slug(external_id, PLACEHOLDER_ORG_NAME)
            .await;
        let org = match created {
            Ok(org) => org,
            Err(err) => {
                // Create race on external_id: fall back to the winner's row.
                let duplicate_external = err
                    .as_database_error()
                    .and_then(|db| db.constraint())
                    .map(|c| c == "organizations_external_id_key")
                    .unwrap_or(false);
                if duplicate_external {
                    self.find_by_external_id(external_id)
                        .await?
                        .ok_or(sqlx::Error::RowNotFound)?
                } else {
                    return Err(err);
                }
            }
        };
        self.ensure_settings(org.id).await?;
        Ok(org)
    }

    async fn create(&self, external_id: &str, name: &str) -> Result<Organization, sqlx::Error> {
        let org = self.insert_with_slug(external_id, name).await?;
        self.ensure_settings(org.id).await?;
        Ok(org)
    }

    async fn upsert_from_provider_event(
        &self,
        external_id: &str,
        name: &str,
    ) -> Result<Organization, sqlx::Error> {
        match self.find_by_external_id(external_id).await? {
            None => self.create(external_id, name).await,
            Some(existing) if existing.name == PLACEHOLDER_ORG_NAME => {
                // First real sync replaces the placeholder slug too.
                self.rename_with_slug(existing.id, name).await
            }
            Some(existing) => {
                sqlx::query_as::<_, Organization>(&format!(
                    r#"
                    UPDATE organizations
                    SET name = $2, updated_at = now()
                    WHERE id = $1
                    RETURNING {ORG_COLUMNS}
                    "#
                ))
                .bind(existing.id)
                .bind(name)
                .fetch_one(&self.pool)
                .await
            }
        }
    }

    async fn delete_by_external_id(&self, external_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM organizations WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_primary_admin(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(&format!(
            r#"
            UPDATE organizations
            SET primary_admin_user_id = $2, updated_at = now()
            WHERE id = $1
            RETURNING {ORG_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn rename(&self, org_id: Uuid, name: &str) -> Result<Option<Organization>, sqlx::Error> {
        sqlx::query_as::<_, Organization>(&format!(
            r#"
            UPDATE organizations
            SET name = $2, updated_at = now()
            WHERE id = $1
            RETURNING {ORG_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list(
        &self,
        page: i64,
        limit: i64,
        search: Option<&str>,
    ) -> Result<(Vec<Organization>, i64), sqlx::Error> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {ORG_COLUMNS} FROM organizations"));
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM organizations");
        if let Some(term) = search.filter(|t| !t.trim().is_empty()) {
            let pattern = format!("%{}%", term.trim());
            for builder in [&mut query, &mut count] {
                builder
                    .push(" WHERE name ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR slug ILIKE ")
                    .push_bind(pattern.clone());
            }
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind((page - 1) * limit);

        let orgs = query
            .build_query_as::<Organization>()
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((orgs, total))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<OrganizationMembershipSummary>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT o.id,
                   o.external_id,
                   o.name,
                   o.slug,
                   o.primary_admin_user_id,
                   o.created_at,
                   o.updated_at,
                   m.role
            FROM members m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY o.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrganizationMembershipSummary {
                organization: Organization {
                    id: row.id,
                    external_id: row.external_id,
                    name: row.name,
                    slug: row.slug,
                    primary_admin_user_id: row.primary_admin_user_id,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                },
                role: row.role,
            })
            .collect())
    }

    async fn ensure_settings(&self, org_id: Uuid) -> Result<OrgSettings, sqlx::Error> {
        sqlx::query(
            "INSERT INTO org_settings (organization_id) VALUES ($1) \
             ON CONFLICT (organization_id) DO NOTHING",
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, OrgSettings>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM org_settings WHERE organization_id = $1"
        ))
        .bind(org_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn update_settings(
        &self,
        org_id: Uuid,
        patch: &OrgSettingsPatch,
    ) -> Result<OrgSettings, sqlx::Error> {
        self.ensure_settings(org_id).await?;

        sqlx::query_as::<_, OrgSettings>(&format!(
            r#"
            UPDATE org_settings
            SET timezone = COALESCE($2, timezone),
                currency = COALESCE($3, currency),
                features = COALESCE($4, features),
                updated_at = now()
            WHERE organization_id = $1
            RETURNING {SETTINGS_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(patch.timezone.as_deref())
        .bind(patch.currency.as_deref())
        .bind(patch.features.as_ref())
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    id: Uuid,
    external_id: String,
    name: String,
    slug: String,
    primary_admin_user_id: Option<Uuid>,
    created_at: time::OffsetDateTime,
    updated_at: time::OffsetDateTime,
    role: MemberRole,
}
