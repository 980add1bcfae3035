use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::invitation::{Invitation, InvitationStatus, NewInvitation};

use super::invitation_repository::InvitationRepository;

const INVITE_COLUMNS: &str = "id, organization_id, email, role, status, external_invitation_id, \
                              invited_by, last_sent_at, expires_at, accepted_at, revoked_at, \
                              created_at";

pub struct PostgresInvitationRepository {
    pub pool: PgPool,
}

#[async_trait]
impl InvitationRepository for PostgresInvitationRepository {
    async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invitations WHERE organization_id = $1 AND id = $2"
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_any(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invitations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_pending_by_email(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invitations \
             WHERE organization_id = $1 AND email = $2 AND status = 'PENDING'"
        ))
        .bind(org_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn has_accepted_for_email(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM invitations \
             WHERE organization_id = $1 AND email = $2 AND status = 'ACCEPTED')",
        )
        .bind(org_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_by_external_id(
        &self,
        external_invitation_id: &str,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            "SELECT {INVITE_COLUMNS} FROM invitations WHERE external_invitation_id = $1"
        ))
        .bind(external_invitation_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert(&self, new: &NewInvitation) -> Result<Invitation, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            r#"
            INSERT INTO invitations
                (id, organization_id, email, role, external_invitation_id, invited_by,
                 last_sent_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(new.id)
        .bind(new.organization_id)
        .bind(&new.email)
        .bind(new.role)
        .bind(&new.external_invitation_id)
        .bind(new.invited_by)
        .bind(new.last_sent_at)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
    }

    async fn refresh_pending(
        &self,
        id: Uuid,
        external_invitation_id: &str,
        last_sent_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            r#"
            UPDATE invitations
            SET external_invitation_id = $2, last_sent_at = $3, expires_at = $4
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(external_invitation_id)
        .bind(last_sent_at)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_accepted(
        &self,
        id: Uuid,
        accepted_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            r#"
            UPDATE invitations
            SET status = 'ACCEPTED', accepted_at = $2
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(accepted_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_revoked(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            r#"
            UPDATE invitations
            SET status = 'REVOKED', revoked_at = $2
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(revoked_at)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_expired(&self, id: Uuid) -> Result<Option<Invitation>, sqlx::Error> {
        sqlx::query_as::<_, Invitation>(&format!(
            r#"
            UPDATE invitations
            SET status = 'EXPIRED'
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_by_org(
        &self,
        org_id: Uuid,
        status: Option<InvitationStatus>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<Invitation>, i64), sqlx::Error> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);

        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {INVITE_COLUMNS} FROM invitations WHERE organization_id = "
        ));
        let mut count =
            QueryBuilder::<Postgres>::new("SELECT count(*) FROM invitations WHERE organization_id = ");
        for builder in [&mut query, &mut count] {
            builder.push_bind(org_id);
            if let Some(status) = status {
                builder.push(" AND status = ").push_bind(status);
            }
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind((page - 1) * limit);

        let invitations = query
            .build_query_as::<Invitation>()
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((invitations, total))
    }
}
