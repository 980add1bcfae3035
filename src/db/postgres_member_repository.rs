use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::models::member::{Member, MemberFilters, MemberRole, MemberStatus, MemberWithUser};

use super::member_repository::{MemberLedgerError, MemberRepository};

const MEMBER_COLUMNS: &str =
    "id, organization_id, user_id, role, status, created_at, disabled_at, disabled_reason";

fn constraint_is(err: &sqlx::Error, name: &str) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .map(|c| c == name)
        .unwrap_or(false)
}

pub struct PostgresMemberRepository {
    pub pool: PgPool,
}

impl PostgresMemberRepository {
    /// Locks and returns the target member row for the duration of `tx`.
    async fn lock_member(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members \
             WHERE organization_id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Locks every owner row of the org so concurrent demotions serialize,
    /// then reports how many owners exist.
    async fn lock_owner_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        org_id: Uuid,
    ) -> Result<usize, sqlx::Error> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM members \
             WHERE organization_id = $1 AND role = 'owner' FOR UPDATE",
        )
        .bind(org_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(ids.len())
    }

    /// Writes the role and keeps the coach-profile coupling intact inside
    /// the caller's transaction: leaving coach deletes the profile, becoming
    /// coach creates an empty one.
    async fn apply_role_change(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        member: &Member,
        new_role: MemberRole,
    ) -> Result<Member, sqlx::Error> {
        if member.role == MemberRole::Coach && new_role != MemberRole::Coach {
            sqlx::query("DELETE FROM coach_profiles WHERE member_id = $1")
                .bind(member.id)
                .execute(&mut **tx)
                .await?;
        }
        if member.role != MemberRole::Coach && new_role == MemberRole::Coach {
            sqlx::query("INSERT INTO coach_profiles (member_id) VALUES ($1)")
                .bind(member.id)
                .execute(&mut **tx)
                .await?;
        }

        sqlx::query_as::<_, Member>(&format!(
            "UPDATE members SET role = $2 WHERE id = $1 RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(member.id)
        .bind(new_role)
        .fetch_one(&mut **tx)
        .await
    }
}

#[async_trait]
impl MemberRepository for PostgresMemberRepository {
    async fn find(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE organization_id = $1 AND user_id = $2"
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_by_external_user_id(
        &self,
        org_id: Uuid,
        external_user_id: &str,
    ) -> Result<Option<MemberWithUser>, sqlx::Error> {
        sqlx::query_as::<_, MemberWithUser>(
            r#"
            SELECT m.id, m.organization_id, m.user_id, u.external_id AS external_user_id,
                   u.email, u.name, m.role, m.status, m.created_at
            FROM members m
            JOIN app_users u ON u.id = m.user_id
            WHERE m.organization_id = $1 AND u.external_id = $2
            "#,
        )
        .bind(org_id)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, MemberLedgerError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query_as::<_, Member>(&format!(
            r#"
            INSERT INTO members (organization_id, user_id, role, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(user_id)
        .bind(role)
        .bind(status)
        .fetch_one(&mut *tx)
        .await;

        match result {
            Ok(member) => {
                if member.role == MemberRole::Coach {
                    sqlx::query("INSERT INTO coach_profiles (member_id) VALUES ($1)")
                        .bind(member.id)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(member)
            }
            Err(err) if constraint_is(&err, "members_organization_id_user_id_key") => {
                Err(MemberLedgerError::AlreadyExists)
            }
            Err(err) if constraint_is(&err, "members_single_owner_idx") => {
                Err(MemberLedgerError::OwnerExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError> {
        if new_role == MemberRole::Owner {
            return Err(MemberLedgerError::PromoteToOwner);
        }

        let mut tx = self.pool.begin().await?;
        let member = self
            .lock_member(&mut tx, org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner {
            let owners = self.lock_owner_rows(&mut tx, org_id).await?;
            if owners <= 1 {
                return Err(MemberLedgerError::LastOwner);
            }
            return Err(MemberLedgerError::OwnerImmutable);
        }

        if member.role == new_role {
            return Ok(member);
        }

        let updated = self.apply_role_change(&mut tx, &member, new_role).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn set_status(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_status: MemberStatus,
        reason: Option<&str>,
    ) -> Result<Member, MemberLedgerError> {
        let mut tx = self.pool.begin().await?;
        let member = self
            .lock_member(&mut tx, org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner && new_status == MemberStatus::Disabled {
            return Err(MemberLedgerError::OwnerDisable);
        }

        let disabled = new_status == MemberStatus::Disabled;
        let updated = sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET status = $2,
                disabled_at = CASE WHEN $3 THEN now() ELSE NULL END,
                disabled_reason = $4
            WHERE id = $1
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(member.id)
        .bind(new_status)
        .bind(disabled)
        .bind(if disabled { reason } else { None })
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn remove(&self, org_id: Uuid, user_id: Uuid) -> Result<(), MemberLedgerError> {
        let mut tx = self.pool.begin().await?;
        let member = self
            .lock_member(&mut tx, org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner {
            return Err(MemberLedgerError::OwnerRemove);
        }

        sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(member.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn convert_to_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Member, MemberLedgerError> {
        let mut tx = self.pool.begin().await?;
        let member = self
            .lock_member(&mut tx, org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role == MemberRole::Owner {
            return Err(MemberLedgerError::OwnerImmutable);
        }
        if member.role == MemberRole::Coach {
            return Err(MemberLedgerError::AlreadyCoach);
        }

        let updated = self
            .apply_role_change(&mut tx, &member, MemberRole::Coach)
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn convert_from_coach(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
    ) -> Result<Member, MemberLedgerError> {
        if new_role == MemberRole::Owner {
            return Err(MemberLedgerError::PromoteToOwner);
        }

        let mut tx = self.pool.begin().await?;
        let member = self
            .lock_member(&mut tx, org_id, user_id)
            .await?
            .ok_or(MemberLedgerError::NotFound)?;

        if member.role != MemberRole::Coach {
            return Err(MemberLedgerError::NotACoach);
        }

        let updated = self.apply_role_change(&mut tx, &member, new_role).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn list_by_org(
        &self,
        org_id: Uuid,
        filters: &MemberFilters,
    ) -> Result<Vec<MemberWithUser>, sqlx::Error> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT m.id, m.organization_id, m.user_id, u.external_id AS external_user_id, \
             u.email, u.name, m.role, m.status, m.created_at \
             FROM members m JOIN app_users u ON u.id = m.user_id \
             WHERE m.organization_id = ",
        );
        query.push_bind(org_id);
        if let Some(role) = filters.role {
            query.push(" AND m.role = ").push_bind(role);
        }
        if let Some(status) = filters.status {
            query.push(" AND m.status = ").push_bind(status);
        }
        query.push(
            " ORDER BY CASE m.role \
               WHEN 'owner' THEN 0 WHEN 'admin' THEN 1 WHEN 'coach' THEN 2 ELSE 3 END, \
             lower(coalesce(u.name, u.email, u.external_id)) ASC",
        );

        query
            .build_query_as::<MemberWithUser>()
            .fetch_all(&self.pool)
            .await
    }

    async fn upsert_from_provider(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        status: MemberStatus,
    ) -> Result<Member, sqlx::Error> {
        let result = sqlx::query_as::<_, Member>(&format!(
            r#"
            INSERT INTO members (organization_id, user_id, role, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (organization_id, user_id) DO UPDATE
                SET role = EXCLUDED.role, status = EXCLUDED.status
                WHERE members.role <> 'owner'
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(user_id)
        .bind(role)
        .bind(status)
        .fetch_optional(&self.pool)
        .await;

        match result {
            // Upsert skipped because the existing row is an owner.
            Ok(None) => self
                .find(org_id, user_id)
                .await?
                .ok_or(sqlx::Error::RowNotFound),
            Ok(Some(member)) => Ok(member),
            Err(err) if constraint_is(&err, "members_single_owner_idx") => {
                // Provider claims a second owner; keep the local owner and
                // leave this row as it was.
                tracing::warn!(%org_id, %user_id, "ignoring provider owner upsert: org already has an owner");
                self.find(org_id, user_id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)
            }
            Err(err) => Err(err),
        }
    }

    async fn remove_from_provider(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM members \
             WHERE organization_id = $1 AND user_id = $2 AND role <> 'owner'",
        )
        .bind(org_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn activate_if_invited(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Member>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            r#"
            UPDATE members
            SET status = 'ACTIVE'
            WHERE organization_id = $1 AND user_id = $2 AND status = 'INVITED'
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn email_is_member(&self, org_id: Uuid, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM members m
                JOIN app_users u ON u.id = m.user_id
                WHERE m.organization_id = $1
                  AND lower(u.email) = lower($2)
                  AND m.status <> 'DISABLED'
            )
            "#,
        )
        .bind(org_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
    }
}
