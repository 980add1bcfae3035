use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::coach::{CoachAvailability, CoachProfile, CoachProfilePatch, NewAvailability};

use super::coach_repository::CoachRepository;

const PROFILE_COLUMNS: &str =
    "id, member_id, bio, notes, address, zip, phone, nickname, created_at, updated_at";
const AVAILABILITY_COLUMNS: &str =
    "id, coach_profile_id, day_of_week, start_minutes, end_minutes";

pub struct PostgresCoachRepository {
    pub pool: PgPool,
}

#[async_trait]
impl CoachRepository for PostgresCoachRepository {
    async fn find_profile_by_member(
        &self,
        member_id: Uuid,
    ) -> Result<Option<CoachProfile>, sqlx::Error> {
        sqlx::query_as::<_, CoachProfile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM coach_profiles WHERE member_id = $1"
        ))
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_profile(
        &self,
        member_id: Uuid,
        patch: &CoachProfilePatch,
    ) -> Result<Option<CoachProfile>, sqlx::Error> {
        sqlx::query_as::<_, CoachProfile>(&format!(
            r#"
            UPDATE coach_profiles
            SET bio = COALESCE($2, bio),
                notes = COALESCE($3, notes),
                address = COALESCE($4, address),
                zip = COALESCE($5, zip),
                phone = COALESCE($6, phone),
                nickname = COALESCE($7, nickname),
                updated_at = now()
            WHERE member_id = $1
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(member_id)
        .bind(patch.bio.as_deref())
        .bind(patch.notes.as_deref())
        .bind(patch.address.as_deref())
        .bind(patch.zip.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.nickname.as_deref())
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_availability(
        &self,
        coach_profile_id: Uuid,
    ) -> Result<Vec<CoachAvailability>, sqlx::Error> {
        sqlx::query_as::<_, CoachAvailability>(&format!(
            "SELECT {AVAILABILITY_COLUMNS} FROM coach_availability \
             WHERE coach_profile_id = $1 \
             ORDER BY day_of_week ASC, start_minutes ASC"
        ))
        .bind(coach_profile_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn replace_availability(
        &self,
        coach_profile_id: Uuid,
        slots: &[NewAvailability],
    ) -> Result<Vec<CoachAvailability>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM coach_availability WHERE coach_profile_id = $1")
            .bind(coach_profile_id)
            .execute(&mut *tx)
            .await?;

        let mut saved = Vec::with_capacity(slots.len());
        for slot in slots {
            let row = sqlx::query_as::<_, CoachAvailability>(&format!(
                r#"
                INSERT INTO coach_availability
                    (coach_profile_id, day_of_week, start_minutes, end_minutes)
                VALUES ($1, $2, $3, $4)
                RETURNING {AVAILABILITY_COLUMNS}
                "#
            ))
            .bind(coach_profile_id)
            .bind(slot.day_of_week)
            .bind(slot.start_minutes)
            .bind(slot.end_minutes)
            .fetch_one(&mut *tx)
            .await?;
            saved.push(row);
        }

        tx.commit().await?;
        saved.sort_by_key(|s| (s.day_of_week, s.start_minutes));
        Ok(saved)
    }
}
