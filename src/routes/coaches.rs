use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::coach_repository::CoachRepository;
use crate::db::member_repository::MemberRepository;
use crate::errors::ApiError;
use crate::models::coach::{CoachAvailability, CoachProfilePatch, NewAvailability};
use crate::models::member::MemberRole;
use crate::responses::ApiResponse;
use crate::routes::auth::AuthSession;
use crate::services::authz::{OrgGuard, ADMIN_ROLES};
use crate::state::AppState;
use crate::utils::timeslot::{format_hhmm, parse_hhmm};

const COACH_ONLY: &[MemberRole] = &[MemberRole::Coach];

/// HH:mm view of an availability slot, the only shape the API speaks.
#[derive(Debug, Serialize)]
pub struct AvailabilitySlotDto {
    pub id: Uuid,
    pub day_of_week: i16,
    pub start: String,
    pub end: String,
}

impl From<CoachAvailability> for AvailabilitySlotDto {
    fn from(slot: CoachAvailability) -> Self {
        Self {
            id: slot.id,
            day_of_week: slot.day_of_week,
            start: format_hhmm(slot.start_minutes),
            end: format_hhmm(slot.end_minutes),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotPayload {
    pub day_of_week: i16,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceAvailabilityPayload {
    pub slots: Vec<SlotPayload>,
}

fn validate_slots(slots: &[SlotPayload]) -> Result<Vec<NewAvailability>, ApiError> {
    let mut parsed = Vec::with_capacity(slots.len());
    let mut field_errors: HashMap<String, Vec<String>> = HashMap::new();
    for (index, slot) in slots.iter().enumerate() {
        if !(0..=6).contains(&slot.day_of_week) {
            field_errors
                .entry(format!("slots[{index}].day_of_week"))
                .or_default()
                .push("Day of week must be between 0 and 6".to_string());
        }
        let start = parse_hhmm(&slot.start);
        if start.is_none() {
            field_errors
                .entry(format!("slots[{index}].start"))
                .or_default()
                .push("Expected HH:mm".to_string());
        }
        let end = parse_hhmm(&slot.end);
        if end.is_none() {
            field_errors
                .entry(format!("slots[{index}].end"))
                .or_default()
                .push("Expected HH:mm".to_string());
        }
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                field_errors
                    .entry(format!("slots[{index}].start"))
                    .or_default()
                    .push("Start must be before end".to_string());
            } else {
                parsed.push(NewAvailability {
                    day_of_week: slot.day_of_week,
                    start_minutes: start,
                    end_minutes: end,
                });
            }
        }
    }
    if !field_errors.is_empty() {
        return Err(ApiError::Validation(field_errors));
    }
    Ok(parsed)
}

/// Resolves the acting coach's own profile. Self-service routes never apply
/// the super-admin override: a platform operator has no coach profile.
async fn own_profile(
    app_state: &AppState,
    claims: &crate::routes::auth::claims::SessionClaims,
) -> Result<crate::models::coach::CoachProfile, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(claims, OrgGuard::roles(COACH_ONLY).without_super_admin())
        .await?;
    let member = ctx.access.member().ok_or(ApiError::NoMembership)?;
    app_state
        .coaches
        .find_profile_by_member(member.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))
}

/// Resolves a target coach's profile for the admin variants.
async fn member_profile(
    app_state: &AppState,
    claims: &crate::routes::auth::claims::SessionClaims,
    external_user_id: &str,
) -> Result<crate::models::coach::CoachProfile, ApiError> {
    let ctx = app_state
        .gate
        .require_org_access(claims, OrgGuard::roles(ADMIN_ROLES))
        .await?;
    let target = app_state
        .members
        .find_by_external_user_id(ctx.organization.id, external_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Member not found".to_string()))?;
    app_state
        .coaches
        .find_profile_by_member(target.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))
}

// GET /api/me/coach-profile
pub async fn get_my_profile(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, ApiError> {
    let profile = own_profile(&app_state, &claims).await?;
    Ok(ApiResponse::ok(profile).into_response())
}

// PUT /api/me/coach-profile
pub async fn update_my_profile(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(patch): Json<CoachProfilePatch>,
) -> Result<Response, ApiError> {
    let profile = own_profile(&app_state, &claims).await?;
    let updated = app_state
        .coaches
        .update_profile(profile.member_id, &patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))?;
    Ok(ApiResponse::ok(updated).into_response())
}

// GET /api/me/coach-availability
pub async fn get_my_availability(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> Result<Response, ApiError> {
    let profile = own_profile(&app_state, &claims).await?;
    let slots = app_state.coaches.list_availability(profile.id).await?;
    let dtos: Vec<AvailabilitySlotDto> = slots.into_iter().map(Into::into).collect();
    Ok(ApiResponse::ok(dtos).into_response())
}

// PUT /api/me/coach-availability
pub async fn replace_my_availability(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Json(payload): Json<ReplaceAvailabilityPayload>,
) -> Result<Response, ApiError> {
    let profile = own_profile(&app_state, &claims).await?;
    let slots = validate_slots(&payload.slots)?;
    let saved = app_state
        .coaches
        .replace_availability(profile.id, &slots)
        .await?;
    let dtos: Vec<AvailabilitySlotDto> = saved.into_iter().map(Into::into).collect();
    Ok(ApiResponse::ok(dtos).into_response())
}

// GET /api/members/{external_user_id}/coach-profile
pub async fn get_member_profile(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
) -> Result<Response, ApiError> {
    let profile = member_profile(&app_state, &claims, &external_user_id).await?;
    Ok(ApiResponse::ok(profile).into_response())
}

// PUT /api/members/{external_user_id}/coach-profile
pub async fn update_member_profile(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
    Json(patch): Json<CoachProfilePatch>,
) -> Result<Response, ApiError> {
    let profile = member_profile(&app_state, &claims, &external_user_id).await?;
    let updated = app_state
        .coaches
        .update_profile(profile.member_id, &patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("Coach profile not found".to_string()))?;
    Ok(ApiResponse::ok(updated).into_response())
}

// GET /api/members/{external_user_id}/coach-availability
pub async fn get_member_availability(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
) -> Result<Response, ApiError> {
    let profile = member_profile(&app_state, &claims, &external_user_id).await?;
    let slots = app_state.coaches.list_availability(profile.id).await?;
    let dtos: Vec<AvailabilitySlotDto> = slots.into_iter().map(Into::into).collect();
    Ok(ApiResponse::ok(dtos).into_response())
}

// PUT /api/members/{external_user_id}/coach-availability
pub async fn replace_member_availability(
    State(app_state): State<AppState>,
    AuthSession(claims): AuthSession,
    Path(external_user_id): Path<String>,
    Json(payload): Json<ReplaceAvailabilityPayload>,
) -> Result<Response, ApiError> {
    let profile = member_profile(&app_state, &claims, &external_user_id).await?;
    let slots = validate_slots(&payload.slots)?;
    let saved = app_state
        .coaches
        .replace_availability(profile.id, &slots)
        .await?;
    let dtos: Vec<AvailabilitySlotDto> = saved.into_iter().map(Into::into).collect();
    Ok(ApiResponse::ok(dtos).into_response())
}
