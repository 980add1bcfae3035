use std::sync::Arc;

use crate::config::Config;
use crate::db::coach_repository::CoachRepository;
use crate::db::invitation_repository::InvitationRepository;
use crate::db::member_repository::MemberRepository;
use crate::db::organization_repository::OrganizationRepository;
use crate::db::rate_limit_repository::RateLimitRepository;
use crate::db::user_repository::UserRepository;
use crate::db::webhook_event_repository::WebhookEventRepository;
use crate::services::authz::AuthGate;
use crate::services::identity::IdentityService;
use crate::services::invitations::InvitationService;
use crate::utils::jwt::JwtKeys;

/// Explicit application context built once in `main` and handed to every
/// component; there is no module-level client or pool anywhere.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub orgs: Arc<dyn OrganizationRepository>,
    pub members: Arc<dyn MemberRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
    pub coaches: Arc<dyn CoachRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub rate_limits: Arc<dyn RateLimitRepository>,
    pub identity: Arc<dyn IdentityService>,
    pub gate: Arc<AuthGate>,
    pub invitation_service: Arc<InvitationService>,
    pub jwt_keys: JwtKeys,
    pub config: Arc<Config>,
}

#[cfg(test)]
pub fn test_app_state() -> (
    AppState,
    Arc<crate::db::mock_db::MockDb>,
    Arc<crate::services::identity::MockIdentityService>,
) {
    let db = Arc::new(crate::db::mock_db::MockDb::new());
    let identity = Arc::new(crate::services::identity::MockIdentityService::new());
    let gate = Arc::new(AuthGate::new(db.clone(), db.clone(), db.clone()));
    let invitation_service = Arc::new(InvitationService::new(
        db.clone(),
        db.clone(),
        identity.clone(),
    ));
    let state = AppState {
        users: db.clone(),
        orgs: db.clone(),
        members: db.clone(),
        invitations: db.clone(),
        coaches: db.clone(),
        webhook_events: db.clone(),
        rate_limits: db.clone(),
        identity: identity.clone(),
        gate,
        invitation_service,
        jwt_keys: JwtKeys::from_secret("0123456789abcdef0123456789abcdef").unwrap(),
        config: Arc::new(Config::for_tests()),
    };
    (state, db, identity)
}
