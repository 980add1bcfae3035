pub mod coach_repository;
pub mod invitation_repository;
pub mod member_repository;
pub mod mock_db;
pub mod organization_repository;
pub mod postgres_coach_repository;
pub mod postgres_invitation_repository;
pub mod postgres_member_repository;
pub mod postgres_organization_repository;
pub mod postgres_rate_limit_repository;
pub mod postgres_user_repository;
pub mod postgres_webhook_event_repository;
pub mod rate_limit_repository;
pub mod user_repository;
pub mod webhook_event_repository;
