pub mod admin;
pub mod auth;
pub mod coaches;
pub mod invitations;
pub mod me;
pub mod members;
pub mod organizations;
pub mod webhooks;
