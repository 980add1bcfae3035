pub mod coach;
pub mod invitation;
pub mod member;
pub mod organization;
pub mod user;
pub mod webhook_event;
