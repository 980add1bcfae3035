pub mod authz;
pub mod identity;
pub mod invitations;
