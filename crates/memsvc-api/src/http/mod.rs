pub mod admin;
pub mod attachments;
pub mod conversations;
pub mod health;
pub mod memberships;
pub mod resume;
pub mod transfers;
