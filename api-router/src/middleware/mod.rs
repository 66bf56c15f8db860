pub mod correlation_id;
pub mod require_admin;
