//! External API integrations.
pub mod ambient;
