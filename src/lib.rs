//! cirrusfeed - Backfill and observe Ambient Weather station data.
pub mod core;
pub mod ingest;
pub mod integration;
pub mod server;
pub mod services;
