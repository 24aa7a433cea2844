//! Submission endpoint for maintenance forms: rate limiting, input
//! sanitizing, validation and spreadsheet append.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod rate_limit;
pub mod routes;
pub mod sanitize;
pub mod sheets;
pub mod validation;
