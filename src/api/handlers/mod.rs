//! API handlers for the auth service.

pub mod auth;
pub mod health;
