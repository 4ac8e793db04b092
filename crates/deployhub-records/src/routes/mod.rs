//! HTTP route handlers.

pub mod deployments;
pub mod health;
