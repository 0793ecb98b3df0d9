//! Slotwise API Library
//!
//! This crate contains the HTTP surface for the subscription core: the
//! status and usage read APIs, the entitlement checkpoint, and the payment
//! provider webhook ingress.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
