//! # API Shared
//!
//! Shared utilities and definitions for the intake service APIs.
//!
//! Contains:
//! - JSON wire types with OpenAPI schemas (`wire` module)
//! - Shared services like `HealthService`
//! - API key and caller header handling (`auth` module)
//!
//! Used by `api-rest` and the workspace binary for common functionality.

pub mod auth;
pub mod health;
pub mod wire;

pub use health::HealthService;
pub use wire::*;
