//! HTTP API for MultiAuth
//!
//! Exposes login, identity and group lookups of a [`multiauth_core::MultiAuth`]
//! hub as a JSON API, plus health and Prometheus endpoints.

pub mod metrics;
pub mod response;
pub mod routes;
pub mod server;

pub use crate::metrics::MetricsRecorder;
pub use response::{ApiError, ApiResponse};
pub use server::{create_router, AppState, MultiAuthServer};
