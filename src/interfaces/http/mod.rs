//! HTTP control plane
//!
//! - `common`: response envelope and validated JSON extractor
//! - `modules`: route handlers, grouped by resource
//! - `router`: the axum router with Swagger documentation

pub mod common;
pub mod modules;
pub mod router;

pub use router::{create_api_router, ApiDoc};
