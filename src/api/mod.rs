//! HTTP API for feedback ingestion
//!
//! Provides:
//! - Feedback batch ingestion
//! - On-demand statistics flush
//! - Health check

pub mod server;

pub use server::{ApiServer, ApiServerConfig, ErrorResponse, HealthResponse};
