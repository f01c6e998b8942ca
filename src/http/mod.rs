//! HTTP API server for headless control
//!
//! This module provides a REST API around the engine:
//! - POST /analyses - Start a background analysis
//! - GET /analyses/:id - Query an analysis
//! - DELETE /analyses/:id - Cancel an analysis
//! - GET /connection/status - Live connection status
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, JobEntry, JobStatus, JobTable};
