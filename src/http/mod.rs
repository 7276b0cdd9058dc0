//! HTTP API server for external control (the dashboard UI)
//!
//! This module provides a REST API for controlling the consultation session:
//! - POST /consult/start - Start a session
//! - POST /consult/stop - Stop the active session
//! - GET /consult/status - Lifecycle state, live transcript, statistics
//! - GET /consult/transcript - Finalized transcript log
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
