//! Wacast API - REST API server
//!
//! Operator-facing HTTP surface: campaign management, test sends, gateway
//! and CRM settings, CRM lookups and health checks.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{error_response, ApiError, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
