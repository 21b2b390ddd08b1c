pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod transfers;

use serde::{Deserialize, Serialize};

pub use routes::create_router;

/// Error body shared by all API handlers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
