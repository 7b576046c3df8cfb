//! HTTP API.

mod error;
mod handlers;
mod server;
mod state;

pub use error::{ApiError, ErrorBody};
pub use handlers::{EvictResponse, SearchResponse, WelcomeResponse};
pub use server::{build_router, serve};
pub use state::AppState;
