//! Propflow API Library
//!
//! HTTP control surface for the property media migration: run control,
//! queue intake, item lookups and signed media serving.

mod api_doc;
pub mod constants;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;
mod telemetry;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use handlers::items::{EnqueueRequest, EnqueueResponse, ItemResponse, ItemUrlResponse};
pub use handlers::migration::{RetryErrorsResponse, StartResponse, StatusResponse};
