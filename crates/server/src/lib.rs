//! HTTP server and multipart decode sessions for formstash.
//!
//! This crate provides:
//! - The `multer`-backed parser driver and its event contract
//! - Decode sessions that route fields and uploads to a single result
//! - The multipart plugin with per-route hooks
//! - The HTTP surface: route description, form submission, health, metrics

pub mod error;
pub mod events;
pub mod handlers;
pub mod hook;
pub mod metrics;
pub mod parser;
pub mod routes;
pub mod session;
pub mod state;

pub use error::ApiError;
pub use events::{EventSource, PartEvent};
pub use hook::{Multipart, MultipartHook};
pub use routes::create_router;
pub use session::{DecodeSession, DecodedForm, SessionState};
pub use state::AppState;
