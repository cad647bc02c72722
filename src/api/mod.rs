//! HTTP API.
//!
//! Exposes document processing, decryption, feedback and the learning
//! metrics as JSON endpoints. Routes are nested under `/api/`; handlers run
//! store and collaborator work on the blocking pool.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{serve_until_interrupted, start_api_server, ApiServer, ServerError};
pub use types::ApiContext;
