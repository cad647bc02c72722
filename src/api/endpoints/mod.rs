//! Endpoint handlers. Each handler moves its work onto the blocking pool
//! through `ApiContext::blocking`.

pub mod documents;
pub mod feedback;
pub mod health;
pub mod metrics;
pub mod patients;
pub mod prompts;
