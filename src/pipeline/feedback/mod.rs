//! Reviewer feedback and the metrics derived from it.

pub mod aggregator;
pub mod insights;
pub mod trends;

pub use aggregator::*;
pub use insights::*;
pub use trends::*;

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    /// Optimistic update kept losing to concurrent writers.
    #[error("Statistics for {version} are under heavy contention, retry later")]
    Contention { version: String },
}
