//! Prompt templates: the seed catalog, per-request selection and the
//! promotion of the best template to the active slot.

pub mod catalog;
pub mod evolution;
pub mod selector;

pub use catalog::seed_catalog;
pub use evolution::{evolve, EvolutionReport};
pub use selector::{rank_templates, PromptSelector};

use thiserror::Error;

use crate::db::DatabaseError;
use crate::models::enums::SelectionPolicy;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("No prompt template available for policy {policy}")]
    NoCandidates { policy: SelectionPolicy },
}
