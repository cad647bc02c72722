//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `Connection`; callers own the connection
//! and its lifetime. All public functions are re-exported here.

mod feedback;
mod job;
mod patient;
mod prompt_template;
mod snapshot;

pub use feedback::*;
pub use job::*;
pub use patient::*;
pub use prompt_template::*;
pub use snapshot::*;
