pub mod clinical;
pub mod detection;
pub mod feedback;
pub mod generation;
pub mod processor;
pub mod prompts;
pub mod queue;
pub mod vault;
