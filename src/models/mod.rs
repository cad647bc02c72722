pub mod enums;
pub mod feedback;
pub mod patient;
pub mod prompt;

pub use feedback::*;
pub use patient::*;
pub use prompt::*;
