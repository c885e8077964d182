pub mod known_tables;
pub mod mission_completion;

pub use known_tables::*;
pub use mission_completion::*;
