pub mod constraint_catalog;
pub mod destination_store;
pub mod message_queue;
pub mod repository;
pub mod source_store;

pub use constraint_catalog::*;
pub use destination_store::*;
pub use message_queue::*;
pub use repository::*;
pub use source_store::*;
