pub mod assembler;
pub mod association;
pub mod handler;
pub mod processor;
pub mod service;

pub use assembler::assemble_documents;
pub use association::{AssociationLoader, AssociationPlan, LoadedAssociations};
pub use handler::{HandlerOutcome, HandlerRegistry, MessageHandler};
pub use processor::TaskProcessor;
pub use service::{WorkerService, WorkerServiceBuilder};
