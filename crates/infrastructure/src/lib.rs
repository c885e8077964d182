pub mod catalog;
pub mod database;
pub mod destination;
pub mod in_memory_queue;
pub mod memory;
pub mod message_queue;
pub mod message_queue_factory;

pub use catalog::*;
pub use database::*;
pub use destination::*;
pub use in_memory_queue::InMemoryMessageQueue;
pub use memory::*;
pub use message_queue::RabbitMQMessageQueue;
pub use message_queue_factory::MessageQueueFactory;
