pub mod app_config;
pub mod catalog;
pub mod database;
pub mod destination;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod observability;

pub use app_config::AppConfig;
pub use catalog::CatalogConfig;
pub use database::DatabaseConfig;
pub use destination::{DestinationConfig, DestinationType};
pub use dispatcher_worker::{DispatcherConfig, WorkerConfig};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use observability::ObservabilityConfig;
