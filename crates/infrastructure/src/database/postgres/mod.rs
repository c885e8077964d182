pub mod postgres_mission_repository;
pub mod postgres_pipeline_repository;
pub mod postgres_source_store;
pub mod postgres_task_repository;

pub use postgres_mission_repository::*;
pub use postgres_pipeline_repository::*;
pub use postgres_source_store::*;
pub use postgres_task_repository::*;
