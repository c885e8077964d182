//! 各接口的内存实现，用于嵌入式运行和测试

pub mod destination_store;
pub mod source_store;
pub mod state_store;

pub use destination_store::InMemoryDestinationStore;
pub use source_store::InMemorySourceStore;
pub use state_store::InMemoryStateStore;
