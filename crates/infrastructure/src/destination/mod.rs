pub mod elasticsearch;

use std::sync::Arc;

use datatrans_core::{
    config::{DestinationConfig, DestinationType},
    traits::DestinationStore,
    DatatransResult,
};
use tracing::info;

pub use elasticsearch::ElasticsearchDestination;

use crate::memory::InMemoryDestinationStore;

pub struct DestinationFactory;

impl DestinationFactory {
    pub fn create(config: &DestinationConfig) -> DatatransResult<Arc<dyn DestinationStore>> {
        match config.r#type {
            DestinationType::Elasticsearch => {
                info!("使用Elasticsearch目标索引: {}", config.url);
                Ok(Arc::new(ElasticsearchDestination::new(config.clone())?))
            }
            DestinationType::InMemory => {
                info!("使用内存目标索引");
                Ok(Arc::new(InMemoryDestinationStore::new()))
            }
        }
    }
}
