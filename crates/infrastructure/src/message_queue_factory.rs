use std::sync::Arc;

use datatrans_core::{
    config::{MessageQueueConfig, MessageQueueType},
    traits::MessageQueue,
    DatatransError, DatatransResult,
};
use tracing::{debug, info};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> DatatransResult<Arc<dyn MessageQueue>> {
        debug!(
            "Creating message queue with type: {}",
            Self::get_type_string(&config.r#type)
        );
        Self::validate_config(config)?;

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("Initializing RabbitMQ message queue");
                let rabbitmq = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("Initializing in-memory message queue");
                let queue = InMemoryMessageQueue::new();
                queue.create_queue(&config.task_queue, true).await?;
                Ok(Arc::new(queue))
            }
        }
    }

    pub fn validate_config(config: &MessageQueueConfig) -> DatatransResult<()> {
        config
            .validate()
            .map_err(|e| DatatransError::Configuration(e.to_string()))
    }

    pub fn get_type_string(queue_type: &MessageQueueType) -> &'static str {
        match queue_type {
            MessageQueueType::Rabbitmq => "rabbitmq",
            MessageQueueType::InMemory => "in_memory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatrans_core::models::Message;
    use serde_json::json;

    fn config(r#type: MessageQueueType, url: &str) -> MessageQueueConfig {
        MessageQueueConfig {
            r#type,
            url: url.to_string(),
            ..MessageQueueConfig::default()
        }
    }

    #[test]
    fn test_validate_rabbitmq_url() {
        assert!(MessageQueueFactory::validate_config(&config(
            MessageQueueType::Rabbitmq,
            "amqp://localhost:5672"
        ))
        .is_ok());

        let err = MessageQueueFactory::validate_config(&config(
            MessageQueueType::Rabbitmq,
            "invalid://localhost:5672",
        ))
        .unwrap_err();
        assert!(matches!(err, DatatransError::Configuration(_)));
    }

    #[test]
    fn test_get_type_string() {
        assert_eq!(
            MessageQueueFactory::get_type_string(&MessageQueueType::Rabbitmq),
            "rabbitmq"
        );
        assert_eq!(
            MessageQueueFactory::get_type_string(&MessageQueueType::InMemory),
            "in_memory"
        );
    }

    #[tokio::test]
    async fn test_create_in_memory_queue() {
        let config = config(MessageQueueType::InMemory, "");
        let queue = MessageQueueFactory::create(&config).await.unwrap();

        queue
            .publish_message(&config.task_queue, &Message::new("datatrans.task", json!({})))
            .await
            .unwrap();
        assert_eq!(queue.get_queue_size(&config.task_queue).await.unwrap(), 1);
    }
}
