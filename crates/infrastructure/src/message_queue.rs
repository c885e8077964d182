use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datatrans_core::{
    config::MessageQueueConfig,
    models::{Delivery, Message, PublishReceipt, TaskMessage},
    traits::MessageQueue,
    DatatransError, DatatransResult,
};
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use serde_json::json;
use tracing::{debug, info, warn};

const CONTENT_TYPE: &str = "application/json";

/// RabbitMQ消息队列实现
///
/// 通道开启发布确认；消息体只包含 `payload`，消息ID、类型和关联ID放在 AMQP 属性中。
/// 通道句柄可并发使用，各操作之间不加锁。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Channel,
}

impl RabbitMQMessageQueue {
    /// 连接RabbitMQ并声明任务队列
    pub async fn new(config: MessageQueueConfig) -> DatatransResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| {
            DatatransError::MessageQueue(format!(
                "连接RabbitMQ超时: {}秒",
                config.connection_timeout_seconds
            ))
        })?
        .map_err(|e| DatatransError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("创建通道失败: {e}")))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        Self::declare_queue(&channel, &config.task_queue, true).await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    async fn declare_queue(channel: &Channel, queue_name: &str, durable: bool) -> DatatransResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                DatatransError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    /// 关闭连接
    pub async fn close(&self) -> DatatransResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

/// 消息的 AMQP 属性，持久化投递
pub(crate) fn message_properties(message: &Message) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type(CONTENT_TYPE.into())
        .with_message_id(message.id.clone().into())
        .with_type(message.message_type.clone().into())
        .with_timestamp(message.timestamp.timestamp().max(0) as u64);
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(correlation_id.clone().into());
    }
    properties
}

/// 由消息体和 AMQP 属性还原消息
///
/// 没有类型属性的消息按任务消息处理。
pub(crate) fn message_from_parts(
    properties: &BasicProperties,
    data: &[u8],
) -> DatatransResult<Message> {
    let payload: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| DatatransError::Serialization(format!("反序列化消息体失败: {e}")))?;

    let message_type = properties
        .kind()
        .as_ref()
        .map(|kind| kind.as_str().to_string())
        .unwrap_or_else(|| TaskMessage::MESSAGE_TYPE.to_string());

    let mut message = Message::new(message_type, payload);
    if let Some(id) = properties.message_id() {
        message.id = id.as_str().to_string();
    }
    if let Some(correlation_id) = properties.correlation_id() {
        message.correlation_id = Some(correlation_id.as_str().to_string());
    }
    if let Some(timestamp) = properties
        .timestamp()
        .as_ref()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(*secs as i64, 0))
    {
        message.timestamp = timestamp;
    }
    Ok(message)
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> DatatransResult<PublishReceipt> {
        let payload = serde_json::to_vec(&message.payload)?;
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                message_properties(message),
            )
            .await
            .map_err(|e| {
                DatatransError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        let confirmation = confirm
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        if confirmation.is_nack() {
            return Err(DatatransError::MessageQueue(format!(
                "队列 {queue} 拒绝了消息 {}",
                message.id
            )));
        }

        let published_at = Utc::now();
        debug!("消息 {} 已发布到队列: {}", message.id, queue);
        Ok(PublishReceipt {
            message_id: message.id.clone(),
            queue: queue.to_string(),
            published_at,
            response: json!({
                "queue": queue,
                "messageId": message.id,
                "confirmation": "ack",
                "deliveryMode": 2,
                "publishedAt": published_at,
            }),
        })
    }

    async fn consume_messages(&self, queue: &str, max_messages: usize) -> DatatransResult<Vec<Delivery>> {
        let mut deliveries = Vec::with_capacity(max_messages);

        while deliveries.len() < max_messages {
            let fetched = self
                .channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| {
                    DatatransError::MessageQueue(format!("从队列 {queue} 获取消息失败: {e}"))
                })?;
            let Some(fetched) = fetched else {
                break;
            };
            let delivery = fetched.delivery;

            match message_from_parts(&delivery.properties, &delivery.data) {
                Ok(message) => deliveries.push(Delivery {
                    delivery_tag: delivery.delivery_tag,
                    message,
                    redelivered: delivery.redelivered,
                }),
                Err(e) => {
                    warn!("丢弃无法解析的消息 (队列 {}): {}", queue, e);
                    self.channel
                        .basic_nack(
                            delivery.delivery_tag,
                            BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            },
                        )
                        .await
                        .map_err(|e| {
                            DatatransError::MessageQueue(format!("拒绝消息失败: {e}"))
                        })?;
                }
            }
        }

        Ok(deliveries)
    }

    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> DatatransResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("确认消息失败: {e}")))?;

        debug!("确认消息: 队列 {}, 投递标签 {}", queue, delivery_tag);
        Ok(())
    }

    async fn nack_message(&self, queue: &str, delivery_tag: u64, requeue: bool) -> DatatransResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("拒绝消息失败: {e}")))?;

        debug!(
            "拒绝消息: 队列 {}, 投递标签 {}, 重新入队: {}",
            queue, delivery_tag, requeue
        );
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> DatatransResult<()> {
        Self::declare_queue(&self.channel, queue, durable).await?;
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> DatatransResult<u32> {
        let queue_info = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                DatatransError::MessageQueue(format!("获取队列 {queue} 信息失败: {e}"))
            })?;

        Ok(queue_info.message_count())
    }

    async fn purge_queue(&self, queue: &str) -> DatatransResult<()> {
        self.channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| DatatransError::MessageQueue(format!("清空队列 {queue} 失败: {e}")))?;

        debug!("队列 {} 已清空", queue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_carry_envelope_fields() {
        let body = TaskMessage {
            mission_id: "m-1".to_string(),
            take: 4,
            skip: 8,
        };
        let message = Message::task(&body)
            .unwrap()
            .with_correlation_id("42".to_string());

        let properties = message_properties(&message);
        assert_eq!(*properties.delivery_mode(), Some(2));
        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str()),
            Some(message.id.as_str())
        );

        let data = serde_json::to_vec(&message.payload).unwrap();
        let restored = message_from_parts(&properties, &data).unwrap();
        assert_eq!(restored.id, message.id);
        assert_eq!(restored.message_type, TaskMessage::MESSAGE_TYPE);
        assert_eq!(restored.correlation_id.as_deref(), Some("42"));
        assert_eq!(restored.decode_payload::<TaskMessage>().unwrap(), body);
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let properties = BasicProperties::default().with_type(TaskMessage::MESSAGE_TYPE.into());
        let err = message_from_parts(&properties, b"not json").unwrap_err();
        assert!(matches!(err, DatatransError::Serialization(_)));
    }

    #[test]
    fn test_missing_type_defaults_to_task_message() {
        let data = br#"{"missionId": "m-1", "take": 4, "skip": 8}"#;
        let restored = message_from_parts(&BasicProperties::default(), data).unwrap();

        assert_eq!(restored.message_type, TaskMessage::MESSAGE_TYPE);
        let body: TaskMessage = restored.decode_payload().unwrap();
        assert_eq!((body.mission_id.as_str(), body.take, body.skip), ("m-1", 4, 8));
    }

    #[test]
    fn test_explicit_type_is_kept() {
        let properties = BasicProperties::default().with_type("audit".into());
        let restored = message_from_parts(&properties, b"{}").unwrap();
        assert_eq!(restored.message_type, "audit");
    }
}
