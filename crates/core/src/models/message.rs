use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DatatransError, DatatransResult};

/// 队列中的消息
///
/// `payload` 是实际写入队列的消息体；`id` 和 `message_type` 作为消息属性传递
/// （RabbitMQ 中分别对应 `message_id` 和 `type`）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// 构造数据传输任务消息
    pub fn task(message: &TaskMessage) -> DatatransResult<Self> {
        let payload = serde_json::to_value(message)?;
        Ok(Self::new(TaskMessage::MESSAGE_TYPE, payload))
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// 将消息体解析为具体类型
    pub fn decode_payload<T: DeserializeOwned>(&self) -> DatatransResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DatatransError::InvalidArgument(format!(
                "无法解析 {} 消息 {}: {e}",
                self.message_type, self.id
            ))
        })
    }
}

/// 任务消息体：`{missionId, take, skip}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub mission_id: String,
    pub take: i64,
    pub skip: i64,
}

impl TaskMessage {
    pub const MESSAGE_TYPE: &'static str = "datatrans.task";
}

/// 队列确认发布后返回的回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// 队列分配的消息标识
    pub message_id: String,
    pub queue: String,
    pub published_at: DateTime<Utc>,
    /// 队列原始响应，原样保存到任务的 `queueResponse`
    pub response: serde_json::Value,
}

/// 从队列取出的一条待确认消息
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub message: Message,
    /// 是否为重新投递
    pub redelivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_message_wire_format() {
        let body = TaskMessage {
            mission_id: "5842956f".to_string(),
            take: 4,
            skip: 16,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"missionId": "5842956f", "take": 4, "skip": 16})
        );
    }

    #[test]
    fn test_task_message_envelope() {
        let body = TaskMessage {
            mission_id: "m-1".to_string(),
            take: 10,
            skip: 0,
        };
        let message = Message::task(&body).unwrap();

        assert_eq!(message.message_type, "datatrans.task");
        assert!(!message.id.is_empty());
        assert_eq!(message.decode_payload::<TaskMessage>().unwrap(), body);
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        let message = Message::new(TaskMessage::MESSAGE_TYPE, json!({"missionId": 3}));
        let err = message.decode_payload::<TaskMessage>().unwrap_err();
        assert!(matches!(err, DatatransError::InvalidArgument(_)));
    }
}
