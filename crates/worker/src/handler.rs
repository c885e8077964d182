use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use datatrans_core::{models::Message, DatatransResult};
use tracing::info;

/// 消息处理结果，三种结果都会确认消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// 处理成功
    Completed,
    /// 处理失败，错误已记录到状态存储
    Failed,
    /// 重复投递等无需处理的情况
    Skipped,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Completed => "completed",
            HandlerOutcome::Failed => "failed",
            HandlerOutcome::Skipped => "skipped",
        }
    }
}

/// 按消息类型注册的处理器
///
/// 返回 `Err` 表示结果没有被记录：可重试的错误会让消息重新入队，
/// 其他错误丢弃消息。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// 处理的消息类型标签
    fn message_type(&self) -> &str;

    async fn handle(&self, message: &Message) -> DatatransResult<HandlerOutcome>;
}

/// 消息类型到处理器的映射
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型的旧处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        let message_type = handler.message_type().to_string();
        info!("注册消息处理器: {}", message_type);
        self.handlers.insert(message_type, handler);
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(message_type).cloned()
    }

    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl MessageHandler for Echo {
        fn message_type(&self) -> &str {
            self.0
        }

        async fn handle(&self, _message: &Message) -> DatatransResult<HandlerOutcome> {
            Ok(HandlerOutcome::Completed)
        }
    }

    #[tokio::test]
    async fn test_routes_by_message_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Echo("datatrans.task")));
        registry.register(Arc::new(Echo("datatrans.reindex")));

        assert_eq!(
            registry.message_types(),
            vec!["datatrans.reindex".to_string(), "datatrans.task".to_string()]
        );
        let handler = registry.get("datatrans.task").unwrap();
        let outcome = handler
            .handle(&Message::new("datatrans.task", json!({})))
            .await
            .unwrap();
        assert_eq!(outcome, HandlerOutcome::Completed);
        assert!(registry.get("unknown").is_none());
    }
}
