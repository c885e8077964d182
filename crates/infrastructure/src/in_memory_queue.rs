use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use datatrans_core::{
    models::{Delivery, Message, PublishReceipt},
    traits::MessageQueue,
    DatatransError, DatatransResult,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<(Message, bool)>,
    unacked: HashMap<u64, Message>,
    _durable: bool,
}

/// 内存消息队列实现
///
/// 取出的消息在 `ack` 前保持未确认状态；`nack` 并重新入队的消息会以
/// `redelivered = true` 放回队首，与 RabbitMQ 的重新投递语义一致。
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        info!("创建内存消息队列");
        Self::default()
    }

    /// 已取出但尚未确认的消息数
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    fn unknown_tag(queue: &str, delivery_tag: u64) -> DatatransError {
        DatatransError::MessageQueue(format!("队列 {queue} 中不存在投递标签 {delivery_tag}"))
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> DatatransResult<PublishReceipt> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.ready.push_back((message.clone(), false));

        debug!("消息 {} 已发布到内存队列 {}", message.id, queue);
        Ok(PublishReceipt {
            message_id: message.id.clone(),
            queue: queue.to_string(),
            published_at: Utc::now(),
            response: json!({
                "queue": queue,
                "messageId": message.id,
                "queueDepth": state.ready.len(),
            }),
        })
    }

    async fn consume_messages(&self, queue: &str, max_messages: usize) -> DatatransResult<Vec<Delivery>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some((message, redelivered)) = state.ready.pop_front() else {
                break;
            };
            let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
            state.unacked.insert(delivery_tag, message.clone());
            deliveries.push(Delivery {
                delivery_tag,
                message,
                redelivered,
            });
        }
        Ok(deliveries)
    }

    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> DatatransResult<()> {
        let mut queues = self.queues.lock().await;
        queues
            .get_mut(queue)
            .and_then(|q| q.unacked.remove(&delivery_tag))
            .map(|_| ())
            .ok_or_else(|| Self::unknown_tag(queue, delivery_tag))
    }

    async fn nack_message(&self, queue: &str, delivery_tag: u64, requeue: bool) -> DatatransResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| Self::unknown_tag(queue, delivery_tag))?;
        let message = state
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| Self::unknown_tag(queue, delivery_tag))?;

        if requeue {
            state.ready.push_front((message, true));
        } else {
            debug!("消息 {} 被拒绝且不重新入队", message.id);
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> DatatransResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default()._durable = durable;
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> DatatransResult<u32> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.ready.len() as u32)
            .unwrap_or(0))
    }

    async fn purge_queue(&self, queue: &str) -> DatatransResult<()> {
        if let Some(state) = self.queues.lock().await.get_mut(queue) {
            state.ready.clear();
        }
        Ok(())
    }
}
