use async_trait::async_trait;

use crate::{
    models::{Delivery, Message, PublishReceipt},
    DatatransResult,
};

/// 消息队列抽象接口
///
/// 投递语义为至少一次：消费者在处理完成后 `ack`，未确认的消息可能被重新投递。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列，队列确认后返回回执
    async fn publish_message(&self, queue: &str, message: &Message)
        -> DatatransResult<PublishReceipt>;

    /// 从指定队列取出至多 `max_messages` 条待确认消息
    async fn consume_messages(&self, queue: &str, max_messages: usize)
        -> DatatransResult<Vec<Delivery>>;

    /// 确认消息处理完成
    async fn ack_message(&self, queue: &str, delivery_tag: u64) -> DatatransResult<()>;

    /// 拒绝消息，可选择重新入队
    async fn nack_message(&self, queue: &str, delivery_tag: u64, requeue: bool)
        -> DatatransResult<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> DatatransResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> DatatransResult<u32>;

    /// 清空队列
    async fn purge_queue(&self, queue: &str) -> DatatransResult<()>;
}
