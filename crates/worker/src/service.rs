use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use datatrans_core::{
    models::Delivery, traits::MessageQueue, DatatransError, DatatransResult,
};

use crate::handler::{HandlerRegistry, MessageHandler};

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    message_queue: Arc<dyn MessageQueue>,
    task_queue: String,
    registry: HandlerRegistry,
    max_concurrent_tasks: usize,
    poll_interval_ms: u64,
    processing_timeout_seconds: u64,
}

impl WorkerServiceBuilder {
    pub fn new(worker_id: String, message_queue: Arc<dyn MessageQueue>, task_queue: String) -> Self {
        Self {
            worker_id,
            message_queue,
            task_queue,
            registry: HandlerRegistry::new(),
            max_concurrent_tasks: 4,
            poll_interval_ms: 1000,
            processing_timeout_seconds: 300,
        }
    }

    /// 设置最大并发任务数
    pub fn max_concurrent_tasks(mut self, max_concurrent_tasks: usize) -> Self {
        self.max_concurrent_tasks = max_concurrent_tasks.max(1);
        self
    }

    /// 设置轮询间隔
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// 设置单条消息的处理期限
    pub fn processing_timeout_seconds(mut self, processing_timeout_seconds: u64) -> Self {
        self.processing_timeout_seconds = processing_timeout_seconds;
        self
    }

    /// 注册消息处理器
    pub fn register_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.registry.register(handler);
        self
    }

    pub fn build(self) -> WorkerService {
        WorkerService {
            worker_id: self.worker_id,
            message_queue: self.message_queue,
            task_queue: self.task_queue,
            registry: Arc::new(self.registry),
            max_concurrent_tasks: self.max_concurrent_tasks,
            permits: Arc::new(Semaphore::new(self.max_concurrent_tasks)),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            processing_timeout: Duration::from_secs(self.processing_timeout_seconds),
        }
    }
}

/// 队列消费服务
///
/// 按轮询间隔从任务队列取消息，以信号量限制同时处理的消息数。消息在处理器返回结果后确认；
/// 超过处理期限的消息重新入队，由之后的投递重新认领。
#[derive(Clone)]
pub struct WorkerService {
    worker_id: String,
    message_queue: Arc<dyn MessageQueue>,
    task_queue: String,
    registry: Arc<HandlerRegistry>,
    max_concurrent_tasks: usize,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
    processing_timeout: Duration,
}

impl WorkerService {
    pub fn builder(
        worker_id: String,
        message_queue: Arc<dyn MessageQueue>,
        task_queue: String,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(worker_id, message_queue, task_queue)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 正在处理的消息数
    pub fn in_flight(&self) -> usize {
        self.max_concurrent_tasks - self.permits.available_permits()
    }

    /// 持续轮询直到收到停止信号，随后等待在途消息处理完成
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> DatatransResult<()> {
        if self.registry.is_empty() {
            return Err(DatatransError::Configuration(
                "Worker没有注册任何消息处理器".to_string(),
            ));
        }
        info!(
            "Worker {} 开始消费队列 {} (并发: {}, 消息类型: {:?})",
            self.worker_id,
            self.task_queue,
            self.max_concurrent_tasks,
            self.registry.message_types()
        );

        let mut poll_interval = interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("任务轮询失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker {} 收到停止信号", self.worker_id);
                    break;
                }
            }
        }

        let in_flight = self.in_flight();
        if in_flight > 0 {
            info!("等待 {} 个在途消息处理完成...", in_flight);
        }
        if tokio::time::timeout(self.processing_timeout, self.drain())
            .await
            .is_err()
        {
            warn!("等待在途消息超时，未确认的消息将由队列重新投递");
        }

        info!("Worker {} 已停止", self.worker_id);
        Ok(())
    }

    /// 按空闲并发数取一批消息并启动处理，返回启动的消息数
    pub async fn poll_once(&self) -> DatatransResult<usize> {
        let available = self.permits.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let deliveries = self
            .message_queue
            .consume_messages(&self.task_queue, available)
            .await?;
        let count = deliveries.len();

        for delivery in deliveries {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| DatatransError::Internal(format!("获取并发许可失败: {e}")))?;
            let service = self.clone();
            tokio::spawn(async move {
                service.handle_delivery(delivery).await;
                drop(permit);
            });
        }

        if count > 0 {
            debug!("Worker {} 取到 {} 条消息", self.worker_id, count);
        }
        Ok(count)
    }

    /// 等待所有在途消息处理完成
    pub async fn drain(&self) {
        if let Ok(all) = self
            .permits
            .acquire_many(self.max_concurrent_tasks as u32)
            .await
        {
            drop(all);
        }
    }

    /// 处理一条消息并确认或拒绝
    pub async fn handle_delivery(&self, delivery: Delivery) {
        let message = &delivery.message;
        let Some(handler) = self.registry.get(&message.message_type) else {
            warn!(
                "没有处理消息类型 {} 的处理器，丢弃消息 {}",
                message.message_type, message.id
            );
            counter!("datatrans_messages_rejected_total", "reason" => "unknown_type").increment(1);
            self.settle(&delivery, Settle::Reject).await;
            return;
        };

        if delivery.redelivered {
            debug!("消息 {} 为重新投递", message.id);
        }

        let settle = match tokio::time::timeout(self.processing_timeout, handler.handle(message)).await {
            Ok(Ok(outcome)) => {
                debug!("消息 {} 处理结果: {}", message.id, outcome.as_str());
                Settle::Ack
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!("消息 {} 处理中断，重新入队: {}", message.id, e);
                Settle::Requeue
            }
            Ok(Err(e)) => {
                error!("消息 {} 无法处理，丢弃: {}", message.id, e);
                counter!("datatrans_messages_rejected_total", "reason" => "unprocessable")
                    .increment(1);
                Settle::Reject
            }
            Err(_) => {
                warn!(
                    "消息 {} 处理超过 {}s，重新入队",
                    message.id,
                    self.processing_timeout.as_secs()
                );
                counter!("datatrans_messages_timed_out_total").increment(1);
                Settle::Requeue
            }
        };

        self.settle(&delivery, settle).await;
    }

    async fn settle(&self, delivery: &Delivery, settle: Settle) {
        let result = match settle {
            Settle::Ack => {
                self.message_queue
                    .ack_message(&self.task_queue, delivery.delivery_tag)
                    .await
            }
            Settle::Requeue => {
                self.message_queue
                    .nack_message(&self.task_queue, delivery.delivery_tag, true)
                    .await
            }
            Settle::Reject => {
                self.message_queue
                    .nack_message(&self.task_queue, delivery.delivery_tag, false)
                    .await
            }
        };
        if let Err(e) = result {
            error!("确认消息 {} 失败: {}", delivery.message.id, e);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    Requeue,
    Reject,
}
