use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, instrument, warn};

use datatrans_core::{
    models::{Message, Task, TaskMessage, TaskState, TaskUpdate},
    retry_transient,
    traits::{MessageQueue, TaskRepository},
    DatatransError, DatatransResult, RetryPolicy,
};

/// 任务分发器
///
/// 将任务区间写入持久化队列。只有队列确认发布后才把任务变为 `IN_QUEUE`；
/// 发布失败时任务状态保持不变，可以再次分发。`CREATED` 任务首次分发，
/// `FAILED` 任务重新分发。
pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    task_queue: String,
    retry: RetryPolicy,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        task_queue: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task_repo,
            message_queue,
            task_queue,
            retry,
        }
    }

    async fn find(&self, task_id: i64) -> DatatransResult<Task> {
        self.task_repo
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Task", task_id))
    }

    pub async fn dispatch_by_id(&self, task_id: i64) -> DatatransResult<Task> {
        let task = self.find(task_id).await?;
        self.dispatch(&task).await
    }

    pub async fn redispatch_by_id(&self, task_id: i64) -> DatatransResult<Task> {
        let task = self.find(task_id).await?;
        self.redispatch(&task).await
    }

    /// 首次分发，`CREATED → IN_QUEUE`
    pub async fn dispatch(&self, task: &Task) -> DatatransResult<Task> {
        self.enqueue(task, TaskState::Created).await
    }

    /// 重新分发失败的任务，`FAILED → IN_QUEUE`
    pub async fn redispatch(&self, task: &Task) -> DatatransResult<Task> {
        self.enqueue(task, TaskState::Failed).await
    }

    #[instrument(skip(self, task), fields(task_id = task.id, mission_id = %task.mission_id, from = ?from))]
    async fn enqueue(&self, task: &Task, from: TaskState) -> DatatransResult<Task> {
        if task.state != from {
            return Err(DatatransError::invalid_state("Task", task.id, from, task.state));
        }

        let body = TaskMessage {
            mission_id: task.mission_id.clone(),
            take: task.take,
            skip: task.skip,
        };
        let message = Message::task(&body)?.with_correlation_id(task.id.to_string());

        let queue = &self.message_queue;
        let queue_name = self.task_queue.as_str();
        let message_ref = &message;
        let receipt = retry_transient(&self.retry, "发布任务消息", move || {
            queue.publish_message(queue_name, message_ref)
        })
        .await?;

        debug!(
            "任务 {} 已发布到队列 {}，消息ID: {}",
            task.id, self.task_queue, receipt.message_id
        );

        // 消息已在队列中，入队记录写入失败时处理端仍可认领该任务
        let repo = &self.task_repo;
        let task_id = task.id;
        let from_states = [from];
        let states = &from_states;
        let receipt_ref = &receipt;
        let updated = retry_transient(&self.retry, "记录任务入队", move || {
            repo.transition(
                task_id,
                states,
                TaskState::InQueue,
                TaskUpdate::enqueued(receipt_ref.clone()),
            )
        })
        .await?;

        let task = match updated {
            Some(task) => {
                let kind = if from == TaskState::Failed { "redispatch" } else { "dispatch" };
                counter!("datatrans_tasks_dispatched_total", "kind" => kind).increment(1);
                info!(
                    "任务 {} 已入队 (skip: {}, take: {})",
                    task.id, task.skip, task.take
                );
                task
            }
            None => {
                // 消息已发布，但任务已被其他分发者或处理端推进；处理端对重复消息是幂等的
                let current = self.find(task_id).await?;
                warn!(
                    "任务 {} 在发布期间状态已变为 {:?}，保留当前状态",
                    current.id, current.state
                );
                current
            }
        };

        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use datatrans_core::models::{Delivery, Mission, PublishReceipt, TaskRange};
    use datatrans_core::traits::MissionRepository;
    use datatrans_infrastructure::memory::InMemoryStateStore;
    use mockall::mock;

    mock! {
        pub Queue {}

        #[async_trait]
        impl MessageQueue for Queue {
            async fn publish_message(&self, queue: &str, message: &Message) -> DatatransResult<PublishReceipt>;
            async fn consume_messages(&self, queue: &str, max_messages: usize) -> DatatransResult<Vec<Delivery>>;
            async fn ack_message(&self, queue: &str, delivery_tag: u64) -> DatatransResult<()>;
            async fn nack_message(&self, queue: &str, delivery_tag: u64, requeue: bool) -> DatatransResult<()>;
            async fn create_queue(&self, queue: &str, durable: bool) -> DatatransResult<()>;
            async fn get_queue_size(&self, queue: &str) -> DatatransResult<u32>;
            async fn purge_queue(&self, queue: &str) -> DatatransResult<()>;
        }
    }

    mock! {
        pub Tasks {}

        #[async_trait]
        impl TaskRepository for Tasks {
            async fn get_by_id(&self, id: i64) -> DatatransResult<Option<Task>>;
            async fn list_by_mission(&self, mission_id: &str) -> DatatransResult<Vec<Task>>;
            async fn find_by_range(&self, mission_id: &str, skip: i64, take: i64) -> DatatransResult<Option<Task>>;
            async fn transition(&self, id: i64, from: &[TaskState], to: TaskState, update: TaskUpdate) -> DatatransResult<Option<Task>>;
        }
    }

    fn confirmed(queue: &str, message: &Message) -> DatatransResult<PublishReceipt> {
        Ok(PublishReceipt {
            message_id: message.id.clone(),
            queue: queue.to_string(),
            published_at: Utc::now(),
            response: serde_json::json!({"confirmed": true}),
        })
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    async fn split_task(store: &Arc<InMemoryStateStore>) -> Task {
        let mission = store
            .create(&Mission::new("p", 10, 1).unwrap())
            .await
            .unwrap();
        store
            .commit_split(&mission.id, &[TaskRange::new(10, 0)])
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_queue_outage_leaves_task_created() {
        let store = Arc::new(InMemoryStateStore::new());
        let task = split_task(&store).await;

        let mut queue = MockQueue::new();
        queue
            .expect_publish_message()
            .times(3)
            .returning(|_, _| Err(DatatransError::MessageQueue("connection refused".into())));

        let dispatcher =
            TaskDispatcher::new(store.clone(), Arc::new(queue), "tasks".into(), fast_retry(3));
        let result = dispatcher.dispatch(&task).await;

        assert!(result.is_err());
        let stored = TaskRepository::get_by_id(store.as_ref(), task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, TaskState::Created);
        assert!(stored.queue_message_id.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_succeeds_after_transient_failure() {
        let store = Arc::new(InMemoryStateStore::new());
        let task = split_task(&store).await;

        let mut queue = MockQueue::new();
        let mut seq = mockall::Sequence::new();
        queue
            .expect_publish_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DatatransError::Transient("timeout".into())));
        queue
            .expect_publish_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(confirmed);

        let dispatcher =
            TaskDispatcher::new(store.clone(), Arc::new(queue), "tasks".into(), fast_retry(3));
        let dispatched = dispatcher.dispatch(&task).await.unwrap();

        assert_eq!(dispatched.state, TaskState::InQueue);
        assert!(dispatched.queue_message_id.is_some());
        assert_eq!(
            dispatched.queue_response,
            Some(serde_json::json!({"confirmed": true}))
        );
    }

    #[tokio::test]
    async fn test_dispatch_rejects_non_created_task() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut task = split_task(&store).await;
        task.state = TaskState::InQueue;

        let mut queue = MockQueue::new();
        queue.expect_publish_message().never();

        let dispatcher =
            TaskDispatcher::new(store, Arc::new(queue), "tasks".into(), fast_retry(1));
        assert!(matches!(
            dispatcher.dispatch(&task).await,
            Err(DatatransError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_record_is_retried_after_publish() {
        let store = Arc::new(InMemoryStateStore::new());
        let task = split_task(&store).await;

        let mut queue = MockQueue::new();
        queue.expect_publish_message().times(1).returning(confirmed);

        let mut tasks = MockTasks::new();
        let mut seq = mockall::Sequence::new();
        tasks
            .expect_transition()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(DatatransError::Transient("connection reset".into())));
        let mut enqueued = task.clone();
        tasks
            .expect_transition()
            .withf(|_, from, to, update| {
                from.to_vec() == vec![TaskState::Created]
                    && *to == TaskState::InQueue
                    && update.receipt.is_some()
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _, to, update| {
                enqueued.apply(to, &update);
                Ok(Some(enqueued.clone()))
            });

        let dispatcher =
            TaskDispatcher::new(Arc::new(tasks), Arc::new(queue), "tasks".into(), fast_retry(3));
        let dispatched = dispatcher.dispatch(&task).await.unwrap();

        assert_eq!(dispatched.state, TaskState::InQueue);
        assert!(dispatched.queue_message_id.is_some());
    }

    #[tokio::test]
    async fn test_failed_task_is_redispatched() {
        let store = Arc::new(InMemoryStateStore::new());
        let task = split_task(&store).await;
        let error = DatatransError::Permanent("mapper_parsing_exception".into());
        let failed = store
            .transition(task.id, &[TaskState::Created], TaskState::Failed, TaskUpdate::failed(&error))
            .await
            .unwrap()
            .unwrap();

        let mut queue = MockQueue::new();
        queue
            .expect_publish_message()
            .withf(|queue, message| queue.to_string() == "tasks" && message.correlation_id.is_some())
            .times(1)
            .returning(confirmed);

        let dispatcher =
            TaskDispatcher::new(store.clone(), Arc::new(queue), "tasks".into(), fast_retry(1));

        assert!(matches!(
            dispatcher.dispatch(&failed).await,
            Err(DatatransError::InvalidState { .. })
        ));

        let requeued = dispatcher.redispatch_by_id(failed.id).await.unwrap();
        assert_eq!(requeued.state, TaskState::InQueue);
        assert!(requeued.queue_message_id.is_some());

        assert!(matches!(
            dispatcher.redispatch(&requeued).await,
            Err(DatatransError::InvalidState { .. })
        ));
    }
}
