use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};

use datatrans_core::{
    models::{Message, Mission, PipelineDefinition, Task, TaskMessage, TaskState, TaskUpdate},
    retry_transient,
    services::{KnownTables, MissionAggregator},
    traits::{DestinationStore, MissionRepository, PipelineRepository, SourceStore, TaskRepository},
    DatatransError, DatatransResult, RetryPolicy,
};

use crate::assembler::assemble_documents;
use crate::association::AssociationLoader;
use crate::handler::{HandlerOutcome, MessageHandler};

/// 数据传输任务处理器
///
/// 每条任务消息对应源表的一页记录：读取源行、批量加载关联表、组装复合文档并整批写入
/// 目标索引。文档ID由源行主键决定，重复投递的同一任务只会覆盖已有文档。
///
/// # 任务状态
///
/// - `DONE` 以外的任务被认领为 `PROCESSING` 后处理，包括入队记录尚未写入的 `CREATED` 任务
/// - `DONE` 的任务直接跳过
/// - 处理结束后条件更新为 `DONE` 或 `FAILED`，随后重新评估 Mission 是否完成
pub struct TaskProcessor {
    pipeline_repo: Arc<dyn PipelineRepository>,
    mission_repo: Arc<dyn MissionRepository>,
    task_repo: Arc<dyn TaskRepository>,
    source_store: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
    known_tables: KnownTables,
    associations: AssociationLoader,
    aggregator: Arc<MissionAggregator>,
    retry: RetryPolicy,
}

impl TaskProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_repo: Arc<dyn PipelineRepository>,
        mission_repo: Arc<dyn MissionRepository>,
        task_repo: Arc<dyn TaskRepository>,
        source_store: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
        known_tables: KnownTables,
        associations: AssociationLoader,
        aggregator: Arc<MissionAggregator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline_repo,
            mission_repo,
            task_repo,
            source_store,
            destination,
            known_tables,
            associations,
            aggregator,
            retry,
        }
    }

    /// 处理一条任务消息
    #[instrument(skip(self), fields(mission_id = %message.mission_id, skip = message.skip, take = message.take))]
    pub async fn process(&self, message: &TaskMessage) -> DatatransResult<HandlerOutcome> {
        let started = Instant::now();
        let task = self.find_task(message).await?;

        if task.state == TaskState::Done {
            info!("任务 {} 已完成，跳过重复投递", task.id);
            counter!("datatrans_tasks_processed_total", "outcome" => "skipped").increment(1);
            return Ok(HandlerOutcome::Skipped);
        }
        if task.state == TaskState::Created {
            debug!("任务 {} 的入队记录尚未写入，按已投递处理", task.id);
        }

        let Some(task) = self.claim(&task).await? else {
            return self.lost_claim(task.id).await;
        };

        let (to, update, outcome) = match self.run_task(&task).await {
            Ok(upserted) => {
                counter!("datatrans_documents_upserted_total").increment(upserted as u64);
                info!("任务 {} 处理完成，写入 {} 个文档", task.id, upserted);
                (TaskState::Done, TaskUpdate::default(), HandlerOutcome::Completed)
            }
            Err(e) => {
                error!("任务 {} 处理失败 ({}): {}", task.id, e.kind(), e);
                (TaskState::Failed, TaskUpdate::failed(&e), HandlerOutcome::Failed)
            }
        };

        let repo = &self.task_repo;
        let task_id = task.id;
        let update_ref = &update;
        let finished = retry_transient(&self.retry, "更新任务状态", move || {
            repo.transition(task_id, &[TaskState::Processing], to, update_ref.clone())
        })
        .await?;
        if finished.is_none() {
            warn!("任务 {} 已被其他投递更新，未写入 {:?}", task.id, to);
        }

        histogram!("datatrans_task_processing_seconds").record(started.elapsed().as_secs_f64());
        counter!("datatrans_tasks_processed_total", "outcome" => outcome.as_str()).increment(1);

        let aggregator = &self.aggregator;
        let mission_id = task.mission_id.as_str();
        if retry_transient(&self.retry, "评估Mission完成状态", move || {
            aggregator.refresh(mission_id)
        })
        .await?
        {
            info!("Mission {} 已完成", mission_id);
        }

        Ok(outcome)
    }

    async fn find_task(&self, message: &TaskMessage) -> DatatransResult<Task> {
        let repo = &self.task_repo;
        retry_transient(&self.retry, "查询任务", move || {
            repo.find_by_range(&message.mission_id, message.skip, message.take)
        })
        .await?
        .ok_or_else(|| {
            DatatransError::not_found(
                "Task",
                format!(
                    "{}[{}, {})",
                    message.mission_id,
                    message.skip,
                    message.skip + message.take
                ),
            )
        })
    }

    async fn claim(&self, task: &Task) -> DatatransResult<Option<Task>> {
        let repo = &self.task_repo;
        let id = task.id;
        retry_transient(&self.retry, "认领任务", move || {
            repo.transition(id, TaskState::claimable(), TaskState::Processing, TaskUpdate::default())
        })
        .await
    }

    /// 认领失败时任务状态已被并发投递改变
    async fn lost_claim(&self, id: i64) -> DatatransResult<HandlerOutcome> {
        let current = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Task", id))?;

        if current.state == TaskState::Done {
            debug!("任务 {} 已由其他投递完成", id);
            counter!("datatrans_tasks_processed_total", "outcome" => "skipped").increment(1);
            Ok(HandlerOutcome::Skipped)
        } else {
            Err(DatatransError::Transient(format!(
                "任务 {id} 认领失败，当前状态 {:?}",
                current.state
            )))
        }
    }

    async fn mission(&self, mission_id: &str) -> DatatransResult<Mission> {
        let repo = &self.mission_repo;
        retry_transient(&self.retry, "查询Mission", move || repo.get_by_id(mission_id))
            .await?
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))
    }

    async fn pipeline(&self, pipeline_id: &str) -> DatatransResult<PipelineDefinition> {
        let repo = &self.pipeline_repo;
        retry_transient(&self.retry, "查询管道", move || repo.get_by_id(pipeline_id))
            .await?
            .ok_or_else(|| DatatransError::not_found("Pipeline", pipeline_id))
    }

    /// 读取、组装并写入一页记录，返回写入的文档数
    async fn run_task(&self, task: &Task) -> DatatransResult<usize> {
        let mission = self.mission(&task.mission_id).await?;
        let pipeline = self.pipeline(&mission.pipeline_id).await?;

        let known_tables = &self.known_tables;
        let allow_list =
            retry_transient(&self.retry, "加载表白名单", move || known_tables.snapshot()).await?;
        for table in pipeline.referenced_tables() {
            allow_list.check(table)?;
        }
        let source = self
            .associations
            .qualify_source(&allow_list, &pipeline.source_table)
            .await?;
        let plan = self
            .associations
            .plan(&pipeline, &source, &allow_list)
            .await?;

        let store = &self.source_store;
        let source_ref = &source;
        let rows = retry_transient(&self.retry, "读取源表分页", move || {
            store.fetch_page(source_ref, task.take, task.skip)
        })
        .await?;
        debug!(
            "任务 {} 从 {} 读取 {} 行 (skip {}, take {})",
            task.id,
            source,
            rows.len(),
            task.skip,
            task.take
        );
        if rows.is_empty() {
            return Ok(0);
        }

        let loaded = self.associations.load(&plan, &rows).await?;
        let documents = assemble_documents(source.primary_key(), rows, &loaded)?;

        let destination = &self.destination;
        let index = pipeline.destination_index.as_str();
        let docs = documents.as_slice();
        let report = retry_transient(&self.retry, "批量写入目标索引", move || async move {
            let report = destination.bulk_upsert(index, docs).await?;
            if report.upserted != docs.len() {
                return Err(DatatransError::Transient(format!(
                    "目标索引只确认了 {}/{} 个文档",
                    report.upserted,
                    docs.len()
                )));
            }
            Ok(report)
        })
        .await?;

        Ok(report.upserted)
    }
}

#[async_trait]
impl MessageHandler for TaskProcessor {
    fn message_type(&self) -> &str {
        TaskMessage::MESSAGE_TYPE
    }

    async fn handle(&self, message: &Message) -> DatatransResult<HandlerOutcome> {
        let body: TaskMessage = message.decode_payload()?;
        self.process(&body).await
    }
}
