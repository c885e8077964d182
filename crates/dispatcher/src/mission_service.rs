use std::sync::Arc;

use tracing::{error, info, instrument};

use datatrans_core::{
    models::{Mission, MissionProgress, MissionState, PipelineDefinition, Task, TaskState},
    retry_transient,
    services::KnownTables,
    traits::{MissionRepository, PipelineRepository, SourceStore, TaskRepository},
    DatatransError, DatatransResult, RetryPolicy,
};

use crate::splitter::MissionSplitter;
use crate::task_dispatcher::TaskDispatcher;

/// 批量分发结果
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub dispatched: Vec<Task>,
    /// 分发失败的任务，状态保持不变，可以再次分发
    pub failed: Vec<(i64, DatatransError)>,
    /// 不处于待分发状态的任务数
    pub skipped: usize,
}

impl DispatchSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Mission生命周期入口：创建、拆分、分发与进度查询
pub struct MissionService {
    pipeline_repo: Arc<dyn PipelineRepository>,
    mission_repo: Arc<dyn MissionRepository>,
    task_repo: Arc<dyn TaskRepository>,
    source_store: Arc<dyn SourceStore>,
    known_tables: KnownTables,
    splitter: MissionSplitter,
    dispatcher: TaskDispatcher,
    retry: RetryPolicy,
}

impl MissionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline_repo: Arc<dyn PipelineRepository>,
        mission_repo: Arc<dyn MissionRepository>,
        task_repo: Arc<dyn TaskRepository>,
        source_store: Arc<dyn SourceStore>,
        known_tables: KnownTables,
        splitter: MissionSplitter,
        dispatcher: TaskDispatcher,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline_repo,
            mission_repo,
            task_repo,
            source_store,
            known_tables,
            splitter,
            dispatcher,
            retry,
        }
    }

    async fn pipeline(&self, pipeline_id: &str) -> DatatransResult<PipelineDefinition> {
        self.pipeline_repo
            .get_by_id(pipeline_id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Pipeline", pipeline_id))
    }

    async fn mission(&self, mission_id: &str) -> DatatransResult<Mission> {
        self.mission_repo
            .get_by_id(mission_id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))
    }

    /// 以给定记录总数创建Mission
    #[instrument(skip(self))]
    pub async fn create_mission(
        &self,
        pipeline_id: &str,
        total_records: i64,
        batch_count: i32,
    ) -> DatatransResult<Mission> {
        let mission = Mission::new(pipeline_id, total_records, batch_count)?;
        self.pipeline(pipeline_id).await?;

        let created = self.mission_repo.create(&mission).await?;
        info!(
            "创建Mission {} (管道: {}, 记录总数: {}, 批次数: {})",
            created.id, pipeline_id, total_records, batch_count
        );
        Ok(created)
    }

    /// 统计管道源表的当前记录数并创建Mission
    #[instrument(skip(self))]
    pub async fn create_mission_for_pipeline(
        &self,
        pipeline_id: &str,
        batch_count: i32,
    ) -> DatatransResult<Mission> {
        // 先校验批次数，避免无效请求访问数据源
        Mission::new(pipeline_id, 0, batch_count)?;

        let pipeline = self.pipeline(pipeline_id).await?;
        let allow_list = self.known_tables.snapshot().await?;
        let table = allow_list.qualify(&pipeline.source_table)?;

        let source = &self.source_store;
        let table_ref = &table;
        let total_records = retry_transient(&self.retry, "统计源表记录数", move || {
            source.count_rows(table_ref)
        })
        .await?;

        self.create_mission(pipeline_id, total_records, batch_count)
            .await
    }

    pub async fn split(&self, mission_id: &str) -> DatatransResult<Vec<Task>> {
        self.splitter.split(mission_id).await
    }

    /// 分发Mission下所有 `CREATED` 状态的任务
    #[instrument(skip(self))]
    pub async fn dispatch_mission(&self, mission_id: &str) -> DatatransResult<DispatchSummary> {
        self.dispatch_pending(mission_id, TaskState::Created).await
    }

    /// 将Mission下所有 `FAILED` 状态的任务重新放回队列
    #[instrument(skip(self))]
    pub async fn redispatch_failed(&self, mission_id: &str) -> DatatransResult<DispatchSummary> {
        self.dispatch_pending(mission_id, TaskState::Failed).await
    }

    async fn dispatch_pending(
        &self,
        mission_id: &str,
        pending: TaskState,
    ) -> DatatransResult<DispatchSummary> {
        let mission = self.mission(mission_id).await?;
        if mission.state != MissionState::Split {
            return Err(DatatransError::invalid_state(
                "Mission",
                mission_id,
                MissionState::Split,
                mission.state,
            ));
        }

        let mut summary = DispatchSummary::default();
        for task in self.task_repo.list_by_mission(mission_id).await? {
            if task.state != pending {
                summary.skipped += 1;
                continue;
            }
            let result = match pending {
                TaskState::Failed => self.dispatcher.redispatch(&task).await,
                _ => self.dispatcher.dispatch(&task).await,
            };
            match result {
                Ok(task) => summary.dispatched.push(task),
                Err(e) => {
                    error!("任务 {} 分发失败: {}", task.id, e);
                    summary.failed.push((task.id, e));
                }
            }
        }

        info!(
            "Mission {} 分发 {:?} 任务完成: 成功 {}, 失败 {}, 跳过 {}",
            mission_id,
            pending,
            summary.dispatched.len(),
            summary.failed.len(),
            summary.skipped
        );
        Ok(summary)
    }

    pub async fn dispatch_task(&self, task_id: i64) -> DatatransResult<Task> {
        self.dispatcher.dispatch_by_id(task_id).await
    }

    pub async fn redispatch_task(&self, task_id: i64) -> DatatransResult<Task> {
        self.dispatcher.redispatch_by_id(task_id).await
    }

    pub async fn progress(&self, mission_id: &str) -> DatatransResult<MissionProgress> {
        self.mission(mission_id).await?;
        let tasks = self.task_repo.list_by_mission(mission_id).await?;
        Ok(MissionProgress::from_tasks(&tasks))
    }
}
