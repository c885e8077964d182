use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use datatrans_core::{
    config::AppConfig,
    services::{KnownTables, MissionAggregator},
    traits::{
        DestinationStore, MessageQueue, MissionRepository, PipelineRepository, SourceStore,
        TaskRepository,
    },
    DatatransError,
};
use datatrans_dispatcher::{DispatchSummary, MissionService, MissionSplitter, TaskDispatcher};
use datatrans_infrastructure::{
    CatalogRefresher, ConstraintCatalog, DatabaseManager, DestinationFactory,
    MessageQueueFactory, PostgresConstraintLoader, PostgresMissionRepository,
    PostgresPipelineRepository, PostgresSourceStore, PostgresTaskRepository,
};
use datatrans_worker::{AssociationLoader, TaskProcessor, WorkerService};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppMode {
    /// 持续消费任务队列
    Worker,
    /// 创建Mission，未给出记录总数时统计源表
    Create {
        pipeline_id: String,
        batch_count: i32,
        total_records: Option<i64>,
    },
    /// 拆分Mission
    Split { mission_id: String },
    /// 分发Mission下所有待分发的任务
    Dispatch { mission_id: String },
    /// 将Mission下失败的任务重新放回队列
    Redispatch { mission_id: String },
    /// 查询Mission进度
    Progress { mission_id: String },
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    refresher: CatalogRefresher,
    message_queue: Arc<dyn MessageQueue>,
    mission_service: MissionService,
    processor: Arc<TaskProcessor>,
}

impl Application {
    /// 连接外部系统并装配所有组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", mask_url(&config.database.url)))?;
        database.migrate().await.context("运行数据库迁移失败")?;

        let pipeline_repo: Arc<dyn PipelineRepository> =
            Arc::new(PostgresPipelineRepository::new(database.pool().clone()));
        let mission_repo: Arc<dyn MissionRepository> =
            Arc::new(PostgresMissionRepository::new(database.pool().clone()));
        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(PostgresTaskRepository::new(database.pool().clone()));
        let source_store: Arc<dyn SourceStore> =
            Arc::new(PostgresSourceStore::new(database.source_pool().clone()));

        for pipeline in &config.pipelines {
            match pipeline_repo.save(pipeline).await {
                Ok(()) => {}
                Err(e @ DatatransError::InvalidState { .. }) => {
                    warn!("管道 {} 的配置与已登记定义不同，继续使用已登记定义: {}", pipeline.id, e);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("登记管道失败: {}", pipeline.id));
                }
            }
        }
        info!("已登记 {} 个管道", config.pipelines.len());

        let catalog = ConstraintCatalog::default();
        let loader = Arc::new(PostgresConstraintLoader::new(
            database.source_pool().clone(),
            config.catalog.schema.clone(),
        ));
        let refresher = CatalogRefresher::new(
            catalog.clone(),
            loader,
            Duration::from_secs(config.catalog.refresh_interval_seconds),
        );
        refresher.refresh_once().await.context("加载约束目录失败")?;

        info!("连接消息队列: {}", mask_url(&config.message_queue.url));
        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("连接消息队列失败")?;
        let destination: Arc<dyn DestinationStore> =
            DestinationFactory::create(&config.destination).context("创建目标索引客户端失败")?;

        let known_tables = KnownTables::new(
            config.catalog.allowed_tables.clone(),
            Arc::new(catalog.clone()),
        );
        let aggregator = Arc::new(MissionAggregator::new(
            mission_repo.clone(),
            task_repo.clone(),
            config.worker.completion_policy.build(),
        ));
        info!("Mission完成策略: {}", aggregator.policy_name());

        let mission_service = MissionService::new(
            pipeline_repo.clone(),
            mission_repo.clone(),
            task_repo.clone(),
            source_store.clone(),
            known_tables.clone(),
            MissionSplitter::new(mission_repo.clone(), aggregator.clone()),
            TaskDispatcher::new(
                task_repo.clone(),
                message_queue.clone(),
                config.message_queue.task_queue.clone(),
                config.dispatcher.retry.clone(),
            ),
            config.dispatcher.retry.clone(),
        );

        let associations = AssociationLoader::new(
            source_store.clone(),
            Arc::new(catalog),
            config.worker.retry.clone(),
        );
        let processor = Arc::new(TaskProcessor::new(
            pipeline_repo,
            mission_repo,
            task_repo,
            source_store,
            destination,
            known_tables,
            associations,
            aggregator,
            config.worker.retry.clone(),
        ));

        Ok(Self {
            config,
            database,
            refresher,
            message_queue,
            mission_service,
            processor,
        })
    }

    /// 按模式运行，单次命令执行完毕后返回
    pub async fn run(self, mode: AppMode, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", mode);

        let result = match mode {
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Create {
                pipeline_id,
                batch_count,
                total_records,
            } => self.create(&pipeline_id, batch_count, total_records).await,
            AppMode::Split { mission_id } => self.split(&mission_id).await,
            AppMode::Dispatch { mission_id } => self.dispatch(&mission_id, false).await,
            AppMode::Redispatch { mission_id } => self.dispatch(&mission_id, true).await,
            AppMode::Progress { mission_id } => self.progress(&mission_id).await,
        };

        self.database.close().await;
        result
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker_config = &self.config.worker;
        let worker_id = worker_config.resolved_worker_id();
        info!("启动Worker服务: {}", worker_id);

        let refresher_handle = {
            let refresher = self.refresher.clone();
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { refresher.run(shutdown_rx).await })
        };

        let worker = WorkerService::builder(
            worker_id,
            self.message_queue.clone(),
            self.config.message_queue.task_queue.clone(),
        )
        .max_concurrent_tasks(worker_config.max_concurrent_tasks)
        .poll_interval_ms(worker_config.poll_interval_ms)
        .processing_timeout_seconds(worker_config.processing_timeout_seconds)
        .register_handler(self.processor.clone())
        .build();

        let result = worker.run(shutdown_rx).await;
        if let Err(e) = refresher_handle.await {
            warn!("约束目录刷新任务异常退出: {}", e);
        }

        result.context("Worker运行失败")?;
        info!("Worker服务已停止");
        Ok(())
    }

    async fn create(
        &self,
        pipeline_id: &str,
        batch_count: i32,
        total_records: Option<i64>,
    ) -> Result<()> {
        let mission = match total_records {
            Some(total) => {
                self.mission_service
                    .create_mission(pipeline_id, total, batch_count)
                    .await
            }
            None => {
                self.mission_service
                    .create_mission_for_pipeline(pipeline_id, batch_count)
                    .await
            }
        }
        .with_context(|| format!("创建Mission失败 (管道: {pipeline_id})"))?;

        print_json(&serde_json::to_value(&mission)?)
    }

    async fn split(&self, mission_id: &str) -> Result<()> {
        let tasks = self
            .mission_service
            .split(mission_id)
            .await
            .with_context(|| format!("拆分Mission失败: {mission_id}"))?;

        print_json(&json!({
            "missionId": mission_id,
            "tasks": tasks,
        }))
    }

    async fn dispatch(&self, mission_id: &str, failed_only: bool) -> Result<()> {
        let summary = if failed_only {
            self.mission_service.redispatch_failed(mission_id).await
        } else {
            self.mission_service.dispatch_mission(mission_id).await
        }
        .with_context(|| format!("分发Mission失败: {mission_id}"))?;

        print_json(&summary_json(mission_id, &summary))?;
        if !summary.is_complete() {
            for (task_id, e) in &summary.failed {
                error!("任务 {} 分发失败: {}", task_id, e);
            }
            return Err(anyhow::anyhow!(
                "{} 个任务分发失败，可重新执行分发",
                summary.failed.len()
            ));
        }
        Ok(())
    }

    async fn progress(&self, mission_id: &str) -> Result<()> {
        let progress = self
            .mission_service
            .progress(mission_id)
            .await
            .with_context(|| format!("查询Mission进度失败: {mission_id}"))?;

        print_json(&json!({
            "missionId": mission_id,
            "total": progress.total(),
            "active": progress.active(),
            "finished": progress.finished(),
            "states": progress,
        }))
    }
}

fn summary_json(mission_id: &str, summary: &DispatchSummary) -> serde_json::Value {
    json!({
        "missionId": mission_id,
        "dispatched": summary.dispatched.iter().map(|t| t.id).collect::<Vec<_>>(),
        "failed": summary
            .failed
            .iter()
            .map(|(id, e)| json!({"taskId": id, "errorKind": e.kind().as_str(), "error": e.to_string()}))
            .collect::<Vec<_>>(),
        "skipped": summary.skipped,
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 屏蔽连接URL中的密码
pub fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if url[colon_pos + 1..].starts_with("//") {
                return url.to_string();
            }
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
