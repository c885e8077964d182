//! 状态存储接口定义
//!
//! - `PipelineRepository` - 管道定义的读取与登记
//! - `MissionRepository` - Mission 的创建、拆分提交与完成
//! - `TaskRepository` - 任务查询与条件状态变更
//!
//! 所有状态变更都是条件更新：只有当前状态属于期望的前置状态时才会生效，
//! 返回值表明本次调用是否真正完成了变更。两个并发投递同时尝试同一变更时，
//! 只有一个会成功。

use async_trait::async_trait;

use crate::models::{Mission, PipelineDefinition, Task, TaskRange, TaskState, TaskUpdate};
use crate::DatatransResult;

/// 管道定义仓储接口
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<PipelineDefinition>>;

    /// 登记或覆盖管道定义
    ///
    /// 已被 Mission 引用的管道只能以相同定义重新登记，否则返回 `InvalidState`。
    async fn save(&self, pipeline: &PipelineDefinition) -> DatatransResult<()>;

    async fn list(&self) -> DatatransResult<Vec<PipelineDefinition>>;
}

/// Mission仓储接口
#[async_trait]
pub trait MissionRepository: Send + Sync {
    async fn create(&self, mission: &Mission) -> DatatransResult<Mission>;

    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<Mission>>;

    /// 原子地创建任务并将 Mission 从 `CREATED` 变为 `SPLIT`
    ///
    /// Mission 不处于 `CREATED` 时返回 `InvalidState`，且不创建任何任务。
    async fn commit_split(&self, mission_id: &str, ranges: &[TaskRange])
        -> DatatransResult<Vec<Task>>;

    /// 条件更新 `SPLIT → DONE`，返回是否由本次调用完成
    async fn mark_done(&self, mission_id: &str, failed_tasks: i32) -> DatatransResult<bool>;
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DatatransResult<Option<Task>>;

    /// 按 skip 升序返回 Mission 的全部任务
    async fn list_by_mission(&self, mission_id: &str) -> DatatransResult<Vec<Task>>;

    /// 按区间定位任务（消息体只携带 missionId/take/skip）
    async fn find_by_range(
        &self,
        mission_id: &str,
        skip: i64,
        take: i64,
    ) -> DatatransResult<Option<Task>>;

    /// 条件状态变更
    ///
    /// 当前状态属于 `from` 时变更为 `to` 并写入 `update`，返回变更后的任务；
    /// 否则返回 `None` 且不做任何修改。
    async fn transition(
        &self,
        id: i64,
        from: &[TaskState],
        to: TaskState,
        update: TaskUpdate,
    ) -> DatatransResult<Option<Task>>;
}
