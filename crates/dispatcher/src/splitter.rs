use std::sync::Arc;

use tracing::{debug, info, instrument};

use datatrans_core::{
    models::{MissionState, Task, TaskRange},
    services::MissionAggregator,
    traits::MissionRepository,
    DatatransError, DatatransResult,
};

/// 将 `[0, total_records)` 拆分为不重叠、无空隙的区间
///
/// 先产生 `batch_count` 个大小为 `floor(total / batch_count)` 的区间，
/// 不能整除时再追加一个覆盖余数的区间。每批大小为0时不产生空批次，
/// 只由余数区间覆盖全部记录。
pub fn split_ranges(total_records: i64, batch_count: i32) -> DatatransResult<Vec<TaskRange>> {
    if batch_count < 1 {
        return Err(DatatransError::InvalidArgument(format!(
            "批次数必须大于等于1: {batch_count}"
        )));
    }
    if total_records < 0 {
        return Err(DatatransError::InvalidArgument(format!(
            "记录总数不能为负数: {total_records}"
        )));
    }

    let batches = i64::from(batch_count);
    let per_batch = total_records / batches;
    let mut ranges = Vec::new();

    if per_batch > 0 {
        ranges.extend((0..batches).map(|i| TaskRange::new(per_batch, i * per_batch)));
    }

    let covered = per_batch * batches;
    if covered < total_records {
        ranges.push(TaskRange::new(total_records - covered, covered));
    }

    Ok(ranges)
}

/// Mission拆分器
pub struct MissionSplitter {
    mission_repo: Arc<dyn MissionRepository>,
    aggregator: Arc<MissionAggregator>,
}

impl MissionSplitter {
    pub fn new(mission_repo: Arc<dyn MissionRepository>, aggregator: Arc<MissionAggregator>) -> Self {
        Self {
            mission_repo,
            aggregator,
        }
    }

    /// 拆分Mission并原子地创建任务，Mission 变为 `SPLIT`
    ///
    /// 记录总数为0的 Mission 不产生任务，拆分后立即按完成策略结算。
    #[instrument(skip(self))]
    pub async fn split(&self, mission_id: &str) -> DatatransResult<Vec<Task>> {
        let mission = self
            .mission_repo
            .get_by_id(mission_id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))?;

        if mission.state != MissionState::Created {
            return Err(DatatransError::invalid_state(
                "Mission",
                mission_id,
                MissionState::Created,
                mission.state,
            ));
        }

        let ranges = split_ranges(mission.total_records, mission.batch_count)?;
        debug!(
            "Mission {} 拆分为 {} 个区间 (记录总数: {}, 批次数: {})",
            mission_id,
            ranges.len(),
            mission.total_records,
            mission.batch_count
        );

        let tasks = self.mission_repo.commit_split(mission_id, &ranges).await?;
        info!("Mission {} 已拆分，创建了 {} 个任务", mission_id, tasks.len());

        if tasks.is_empty() {
            self.aggregator.refresh(mission_id).await?;
        }

        Ok(tasks)
    }
}
