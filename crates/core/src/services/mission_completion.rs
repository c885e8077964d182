use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{MissionProgress, MissionState};
use crate::traits::{MissionRepository, TaskRepository};
use crate::{DatatransError, DatatransResult};

/// 完成判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDecision {
    /// 仍有任务未结束，或策略不允许完成
    Pending,
    /// Mission 可以标记为完成
    Complete { failed_tasks: usize },
}

/// Mission完成策略
pub trait CompletionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, progress: &MissionProgress) -> CompletionDecision;
}

/// 所有任务都为 DONE 时才完成；存在 FAILED 任务时 Mission 保持 SPLIT，
/// 等待失败任务经 `redispatch` 重新入队并处理
#[derive(Debug, Default, Clone, Copy)]
pub struct AllTasksDone;

impl CompletionPolicy for AllTasksDone {
    fn name(&self) -> &'static str {
        "all_done"
    }

    fn evaluate(&self, progress: &MissionProgress) -> CompletionDecision {
        if progress.done == progress.total() {
            CompletionDecision::Complete { failed_tasks: 0 }
        } else {
            CompletionDecision::Pending
        }
    }
}

/// 所有任务到达终态（DONE 或 FAILED）即完成，并记录失败数量
#[derive(Debug, Default, Clone, Copy)]
pub struct AllTasksTerminal;

impl CompletionPolicy for AllTasksTerminal {
    fn name(&self) -> &'static str {
        "all_terminal"
    }

    fn evaluate(&self, progress: &MissionProgress) -> CompletionDecision {
        if progress.active() == 0 {
            CompletionDecision::Complete {
                failed_tasks: progress.failed,
            }
        } else {
            CompletionDecision::Pending
        }
    }
}

/// 配置中的策略名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicyKind {
    #[default]
    AllDone,
    AllTerminal,
}

impl CompletionPolicyKind {
    pub fn build(&self) -> Arc<dyn CompletionPolicy> {
        match self {
            CompletionPolicyKind::AllDone => Arc::new(AllTasksDone),
            CompletionPolicyKind::AllTerminal => Arc::new(AllTasksTerminal),
        }
    }
}

/// Mission完成聚合器
///
/// 在任务到达终态后重新统计 Mission 的任务，按策略条件更新 `SPLIT → DONE`。
/// 条件更新保证并发的重复投递只会让 Mission 完成一次。
pub struct MissionAggregator {
    mission_repo: Arc<dyn MissionRepository>,
    task_repo: Arc<dyn TaskRepository>,
    policy: Arc<dyn CompletionPolicy>,
}

impl MissionAggregator {
    pub fn new(
        mission_repo: Arc<dyn MissionRepository>,
        task_repo: Arc<dyn TaskRepository>,
        policy: Arc<dyn CompletionPolicy>,
    ) -> Self {
        Self {
            mission_repo,
            task_repo,
            policy,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// 重新评估 Mission，返回是否由本次调用完成了 Mission
    pub async fn refresh(&self, mission_id: &str) -> DatatransResult<bool> {
        let mission = self
            .mission_repo
            .get_by_id(mission_id)
            .await?
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))?;

        if mission.state != MissionState::Split {
            debug!(
                "Mission {} 当前状态 {:?}，跳过完成判定",
                mission_id, mission.state
            );
            return Ok(false);
        }

        let tasks = self.task_repo.list_by_mission(mission_id).await?;
        let progress = MissionProgress::from_tasks(&tasks);

        match self.policy.evaluate(&progress) {
            CompletionDecision::Pending => {
                debug!(
                    "Mission {} 尚未完成: 已结束 {}/{}, 失败 {}",
                    mission_id,
                    progress.finished(),
                    progress.total(),
                    progress.failed
                );
                Ok(false)
            }
            CompletionDecision::Complete { failed_tasks } => {
                let completed = self
                    .mission_repo
                    .mark_done(mission_id, failed_tasks as i32)
                    .await?;
                if completed {
                    info!(
                        "Mission {} 已完成 (策略: {}, 任务数: {}, 失败: {})",
                        mission_id,
                        self.policy.name(),
                        progress.total(),
                        failed_tasks
                    );
                }
                Ok(completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(done: usize, failed: usize, processing: usize) -> MissionProgress {
        MissionProgress {
            done,
            failed,
            processing,
            ..MissionProgress::default()
        }
    }

    #[test]
    fn test_all_done_policy() {
        let policy = AllTasksDone;
        assert_eq!(
            policy.evaluate(&progress(5, 0, 0)),
            CompletionDecision::Complete { failed_tasks: 0 }
        );
        assert_eq!(policy.evaluate(&progress(4, 1, 0)), CompletionDecision::Pending);
        assert_eq!(policy.evaluate(&progress(4, 0, 1)), CompletionDecision::Pending);
    }

    #[test]
    fn test_all_terminal_policy_counts_failures() {
        let policy = AllTasksTerminal;
        assert_eq!(
            policy.evaluate(&progress(4, 1, 0)),
            CompletionDecision::Complete { failed_tasks: 1 }
        );
        assert_eq!(policy.evaluate(&progress(3, 1, 1)), CompletionDecision::Pending);
    }

    #[test]
    fn test_empty_mission_completes() {
        let empty = MissionProgress::default();
        assert_eq!(
            AllTasksDone.evaluate(&empty),
            CompletionDecision::Complete { failed_tasks: 0 }
        );
        assert_eq!(
            AllTasksTerminal.evaluate(&empty),
            CompletionDecision::Complete { failed_tasks: 0 }
        );
    }

    #[test]
    fn test_policy_kind_builds_named_policy() {
        assert_eq!(CompletionPolicyKind::AllDone.build().name(), "all_done");
        assert_eq!(CompletionPolicyKind::AllTerminal.build().name(), "all_terminal");
        let kind: CompletionPolicyKind = serde_json::from_str("\"all_terminal\"").unwrap();
        assert_eq!(kind, CompletionPolicyKind::AllTerminal);
    }
}
