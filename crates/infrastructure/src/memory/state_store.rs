use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use datatrans_core::{
    models::{Mission, MissionState, PipelineDefinition, Task, TaskRange, TaskState, TaskUpdate},
    traits::{MissionRepository, PipelineRepository, TaskRepository},
    DatatransError, DatatransResult,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    pipelines: BTreeMap<String, PipelineDefinition>,
    missions: HashMap<String, Mission>,
    tasks: BTreeMap<i64, Task>,
    next_task_id: i64,
}

/// 内存状态存储，同时实现管道、Mission 和任务仓储
///
/// 所有条件更新都在同一把锁内完成检查和写入。
#[derive(Default)]
pub struct InMemoryStateStore {
    state: Mutex<State>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_pipelines(pipelines: Vec<PipelineDefinition>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().await;
            for pipeline in pipelines {
                state.pipelines.insert(pipeline.id.clone(), pipeline);
            }
        }
        store
    }
}

#[async_trait]
impl PipelineRepository for InMemoryStateStore {
    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<PipelineDefinition>> {
        Ok(self.state.lock().await.pipelines.get(id).cloned())
    }

    async fn save(&self, pipeline: &PipelineDefinition) -> DatatransResult<()> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.pipelines.get(&pipeline.id) {
            let referenced = state.missions.values().any(|m| m.pipeline_id == pipeline.id);
            if referenced && !current.same_definition(pipeline) {
                return Err(DatatransError::InvalidState {
                    entity: "Pipeline",
                    id: pipeline.id.clone(),
                    expected: "未被Mission引用".to_string(),
                    actual: "已被Mission引用".to_string(),
                });
            }
        }
        state.pipelines.insert(pipeline.id.clone(), pipeline.clone());
        Ok(())
    }

    async fn list(&self) -> DatatransResult<Vec<PipelineDefinition>> {
        Ok(self.state.lock().await.pipelines.values().cloned().collect())
    }
}

#[async_trait]
impl MissionRepository for InMemoryStateStore {
    async fn create(&self, mission: &Mission) -> DatatransResult<Mission> {
        let mut state = self.state.lock().await;
        if state.missions.contains_key(&mission.id) {
            return Err(DatatransError::InvalidArgument(format!(
                "Mission {} 已存在",
                mission.id
            )));
        }
        state.missions.insert(mission.id.clone(), mission.clone());
        Ok(mission.clone())
    }

    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<Mission>> {
        Ok(self.state.lock().await.missions.get(id).cloned())
    }

    async fn commit_split(
        &self,
        mission_id: &str,
        ranges: &[TaskRange],
    ) -> DatatransResult<Vec<Task>> {
        let mut state = self.state.lock().await;
        let mission_state = state
            .missions
            .get(mission_id)
            .map(|m| m.state)
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))?;
        if mission_state != MissionState::Created {
            return Err(DatatransError::invalid_state(
                "Mission",
                mission_id,
                MissionState::Created,
                mission_state,
            ));
        }

        let now = Utc::now();
        let mut tasks = Vec::with_capacity(ranges.len());
        for range in ranges {
            state.next_task_id += 1;
            let task = Task {
                id: state.next_task_id,
                mission_id: mission_id.to_string(),
                take: range.take,
                skip: range.skip,
                state: TaskState::Created,
                queue_message_id: None,
                queue_response: None,
                error_message: None,
                error_kind: None,
                started_at: None,
                completed_at: None,
                created_at: now,
                updated_at: now,
            };
            state.tasks.insert(task.id, task.clone());
            tasks.push(task);
        }

        if let Some(mission) = state.missions.get_mut(mission_id) {
            mission.state = MissionState::Split;
            mission.updated_at = now;
        }
        Ok(tasks)
    }

    async fn mark_done(&self, mission_id: &str, failed_tasks: i32) -> DatatransResult<bool> {
        let mut state = self.state.lock().await;
        match state.missions.get_mut(mission_id) {
            Some(mission) if mission.state == MissionState::Split => {
                mission.state = MissionState::Done;
                mission.failed_tasks = failed_tasks;
                mission.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(DatatransError::not_found("Mission", mission_id)),
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryStateStore {
    async fn get_by_id(&self, id: i64) -> DatatransResult<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list_by_mission(&self, mission_id: &str) -> DatatransResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.mission_id == mission_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.skip);
        Ok(tasks)
    }

    async fn find_by_range(
        &self,
        mission_id: &str,
        skip: i64,
        take: i64,
    ) -> DatatransResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .find(|t| t.mission_id == mission_id && t.skip == skip && t.take == take)
            .cloned())
    }

    async fn transition(
        &self,
        id: i64,
        from: &[TaskState],
        to: TaskState,
        update: TaskUpdate,
    ) -> DatatransResult<Option<Task>> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&id) {
            Some(task) if from.contains(&task.state) => {
                task.apply(to, &update);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }
}
