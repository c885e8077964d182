use async_trait::async_trait;
use datatrans_core::{
    models::{Mission, MissionState, Task, TaskRange},
    traits::MissionRepository,
    DatatransError, DatatransResult,
};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use super::postgres_task_repository::{PostgresTaskRepository, TASK_COLUMNS};

const MISSION_COLUMNS: &str =
    "id, pipeline_id, total_records, batch_count, state, failed_tasks, created_at, updated_at";

pub struct PostgresMissionRepository {
    pool: PgPool,
}

impl PostgresMissionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_mission(row: &sqlx::postgres::PgRow) -> DatatransResult<Mission> {
        Ok(Mission {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            total_records: row.try_get("total_records")?,
            batch_count: row.try_get("batch_count")?,
            state: row.try_get("state")?,
            failed_tasks: row.try_get("failed_tasks")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MissionRepository for PostgresMissionRepository {
    #[instrument(skip(self, mission), fields(mission_id = %mission.id, pipeline_id = %mission.pipeline_id))]
    async fn create(&self, mission: &Mission) -> DatatransResult<Mission> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO missions (id, pipeline_id, total_records, batch_count, state, failed_tasks, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {MISSION_COLUMNS}
            "#
        ))
        .bind(&mission.id)
        .bind(&mission.pipeline_id)
        .bind(mission.total_records)
        .bind(mission.batch_count)
        .bind(mission.state)
        .bind(mission.failed_tasks)
        .bind(mission.created_at)
        .bind(mission.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_mission(&row)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<Mission>> {
        let row = sqlx::query(&format!(
            "SELECT {MISSION_COLUMNS} FROM missions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_mission).transpose()
    }

    #[instrument(skip(self, ranges), fields(ranges = ranges.len()))]
    async fn commit_split(
        &self,
        mission_id: &str,
        ranges: &[TaskRange],
    ) -> DatatransResult<Vec<Task>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT state FROM missions WHERE id = $1 FOR UPDATE")
            .bind(mission_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DatatransError::not_found("Mission", mission_id))?;
        let state: MissionState = row.try_get("state")?;
        if state != MissionState::Created {
            return Err(DatatransError::invalid_state(
                "Mission",
                mission_id,
                MissionState::Created,
                state,
            ));
        }

        let takes: Vec<i64> = ranges.iter().map(|r| r.take).collect();
        let skips: Vec<i64> = ranges.iter().map(|r| r.skip).collect();
        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (mission_id, take, skip, state)
            SELECT $1, r.take, r.skip, 'CREATED'
            FROM UNNEST($2::BIGINT[], $3::BIGINT[]) AS r(take, skip)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(mission_id)
        .bind(&takes)
        .bind(&skips)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("UPDATE missions SET state = 'SPLIT', updated_at = NOW() WHERE id = $1")
            .bind(mission_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut tasks = rows
            .iter()
            .map(PostgresTaskRepository::row_to_task)
            .collect::<DatatransResult<Vec<_>>>()?;
        tasks.sort_by_key(|t| t.skip);

        debug!("Mission {} 提交拆分，创建 {} 个任务", mission_id, tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn mark_done(&self, mission_id: &str, failed_tasks: i32) -> DatatransResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE missions
            SET state = 'DONE', failed_tasks = $2, updated_at = NOW()
            WHERE id = $1 AND state = 'SPLIT'
            "#,
        )
        .bind(mission_id)
        .bind(failed_tasks)
        .execute(&self.pool)
        .await?;

        let completed = result.rows_affected() == 1;
        if completed {
            info!("Mission {} 状态变更为 DONE", mission_id);
        }
        Ok(completed)
    }
}
