use async_trait::async_trait;
use datatrans_core::{
    models::{Task, TaskState, TaskUpdate},
    traits::TaskRepository,
    DatatransResult,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

pub(crate) const TASK_COLUMNS: &str = "id, mission_id, take, skip, state, queue_message_id, \
     queue_response, error_message, error_kind, started_at, completed_at, created_at, updated_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_task(row: &sqlx::postgres::PgRow) -> DatatransResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            mission_id: row.try_get("mission_id")?,
            take: row.try_get("take")?,
            skip: row.try_get("skip")?,
            state: row.try_get("state")?,
            queue_message_id: row.try_get("queue_message_id")?,
            queue_response: row.try_get("queue_response")?,
            error_message: row.try_get("error_message")?,
            error_kind: row.try_get("error_kind")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> DatatransResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_mission(&self, mission_id: &str) -> DatatransResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE mission_id = $1 ORDER BY skip ASC"
        ))
        .bind(mission_id)
        .fetch_all(&self.pool)
        .await?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<DatatransResult<Vec<_>>>()?;
        debug!("Mission {} 共有 {} 个任务", mission_id, tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn find_by_range(
        &self,
        mission_id: &str,
        skip: i64,
        take: i64,
    ) -> DatatransResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE mission_id = $1 AND skip = $2 AND take = $3"
        ))
        .bind(mission_id)
        .bind(skip)
        .bind(take)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, from, update), fields(task_id = %id, to = ?to))]
    async fn transition(
        &self,
        id: i64,
        from: &[TaskState],
        to: TaskState,
        update: TaskUpdate,
    ) -> DatatransResult<Option<Task>> {
        let expected: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let (message_id, response) = match update.receipt {
            Some(receipt) => (Some(receipt.message_id), Some(receipt.response)),
            None => (None, None),
        };
        let error_kind = update.error_kind.map(|k| k.as_str().to_string());

        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET state = $2::VARCHAR,
                queue_message_id = COALESCE($3, queue_message_id),
                queue_response = COALESCE($4, queue_response),
                started_at = CASE WHEN $2::VARCHAR = 'PROCESSING' THEN NOW() ELSE started_at END,
                completed_at = CASE
                    WHEN $2::VARCHAR IN ('DONE', 'FAILED') THEN NOW()
                    WHEN $2::VARCHAR = 'PROCESSING' THEN NULL
                    ELSE completed_at END,
                error_message = CASE
                    WHEN $2::VARCHAR = 'FAILED' THEN $5
                    WHEN $2::VARCHAR IN ('PROCESSING', 'DONE') THEN NULL
                    ELSE error_message END,
                error_kind = CASE
                    WHEN $2::VARCHAR = 'FAILED' THEN $6
                    WHEN $2::VARCHAR IN ('PROCESSING', 'DONE') THEN NULL
                    ELSE error_kind END,
                updated_at = NOW()
            WHERE id = $1 AND state = ANY($7)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(message_id)
        .bind(response)
        .bind(update.error_message)
        .bind(error_kind)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("任务 {} 状态变更为 {:?}", id, to);
                Ok(Some(task))
            }
            None => {
                debug!("任务 {} 当前状态不属于 {:?}，未变更为 {:?}", id, expected, to);
                Ok(None)
            }
        }
    }
}
