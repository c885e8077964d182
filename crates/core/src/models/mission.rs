use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Task, TaskState};
use crate::errors::{DatatransError, DatatransResult};

/// 任务批次（Mission）
///
/// 描述要从源表搬运多少条记录，以及拆分为多少批。
///
/// # 状态流转
///
/// ```text
/// CREATED → SPLIT → DONE
/// ```
///
/// - `CREATED → SPLIT` 由拆分器在创建任务的同一事务中完成
/// - `SPLIT → DONE` 由完成策略在所有任务到达终态后触发
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub pipeline_id: String,
    pub total_records: i64,
    pub batch_count: i32,
    pub state: MissionState,
    /// 完成时失败的任务数量，仅在 `all_terminal` 策略下可能大于0
    pub failed_tasks: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// 创建新的Mission，在任何状态写入前校验参数
    pub fn new(
        pipeline_id: impl Into<String>,
        total_records: i64,
        batch_count: i32,
    ) -> DatatransResult<Self> {
        if total_records < 0 {
            return Err(DatatransError::InvalidArgument(format!(
                "记录总数不能为负数: {total_records}"
            )));
        }
        if batch_count < 1 {
            return Err(DatatransError::InvalidArgument(format!(
                "批次数必须大于等于1: {batch_count}"
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            total_records,
            batch_count,
            state: MissionState::Created,
            failed_tasks: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Mission状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    Created,
    Split,
    Done,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionState::Created => "CREATED",
            MissionState::Split => "SPLIT",
            MissionState::Done => "DONE",
        }
    }
}

impl FromStr for MissionState {
    type Err = DatatransError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(MissionState::Created),
            "SPLIT" => Ok(MissionState::Split),
            "DONE" => Ok(MissionState::Done),
            _ => Err(DatatransError::Serialization(format!(
                "Invalid mission state: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for MissionState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for MissionState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse().map_err(|e: DatatransError| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for MissionState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// Mission进度统计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionProgress {
    pub created: usize,
    pub in_queue: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

impl MissionProgress {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut progress = Self::default();
        for task in tasks {
            match task.state {
                TaskState::Created => progress.created += 1,
                TaskState::InQueue => progress.in_queue += 1,
                TaskState::Processing => progress.processing += 1,
                TaskState::Done => progress.done += 1,
                TaskState::Failed => progress.failed += 1,
            }
        }
        progress
    }

    pub fn total(&self) -> usize {
        self.created + self.in_queue + self.processing + self.done + self.failed
    }

    pub fn active(&self) -> usize {
        self.created + self.in_queue + self.processing
    }

    pub fn finished(&self) -> usize {
        self.done + self.failed
    }
}
