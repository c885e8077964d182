use std::ops::Range;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PublishReceipt;
use crate::errors::{DatatransError, ErrorKind};

/// 任务：Mission 的一个连续分页批次
///
/// 覆盖源表中 `[skip, skip + take)` 的记录，可独立分发和处理。
///
/// # 状态流转
///
/// ```text
/// CREATED → IN_QUEUE → PROCESSING → DONE
///                          ↓  ↑
///                         FAILED
/// ```
///
/// `PROCESSING` 和 `FAILED` 的任务可以被重新投递的消息再次认领。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub mission_id: String,
    pub take: i64,
    pub skip: i64,
    pub state: TaskState,
    pub queue_message_id: Option<String>,
    pub queue_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 任务覆盖的记录区间
    pub fn range(&self) -> Range<i64> {
        self.skip..self.skip + self.take
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 应用一次状态变更（内存实现和测试使用，数据库实现在SQL中完成同样的更新）
    pub fn apply(&mut self, to: TaskState, update: &TaskUpdate) {
        let now = Utc::now();
        self.state = to;
        self.updated_at = now;

        if let Some(receipt) = &update.receipt {
            self.queue_message_id = Some(receipt.message_id.clone());
            self.queue_response = Some(receipt.response.clone());
        }
        match to {
            TaskState::Processing => {
                self.started_at = Some(now);
                self.completed_at = None;
                self.error_message = None;
                self.error_kind = None;
            }
            TaskState::Done => {
                self.completed_at = Some(now);
                self.error_message = None;
                self.error_kind = None;
            }
            TaskState::Failed => {
                self.completed_at = Some(now);
                self.error_message = update.error_message.clone();
                self.error_kind = update.error_kind.map(|k| k.as_str().to_string());
            }
            TaskState::Created | TaskState::InQueue => {}
        }
    }
}

/// 拆分器产生的任务区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRange {
    pub take: i64,
    pub skip: i64,
}

impl TaskRange {
    pub fn new(take: i64, skip: i64) -> Self {
        Self { take, skip }
    }

    pub fn end(&self) -> i64 {
        self.skip + self.take
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    InQueue,
    Processing,
    Done,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "CREATED",
            TaskState::InQueue => "IN_QUEUE",
            TaskState::Processing => "PROCESSING",
            TaskState::Done => "DONE",
            TaskState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    /// 处理器可以从这些状态认领任务
    ///
    /// 包含 `CREATED`：消息已经发布但入队记录尚未写入时，投递本身即是入队的证据。
    pub fn claimable() -> &'static [TaskState] {
        &[
            TaskState::Created,
            TaskState::InQueue,
            TaskState::Processing,
            TaskState::Failed,
        ]
    }
}

impl FromStr for TaskState {
    type Err = DatatransError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TaskState::Created),
            "IN_QUEUE" => Ok(TaskState::InQueue),
            "PROCESSING" => Ok(TaskState::Processing),
            "DONE" => Ok(TaskState::Done),
            "FAILED" => Ok(TaskState::Failed),
            _ => Err(DatatransError::Serialization(format!(
                "Invalid task state: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskState {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskState {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse().map_err(|e: DatatransError| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 状态变更时一并写入的字段
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub receipt: Option<PublishReceipt>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl TaskUpdate {
    /// 入队成功，记录队列回执
    pub fn enqueued(receipt: PublishReceipt) -> Self {
        Self {
            receipt: Some(receipt),
            ..Self::default()
        }
    }

    /// 处理失败，记录错误信息
    pub fn failed(error: &DatatransError) -> Self {
        Self {
            error_message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::default()
        }
    }
}
