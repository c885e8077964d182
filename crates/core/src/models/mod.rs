//! # 数据模型
//!
//! 数据传输管道的核心数据结构：
//!
//! - [`PipelineDefinition`] - 源表、关联表与目标索引的静态描述
//! - [`Mission`] - 一次数据搬运，记录总数与批次数
//! - [`Task`] - Mission 的一个分页批次
//! - [`Message`] - 队列消息与投递
//! - [`ConstraintRecord`] - 外键约束元数据
//! - [`CompositeDocument`] - 写入目标索引的复合文档
//!
//! 状态字段使用枚举并以大写字符串持久化（`CREATED`、`IN_QUEUE` ...），
//! 所有时间字段使用 `DateTime<Utc>`。

pub mod constraint;
pub mod document;
pub mod message;
pub mod mission;
pub mod pipeline;
pub mod task;

pub use constraint::*;
pub use document::*;
pub use message::*;
pub use mission::*;
pub use pipeline::*;
pub use task::*;
