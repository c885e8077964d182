//! Mission拆分与任务分发
//!
//! - [`splitter`] - 将 Mission 的记录区间拆分为任务
//! - [`task_dispatcher`] - 将任务发布到队列并推进为 `IN_QUEUE`
//! - [`mission_service`] - 面向调用方的 Mission 生命周期入口

pub mod mission_service;
pub mod splitter;
pub mod task_dispatcher;

pub use mission_service::{DispatchSummary, MissionService};
pub use splitter::{split_ranges, MissionSplitter};
pub use task_dispatcher::TaskDispatcher;
