//! 数据传输系统核心库
//!
//! 包含领域模型、状态存储与外部系统的接口定义、配置模型以及公共的错误和重试工具。

pub mod config;
pub mod errors;
pub mod identifier;
pub mod models;
pub mod retry;
pub mod services;
pub mod traits;

pub use errors::{DatatransError, DatatransResult, ErrorKind};
pub use identifier::{Identifier, QualifiedTable, TableAllowList};
pub use retry::{retry_transient, RetryPolicy};
