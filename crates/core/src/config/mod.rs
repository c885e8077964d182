//! 配置管理
//!
//! 配置来源按优先级从低到高：各节默认值、TOML配置文件、`DATATRANS_` 前缀的环境变量。

pub mod models;

pub use models::*;
