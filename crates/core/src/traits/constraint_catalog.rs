use async_trait::async_trait;

use crate::{models::ForeignKeyLink, DatatransResult};

/// 约束解析接口，由独立刷新的元数据目录提供
#[async_trait]
pub trait ConstraintResolver: Send + Sync {
    /// 解析 `child_table` 引用 `parent_table` 的外键列
    ///
    /// 不存在或存在多个匹配的外键约束时返回 `NotFound`。
    async fn resolve(&self, child_table: &str, parent_table: &str)
        -> DatatransResult<ForeignKeyLink>;

    /// 表的主键列
    async fn primary_key(&self, table: &str) -> DatatransResult<Option<String>>;

    /// 目录中已知的全部表
    async fn known_tables(&self) -> DatatransResult<Vec<String>>;
}
