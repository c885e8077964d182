use async_trait::async_trait;
use serde_json::Value;

use crate::{
    identifier::{Identifier, QualifiedTable},
    models::Row,
    DatatransResult,
};

/// 数据源查询接口
///
/// 表名和列名只接受经过白名单校验的 [`QualifiedTable`] / [`Identifier`]，
/// 其余值全部以参数绑定。
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// 统计源表记录数
    async fn count_rows(&self, table: &QualifiedTable) -> DatatransResult<i64>;

    /// 按主键升序分页读取 `[offset, offset + limit)`
    async fn fetch_page(
        &self,
        table: &QualifiedTable,
        limit: i64,
        offset: i64,
    ) -> DatatransResult<Vec<Row>>;

    /// 批量查找 `column` 取值属于 `keys` 的所有记录
    async fn fetch_by_keys(
        &self,
        table: &QualifiedTable,
        column: &Identifier,
        keys: &[Value],
    ) -> DatatransResult<Vec<Row>>;
}
