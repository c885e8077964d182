use async_trait::async_trait;

use crate::{
    models::{BulkUpsertReport, CompositeDocument},
    DatatransResult,
};

/// 目标索引写入接口
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// 按文档ID批量覆盖写入
    ///
    /// 只有整批文档都被确认时才返回成功；任何一条失败都返回错误，
    /// 调用方不应视该批次为已提交。
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[CompositeDocument],
    ) -> DatatransResult<BulkUpsertReport>;
}
