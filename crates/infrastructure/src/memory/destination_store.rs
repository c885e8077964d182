use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use datatrans_core::{
    models::{BulkUpsertReport, CompositeDocument, Row},
    traits::DestinationStore,
    DatatransError, DatatransResult,
};
use tokio::sync::RwLock;

/// 内存目标索引，按文档ID覆盖写入
#[derive(Default)]
pub struct InMemoryDestinationStore {
    indices: RwLock<HashMap<String, BTreeMap<String, Row>>>,
    rejection: RwLock<Option<String>>,
    bulk_requests: AtomicUsize,
}

impl InMemoryDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的写入都以永久性错误拒绝，传入 `None` 恢复
    pub async fn set_rejection(&self, reason: Option<String>) {
        *self.rejection.write().await = reason;
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Row> {
        self.indices
            .read()
            .await
            .get(index)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// 索引中按ID排序的全部文档
    pub async fn documents(&self, index: &str) -> Vec<CompositeDocument> {
        self.indices
            .read()
            .await
            .get(index)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| CompositeDocument {
                        id: id.clone(),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bulk_requests(&self) -> usize {
        self.bulk_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationStore for InMemoryDestinationStore {
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[CompositeDocument],
    ) -> DatatransResult<BulkUpsertReport> {
        self.bulk_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.rejection.read().await.as_ref() {
            return Err(DatatransError::Permanent(reason.clone()));
        }

        let mut indices = self.indices.write().await;
        let docs = indices.entry(index.to_string()).or_default();
        for document in documents {
            docs.insert(document.id.clone(), document.body.clone());
        }

        Ok(BulkUpsertReport {
            index: index.to_string(),
            upserted: documents.len(),
        })
    }
}
