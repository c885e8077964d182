use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datatrans_core::{models::ConstraintRecord, DatatransResult};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::ConstraintCatalog;

/// 一次目录加载的结果
#[derive(Debug, Default, Clone)]
pub struct CatalogLoad {
    pub records: Vec<ConstraintRecord>,
    pub tables: Vec<String>,
}

/// 约束元数据来源
#[async_trait]
pub trait ConstraintLoader: Send + Sync {
    async fn load(&self) -> DatatransResult<CatalogLoad>;
}

/// 定期重新加载约束目录
#[derive(Clone)]
pub struct CatalogRefresher {
    catalog: ConstraintCatalog,
    loader: Arc<dyn ConstraintLoader>,
    interval: Duration,
}

impl CatalogRefresher {
    pub fn new(
        catalog: ConstraintCatalog,
        loader: Arc<dyn ConstraintLoader>,
        interval: Duration,
    ) -> Self {
        Self {
            catalog,
            loader,
            interval,
        }
    }

    pub async fn refresh_once(&self) -> DatatransResult<()> {
        let load = self.loader.load().await?;
        info!(
            "加载约束目录: {} 条约束, {} 张表",
            load.records.len(),
            load.tables.len()
        );
        self.catalog.replace(load.records, load.tables).await;
        Ok(())
    }

    /// 按间隔刷新直到收到关闭信号，加载失败时保留上一次的快照
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            debug!("目录刷新间隔为0，不启动定期刷新");
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        // 第一次 tick 立即完成，启动时已加载过一次
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        warn!("刷新约束目录失败，继续使用旧快照: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("约束目录刷新任务退出");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatrans_core::traits::ConstraintResolver;
    use datatrans_core::DatatransError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingLoader {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConstraintLoader for CountingLoader {
        async fn load(&self) -> DatatransResult<CatalogLoad> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call > 0 {
                return Err(DatatransError::Transient("catalog unavailable".into()));
            }
            Ok(CatalogLoad {
                records: vec![ConstraintRecord::foreign_key("Post", "authorId", "User", "id")],
                tables: vec!["Post".to_string(), "User".to_string()],
            })
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let catalog = ConstraintCatalog::default();
        let refresher = CatalogRefresher::new(
            catalog.clone(),
            Arc::new(CountingLoader {
                calls: AtomicU32::new(0),
            }),
            Duration::from_secs(60),
        );

        refresher.refresh_once().await.unwrap();
        assert!(refresher.refresh_once().await.is_err());

        let link = catalog.resolve("Post", "User").await.unwrap();
        assert_eq!(link.key_column, "authorId");
    }
}
