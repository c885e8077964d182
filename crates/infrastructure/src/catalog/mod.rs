//! 约束元数据目录
//!
//! [`ConstraintCatalog`] 持有约束记录的进程内快照并实现约束解析；
//! 快照由 [`CatalogRefresher`] 独立于管道执行定期从数据源重新加载。

pub mod postgres_loader;
pub mod refresher;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use datatrans_core::{
    models::{ConstraintKeyType, ConstraintRecord, ForeignKeyLink},
    traits::ConstraintResolver,
    DatatransError, DatatransResult,
};
use tokio::sync::RwLock;
use tracing::debug;

pub use postgres_loader::PostgresConstraintLoader;
pub use refresher::{CatalogLoad, CatalogRefresher, ConstraintLoader};

#[derive(Debug, Default, Clone)]
struct CatalogSnapshot {
    records: Vec<ConstraintRecord>,
    tables: BTreeSet<String>,
}

impl CatalogSnapshot {
    fn new(records: Vec<ConstraintRecord>, extra_tables: impl IntoIterator<Item = String>) -> Self {
        let mut tables: BTreeSet<String> = records.iter().map(|r| r.table.clone()).collect();
        tables.extend(
            records
                .iter()
                .filter_map(|r| r.foreign_table.clone()),
        );
        tables.extend(extra_tables);
        Self { records, tables }
    }
}

/// 约束目录
#[derive(Debug, Default, Clone)]
pub struct ConstraintCatalog {
    snapshot: Arc<RwLock<CatalogSnapshot>>,
}

impl ConstraintCatalog {
    pub fn new(records: Vec<ConstraintRecord>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(CatalogSnapshot::new(records, Vec::new()))),
        }
    }

    /// 原子地替换整个快照
    pub async fn replace(&self, records: Vec<ConstraintRecord>, tables: Vec<String>) {
        let snapshot = CatalogSnapshot::new(records, tables);
        debug!(
            "约束目录已更新: {} 条约束, {} 张表",
            snapshot.records.len(),
            snapshot.tables.len()
        );
        *self.snapshot.write().await = snapshot;
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.records.is_empty()
    }
}

#[async_trait]
impl ConstraintResolver for ConstraintCatalog {
    async fn resolve(&self, child_table: &str, parent_table: &str) -> DatatransResult<ForeignKeyLink> {
        let snapshot = self.snapshot.read().await;
        let mut matches = snapshot
            .records
            .iter()
            .filter(|r| r.links(child_table, parent_table));

        let link_id = format!("{child_table} -> {parent_table}");
        let record = matches
            .next()
            .ok_or_else(|| DatatransError::not_found("外键约束", &link_id))?;
        if matches.next().is_some() {
            return Err(DatatransError::NotFound {
                entity: "唯一外键约束",
                id: link_id,
            });
        }

        Ok(ForeignKeyLink {
            child_table: record.table.clone(),
            key_column: record.key_column.clone(),
            parent_table: parent_table.to_string(),
            foreign_column: record
                .foreign_column
                .clone()
                .unwrap_or_else(|| "id".to_string()),
        })
    }

    async fn primary_key(&self, table: &str) -> DatatransResult<Option<String>> {
        let snapshot = self.snapshot.read().await;
        Ok(snapshot
            .records
            .iter()
            .find(|r| r.key_type == ConstraintKeyType::PrimaryKey && r.table == table)
            .map(|r| r.key_column.clone()))
    }

    async fn known_tables(&self) -> DatatransResult<Vec<String>> {
        Ok(self.snapshot.read().await.tables.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_catalog() -> ConstraintCatalog {
        ConstraintCatalog::new(vec![
            ConstraintRecord::primary_key("User", "id"),
            ConstraintRecord::primary_key("Post", "id"),
            ConstraintRecord::foreign_key("Post", "authorId", "User", "id"),
            ConstraintRecord::foreign_key("Comment", "postId", "Post", "id"),
        ])
    }

    #[tokio::test]
    async fn test_resolve_foreign_key() {
        let link = blog_catalog().resolve("Post", "User").await.unwrap();
        assert_eq!(link.key_column, "authorId");
        assert_eq!(link.foreign_column, "id");
    }

    #[tokio::test]
    async fn test_resolve_missing_constraint() {
        let err = blog_catalog().resolve("User", "Post").await.unwrap_err();
        assert!(matches!(err, DatatransError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_ambiguous_constraint() {
        let catalog = ConstraintCatalog::new(vec![
            ConstraintRecord::foreign_key("Post", "authorId", "User", "id"),
            ConstraintRecord::foreign_key("Post", "editorId", "User", "id"),
        ]);
        assert!(matches!(
            catalog.resolve("Post", "User").await,
            Err(DatatransError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_known_tables_include_referenced_tables() {
        let catalog = blog_catalog();
        let tables = catalog.known_tables().await.unwrap();
        assert_eq!(tables, vec!["Comment", "Post", "User"]);
        assert_eq!(catalog.primary_key("Post").await.unwrap().as_deref(), Some("id"));
        assert_eq!(catalog.primary_key("Comment").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_swaps_snapshot() {
        let catalog = blog_catalog();
        catalog
            .replace(Vec::new(), vec!["Audit".to_string()])
            .await;
        assert!(catalog.is_empty().await);
        assert_eq!(catalog.known_tables().await.unwrap(), vec!["Audit"]);
    }
}
