use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use datatrans_core::{
    identifier::{Identifier, QualifiedTable},
    models::{key_of, Row},
    traits::SourceStore,
    DatatransError, DatatransResult,
};
use serde_json::Value;
use tokio::sync::RwLock;

/// 内存数据源，按表名保存记录
#[derive(Default)]
pub struct InMemorySourceStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    queries: AtomicUsize,
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => key_of(x).cmp(&key_of(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一张表的全部记录，非对象值会被忽略
    pub async fn insert_table(&self, table: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.tables.write().await.insert(table.to_string(), rows);
    }

    /// 已执行的查询次数
    pub fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }

    async fn sorted_rows(&self, table: &QualifiedTable) -> DatatransResult<Vec<Row>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);
        let tables = self.tables.read().await;
        let mut rows = tables
            .get(table.name().as_str())
            .cloned()
            .ok_or_else(|| DatatransError::not_found("表", table))?;

        let pk = table.primary_key().as_str();
        rows.sort_by(|a, b| compare_values(a.get(pk), b.get(pk)));
        Ok(rows)
    }
}

#[async_trait]
impl SourceStore for InMemorySourceStore {
    async fn count_rows(&self, table: &QualifiedTable) -> DatatransResult<i64> {
        Ok(self.sorted_rows(table).await?.len() as i64)
    }

    async fn fetch_page(
        &self,
        table: &QualifiedTable,
        limit: i64,
        offset: i64,
    ) -> DatatransResult<Vec<Row>> {
        let rows = self.sorted_rows(table).await?;
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn fetch_by_keys(
        &self,
        table: &QualifiedTable,
        column: &Identifier,
        keys: &[Value],
    ) -> DatatransResult<Vec<Row>> {
        let wanted: HashSet<String> = keys.iter().filter_map(key_of).collect();
        let rows = self.sorted_rows(table).await?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.get(column.as_str())
                    .and_then(key_of)
                    .is_some_and(|key| wanted.contains(&key))
            })
            .collect())
    }
}
