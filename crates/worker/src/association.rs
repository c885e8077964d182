//! 关联表遍历
//!
//! 每张子表和父表各发起一次批量查询，以当前页所有源行的键集合为条件，
//! 查询结果在内存中按键分组。

use std::collections::HashMap;
use std::sync::Arc;

use datatrans_core::{
    identifier::{Identifier, QualifiedTable, TableAllowList},
    models::{key_of, PipelineDefinition, Row, TableRef},
    retry_transient,
    traits::{ConstraintResolver, SourceStore},
    DatatransResult, RetryPolicy,
};
use serde_json::Value;
use tracing::debug;

/// 一对多子表：`child.foreign_key → source.referenced`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildAssociation {
    pub table: QualifiedTable,
    pub foreign_key: Identifier,
    pub referenced: Identifier,
}

/// 多对一父表：`source.foreign_key → parent.referenced`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentAssociation {
    pub table: QualifiedTable,
    pub foreign_key: Identifier,
    pub referenced: Identifier,
}

/// 解析完成的关联，表名和列名都已通过校验
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationPlan {
    pub children: Vec<ChildAssociation>,
    pub parents: Vec<ParentAssociation>,
}

/// 某张子表按源行键分组的记录
#[derive(Debug, Clone)]
pub struct ChildRows {
    pub table: String,
    /// 源行上用于分组的列
    pub source_column: Identifier,
    pub groups: HashMap<String, Vec<Row>>,
}

/// 某张父表按键索引的记录
#[derive(Debug, Clone)]
pub struct ParentRows {
    pub table: String,
    /// 源行上引用父表的列
    pub source_column: Identifier,
    pub by_key: HashMap<String, Row>,
}

/// 一页源行对应的全部关联记录
#[derive(Debug, Clone, Default)]
pub struct LoadedAssociations {
    pub children: Vec<ChildRows>,
    pub parents: Vec<ParentRows>,
}

fn distinct_keys(rows: &[Row], column: &Identifier) -> Vec<Value> {
    let mut seen = HashMap::new();
    for row in rows {
        if let Some(value) = row.get(column.as_str()) {
            if let Some(key) = key_of(value) {
                seen.entry(key).or_insert_with(|| value.clone());
            }
        }
    }
    let mut keys: Vec<(String, Value)> = seen.into_iter().collect();
    keys.sort_by(|a, b| a.0.cmp(&b.0));
    keys.into_iter().map(|(_, value)| value).collect()
}

pub struct AssociationLoader {
    source_store: Arc<dyn SourceStore>,
    resolver: Arc<dyn ConstraintResolver>,
    retry: RetryPolicy,
}

impl AssociationLoader {
    pub fn new(
        source_store: Arc<dyn SourceStore>,
        resolver: Arc<dyn ConstraintResolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_store,
            resolver,
            retry,
        }
    }

    async fn resolve_primary_key(&self, table: &str) -> DatatransResult<String> {
        let resolver = &self.resolver;
        Ok(retry_transient(&self.retry, "查询主键", move || {
            resolver.primary_key(table)
        })
        .await?
        .unwrap_or_else(|| "id".to_string()))
    }

    async fn qualify(
        &self,
        allow_list: &TableAllowList,
        schema: &Identifier,
        table: &str,
    ) -> DatatransResult<QualifiedTable> {
        allow_list.check(table)?;
        let primary_key = self.resolve_primary_key(table).await?;
        allow_list.qualify(
            &TableRef::new(schema.as_str(), table).with_primary_key(primary_key),
        )
    }

    /// 限定源表，管道未配置主键时从约束目录解析
    pub async fn qualify_source(
        &self,
        allow_list: &TableAllowList,
        table: &TableRef,
    ) -> DatatransResult<QualifiedTable> {
        if table.primary_key.is_some() {
            return allow_list.qualify(table);
        }
        allow_list.check(&table.name)?;
        let primary_key = self.resolve_primary_key(&table.name).await?;
        allow_list.qualify(&table.clone().with_primary_key(primary_key))
    }

    /// 通过约束目录解析管道的全部关联，不访问数据源
    pub async fn plan(
        &self,
        pipeline: &PipelineDefinition,
        source: &QualifiedTable,
        allow_list: &TableAllowList,
    ) -> DatatransResult<AssociationPlan> {
        let resolver = &self.resolver;
        let source_name = source.name().as_str();
        let mut plan = AssociationPlan::default();

        for child in &pipeline.child_tables {
            let table = self.qualify(allow_list, source.schema(), child).await?;
            let link = retry_transient(&self.retry, "解析子表外键", move || {
                resolver.resolve(child, source_name)
            })
            .await?;
            plan.children.push(ChildAssociation {
                table,
                foreign_key: Identifier::parse(&link.key_column)?,
                referenced: Identifier::parse(&link.foreign_column)?,
            });
        }

        for parent in &pipeline.parent_tables {
            let table = self.qualify(allow_list, source.schema(), parent).await?;
            let link = retry_transient(&self.retry, "解析父表外键", move || {
                resolver.resolve(source_name, parent)
            })
            .await?;
            plan.parents.push(ParentAssociation {
                table,
                foreign_key: Identifier::parse(&link.key_column)?,
                referenced: Identifier::parse(&link.foreign_column)?,
            });
        }

        Ok(plan)
    }

    /// 为一页源行批量加载关联记录
    pub async fn load(
        &self,
        plan: &AssociationPlan,
        rows: &[Row],
    ) -> DatatransResult<LoadedAssociations> {
        let mut loaded = LoadedAssociations::default();
        if rows.is_empty() {
            return Ok(loaded);
        }

        for child in &plan.children {
            let keys = distinct_keys(rows, &child.referenced);
            let fetched = self
                .fetch_by_keys(&child.table, &child.foreign_key, &keys)
                .await?;

            let mut groups: HashMap<String, Vec<Row>> = HashMap::new();
            for row in fetched {
                if let Some(key) = row.get(child.foreign_key.as_str()).and_then(key_of) {
                    groups.entry(key).or_default().push(row);
                }
            }
            debug!(
                "子表 {} 为 {} 个键加载了 {} 组记录",
                child.table,
                keys.len(),
                groups.len()
            );
            loaded.children.push(ChildRows {
                table: child.table.name().to_string(),
                source_column: child.referenced.clone(),
                groups,
            });
        }

        for parent in &plan.parents {
            let keys = distinct_keys(rows, &parent.foreign_key);
            let fetched = self
                .fetch_by_keys(&parent.table, &parent.referenced, &keys)
                .await?;

            let by_key: HashMap<String, Row> = fetched
                .into_iter()
                .filter_map(|row| {
                    let key = row.get(parent.referenced.as_str()).and_then(key_of)?;
                    Some((key, row))
                })
                .collect();
            loaded.parents.push(ParentRows {
                table: parent.table.name().to_string(),
                source_column: parent.foreign_key.clone(),
                by_key,
            });
        }

        Ok(loaded)
    }

    async fn fetch_by_keys(
        &self,
        table: &QualifiedTable,
        column: &Identifier,
        keys: &[Value],
    ) -> DatatransResult<Vec<Row>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let source = &self.source_store;
        retry_transient(&self.retry, "批量查询关联记录", move || {
            source.fetch_by_keys(table, column, keys)
        })
        .await
    }
}
