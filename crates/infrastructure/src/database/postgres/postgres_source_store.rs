use async_trait::async_trait;
use datatrans_core::{
    identifier::{Identifier, QualifiedTable},
    models::{key_of, Row},
    traits::SourceStore,
    DatatransError, DatatransResult,
};
use serde_json::{json, Value};
use sqlx::{PgPool, Row as _};
use tracing::{debug, instrument};

/// Postgres数据源
///
/// 查询文本只拼接经过白名单校验的标识符（带双引号），
/// 分页参数和键集合全部以参数绑定。每行通过 `to_jsonb` 转为列名到值的映射。
pub struct PostgresSourceStore {
    pool: PgPool,
}

impl PostgresSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 键集合以 jsonb 绑定，经表自身的行类型还原为列的实际类型后比较，
    /// 列本身不做转换，外键索引仍然可用
    fn key_lookup_sql(table: &QualifiedTable, column: &Identifier) -> String {
        format!(
            "SELECT to_jsonb(t) AS row FROM {table} t \
             WHERE t.{column} IN (SELECT k.{column} FROM jsonb_populate_recordset(NULL::{table}, $1) k) \
             ORDER BY t.{pk} ASC",
            table = table.quoted(),
            column = column.quoted(),
            pk = table.primary_key().quoted()
        )
    }

    fn row_to_json(row: &sqlx::postgres::PgRow) -> DatatransResult<Row> {
        match row.try_get::<Value, _>("row")? {
            Value::Object(map) => Ok(map),
            other => Err(DatatransError::Permanent(format!(
                "数据源返回了非对象记录: {other}"
            ))),
        }
    }
}

#[async_trait]
impl SourceStore for PostgresSourceStore {
    #[instrument(skip(self), fields(table = %table))]
    async fn count_rows(&self, table: &QualifiedTable) -> DatatransResult<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", table.quoted()))
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        debug!("表 {} 共有 {} 条记录", table, count);
        Ok(count)
    }

    #[instrument(skip(self), fields(table = %table))]
    async fn fetch_page(
        &self,
        table: &QualifiedTable,
        limit: i64,
        offset: i64,
    ) -> DatatransResult<Vec<Row>> {
        let sql = format!(
            "SELECT to_jsonb(t) AS row FROM {} t ORDER BY t.{} ASC LIMIT $1 OFFSET $2",
            table.quoted(),
            table.primary_key().quoted()
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        debug!("从 {} 读取 {} 条记录 (offset: {})", table, rows.len(), offset);
        rows.iter().map(Self::row_to_json).collect()
    }

    #[instrument(skip(self, keys), fields(table = %table, column = %column, keys = keys.len()))]
    async fn fetch_by_keys(
        &self,
        table: &QualifiedTable,
        column: &Identifier,
        keys: &[Value],
    ) -> DatatransResult<Vec<Row>> {
        let keys: Vec<Value> = keys
            .iter()
            .filter(|key| key_of(key).is_some())
            .map(|key| json!({ column.as_str(): key }))
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&Self::key_lookup_sql(table, column))
            .bind(Value::Array(keys))
            .fetch_all(&self.pool)
            .await?;

        debug!("按 {} 批量查询 {} 得到 {} 条记录", column, table, rows.len());
        rows.iter().map(Self::row_to_json).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datatrans_core::{identifier::TableAllowList, models::TableRef};

    #[test]
    fn test_key_lookup_compares_column_without_cast() {
        let table = TableAllowList::new(["orders"])
            .qualify(&TableRef::new("public", "orders"))
            .unwrap();
        let column = Identifier::parse("user_id").unwrap();

        let sql = PostgresSourceStore::key_lookup_sql(&table, &column);
        assert!(sql.contains(r#"WHERE t."user_id" IN (SELECT k."user_id""#));
        assert!(sql.contains(r#"jsonb_populate_recordset(NULL::"public"."orders", $1)"#));
        assert!(!sql.contains("::text"));
    }
}
