use async_trait::async_trait;
use datatrans_core::{
    models::{ConstraintKeyType, ConstraintRecord},
    DatatransResult,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

use super::refresher::{CatalogLoad, ConstraintLoader};

/// 从 `information_schema` 加载主键、外键和唯一约束
pub struct PostgresConstraintLoader {
    pool: PgPool,
    schema: String,
}

impl PostgresConstraintLoader {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl ConstraintLoader for PostgresConstraintLoader {
    #[instrument(skip(self), fields(schema = %self.schema))]
    async fn load(&self) -> DatatransResult<CatalogLoad> {
        let rows = sqlx::query(
            r#"
            SELECT tc.table_name::text AS table_name,
                   kcu.column_name::text AS key_column,
                   tc.constraint_type::text AS key_type,
                   ccu.table_name::text AS foreign_table,
                   ccu.column_name::text AS foreign_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            LEFT JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_type = 'FOREIGN KEY'
             AND ccu.constraint_name = tc.constraint_name
             AND ccu.constraint_schema = tc.table_schema
            WHERE tc.table_schema = $1
              AND tc.constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY', 'UNIQUE')
            ORDER BY tc.table_name, kcu.column_name
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let key_type: String = row.try_get("key_type")?;
            let Some(key_type) = ConstraintKeyType::from_pg(&key_type) else {
                warn!("忽略未知的约束类型: {}", key_type);
                continue;
            };
            records.push(ConstraintRecord {
                table: row.try_get("table_name")?,
                key_column: row.try_get("key_column")?,
                key_type,
                foreign_table: row.try_get("foreign_table")?,
                foreign_column: row.try_get("foreign_column")?,
            });
        }

        let tables: Vec<String> = sqlx::query(
            r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get("table_name"))
        .collect::<Result<_, sqlx::Error>>()?;

        debug!("读取到 {} 条约束, {} 张表", records.len(), tables.len());
        Ok(CatalogLoad { records, tables })
    }
}
