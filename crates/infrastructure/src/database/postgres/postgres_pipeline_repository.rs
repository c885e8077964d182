use async_trait::async_trait;
use datatrans_core::{
    models::{PipelineDefinition, TableRef},
    traits::PipelineRepository,
    DatatransError, DatatransResult,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const PIPELINE_COLUMNS: &str = "id, name, source_schema, source_table, source_primary_key, \
     child_tables, parent_tables, destination_index";

pub struct PostgresPipelineRepository {
    pool: PgPool,
}

impl PostgresPipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pipeline(row: &sqlx::postgres::PgRow) -> DatatransResult<PipelineDefinition> {
        let source_schema: String = row.try_get("source_schema")?;
        let source_table: String = row.try_get("source_table")?;
        let source_primary_key: Option<String> = row.try_get("source_primary_key")?;

        let mut table = TableRef::new(source_schema, source_table);
        table.primary_key = source_primary_key;

        Ok(PipelineDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            source_table: table,
            child_tables: row.try_get("child_tables")?,
            parent_tables: row.try_get("parent_tables")?,
            destination_index: row.try_get("destination_index")?,
        })
    }
}

#[async_trait]
impl PipelineRepository for PostgresPipelineRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> DatatransResult<Option<PipelineDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_pipeline).transpose()
    }

    /// 登记管道定义
    ///
    /// 已被 Mission 引用的管道只接受名称变化；锁定管道行后再检查引用，
    /// 与并发创建 Mission 时外键持有的行锁互斥。
    #[instrument(skip(self, pipeline), fields(pipeline_id = %pipeline.id))]
    async fn save(&self, pipeline: &PipelineDefinition) -> DatatransResult<()> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = $1 FOR UPDATE"
        ))
        .bind(&pipeline.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let current = Self::row_to_pipeline(&row)?;
            if !current.same_definition(pipeline) {
                let referenced: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM missions WHERE pipeline_id = $1)",
                )
                .bind(&pipeline.id)
                .fetch_one(&mut *tx)
                .await?;

                if referenced {
                    return Err(DatatransError::InvalidState {
                        entity: "Pipeline",
                        id: pipeline.id.clone(),
                        expected: "未被Mission引用".to_string(),
                        actual: "已被Mission引用".to_string(),
                    });
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, source_schema, source_table, source_primary_key,
                                   child_tables, parent_tables, destination_index)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                source_schema = EXCLUDED.source_schema,
                source_table = EXCLUDED.source_table,
                source_primary_key = EXCLUDED.source_primary_key,
                child_tables = EXCLUDED.child_tables,
                parent_tables = EXCLUDED.parent_tables,
                destination_index = EXCLUDED.destination_index,
                updated_at = NOW()
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.source_table.schema)
        .bind(&pipeline.source_table.name)
        .bind(&pipeline.source_table.primary_key)
        .bind(&pipeline.child_tables)
        .bind(&pipeline.parent_tables)
        .bind(&pipeline.destination_index)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("管道 {} 已登记", pipeline.id);
        Ok(())
    }

    async fn list(&self) -> DatatransResult<Vec<PipelineDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_pipeline).collect()
    }
}
