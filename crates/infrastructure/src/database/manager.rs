use std::time::Duration;

use datatrans_core::config::DatabaseConfig;
use datatrans_core::DatatransResult;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// 数据库连接池管理器
///
/// 状态存储和数据源可以位于不同的库；未配置 `source_url` 时两者共用同一个连接池。
pub struct DatabaseManager {
    pool: PgPool,
    source_pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> DatatransResult<Self> {
        let pool = Self::connect(config, &config.url).await?;
        let source_pool = match &config.source_url {
            Some(url) if url != &config.url => Self::connect(config, url).await?,
            _ => pool.clone(),
        };

        info!("数据库连接池已建立 (最大连接数: {})", config.max_connections);
        Ok(Self { pool, source_pool })
    }

    async fn connect(config: &DatabaseConfig, url: &str) -> DatatransResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect(url)
            .await?;
        Ok(pool)
    }

    /// 状态存储连接池
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 数据源连接池
    pub fn source_pool(&self) -> &PgPool {
        &self.source_pool
    }

    /// 运行状态存储的数据库迁移
    pub async fn migrate(&self) -> DatatransResult<()> {
        run_migrations(&self.pool).await
    }

    pub async fn health_check(&self) -> DatatransResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        sqlx::query("SELECT 1").execute(&self.source_pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        self.source_pool.close().await;
    }
}

pub async fn run_migrations(pool: &PgPool) -> DatatransResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    info!("数据库迁移完成");
    Ok(())
}
