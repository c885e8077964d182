use serde::{Deserialize, Serialize};

/// Database configuration
///
/// `url` 指向状态存储（pipeline/mission/task 表），`source_url` 指向数据源库，
/// 未配置时与状态存储共用同一个库。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub source_url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/datatrans".to_string(),
            source_url: None,
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl DatabaseConfig {
    /// 数据源库连接URL
    pub fn source_url(&self) -> &str {
        self.source_url.as_deref().unwrap_or(&self.url)
    }

    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for url in [self.url.as_str(), self.source_url()] {
            if url.is_empty() {
                return Err(anyhow::anyhow!("数据库URL不能为空"));
            }
            if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                return Err(anyhow::anyhow!("数据库URL必须是PostgreSQL格式: {}", url));
            }
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!("最小连接数不能大于最大连接数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }
}
