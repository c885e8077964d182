use serde::{Deserialize, Serialize};

/// 元数据目录配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// 加载约束元数据的schema
    pub schema: String,
    /// 静态表白名单，与目录中加载到的表合并
    pub allowed_tables: Vec<String>,
    /// 目录刷新间隔（秒），0表示只在启动时加载
    pub refresh_interval_seconds: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            allowed_tables: Vec::new(),
            refresh_interval_seconds: 300,
        }
    }
}

impl CatalogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schema.is_empty() {
            return Err(anyhow::anyhow!("目录schema不能为空"));
        }
        if let Some(table) = self.allowed_tables.iter().find(|t| t.trim().is_empty()) {
            return Err(anyhow::anyhow!("白名单中存在空表名: {:?}", table));
        }
        Ok(())
    }
}
