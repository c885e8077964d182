use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::{
    catalog::CatalogConfig,
    database::DatabaseConfig,
    destination::DestinationConfig,
    dispatcher_worker::{DispatcherConfig, WorkerConfig},
    message_queue::MessageQueueConfig,
    observability::ObservabilityConfig,
};
use crate::models::PipelineDefinition;

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/datatrans.toml",
    "datatrans.toml",
    "/etc/datatrans/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub destination: DestinationConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub catalog: CatalogConfig,
    pub observability: ObservabilityConfig,
    /// 启动时登记的管道定义
    pub pipelines: Vec<PipelineDefinition>,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default values of every section
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: `DATATRANS_`, nesting: `__`),
    ///    e.g. `DATATRANS_DATABASE__URL`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("DATATRANS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn pipeline(&self, id: &str) -> Option<&PipelineDefinition> {
        self.pipelines.iter().find(|p| p.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.destination.validate().context("目标索引配置验证失败")?;
        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.catalog.validate().context("目录配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        let mut seen = HashSet::new();
        for pipeline in &self.pipelines {
            pipeline
                .validate()
                .with_context(|| format!("管道 {} 配置验证失败", pipeline.id))?;
            if !seen.insert(pipeline.id.as_str()) {
                return Err(anyhow::anyhow!("管道ID重复: {}", pipeline.id));
            }
        }

        Ok(())
    }
}
