use serde::{Deserialize, Serialize};

/// Destination store type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    #[default]
    Elasticsearch,
    InMemory,
}

/// 目标索引配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DestinationConfig {
    #[serde(rename = "type")]
    pub r#type: DestinationType,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_timeout_seconds: u64,
    /// 批量写入时使用 `refresh=wait_for`，写入返回后文档即可被搜索到
    pub refresh: bool,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            r#type: DestinationType::Elasticsearch,
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            request_timeout_seconds: 30,
            refresh: false,
        }
    }
}

impl DestinationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.r#type == DestinationType::Elasticsearch
            && !self.url.starts_with("http://")
            && !self.url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("Elasticsearch URL格式无效: {}", self.url));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(anyhow::anyhow!("用户名和密码必须同时配置"));
        }

        Ok(())
    }
}
