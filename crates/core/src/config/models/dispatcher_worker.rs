use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::services::CompletionPolicyKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 发布消息失败时的重试策略
    pub retry: RetryPolicy,
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.retry.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// 为空时使用主机名
    pub worker_id: String,
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    /// 单个任务的处理期限，超时的投递会重新入队
    pub processing_timeout_seconds: u64,
    pub completion_policy: CompletionPolicyKind,
    /// 数据源和目标索引调用的重试策略
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            max_concurrent_tasks: 4,
            poll_interval_ms: 1000,
            processing_timeout_seconds: 300,
            completion_policy: CompletionPolicyKind::AllDone,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// 实际使用的Worker ID
    pub fn resolved_worker_id(&self) -> String {
        if !self.worker_id.is_empty() {
            return self.worker_id.clone();
        }
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "datatrans-worker".to_string())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.processing_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务处理期限必须大于0"));
        }

        self.retry.validate()
    }
}
