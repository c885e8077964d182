use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::DatatransResult;

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含首次执行）
    pub max_attempts: u32,
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 不重试，仅执行一次
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0.0到1.0之间"));
        }
        Ok(())
    }

    /// 计算第 `attempt` 次失败后的等待时间（attempt 从1开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        let jittered = if self.jitter_factor > 0.0 {
            let spread = capped * self.jitter_factor;
            let offset = rand::rng().random_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(jittered as u64)
    }
}

/// 按策略重试暂时性错误，其他错误立即返回
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> DatatransResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DatatransResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} 在第 {} 次尝试后成功", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} 失败 (重试 {}/{}), {}ms 后重试: {}",
                    operation,
                    attempt,
                    policy.max_attempts - 1,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatatransError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_transient(&fast_policy(3), "flaky", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DatatransError::Transient("timeout".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: DatatransResult<()> =
            retry_transient(&fast_policy(3), "down", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DatatransError::Transient("still down".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: DatatransResult<()> =
            retry_transient(&fast_policy(5), "reject", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DatatransError::Permanent("mapping conflict".into()))
            })
            .await;

        assert!(matches!(result, Err(DatatransError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
