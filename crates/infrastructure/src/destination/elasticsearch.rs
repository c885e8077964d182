use std::time::{Duration, Instant};

use async_trait::async_trait;
use datatrans_core::{
    config::DestinationConfig,
    models::{BulkUpsertReport, CompositeDocument},
    traits::DestinationStore,
    DatatransError, DatatransResult,
};
use metrics::{counter, histogram};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

/// Elasticsearch `_bulk` 写入
///
/// 每个文档生成一条 `index` 动作（以文档ID覆盖写入）。只有响应中每一项都成功时
/// 才视为整批写入成功。
pub struct ElasticsearchDestination {
    client: Client,
    config: DestinationConfig,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl ElasticsearchDestination {
    pub fn new(config: DestinationConfig) -> DatatransResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DatatransError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client, config })
    }

    fn bulk_url(&self) -> String {
        let base = self.config.url.trim_end_matches('/');
        if self.config.refresh {
            format!("{base}/_bulk?refresh=wait_for")
        } else {
            format!("{base}/_bulk")
        }
    }

    fn build_body(index: &str, documents: &[CompositeDocument]) -> DatatransResult<String> {
        let mut body = String::new();
        for document in documents {
            let action = json!({ "index": { "_index": index, "_id": document.id } });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&document.body)?);
            body.push('\n');
        }
        Ok(body)
    }

    /// 检查每一项的结果，返回失败项的错误
    fn check_items(response: &BulkResponse, expected: usize) -> DatatransResult<()> {
        if response.items.len() != expected {
            return Err(DatatransError::Transient(format!(
                "批量写入只确认了 {}/{} 个文档",
                response.items.len(),
                expected
            )));
        }
        if !response.errors {
            return Ok(());
        }

        let mut retryable = true;
        let mut failures = Vec::new();
        for item in &response.items {
            let Some(result) = item.get("index") else {
                continue;
            };
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
            if let Some(error) = result.get("error") {
                retryable &= status == 429 || status >= 500;
                let id = result.get("_id").and_then(Value::as_str).unwrap_or("?");
                failures.push(format!("{id}: {error}"));
            }
        }

        let summary = format!(
            "{} 个文档写入失败: {}",
            failures.len(),
            failures.iter().take(3).cloned().collect::<Vec<_>>().join("; ")
        );
        if retryable && !failures.is_empty() {
            Err(DatatransError::Transient(summary))
        } else {
            Err(DatatransError::Permanent(summary))
        }
    }
}

#[async_trait]
impl DestinationStore for ElasticsearchDestination {
    #[instrument(skip(self, documents), fields(index = %index, documents = documents.len()))]
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[CompositeDocument],
    ) -> DatatransResult<BulkUpsertReport> {
        if documents.is_empty() {
            return Ok(BulkUpsertReport {
                index: index.to_string(),
                upserted: 0,
            });
        }

        let body = Self::build_body(index, documents)?;
        let mut request = self
            .client
            .post(self.bulk_url())
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(username, Some(password));
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| DatatransError::Transient(format!("请求Elasticsearch失败: {e}")))?;
        histogram!("datatrans_bulk_request_seconds").record(started.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Elasticsearch返回 {status}: {text}");
            warn!("{}", message);
            counter!("datatrans_bulk_request_failures_total", "status" => status.as_u16().to_string())
                .increment(1);
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                DatatransError::Transient(message)
            } else {
                DatatransError::Permanent(message)
            });
        }

        let bulk: BulkResponse = response
            .json()
            .await
            .map_err(|e| DatatransError::Transient(format!("解析批量写入响应失败: {e}")))?;
        Self::check_items(&bulk, documents.len())?;

        debug!("写入 {} 个文档到索引 {}", documents.len(), index);
        Ok(BulkUpsertReport {
            index: index.to_string(),
            upserted: documents.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn document(id: &str) -> CompositeDocument {
        let mut body = Map::new();
        body.insert("id".to_string(), json!(id));
        CompositeDocument {
            id: id.to_string(),
            body,
        }
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let body =
            ElasticsearchDestination::build_body("users", &[document("1"), document("2")]).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"index": {"_index": "users", "_id": "1"}})
        );
        assert_eq!(serde_json::from_str::<Value>(lines[3]).unwrap(), json!({"id": "2"}));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_item_errors_are_classified() {
        let rejected = BulkResponse {
            errors: true,
            items: vec![
                json!({"index": {"_id": "1", "status": 200}}),
                json!({"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}}),
            ],
        };
        assert!(matches!(
            ElasticsearchDestination::check_items(&rejected, 2),
            Err(DatatransError::Permanent(_))
        ));

        let throttled = BulkResponse {
            errors: true,
            items: vec![json!({"index": {"_id": "1", "status": 429, "error": {"type": "es_rejected_execution_exception"}}})],
        };
        assert!(matches!(
            ElasticsearchDestination::check_items(&throttled, 1),
            Err(DatatransError::Transient(_))
        ));
    }

    #[test]
    fn test_partial_confirmation_is_failure() {
        let partial = BulkResponse {
            errors: false,
            items: vec![json!({"index": {"_id": "1", "status": 200}})],
        };
        assert!(ElasticsearchDestination::check_items(&partial, 2).is_err());
        assert!(ElasticsearchDestination::check_items(&partial, 1).is_ok());
    }
}
