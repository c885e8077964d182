use serde::Serialize;
use serde_json::{Map, Value};

/// 数据源中的一行记录，列名到值的映射
pub type Row = Map<String, Value>;

/// 将主键或外键的值规范化为分组用的字符串键
///
/// 数字和字符串键可以比较；`null`、对象和数组不能作为键。
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// 组装后的复合文档，以源行主键作为文档ID
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeDocument {
    pub id: String,
    pub body: Row,
}

/// 批量写入结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpsertReport {
    pub index: String,
    pub upserted: usize,
}
