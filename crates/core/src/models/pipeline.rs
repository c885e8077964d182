use serde::{Deserialize, Serialize};

use crate::errors::{DatatransError, DatatransResult};

fn default_schema() -> String {
    "public".to_string()
}

/// 数据源表引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    /// 稳定排序和文档ID使用的主键列，未配置时从约束目录解析
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            primary_key: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }
}

/// 管道定义
///
/// 描述一个源表、其一对多子表（has-many）、多对一父表（belongs-to）
/// 以及目标索引。被任务引用后视为不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source_table: TableRef,
    #[serde(default)]
    pub child_tables: Vec<String>,
    #[serde(default)]
    pub parent_tables: Vec<String>,
    pub destination_index: String,
}

impl PipelineDefinition {
    pub fn new(
        id: impl Into<String>,
        source_table: TableRef,
        destination_index: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source_table,
            child_tables: Vec::new(),
            parent_tables: Vec::new(),
            destination_index: destination_index.into(),
        }
    }

    pub fn with_child_table(mut self, table: impl Into<String>) -> Self {
        self.child_tables.push(table.into());
        self
    }

    pub fn with_parent_table(mut self, table: impl Into<String>) -> Self {
        self.parent_tables.push(table.into());
        self
    }

    /// 管道涉及的全部表名：源表、子表、父表
    pub fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.source_table.name.as_str())
            .chain(self.child_tables.iter().map(String::as_str))
            .chain(self.parent_tables.iter().map(String::as_str))
    }

    /// 除显示名称外两个定义是否读取相同的数据
    pub fn same_definition(&self, other: &PipelineDefinition) -> bool {
        self.id == other.id
            && self.source_table == other.source_table
            && self.child_tables == other.child_tables
            && self.parent_tables == other.parent_tables
            && self.destination_index == other.destination_index
    }

    /// 结构性校验，不涉及白名单
    pub fn validate(&self) -> DatatransResult<()> {
        if self.id.is_empty() {
            return Err(DatatransError::InvalidArgument("管道ID不能为空".into()));
        }
        if self.source_table.name.is_empty() {
            return Err(DatatransError::InvalidArgument(format!(
                "管道 {} 的源表名不能为空",
                self.id
            )));
        }
        if self.destination_index.is_empty() {
            return Err(DatatransError::InvalidArgument(format!(
                "管道 {} 的目标索引不能为空",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_deserializes_with_defaults() {
        let json = r#"{
            "id": "p-1",
            "source_table": {"name": "User"},
            "child_tables": ["Post"],
            "destination_index": "users"
        }"#;
        let pipeline: PipelineDefinition = serde_json::from_str(json).unwrap();

        assert_eq!(pipeline.source_table.schema, "public");
        assert_eq!(pipeline.source_table.primary_key, None);
        assert_eq!(pipeline.child_tables, vec!["Post"]);
        assert!(pipeline.parent_tables.is_empty());
    }

    #[test]
    fn test_referenced_tables_order() {
        let pipeline = PipelineDefinition::new("p", TableRef::new("public", "Post"), "posts")
            .with_child_table("Comment")
            .with_parent_table("User");

        let tables: Vec<&str> = pipeline.referenced_tables().collect();
        assert_eq!(tables, vec!["Post", "Comment", "User"]);
    }

    #[test]
    fn test_same_definition_ignores_name_only() {
        let pipeline = PipelineDefinition::new("p", TableRef::new("public", "Post"), "posts")
            .with_child_table("Comment");

        let mut renamed = pipeline.clone();
        renamed.name = "文章".to_string();
        assert!(pipeline.same_definition(&renamed));

        let rekeyed = PipelineDefinition {
            source_table: TableRef::new("public", "Post").with_primary_key("post_id"),
            ..pipeline.clone()
        };
        assert!(!pipeline.same_definition(&rekeyed));
        assert!(!pipeline.same_definition(&pipeline.clone().with_parent_table("User")));
    }

    #[test]
    fn test_validate_requires_destination() {
        let pipeline = PipelineDefinition::new("p", TableRef::new("public", "Post"), "");
        assert!(pipeline.validate().is_err());
    }
}
