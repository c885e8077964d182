use serde::{Deserialize, Serialize};

/// 约束类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKeyType {
    PrimaryKey,
    ForeignKey,
    Unique,
}

impl ConstraintKeyType {
    /// 对应 `information_schema.table_constraints.constraint_type`
    pub fn from_pg(constraint_type: &str) -> Option<Self> {
        match constraint_type {
            "PRIMARY KEY" => Some(ConstraintKeyType::PrimaryKey),
            "FOREIGN KEY" => Some(ConstraintKeyType::ForeignKey),
            "UNIQUE" => Some(ConstraintKeyType::Unique),
            _ => None,
        }
    }
}

/// 约束元数据（只读）
///
/// 外键约束描述 `table.key_column` 引用 `foreign_table.foreign_column`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintRecord {
    pub table: String,
    pub key_column: String,
    pub key_type: ConstraintKeyType,
    pub foreign_table: Option<String>,
    pub foreign_column: Option<String>,
}

impl ConstraintRecord {
    pub fn foreign_key(
        table: impl Into<String>,
        key_column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key_type: ConstraintKeyType::ForeignKey,
            foreign_table: Some(foreign_table.into()),
            foreign_column: Some(foreign_column.into()),
        }
    }

    pub fn primary_key(table: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            key_type: ConstraintKeyType::PrimaryKey,
            foreign_table: None,
            foreign_column: None,
        }
    }

    /// 是否为 `child_table → parent_table` 的外键
    pub fn links(&self, child_table: &str, parent_table: &str) -> bool {
        self.key_type == ConstraintKeyType::ForeignKey
            && self.table == child_table
            && self.foreign_table.as_deref() == Some(parent_table)
    }
}

/// 约束解析结果：`child_table.key_column → parent_table.foreign_column`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyLink {
    pub child_table: String,
    pub key_column: String,
    pub parent_table: String,
    pub foreign_column: String,
}
