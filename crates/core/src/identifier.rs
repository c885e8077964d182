//! SQL标识符校验与表白名单
//!
//! 数据源查询中的表名和列名无法作为绑定参数传递，因此所有标识符必须先通过
//! [`Identifier::parse`] 的字符集校验，表名还必须出现在 [`TableAllowList`] 中。
//! 只有经过校验的 [`QualifiedTable`] 和 [`Identifier`] 才能进入查询文本。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DatatransError, DatatransResult};
use crate::models::TableRef;

const MAX_IDENTIFIER_LEN: usize = 63;

/// 经过校验的SQL标识符（表名、列名、schema名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identifier(String);

impl Identifier {
    /// 校验标识符：字母或下划线开头，仅包含字母、数字和下划线，最长63字符
    pub fn parse(raw: &str) -> DatatransResult<Self> {
        let mut chars = raw.chars();
        let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || raw.len() > MAX_IDENTIFIER_LEN {
            return Err(DatatransError::InvalidArgument(format!(
                "非法的SQL标识符: {raw:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 带双引号的标识符，可直接拼入查询文本
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Identifier::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// 通过白名单校验的表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTable {
    schema: Identifier,
    name: Identifier,
    primary_key: Identifier,
}

impl QualifiedTable {
    pub fn schema(&self) -> &Identifier {
        &self.schema
    }

    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn primary_key(&self) -> &Identifier {
        &self.primary_key
    }

    /// `"schema"."table"`
    pub fn quoted(&self) -> String {
        format!("{}.{}", self.schema.quoted(), self.name.quoted())
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// 已知表白名单
#[derive(Debug, Clone, Default)]
pub struct TableAllowList {
    tables: BTreeSet<String>,
}

impl TableAllowList {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    /// 合并另一组已知表（如从元数据目录加载的表）
    pub fn extend<I, S>(&mut self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// 校验表名是否在白名单中
    pub fn check(&self, table: &str) -> DatatransResult<Identifier> {
        if !self.contains(table) {
            return Err(DatatransError::InvalidArgument(format!(
                "表 {table} 不在已知表白名单中"
            )));
        }
        Identifier::parse(table)
    }

    /// 校验表引用并生成可用于查询的限定表
    pub fn qualify(&self, table: &TableRef) -> DatatransResult<QualifiedTable> {
        Ok(QualifiedTable {
            name: self.check(&table.name)?,
            schema: Identifier::parse(&table.schema)?,
            primary_key: Identifier::parse(table.primary_key.as_deref().unwrap_or("id"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_accepts_plain_names() {
        assert_eq!(Identifier::parse("user_profile").unwrap().as_str(), "user_profile");
        assert_eq!(Identifier::parse("_Tag2").unwrap().quoted(), "\"_Tag2\"");
    }

    #[test]
    fn test_identifier_rejects_injection() {
        for raw in [
            "",
            "1abc",
            "user\"; DROP TABLE x; --",
            "a b",
            "schema.table",
            "naïve",
        ] {
            assert!(Identifier::parse(raw).is_err(), "应当拒绝: {raw}");
        }
        assert!(Identifier::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_allow_list_rejects_unknown_table() {
        let allow_list = TableAllowList::new(["User", "Post"]);
        assert!(allow_list.check("User").is_ok());

        let err = allow_list.check("Secret").unwrap_err();
        assert!(matches!(err, DatatransError::InvalidArgument(_)));
    }

    #[test]
    fn test_qualify_builds_quoted_name() {
        let allow_list = TableAllowList::new(["User"]);
        let table = TableRef::new("public", "User");
        let qualified = allow_list.qualify(&table).unwrap();

        assert_eq!(qualified.quoted(), "\"public\".\"User\"");
        assert_eq!(qualified.primary_key().as_str(), "id");
        assert_eq!(qualified.to_string(), "public.User");
    }

    #[test]
    fn test_qualify_rejects_bad_schema() {
        let allow_list = TableAllowList::new(["User"]);
        let table = TableRef::new("public\"--", "User");
        assert!(allow_list.qualify(&table).is_err());
    }
}
