use datatrans_core::{
    identifier::Identifier,
    models::{key_of, CompositeDocument, Row},
    DatatransError, DatatransResult,
};
use serde_json::Value;

use crate::association::LoadedAssociations;

/// 组装复合文档
///
/// 文档以源行字段为基础，每张子表的记录以数组形式挂在表名下（没有记录时为空数组），
/// 每张父表的记录以对象形式挂在表名下（找不到时为 `null`）。
/// 文档ID取自源行主键，同一任务重复处理会覆盖相同的文档。
pub fn assemble_documents(
    primary_key: &Identifier,
    rows: Vec<Row>,
    associations: &LoadedAssociations,
) -> DatatransResult<Vec<CompositeDocument>> {
    rows.into_iter()
        .map(|row| assemble_one(primary_key, row, associations))
        .collect()
}

fn assemble_one(
    primary_key: &Identifier,
    mut row: Row,
    associations: &LoadedAssociations,
) -> DatatransResult<CompositeDocument> {
    let id = row
        .get(primary_key.as_str())
        .and_then(key_of)
        .ok_or_else(|| {
            DatatransError::Permanent(format!("源行缺少可用的主键 {primary_key}"))
        })?;

    let mut nested = Vec::with_capacity(associations.children.len() + associations.parents.len());
    for child in &associations.children {
        let rows = row
            .get(child.source_column.as_str())
            .and_then(key_of)
            .and_then(|key| child.groups.get(&key))
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default();
        nested.push((child.table.clone(), Value::Array(rows)));
    }
    for parent in &associations.parents {
        let value = row
            .get(parent.source_column.as_str())
            .and_then(key_of)
            .and_then(|key| parent.by_key.get(&key))
            .map(|parent_row| Value::Object(parent_row.clone()))
            .unwrap_or(Value::Null);
        nested.push((parent.table.clone(), value));
    }

    row.extend(nested);
    Ok(CompositeDocument { id, body: row })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::association::{ChildRows, ParentRows};
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn associations() -> LoadedAssociations {
        let mut groups = HashMap::new();
        groups.insert(
            "1".to_string(),
            vec![row(json!({"id": 10, "user_id": 1})), row(json!({"id": 11, "user_id": 1}))],
        );
        let mut by_key = HashMap::new();
        by_key.insert("7".to_string(), row(json!({"id": 7, "name": "north"})));

        LoadedAssociations {
            children: vec![ChildRows {
                table: "orders".to_string(),
                source_column: Identifier::parse("id").unwrap(),
                groups,
            }],
            parents: vec![ParentRows {
                table: "regions".to_string(),
                source_column: Identifier::parse("region_id").unwrap(),
                by_key,
            }],
        }
    }

    #[test]
    fn test_nests_children_and_parent_under_table_names() {
        let pk = Identifier::parse("id").unwrap();
        let docs = assemble_documents(
            &pk,
            vec![row(json!({"id": 1, "name": "ada", "region_id": 7}))],
            &associations(),
        )
        .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1");
        assert_eq!(docs[0].body["orders"].as_array().unwrap().len(), 2);
        assert_eq!(docs[0].body["regions"]["name"], json!("north"));
        assert_eq!(docs[0].body["name"], json!("ada"));
    }

    #[test]
    fn test_missing_associations_are_empty_or_null() {
        let pk = Identifier::parse("id").unwrap();
        let docs = assemble_documents(
            &pk,
            vec![row(json!({"id": "u-2", "region_id": null}))],
            &associations(),
        )
        .unwrap();

        assert_eq!(docs[0].id, "u-2");
        assert_eq!(docs[0].body["orders"], json!([]));
        assert_eq!(docs[0].body["regions"], Value::Null);
    }

    #[test]
    fn test_row_without_primary_key_is_permanent_failure() {
        let pk = Identifier::parse("id").unwrap();
        let err = assemble_documents(&pk, vec![row(json!({"name": "x"}))], &associations())
            .unwrap_err();
        assert!(matches!(err, DatatransError::Permanent(_)));
    }
}
