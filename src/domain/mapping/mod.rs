//! Table mappings: how the columns of a relational table are derived from a document.

pub mod expression;
pub mod jsonpath;

pub use expression::Expression;
pub use jsonpath::{JsonPath, PathSegment};

use crate::domain::error::MappingError;
use std::collections::HashMap;
use std::sync::Arc;

/// Column holding the content hash of the stored document. Never mappable.
pub const HASH_COLUMN: &str = "hash";

/// Declarative binding of one table's columns to document-derived expressions.
///
/// Built once at startup and shared read-only across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    name: String,
    columns: Vec<(String, Expression)>,
    primary_key: String,
    conflict_detection: bool,
    body_merge: Vec<(String, String)>,
    header_rules: Vec<(String, String)>,
    casts: HashMap<String, String>,
}

impl TableMapping {
    pub fn builder(name: impl Into<String>, primary_key: impl Into<String>) -> TableMappingBuilder {
        TableMappingBuilder {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
            conflict_detection: false,
            body_merge: Vec::new(),
            header_rules: Vec::new(),
            casts: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[(String, Expression)] {
        &self.columns
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn has_conflict_detection(&self) -> bool {
        self.conflict_detection
    }

    /// The column mapped to the whole document (`$`), if any.
    pub fn body_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, expr)| expr.is_whole_body())
            .map(|(col, _)| col.as_str())
    }

    /// `(column, JSON property)` pairs merged into the body on read.
    pub fn body_merge(&self) -> &[(String, String)] {
        &self.body_merge
    }

    /// `(column, header name)` pairs exposed as document metadata on read.
    pub fn header_rules(&self) -> &[(String, String)] {
        &self.header_rules
    }

    /// Optional SQL type used to cast the placeholder bound to `column`.
    pub fn cast_for(&self, column: &str) -> Option<&str> {
        self.casts.get(column).map(|s| s.as_str())
    }

    pub fn has_json_paths(&self) -> bool {
        self.columns
            .iter()
            .any(|(_, expr)| matches!(expr, Expression::JsonPath(_)))
    }

    /// Human readable `expr->column` list, used when logging the loaded mapping.
    pub fn column_mapping(&self) -> String {
        self.columns
            .iter()
            .map(|(col, expr)| format!("{}->{}", expr, col))
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub struct TableMappingBuilder {
    name: String,
    primary_key: String,
    columns: Vec<(String, String)>,
    conflict_detection: bool,
    body_merge: Vec<(String, String)>,
    header_rules: Vec<(String, String)>,
    casts: HashMap<String, String>,
}

impl TableMappingBuilder {
    pub fn column(mut self, column: impl Into<String>, expr: impl Into<String>) -> Self {
        self.columns.push((column.into(), expr.into()));
        self
    }

    pub fn conflict_detection(mut self, enabled: bool) -> Self {
        self.conflict_detection = enabled;
        self
    }

    pub fn merge_into_body(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.body_merge.push((column.into(), property.into()));
        self
    }

    pub fn expose_as_header(mut self, column: impl Into<String>, header: impl Into<String>) -> Self {
        self.header_rules.push((column.into(), header.into()));
        self
    }

    pub fn cast(mut self, column: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.casts.insert(column.into(), sql_type.into());
        self
    }

    pub fn build(self) -> Result<TableMapping, MappingError> {
        let table = self.name;

        if !validate_ident(&table) {
            return Err(invalid_ident(&table, &table));
        }
        if self.primary_key.is_empty() {
            return Err(MappingError::MissingPrimaryKey { table });
        }
        if !validate_ident(&self.primary_key) {
            return Err(invalid_ident(&table, &self.primary_key));
        }

        let mut columns: Vec<(String, Expression)> = Vec::with_capacity(self.columns.len());
        for (column, raw) in self.columns {
            if !validate_ident(&column) {
                return Err(invalid_ident(&table, &column));
            }
            if column.eq_ignore_ascii_case(HASH_COLUMN) {
                return Err(MappingError::ReservedColumn { table, column });
            }
            if columns.iter().any(|(c, _)| *c == column) {
                return Err(MappingError::DuplicateColumn { table, column });
            }
            let expr = Expression::parse(&raw).map_err(|reason| MappingError::InvalidExpression {
                table: table.clone(),
                column: column.clone(),
                reason,
            })?;
            columns.push((column, expr));
        }

        let body_columns = columns.iter().filter(|(_, e)| e.is_whole_body()).count();
        if body_columns > 1 {
            return Err(MappingError::MultipleBodyColumns {
                table,
                count: body_columns,
            });
        }
        if body_columns == 0 {
            tracing::warn!(table = %table, "no column maps the whole document ('$'); reads will fail");
        }

        for (column, _) in self.body_merge.iter().chain(self.header_rules.iter()) {
            if !validate_ident(column) {
                return Err(invalid_ident(&table, column));
            }
        }
        for (column, sql_type) in &self.casts {
            if !validate_ident(column) {
                return Err(invalid_ident(&table, column));
            }
            if !validate_sql_type(sql_type) {
                return Err(invalid_ident(&table, sql_type));
            }
        }

        Ok(TableMapping {
            name: table,
            columns,
            primary_key: self.primary_key,
            conflict_detection: self.conflict_detection,
            body_merge: self.body_merge,
            header_rules: self.header_rules,
            casts: self.casts,
        })
    }
}

/// Immutable set of table mappings, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    tables: HashMap<String, Arc<TableMapping>>,
}

impl MappingRegistry {
    pub fn new(mappings: impl IntoIterator<Item = TableMapping>) -> Result<Self, MappingError> {
        let mut tables: HashMap<String, Arc<TableMapping>> = HashMap::new();
        for mapping in mappings {
            if let Some(existing) = tables.get(mapping.name()) {
                if **existing != mapping {
                    return Err(MappingError::DuplicateTable {
                        table: mapping.name().to_string(),
                    });
                }
                continue;
            }
            tracing::info!(
                table = mapping.name(),
                primary_key = mapping.primary_key(),
                column_mapping = %mapping.column_mapping(),
                "mapping initialised"
            );
            tables.insert(mapping.name().to_string(), Arc::new(mapping));
        }
        Ok(Self { tables })
    }

    pub fn get(&self, table: &str) -> Option<Arc<TableMapping>> {
        self.tables.get(table).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

fn invalid_ident(table: &str, ident: &str) -> MappingError {
    MappingError::InvalidIdentifier {
        table: table.to_string(),
        ident: ident.to_string(),
    }
}

pub fn validate_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// e.g. `uuid`, `timestamptz`, `varchar(36)`, `timestamp with time zone`
fn validate_sql_type(sql_type: &str) -> bool {
    !sql_type.trim().is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ','))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations() -> TableMappingBuilder {
        TableMapping::builder("draft_annotations", "uuid")
            .column("uuid", ":uuid")
            .column("body", "$")
            .column("last_modified", "@._timestamp")
            .column("publish_ref", "@.x-request-id")
    }

    #[test]
    fn builds_and_finds_body_column() {
        let mapping = annotations().conflict_detection(true).build().unwrap();
        assert_eq!(mapping.body_column(), Some("body"));
        assert!(mapping.has_conflict_detection());
        assert!(!mapping.has_json_paths());
        assert_eq!(
            mapping.column_mapping(),
            ":uuid->uuid,$->body,@._timestamp->last_modified,@.x-request-id->publish_ref"
        );
    }

    #[test]
    fn rejects_hash_column_and_duplicate_body() {
        let err = annotations().column("hash", "x").build().unwrap_err();
        assert!(matches!(err, MappingError::ReservedColumn { .. }));

        let err = annotations().column("copy", "$").build().unwrap_err();
        assert_eq!(
            err,
            MappingError::MultipleBodyColumns {
                table: "draft_annotations".into(),
                count: 2
            }
        );
    }

    #[test]
    fn rejects_bad_identifiers_and_expressions() {
        assert!(matches!(
            TableMapping::builder("drop table;", "id").build(),
            Err(MappingError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            annotations().column("tags", "$.tags[*]").build(),
            Err(MappingError::InvalidExpression { .. })
        ));
        assert!(matches!(
            annotations().cast("uuid", "uuid; drop").build(),
            Err(MappingError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn missing_body_column_is_allowed_at_load() {
        let mapping = TableMapping::builder("t", "id")
            .column("id", ":id")
            .build()
            .unwrap();
        assert_eq!(mapping.body_column(), None);
    }

    #[test]
    fn registry_rejects_conflicting_duplicates() {
        let a = annotations().build().unwrap();
        let same = annotations().build().unwrap();
        let registry = MappingRegistry::new(vec![a.clone(), same]).unwrap();
        assert_eq!(registry.table_names(), vec!["draft_annotations".to_string()]);

        let different = annotations().conflict_detection(true).build().unwrap();
        assert!(matches!(
            MappingRegistry::new(vec![a, different]),
            Err(MappingError::DuplicateTable { .. })
        ));
    }
}
