//! Typed query construction for the tabular engine.
//!
//! Nothing here builds SQL text. Table identifiers are validated [`TableName`]s
//! and user-supplied values (submission names, taxonomy ids) travel as literal
//! values inside [`Query`] variants, so they can never be interpreted as
//! identifiers or statements.
use core::fmt;

use crate::error::EngineError;

const MAX_IDENT_LEN: usize = 63;

/// A validated table identifier: `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TableName(String);

impl TableName {
    /// Accept `name` only if it is already a valid identifier.
    pub fn new(name: &str) -> Result<Self, EngineError> {
        let mut chars = name.chars();
        let head_ok = chars.next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if head_ok && tail_ok && name.len() <= MAX_IDENT_LEN {
            Ok(TableName(name.to_string()))
        } else {
            Err(EngineError::InvalidIdentifier(name.to_string()))
        }
    }

    /// Table holding one source's rows while `root` is being rebuilt.
    ///
    /// Characters outside `[A-Za-z0-9]` are hex-escaped (`-` becomes `_2d`) so
    /// distinct ids never map to the same table.
    pub fn for_source(root: &TableName, source_id: &str) -> Result<Self, EngineError> {
        let mut escaped = String::with_capacity(source_id.len());
        for b in source_id.bytes() {
            if b.is_ascii_alphanumeric() {
                escaped.push(b as char);
            } else {
                escaped.push_str(&format!("_{:02x}", b));
            }
        }
        if escaped.is_empty() {
            return Err(EngineError::InvalidIdentifier(source_id.to_string()));
        }
        TableName::new(&format!("{}__{}", root.0, escaped))
    }

    /// Table a rebuild of `root` is materialized into before it replaces `root`.
    ///
    /// The triple underscore cannot come out of [`TableName::for_source`]:
    /// escaped ids continue with an alphanumeric or a `_` plus two hex digits.
    pub fn staging(root: &TableName) -> Result<Self, EngineError> {
        TableName::new(&format!("{}___next", root.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One branch of a tagged union: every row of `table` gains `column = tag`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaggedPart {
    pub table: TableName,
    pub column: String,
    pub tag: String,
}

/// Read-only operations understood by every [`crate::engine::TabularEngine`].
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// `SELECT * FROM table`
    Scan(TableName),
    /// `SELECT *, tag AS column FROM t1 UNION ALL ...`; zero parts yield an empty relation.
    TaggedUnion(Vec<TaggedPart>),
    /// `SELECT * FROM table WHERE column IN (values)`
    FilterIn {
        table: TableName,
        column: String,
        values: Vec<String>,
    },
}

impl Query {
    pub fn scan(table: &TableName) -> Self {
        Query::Scan(table.clone())
    }

    pub fn filter_in(table: &TableName, column: &str, values: &[String]) -> Self {
        Query::FilterIn { table: table.clone(), column: column.to_string(), values: values.to_vec() }
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// Rendering is for logs only; engines execute the variants directly.
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Scan(t) => write!(f, "SELECT * FROM {}", t),
            Query::TaggedUnion(parts) if parts.is_empty() => f.write_str("SELECT NULL WHERE FALSE"),
            Query::TaggedUnion(parts) => {
                let branches: Vec<String> = parts
                    .iter()
                    .map(|p| format!("SELECT *, {} AS {} FROM {}", quote(&p.tag), p.column, p.table))
                    .collect();
                f.write_str(&branches.join(" UNION ALL "))
            }
            Query::FilterIn { table, column, values } => {
                let vals: Vec<String> = values.iter().map(|v| quote(v)).collect();
                write!(f, "SELECT * FROM {} WHERE {} IN ({})", table, column, vals.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod ident_tests {
    use super::*;

    #[test]
    fn rejects_identifiers_that_could_escape() {
        assert!(TableName::new("insights_root").is_ok());
        assert!(TableName::new("1abc").is_err());
        assert!(TableName::new("a; DROP TABLE x").is_err());
        assert!(TableName::new("").is_err());
        assert!(TableName::new(&"a".repeat(64)).is_err());
    }

    #[test]
    fn source_tables_are_scoped_and_collision_free() {
        let root = TableName::new("insights_root").unwrap();
        let a = TableName::for_source(&root, "ab-1").unwrap();
        let b = TableName::for_source(&root, "ab_1").unwrap();
        assert_eq!(a.as_str(), "insights_root__ab_2d1");
        assert_eq!(b.as_str(), "insights_root__ab_5f1");
        assert_ne!(a, b);
        assert!(TableName::for_source(&root, "").is_err());
    }

    #[test]
    fn staging_table_never_collides_with_source_tables() {
        let root = TableName::new("insights_root").unwrap();
        let staging = TableName::staging(&root).unwrap();
        assert_eq!(staging.as_str(), "insights_root___next");
        for id in ["next", "_next", "_next_", "next_"] {
            assert_ne!(TableName::for_source(&root, id).unwrap(), staging);
        }
        assert!(TableName::staging(&TableName::new(&"r".repeat(60)).unwrap()).is_err());
    }

    #[test]
    fn rendered_literals_are_quoted() {
        let root = TableName::new("r").unwrap();
        let q = Query::TaggedUnion(vec![TaggedPart {
            table: TableName::new("t").unwrap(),
            column: "submission".into(),
            tag: "Bob's run".into(),
        }]);
        assert_eq!(q.to_string(), "SELECT *, 'Bob''s run' AS submission FROM t");
        let f = Query::filter_in(&root, "taxonomy_id", &["1313".to_string()]);
        assert_eq!(f.to_string(), "SELECT * FROM r WHERE taxonomy_id IN ('1313')");
    }
}
