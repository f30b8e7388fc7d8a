//! Descriptions of PostgreSQL objects as the sandbox sees them.

use std::collections::BTreeMap;

/// A column of a table or view in the sandbox schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgColumnDesc {
    /// The name of the column.
    pub name: String,
    /// The ordinal position of the column (1-based, matching `attnum`).
    pub col_num: u16,
    /// The name of the column's type as recorded in `pg_type.typname`.
    pub type_name: String,
    /// Whether the column rejects NULL values.
    ///
    /// For view columns this is derived from the base table column the view
    /// ultimately projects, not from the catalog (which always reports view
    /// columns as nullable).
    pub not_null: bool,
    /// Whether the column has a default, counting identity columns.
    pub has_default: bool,
}

/// A table or view in the sandbox schema, with its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgRelationDesc {
    /// The relation name.
    pub name: String,
    /// `true` for views, `false` for tables.
    pub is_view: bool,
    /// Columns in ordinal order.
    pub columns: Vec<PgColumnDesc>,
}

impl PgRelationDesc {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&PgColumnDesc> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// All relations in the sandbox schema, keyed by name.
///
/// This is the "nullability index" the validation engine consults when
/// describing statement results: a `(table oid, column number)` reported by
/// the server's row description resolves through here to a nullability and a
/// type name.
#[derive(Debug, Clone, Default)]
pub struct RelationIndex {
    relations: BTreeMap<String, PgRelationDesc>,
    by_oid: BTreeMap<u32, String>,
}

impl RelationIndex {
    /// Builds an index from `(oid, desc)` pairs.
    pub fn new(relations: Vec<(u32, PgRelationDesc)>) -> RelationIndex {
        let mut index = RelationIndex::default();
        for (oid, desc) in relations {
            index.by_oid.insert(oid, desc.name.clone());
            index.relations.insert(desc.name.clone(), desc);
        }
        index
    }

    /// Looks up a relation by name.
    pub fn get(&self, name: &str) -> Option<&PgRelationDesc> {
        self.relations.get(name)
    }

    /// Looks up a relation by its `pg_class` oid.
    pub fn get_by_oid(&self, oid: u32) -> Option<&PgRelationDesc> {
        self.by_oid.get(&oid).and_then(|name| self.relations.get(name))
    }

    /// Looks up a column by relation oid and ordinal, as reported in a row
    /// description.
    pub fn column_by_oid(&self, oid: u32, col_num: i16) -> Option<&PgColumnDesc> {
        let rel = self.get_by_oid(oid)?;
        rel.columns.iter().find(|c| i32::from(c.col_num) == i32::from(col_num))
    }

    /// Mutable access for the provenance pass, which patches view-column
    /// nullability after the initial catalog scan.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PgRelationDesc> {
        self.relations.get_mut(name)
    }

    /// Iterates all relations in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PgRelationDesc> {
        self.relations.values()
    }

    /// Number of indexed relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_desc() -> (u32, PgRelationDesc) {
        (
            16384,
            PgRelationDesc {
                name: "users".into(),
                is_view: false,
                columns: vec![
                    PgColumnDesc {
                        name: "id".into(),
                        col_num: 1,
                        type_name: "int4".into(),
                        not_null: true,
                        has_default: true,
                    },
                    PgColumnDesc {
                        name: "email".into(),
                        col_num: 2,
                        type_name: "text".into(),
                        not_null: false,
                        has_default: false,
                    },
                ],
            },
        )
    }

    #[test]
    fn test_lookup_by_oid_and_ordinal() {
        let index = RelationIndex::new(vec![users_desc()]);
        let col = index.column_by_oid(16384, 2).unwrap();
        assert_eq!(col.name, "email");
        assert!(!col.not_null);
        assert!(index.column_by_oid(16384, 3).is_none());
        assert!(index.column_by_oid(99, 1).is_none());
    }

    #[test]
    fn test_lookup_by_name() {
        let index = RelationIndex::new(vec![users_desc()]);
        assert!(index.get("users").unwrap().column("id").unwrap().not_null);
        assert!(index.get("orders").is_none());
    }
}
