//! Probing a single resolved statement against the sandbox.
//!
//! A probe asks the server to prepare and describe the statement, never to
//! execute it, inside a savepoint that is rolled back regardless of
//! outcome, so any number of probes compose within one transaction without
//! ever needing a full transaction reset.

use std::collections::{BTreeMap, BTreeSet};

use tokio_postgres::Transaction;

use pgvet_postgres_util::desc::{PgRelationDesc, RelationIndex};
use pgvet_postgres_util::types::TypeMapper;
use pgvet_postgres_util::{DbErrorInfo, PostgresError};

use crate::manifest::{
    ColumnShape, ColumnShapeMap, Nullability, ResolvedStatement, StatementCommon, SuppliedColumn,
    canonical_shape,
};

/// The outcome of validating one statement.
///
/// Every variant except `NoErrors` is a per-statement, non-aborting error:
/// it joins the run's diagnostic list and the next statement still runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The statement matches its declared shape.
    NoErrors,
    /// The server rejected the statement during prepare/describe.
    DescribeError(DbErrorInfo),
    /// The result has duplicate column names, which is ambiguous regardless
    /// of types.
    DuplicateColumnNames(Vec<String>),
    /// The discovered result shape disagrees with the declared one.
    WrongColumnTypes {
        /// The shape the statement actually returns.
        actual: ColumnShapeMap,
    },
    /// The insert's target table does not exist.
    InvalidTableName(String),
    /// The insert's supplied columns disagree with the table.
    InvalidInsertColumns(Vec<InsertColumnViolation>),
}

/// One way an insert's supplied columns can disagree with the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertColumnViolation {
    /// A supplied column does not exist on the table.
    ColumnNotFound {
        /// The supplied column name.
        column: String,
    },
    /// A supplied column's declared type or nullability disagrees with the
    /// table's.
    ColumnTypeMismatch {
        /// The column name.
        column: String,
        /// What the host program declared.
        declared: ColumnShape,
        /// What the table actually has.
        actual: ColumnShape,
    },
    /// A non-nullable column without a default was not supplied at all.
    MissingRequiredColumn {
        /// The column name.
        column: String,
    },
}

/// A result column as reported by the server's describe response.
#[derive(Debug, Clone)]
pub struct DescribedColumn {
    /// Result column name.
    pub name: String,
    /// `pg_type.typname` of the column.
    pub type_name: String,
    /// Originating relation, when the column projects one directly.
    pub table_oid: Option<u32>,
    /// Ordinal within the originating relation.
    pub column_id: Option<i16>,
}

/// Validates statements against the sandbox.
pub struct Validator<'a> {
    /// The nullability index for the current sandbox schema.
    pub index: &'a RelationIndex,
    /// The SQL-to-host type mapping for the current run.
    pub mapper: &'a TypeMapper,
}

impl Validator<'_> {
    /// Probes one statement and classifies the outcome.
    pub async fn validate(
        &self,
        tx: &mut Transaction<'_>,
        stmt: &ResolvedStatement,
    ) -> Result<Outcome, PostgresError> {
        match stmt {
            ResolvedStatement::Query(common) => self.validate_query(tx, common).await,
            ResolvedStatement::Insert {
                common,
                table,
                supplied_columns,
            } => self.validate_insert(tx, common, table, supplied_columns).await,
        }
    }

    async fn validate_query(
        &self,
        tx: &mut Transaction<'_>,
        common: &StatementCommon,
    ) -> Result<Outcome, PostgresError> {
        match self.describe(tx, &common.sql).await? {
            Err(info) => Ok(Outcome::DescribeError(info)),
            Ok(columns) => Ok(self.check_shape(&columns, common)),
        }
    }

    async fn validate_insert(
        &self,
        tx: &mut Transaction<'_>,
        common: &StatementCommon,
        table: &str,
        supplied: &BTreeMap<String, SuppliedColumn>,
    ) -> Result<Outcome, PostgresError> {
        // A nonexistent table short-circuits everything else: the probe and
        // the column cross-check would both just restate it.
        let Some(rel) = self.index.get(table) else {
            return Ok(Outcome::InvalidTableName(table.to_owned()));
        };
        match self.describe(tx, &common.sql).await? {
            Err(info) => return Ok(Outcome::DescribeError(info)),
            Ok(columns) => {
                let shape = self.check_shape(&columns, common);
                if shape != Outcome::NoErrors {
                    return Ok(shape);
                }
            }
        }
        let violations = self.insert_column_violations(rel, supplied);
        if violations.is_empty() {
            Ok(Outcome::NoErrors)
        } else {
            Ok(Outcome::InvalidInsertColumns(violations))
        }
    }

    /// Prepare-and-describes `sql` inside a savepoint that is rolled back
    /// regardless of outcome. A structured database error is a per-statement
    /// result; anything else propagates as fatal.
    async fn describe(
        &self,
        tx: &mut Transaction<'_>,
        sql: &str,
    ) -> Result<Result<Vec<DescribedColumn>, DbErrorInfo>, PostgresError> {
        let savepoint = tx.savepoint("pgvet_probe").await?;
        let prepared = savepoint.prepare(sql).await;
        let columns = prepared.map(|statement| {
            statement
                .columns()
                .iter()
                .map(|c| DescribedColumn {
                    name: c.name().to_owned(),
                    type_name: c.type_().name().to_owned(),
                    table_oid: c.table_oid(),
                    column_id: c.column_id(),
                })
                .collect::<Vec<_>>()
        });
        savepoint.rollback().await?;
        match columns {
            Ok(columns) => Ok(Ok(columns)),
            Err(err) => match DbErrorInfo::from_error(&err) {
                Some(info) => Ok(Err(info)),
                None => Err(err.into()),
            },
        }
    }

    /// Classifies described result columns against the statement's expected
    /// shape.
    pub fn check_shape(&self, columns: &[DescribedColumn], common: &StatementCommon) -> Outcome {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for column in columns {
            if !seen.insert(column.name.as_str()) {
                duplicates.insert(column.name.clone());
            }
        }
        if !duplicates.is_empty() {
            return Outcome::DuplicateColumnNames(duplicates.into_iter().collect());
        }
        let Some(expected) = &common.expected_columns else {
            return Outcome::NoErrors;
        };
        let actual = self.discovered_shape(columns);
        if canonical_shape(&actual) == canonical_shape(expected) {
            Outcome::NoErrors
        } else {
            Outcome::WrongColumnTypes { actual }
        }
    }

    /// Maps described columns through the nullability index and the type
    /// table into a host-side shape.
    pub fn discovered_shape(&self, columns: &[DescribedColumn]) -> ColumnShapeMap {
        columns
            .iter()
            .map(|column| {
                let not_null = match (column.table_oid, column.column_id) {
                    (Some(oid), Some(id)) => self
                        .index
                        .column_by_oid(oid, id)
                        .map(|col| col.not_null)
                        .unwrap_or(false),
                    // A computed expression; the server gives no provenance,
                    // so it stays nullable.
                    _ => false,
                };
                let shape = ColumnShape {
                    nullability: if not_null {
                        Nullability::Req
                    } else {
                        Nullability::Opt
                    },
                    type_name: self.mapper.host_type(&column.type_name),
                };
                (column.name.clone(), shape)
            })
            .collect()
    }

    /// Cross-checks an insert's supplied columns against the table,
    /// accumulating every violation rather than stopping at the first.
    pub fn insert_column_violations(
        &self,
        rel: &PgRelationDesc,
        supplied: &BTreeMap<String, SuppliedColumn>,
    ) -> Vec<InsertColumnViolation> {
        let mut violations = Vec::new();
        for (name, declared) in supplied {
            let Some(col) = rel.column(name) else {
                violations.push(InsertColumnViolation::ColumnNotFound {
                    column: name.clone(),
                });
                continue;
            };
            let actual = ColumnShape {
                nullability: if col.not_null {
                    Nullability::Req
                } else {
                    Nullability::Opt
                },
                type_name: self.mapper.host_type(&col.type_name),
            };
            let declared_shape = ColumnShape {
                nullability: if declared.not_null {
                    Nullability::Req
                } else {
                    Nullability::Opt
                },
                type_name: declared.type_name.clone(),
            };
            // Supplying a never-null value to a nullable column is fine; the
            // disagreement that matters is a maybe-null value aimed at a
            // NOT NULL column, or any type difference.
            let nullability_violated =
                declared_shape.nullability == Nullability::Opt && col.not_null;
            if declared_shape.type_name != actual.type_name || nullability_violated {
                violations.push(InsertColumnViolation::ColumnTypeMismatch {
                    column: name.clone(),
                    declared: declared_shape,
                    actual,
                });
            }
        }
        for col in &rel.columns {
            if col.not_null && !col.has_default && !supplied.contains_key(&col.name) {
                violations.push(InsertColumnViolation::MissingRequiredColumn {
                    column: col.name.clone(),
                });
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMap;
    use pgvet_postgres_util::desc::PgColumnDesc;

    fn index() -> RelationIndex {
        RelationIndex::new(vec![(
            16384,
            PgRelationDesc {
                name: "t".into(),
                is_view: false,
                columns: vec![
                    PgColumnDesc {
                        name: "a".into(),
                        col_num: 1,
                        type_name: "int4".into(),
                        not_null: true,
                        has_default: false,
                    },
                    PgColumnDesc {
                        name: "b".into(),
                        col_num: 2,
                        type_name: "int4".into(),
                        not_null: false,
                        has_default: true,
                    },
                ],
            },
        )])
    }

    fn common(expected: Option<ColumnShapeMap>) -> StatementCommon {
        StatementCommon {
            sql: String::new(),
            file_name: "src/db.host".into(),
            file_contents: String::new(),
            source_map: SourceMap::default(),
            source_offset: 0,
            type_span: None,
            sugar_method: None,
            expected_columns: expected,
        }
    }

    fn described(name: &str, type_name: &str) -> DescribedColumn {
        DescribedColumn {
            name: name.into(),
            type_name: type_name.into(),
            table_oid: None,
            column_id: None,
        }
    }

    #[test]
    fn test_duplicate_names_win_over_type_mismatch() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let outcome = validator.check_shape(
            &[described("id", "int4"), described("id", "text")],
            &common(Some(ColumnShapeMap::new())),
        );
        assert_eq!(outcome, Outcome::DuplicateColumnNames(vec!["id".into()]));
    }

    #[test]
    fn test_no_expected_map_skips_type_checking() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let outcome = validator.check_shape(&[described("id", "int4")], &common(None));
        assert_eq!(outcome, Outcome::NoErrors);
    }

    #[test]
    fn test_nullability_flows_from_index() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let columns = vec![
            DescribedColumn {
                name: "a".into(),
                type_name: "int4".into(),
                table_oid: Some(16384),
                column_id: Some(1),
            },
            DescribedColumn {
                name: "computed".into(),
                type_name: "int4".into(),
                table_oid: None,
                column_id: None,
            },
        ];
        let shape = validator.discovered_shape(&columns);
        assert_eq!(shape["a"], ColumnShape::req("number"));
        assert_eq!(shape["computed"], ColumnShape::opt("number"));
    }

    #[test]
    fn test_branded_columns_are_nominally_distinct() {
        let index = index();
        let mapper = TypeMapper::new(vec![], vec!["UserId".to_owned(), "OrderId".to_owned()]);
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let expected = ColumnShapeMap::from([("id".to_owned(), ColumnShape::opt("UserId"))]);
        // Same base storage type, different brand: mismatch.
        let outcome = validator.check_shape(
            &[described("id", "brand_orderid")],
            &common(Some(expected.clone())),
        );
        assert!(matches!(outcome, Outcome::WrongColumnTypes { .. }));
        // Compared to itself: match.
        let outcome =
            validator.check_shape(&[described("id", "brand_userid")], &common(Some(expected)));
        assert_eq!(outcome, Outcome::NoErrors);
    }

    #[test]
    fn test_insert_missing_required_column() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let rel = index.get("t").unwrap();

        // Supplying only `a` satisfies the table: `b` has a default.
        let supplied = BTreeMap::from([(
            "a".to_owned(),
            SuppliedColumn {
                type_name: "number".into(),
                not_null: true,
            },
        )]);
        assert!(validator.insert_column_violations(rel, &supplied).is_empty());

        // Supplying nothing misses exactly `a`.
        let violations = validator.insert_column_violations(rel, &BTreeMap::new());
        assert_eq!(
            violations,
            vec![InsertColumnViolation::MissingRequiredColumn {
                column: "a".into()
            }]
        );
    }

    #[test]
    fn test_insert_unknown_and_missing_accumulate() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let rel = index.get("t").unwrap();
        let supplied = BTreeMap::from([(
            "c".to_owned(),
            SuppliedColumn {
                type_name: "number".into(),
                not_null: true,
            },
        )]);
        let violations = validator.insert_column_violations(rel, &supplied);
        assert_eq!(
            violations,
            vec![
                InsertColumnViolation::ColumnNotFound { column: "c".into() },
                InsertColumnViolation::MissingRequiredColumn { column: "a".into() },
            ]
        );
    }

    #[test]
    fn test_insert_nullability_disagreement() {
        let index = index();
        let mapper = TypeMapper::default();
        let validator = Validator {
            index: &index,
            mapper: &mapper,
        };
        let rel = index.get("t").unwrap();
        // A maybe-null value aimed at NOT NULL `a` is a violation.
        let supplied = BTreeMap::from([(
            "a".to_owned(),
            SuppliedColumn {
                type_name: "number".into(),
                not_null: false,
            },
        )]);
        let violations = validator.insert_column_violations(rel, &supplied);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            InsertColumnViolation::ColumnTypeMismatch { .. }
        ));
        // A never-null value aimed at nullable `b` is fine.
        let supplied = BTreeMap::from([
            (
                "a".to_owned(),
                SuppliedColumn {
                    type_name: "number".into(),
                    not_null: true,
                },
            ),
            (
                "b".to_owned(),
                SuppliedColumn {
                    type_name: "number".into(),
                    not_null: true,
                },
            ),
        ]);
        assert!(validator.insert_column_violations(rel, &supplied).is_empty());
    }
}
