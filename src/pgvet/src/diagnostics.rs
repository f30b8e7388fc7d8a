//! Source-addressable diagnostics and the mapping from raw outcomes to them.
//!
//! Database errors carry byte offsets into *generated* SQL; everything here
//! is about translating those, plus structural mismatches, into positions in
//! the original host source, with an optional machine-applicable fix.

use serde::Serialize;

use pgvet_postgres_util::{DbErrorInfo, quote_ident};

use crate::manifest::{
    ColumnShapeMap, ColumnTypesFormat, ResolvedStatement, StatementCommon, canonical_shape,
};
use crate::validate::{InsertColumnViolation, Outcome};
use crate::views::{ResolveError, ResolveErrorKind, ResolvedView};

/// Where in a file a diagnostic points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Span {
    /// The whole file; used when no better position is known.
    File,
    /// A single position.
    #[serde(rename_all = "camelCase")]
    Point {
        /// 1-based line.
        line: u32,
        /// 1-based column.
        col: u32,
    },
    /// A range of positions.
    #[serde(rename_all = "camelCase")]
    Range {
        /// 1-based start line.
        start_line: u32,
        /// 1-based start column.
        start_col: u32,
        /// 1-based end line.
        end_line: u32,
        /// 1-based end column.
        end_col: u32,
    },
}

/// A machine-applicable replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickFix {
    /// Short name of the fix.
    pub name: String,
    /// Text to put in place of the span.
    pub replacement_text: String,
}

/// One diagnostic, addressed to host source.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// The file the diagnostic points into.
    pub file_name: String,
    /// Full contents of that file.
    pub file_contents: String,
    /// Where in the file.
    pub span: Span,
    /// Human-readable messages, most important first.
    pub messages: Vec<String>,
    /// Optional trailing block, e.g. a ready-to-paste literal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epilogue: Option<String>,
    /// Optional machine-applicable fix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_fix: Option<QuickFix>,
}

/// Translates a byte offset into a 1-based `(line, col)` pair.
pub fn line_col(text: &str, offset: u32) -> (u32, u32) {
    let offset = (offset as usize).min(text.len());
    let mut line = 1;
    let mut col = 1;
    for byte in text.as_bytes()[..offset].iter() {
        if *byte == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn point(text: &str, offset: u32) -> Span {
    let (line, col) = line_col(text, offset);
    Span::Point { line, col }
}

/// The span of the statement's type annotation when one exists, otherwise a
/// point at the originating expression.
fn statement_span(common: &StatementCommon) -> Span {
    match common.type_span {
        Some(range) => {
            let (start_line, start_col) = line_col(&common.file_contents, range.start);
            let (end_line, end_col) = line_col(&common.file_contents, range.end);
            Span::Range {
                start_line,
                start_col,
                end_line,
                end_col,
            }
        }
        None => point(&common.file_contents, common.source_offset),
    }
}

/// A span for a database error, rebased through the statement's own source
/// map when the server reported a position.
fn db_error_span(common: &StatementCommon, info: &DbErrorInfo) -> Span {
    match info.position.and_then(|p| common.source_map.to_source(p)) {
        Some(source_offset) => point(&common.file_contents, source_offset),
        None => statement_span(common),
    }
}

fn db_error_messages(info: &DbErrorInfo) -> Vec<String> {
    let mut messages = vec![format!("database error: {}", info.message)];
    if let Some(detail) = &info.detail {
        messages.push(format!("detail: {}", detail));
    }
    if let Some(hint) = &info.hint {
        messages.push(format!("hint: {}", hint));
    }
    messages
}

/// Renders the replacement column-type literal for a discovered shape.
///
/// Empty and single-column shapes stay on one line; anything larger becomes
/// a block with one field per line, each terminated by the configured
/// delimiter, optionally wrapped in editor folding-region markers.
pub fn render_replacement(
    shape: &ColumnShapeMap,
    format: &ColumnTypesFormat,
    sugar_method: Option<&str>,
) -> String {
    let delimiter = format.delimiter.as_str();
    let body = match shape.len() {
        0 => "<{}>".to_owned(),
        1 => {
            let (name, col) = shape.iter().next().expect("shape has one column");
            format!("<{{{}: {}}}>", name, col)
        }
        _ => {
            let open = if format.include_region_marker {
                "<{ //#region"
            } else {
                "<{"
            };
            let close = if format.include_region_marker {
                "}> //#endregion"
            } else {
                "}>"
            };
            let fields: Vec<String> = shape
                .iter()
                .map(|(name, col)| format!("  {}: {}{}", name, col, delimiter))
                .collect();
            format!("{}\n{}\n{}", open, fields.join("\n"), close)
        }
    };
    match sugar_method {
        Some(method) => format!("{}{}", method, body),
        None => body,
    }
}

/// Converts one statement's outcome into diagnostics. `NoErrors` yields
/// none.
pub fn statement_diagnostics(
    outcome: &Outcome,
    stmt: &ResolvedStatement,
    format: &ColumnTypesFormat,
) -> Vec<Diagnostic> {
    let common = stmt.common();
    let diagnostic = |span, messages, epilogue, quick_fix| Diagnostic {
        file_name: common.file_name.clone(),
        file_contents: common.file_contents.clone(),
        span,
        messages,
        epilogue,
        quick_fix,
    };
    match outcome {
        Outcome::NoErrors => vec![],
        Outcome::DescribeError(info) => vec![diagnostic(
            db_error_span(common, info),
            db_error_messages(info),
            None,
            None,
        )],
        Outcome::DuplicateColumnNames(names) => vec![diagnostic(
            statement_span(common),
            vec![format!(
                "duplicate result column names: {}",
                names.join(", ")
            )],
            None,
            None,
        )],
        Outcome::WrongColumnTypes { actual } => {
            let declared = common
                .expected_columns
                .as_ref()
                .map(canonical_shape)
                .unwrap_or_else(|| "{}".to_owned());
            let replacement =
                render_replacement(actual, format, common.sugar_method.as_deref());
            vec![diagnostic(
                statement_span(common),
                vec![
                    "declared column types do not match the statement's result shape".to_owned(),
                    format!("declared: {}", declared),
                    format!("actual: {}", canonical_shape(actual)),
                ],
                Some(replacement.clone()),
                Some(QuickFix {
                    name: "update column types".to_owned(),
                    replacement_text: replacement,
                }),
            )]
        }
        Outcome::InvalidTableName(table) => vec![diagnostic(
            statement_span(common),
            vec![format!(
                "table {} does not exist in the sandbox schema",
                quote_ident(table)
            )],
            None,
            None,
        )],
        Outcome::InvalidInsertColumns(violations) => {
            let table = match stmt {
                ResolvedStatement::Insert { table, .. } => table.as_str(),
                ResolvedStatement::Query(_) => "",
            };
            let messages = violations
                .iter()
                .map(|v| violation_message(table, v))
                .collect();
            vec![diagnostic(statement_span(common), messages, None, None)]
        }
    }
}

fn violation_message(table: &str, violation: &InsertColumnViolation) -> String {
    match violation {
        InsertColumnViolation::ColumnNotFound { column } => format!(
            "column {} does not exist on table {}",
            quote_ident(column),
            quote_ident(table)
        ),
        InsertColumnViolation::ColumnTypeMismatch {
            column,
            declared,
            actual,
        } => format!(
            "column {} on table {} is supplied as {} but has type {}",
            quote_ident(column),
            quote_ident(table),
            declared,
            actual
        ),
        InsertColumnViolation::MissingRequiredColumn { column } => format!(
            "column {} on table {} has no default and must be supplied",
            quote_ident(column),
            quote_ident(table)
        ),
    }
}

/// Converts a view resolution error into a diagnostic.
pub fn resolve_error_diagnostic(error: &ResolveError) -> Diagnostic {
    let message = match &error.kind {
        ResolveErrorKind::SelfDependency => {
            format!("view \"{}\" depends on itself", error.view.name)
        }
        ResolveErrorKind::MissingDependency { name, module } => format!(
            "referenced view \"{}\" is not defined in module \"{}\"",
            name, module
        ),
    };
    Diagnostic {
        file_name: error.view.module.clone(),
        file_contents: error.source_text.clone(),
        span: point(&error.source_text, error.source_offset),
        messages: vec![message],
        epilogue: None,
        quick_fix: None,
    }
}

/// Converts a failed view creation into a diagnostic. `prefix_len` is the
/// length of the `CREATE OR REPLACE VIEW ... AS ` preamble the sandbox
/// prepended, which the server's error position includes.
pub fn view_create_diagnostic(
    view: &ResolvedView,
    info: &DbErrorInfo,
    prefix_len: u32,
) -> Diagnostic {
    let span = match info
        .position
        .map(|p| p.saturating_sub(prefix_len))
        .and_then(|p| view.source_map.to_source(p))
    {
        Some(offset) => point(&view.source_text, offset),
        None => point(&view.source_text, 0),
    };
    Diagnostic {
        file_name: view.id.module.clone(),
        file_contents: view.source_text.clone(),
        span,
        messages: db_error_messages(info),
        epilogue: None,
        quick_fix: None,
    }
}

/// Converts an unqualified-wildcard rejection into a diagnostic.
/// `sql_offset` is the offset of the `*` in the resolved view body.
pub fn view_wildcard_diagnostic(view: &ResolvedView, sql_offset: u32) -> Diagnostic {
    let source_offset = view.source_map.to_source(sql_offset).unwrap_or(0);
    Diagnostic {
        file_name: view.id.module.clone(),
        file_contents: view.source_text.clone(),
        span: point(&view.source_text, source_offset),
        messages: vec![
            "view uses an unqualified wildcard projection; its column set would change \
             silently with the schema"
                .to_owned(),
        ],
        epilogue: None,
        quick_fix: None,
    }
}

/// Converts a migration replay failure into the run's single, fatal
/// diagnostic.
pub fn migration_failure_diagnostic(
    file_name: &str,
    contents: &str,
    info: &DbErrorInfo,
) -> Diagnostic {
    let span = match info.position {
        Some(offset) => point(contents, offset),
        None => Span::File,
    };
    Diagnostic {
        file_name: file_name.to_owned(),
        file_contents: contents.to_owned(),
        span,
        messages: db_error_messages(info),
        epilogue: Some("migration replay failed; the run was aborted".to_owned()),
        quick_fix: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ColumnShape, FieldDelimiter, TextRange};
    use crate::sourcemap::{MapEntry, SourceMap};

    #[test]
    fn test_line_col() {
        let text = "ab\ncd\ne";
        assert_eq!(line_col(text, 0), (1, 1));
        assert_eq!(line_col(text, 2), (1, 3));
        assert_eq!(line_col(text, 3), (2, 1));
        assert_eq!(line_col(text, 6), (3, 1));
        assert_eq!(line_col(text, 999), (3, 2));
    }

    #[test]
    fn test_render_replacement_empty_and_single() {
        let format = ColumnTypesFormat::default();
        assert_eq!(render_replacement(&ColumnShapeMap::new(), &format, None), "<{}>");
        let shape = ColumnShapeMap::from([("id".to_owned(), ColumnShape::req("number"))]);
        assert_eq!(
            render_replacement(&shape, &format, None),
            "<{id: Req<number>}>"
        );
        assert_eq!(
            render_replacement(&shape, &format, Some("query")),
            "query<{id: Req<number>}>"
        );
    }

    #[test]
    fn test_render_replacement_multi_column() {
        let shape = ColumnShapeMap::from([
            ("id".to_owned(), ColumnShape::req("number")),
            ("name".to_owned(), ColumnShape::opt("string")),
        ]);
        let format = ColumnTypesFormat {
            delimiter: FieldDelimiter::Semicolon,
            include_region_marker: false,
        };
        assert_eq!(
            render_replacement(&shape, &format, None),
            "<{\n  id: Req<number>;\n  name: Opt<string>;\n}>"
        );
        let format = ColumnTypesFormat {
            delimiter: FieldDelimiter::Comma,
            include_region_marker: true,
        };
        assert_eq!(
            render_replacement(&shape, &format, None),
            "<{ //#region\n  id: Req<number>,\n  name: Opt<string>,\n}> //#endregion"
        );
    }

    #[test]
    fn test_wrong_types_diagnostic_carries_quick_fix() {
        let stmt = ResolvedStatement::Query(StatementCommon {
            sql: "SELECT id FROM users".into(),
            file_name: "src/db.host".into(),
            file_contents: "const q = sql`SELECT id FROM users`".into(),
            source_map: SourceMap::default(),
            source_offset: 6,
            type_span: Some(TextRange { start: 6, end: 7 }),
            sugar_method: None,
            expected_columns: Some(ColumnShapeMap::new()),
        });
        let actual = ColumnShapeMap::from([("id".to_owned(), ColumnShape::req("number"))]);
        let diags = statement_diagnostics(
            &Outcome::WrongColumnTypes { actual },
            &stmt,
            &ColumnTypesFormat::default(),
        );
        assert_eq!(diags.len(), 1);
        let fix = diags[0].quick_fix.as_ref().unwrap();
        assert_eq!(fix.replacement_text, "<{id: Req<number>}>");
        assert!(matches!(diags[0].span, Span::Range { .. }));
        assert!(diags[0].messages[1].contains("{}"));
        assert!(diags[0].messages[2].contains("{id: Req<number>}"));
    }

    #[test]
    fn test_db_error_position_rebased_through_source_map() {
        let stmt = ResolvedStatement::Query(StatementCommon {
            sql: "SELECT nope FROM users".into(),
            file_name: "src/db.host".into(),
            file_contents: "line one\nSELECT nope FROM users".into(),
            // Generated offset 0 corresponds to source offset 9.
            source_map: SourceMap::new(vec![MapEntry::literal(9, 0, 22)]),
            source_offset: 9,
            type_span: None,
            sugar_method: None,
            expected_columns: None,
        });
        let info = DbErrorInfo {
            code: "42703".into(),
            message: "column \"nope\" does not exist".into(),
            detail: None,
            hint: None,
            position: Some(7),
        };
        let diags = statement_diagnostics(
            &Outcome::DescribeError(info),
            &stmt,
            &ColumnTypesFormat::default(),
        );
        // Offset 7 in the generated SQL is offset 16 in the file: line 2.
        assert_eq!(diags[0].span, Span::Point { line: 2, col: 8 });
        assert!(diags[0].messages[0].contains("does not exist"));
    }

    #[test]
    fn test_insert_violations_render_one_message_each() {
        let stmt = ResolvedStatement::Insert {
            common: StatementCommon {
                sql: String::new(),
                file_name: "src/db.host".into(),
                file_contents: String::new(),
                source_map: SourceMap::default(),
                source_offset: 0,
                type_span: None,
                sugar_method: None,
                expected_columns: None,
            },
            table: "t".into(),
            supplied_columns: Default::default(),
        };
        let outcome = Outcome::InvalidInsertColumns(vec![
            InsertColumnViolation::ColumnNotFound { column: "c".into() },
            InsertColumnViolation::MissingRequiredColumn { column: "a".into() },
        ]);
        let diags = statement_diagnostics(&outcome, &stmt, &ColumnTypesFormat::default());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].messages.len(), 2);
        assert!(diags[0].messages[0].contains("\"c\""));
        assert!(diags[0].messages[1].contains("\"a\""));
    }
}
