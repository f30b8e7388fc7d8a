//! The manifest: the complete input to one validation run.
//!
//! A manifest is submitted wholesale by the extraction layer and is immutable
//! for the duration of the run. Statements arrive fully resolved: host
//! interpolations have already been turned into positional placeholders or
//! substituted text, and each statement carries the source map needed to
//! report positions back in the original file.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sourcemap::SourceMap;
use crate::views::ViewDecl;

/// Whether a column admits NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Nullability {
    /// The column never yields NULL.
    Req,
    /// The column may yield NULL.
    Opt,
}

/// The declared or discovered shape of a single result column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnShape {
    /// Req or Opt.
    pub nullability: Nullability,
    /// Host-side type name, e.g. `number` or a brand name.
    pub type_name: String,
}

impl ColumnShape {
    /// A non-nullable column of the given host type.
    pub fn req(type_name: impl Into<String>) -> ColumnShape {
        ColumnShape {
            nullability: Nullability::Req,
            type_name: type_name.into(),
        }
    }

    /// A nullable column of the given host type.
    pub fn opt(type_name: impl Into<String>) -> ColumnShape {
        ColumnShape {
            nullability: Nullability::Opt,
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for ColumnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.nullability {
            Nullability::Req => write!(f, "Req<{}>", self.type_name),
            Nullability::Opt => write!(f, "Opt<{}>", self.type_name),
        }
    }
}

/// Result columns keyed by name. The key order of the map is irrelevant to
/// comparison; [`canonical_shape`] produces the order-independent form.
pub type ColumnShapeMap = BTreeMap<String, ColumnShape>;

/// Renders a shape map in its canonical, order-independent form:
/// `{a: Req<number>, b: Opt<string>}`.
pub fn canonical_shape(map: &ColumnShapeMap) -> String {
    let fields: Vec<String> = map.iter().map(|(name, shape)| format!("{}: {}", name, shape)).collect();
    format!("{{{}}}", fields.join(", "))
}

/// A byte range in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    /// First byte of the range.
    pub start: u32,
    /// One past the last byte of the range.
    pub end: u32,
}

/// The fields shared by resolved queries and inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementCommon {
    /// Final SQL text with positional parameter placeholders.
    pub sql: String,
    /// Host source file the statement came from.
    pub file_name: String,
    /// Full contents of that file, for rendering positions.
    pub file_contents: String,
    /// Map from generated SQL offsets back into the file.
    pub source_map: SourceMap,
    /// Offset of the originating expression in the file.
    pub source_offset: u32,
    /// Byte range of the explicit column-type annotation, when one exists.
    /// Absent when the call site had no annotation at all; diagnostics then
    /// degrade to a single point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_span: Option<TextRange>,
    /// Method name when the call used a sugar form with no explicit type
    /// argument; replacement text is then prefixed with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar_method: Option<String>,
    /// Expected result columns. `None` disables type checking for this
    /// statement entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_columns: Option<ColumnShapeMap>,
}

/// A column the host program supplies to an insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppliedColumn {
    /// Declared host type of the supplied value.
    pub type_name: String,
    /// Whether the host program promises the value is never NULL.
    pub not_null: bool,
}

/// A resolved statement ready to probe against the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResolvedStatement {
    /// A select-style query.
    Query(StatementCommon),
    /// An insert, carrying its target table and supplied column set.
    #[serde(rename_all = "camelCase")]
    Insert {
        /// Shared statement fields.
        #[serde(flatten)]
        common: StatementCommon,
        /// The table the insert targets.
        table: String,
        /// The columns the host program supplies, with their declared types.
        supplied_columns: BTreeMap<String, SuppliedColumn>,
    },
}

impl ResolvedStatement {
    /// The fields shared by both statement kinds.
    pub fn common(&self) -> &StatementCommon {
        match self {
            ResolvedStatement::Query(common) => common,
            ResolvedStatement::Insert { common, .. } => common,
        }
    }
}

/// A branded column type binding: the named column becomes nominally
/// distinct from every other column of the same base type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandedColumn {
    /// Table the column lives on.
    pub table: String,
    /// Column to brand.
    pub column: String,
    /// Host-side brand name, e.g. `UserId`.
    pub brand: String,
}

/// The delimiter placed after each field in rendered column-type literals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDelimiter {
    /// `,`
    #[default]
    #[serde(rename = ",")]
    Comma,
    /// `;`
    #[serde(rename = ";")]
    Semicolon,
}

impl FieldDelimiter {
    /// The delimiter character as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldDelimiter::Comma => ",",
            FieldDelimiter::Semicolon => ";",
        }
    }
}

/// Layout options for rendered column-type literals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTypesFormat {
    /// Delimiter after each field.
    #[serde(default)]
    pub delimiter: FieldDelimiter,
    /// Whether to wrap multi-line literals in editor folding-region markers.
    #[serde(default)]
    pub include_region_marker: bool,
}

/// Per-manifest engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    /// Narrow the sandbox's implicit date/time operators and casts during
    /// probing, so statements mixing temporal types fail loudly.
    #[serde(default)]
    pub strict_temporal_typing: bool,
    /// Layout of rendered column-type literals.
    #[serde(default)]
    pub column_types_format: ColumnTypesFormat,
}

/// The complete input to one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// The library of named view fragments.
    #[serde(default)]
    pub view_library: Vec<ViewDecl>,
    /// The statements to validate, in manifest order.
    #[serde(default)]
    pub statements: Vec<ResolvedStatement>,
    /// Branded column type bindings.
    #[serde(default)]
    pub branded_column_types: Vec<BrandedColumn>,
    /// Engine configuration.
    #[serde(default)]
    pub config: ManifestConfig,
}
