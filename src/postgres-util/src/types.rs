//! Mapping from PostgreSQL type names to host-side type names.
//!
//! The validation engine never infers SQL types itself; it reads the type of
//! every result column from the server's describe response and translates
//! the `pg_type.typname` it finds through this table. Custom mappings from
//! the configuration file and branded column types layer on top of the
//! builtin table and win over it.

use std::collections::BTreeMap;

/// Translates `pg_type.typname` values into host type names.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    custom: BTreeMap<String, String>,
    brands: BTreeMap<String, String>,
}

impl TypeMapper {
    /// Builds a mapper from `(sql type, host type)` custom mappings and a
    /// list of brand names.
    pub fn new<C, B>(custom: C, brands: B) -> TypeMapper
    where
        C: IntoIterator<Item = (String, String)>,
        B: IntoIterator<Item = String>,
    {
        TypeMapper {
            custom: custom.into_iter().collect(),
            brands: brands
                .into_iter()
                .map(|brand| (sql_brand_name(&brand), brand))
                .collect(),
        }
    }

    /// Translates a SQL type name into the host type name.
    ///
    /// Array types follow the server's naming convention: a leading
    /// underscore on the element type's name. Unrecognized names map to
    /// `unknown`, which can never satisfy a declared expectation.
    pub fn host_type(&self, sql_name: &str) -> String {
        if let Some(brand) = self.brands.get(sql_name) {
            return brand.clone();
        }
        if let Some(host) = self.custom.get(sql_name) {
            return host.clone();
        }
        if let Some(elem) = sql_name.strip_prefix('_') {
            return format!("{}[]", self.host_type(elem));
        }
        builtin(sql_name).unwrap_or("unknown").to_owned()
    }
}

/// The SQL name of the range type created for a branded column type.
///
/// Brand names come from host-language type names ("UserId") and must be
/// usable as unquoted SQL identifiers.
pub fn sql_brand_name(brand: &str) -> String {
    let mut name = String::with_capacity(brand.len() + 6);
    name.push_str("brand_");
    for ch in brand.chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_lowercase());
        } else {
            name.push('_');
        }
    }
    name
}

fn builtin(sql_name: &str) -> Option<&'static str> {
    let host = match sql_name {
        "bool" => "boolean",
        "int2" | "int4" | "oid" | "float4" | "float8" => "number",
        "int8" | "numeric" => "string",
        "text" | "varchar" | "bpchar" | "char" | "name" => "string",
        "json" | "jsonb" => "JSON",
        "date" | "timestamp" | "timestamptz" => "Date",
        "time" | "timetz" | "interval" => "string",
        "uuid" => "string",
        "bytea" => "Buffer",
        "void" => "void",
        _ => return None,
    };
    Some(host)
}
