//! Memoization of per-statement validation outcomes.
//!
//! Outcomes are keyed by a canonical signature of everything that feeds a
//! statement's validation besides schema state. Schema state is handled
//! wholesale: the session clears the cache whenever the sandbox performs a
//! full reset, since every cached outcome depends on schema that just became
//! obsolete.
//!
//! A run never mutates the previous run's cache in place. It populates a
//! fresh cache, reusing old entries where signatures still hit, and the
//! session swaps the fresh cache in only after the whole run completes, so
//! an interrupted run can never leave a cache describing a half-validated
//! manifest.

use std::collections::BTreeMap;

use pgvet_postgres_util::quote_ident;

use crate::manifest::{ResolvedStatement, canonical_shape};
use crate::validate::Outcome;

/// Sentinel folded into signatures when a statement skips type checking.
const UNCHECKED: &str = "<unchecked>";

/// A signature-keyed cache of validation outcomes.
#[derive(Debug, Clone, Default)]
pub struct ValidationCache {
    entries: BTreeMap<String, Outcome>,
}

impl ValidationCache {
    /// Looks up the outcome for a signature.
    pub fn get(&self, signature: &str) -> Option<&Outcome> {
        self.entries.get(signature)
    }

    /// Records the outcome for a signature.
    pub fn set(&mut self, signature: String, outcome: Outcome) {
        self.entries.insert(signature, outcome);
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached outcomes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes the canonical signature of a statement.
pub fn statement_signature(stmt: &ResolvedStatement) -> String {
    let common = stmt.common();
    let expected = match &common.expected_columns {
        Some(map) => canonical_shape(map),
        None => UNCHECKED.to_owned(),
    };
    let mut signature = format!("{}\u{1}{}", canonical_sql(&common.sql), expected);
    if let ResolvedStatement::Insert {
        table,
        supplied_columns,
        ..
    } = stmt
    {
        let supplied: Vec<String> = supplied_columns
            .iter()
            .map(|(name, col)| format!("{}:{}:{}", name, col.type_name, col.not_null))
            .collect();
        signature.push('\u{1}');
        signature.push_str(&quote_ident(table));
        signature.push('\u{1}');
        signature.push_str(&supplied.join(","));
    }
    signature
}

/// Collapses whitespace runs so trivial reformatting does not defeat the
/// cache.
fn canonical_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
