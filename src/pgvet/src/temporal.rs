//! The strict temporal typing catalog patch.
//!
//! PostgreSQL silently compares and casts across date/time/timestamp types
//! through implicit operators and casts. With strict temporal typing
//! enabled, the sandbox deletes the cross-type comparison operators and
//! downgrades the implicit casts to explicit-only for the duration of the
//! probing transaction (which is always rolled back), so statements that mix
//! temporal types fail loudly during describe instead of silently
//! truncating at runtime.
//!
//! The patch is configuration data, not magic numbers: operators are named
//! by `(name, left operand, right operand)` and casts by `(source, target)`,
//! and both are resolved against `pg_operator`/`pg_cast` by the server when
//! the patch runs. Compatibility: the tables below are verified against
//! PostgreSQL 14 through 16; other versions fall back to the nearest known
//! table with a warning.

use tokio_postgres::Transaction;
use tracing::{debug, warn};

use pgvet_postgres_util::PostgresError;

/// A comparison operator identified by name and operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorSig {
    /// Operator name, e.g. `=`.
    pub name: &'static str,
    /// Left operand type.
    pub left: &'static str,
    /// Right operand type.
    pub right: &'static str,
}

/// A cast identified by source and target types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastSig {
    /// Source type.
    pub source: &'static str,
    /// Target type.
    pub target: &'static str,
}

/// The catalog narrowing applied for one Postgres major version.
#[derive(Debug, Clone)]
pub struct TemporalPatch {
    /// Cross-type comparison operators to delete.
    pub operators: Vec<OperatorSig>,
    /// Implicit casts to downgrade to explicit-only.
    pub casts: Vec<CastSig>,
}

const COMPARISON_OPERATORS: [&str; 6] = ["=", "<>", "<", "<=", ">", ">="];

const CROSS_TYPE_PAIRS: [(&str, &str); 6] = [
    ("date", "timestamp"),
    ("timestamp", "date"),
    ("date", "timestamptz"),
    ("timestamptz", "date"),
    ("timestamp", "timestamptz"),
    ("timestamptz", "timestamp"),
];

const IMPLICIT_CASTS: [(&str, &str); 4] = [
    ("date", "timestamp"),
    ("date", "timestamptz"),
    ("timestamp", "timestamptz"),
    ("time", "timetz"),
];

/// Versions the patch tables are verified against.
pub const SUPPORTED_VERSIONS: [u32; 3] = [14, 15, 16];

/// The patch for a Postgres major version.
///
/// The operator/cast sets are identical across the supported versions; the
/// per-version indirection exists so a future catalog change lands as data,
/// not code.
pub fn patch_for_version(major: u32) -> TemporalPatch {
    if !SUPPORTED_VERSIONS.contains(&major) {
        warn!(
            version = major,
            "strict temporal typing tables are not verified for this Postgres version; \
             using the PostgreSQL 16 tables"
        );
    }
    let operators = COMPARISON_OPERATORS
        .iter()
        .flat_map(|&name| {
            CROSS_TYPE_PAIRS
                .iter()
                .map(move |&(left, right)| OperatorSig { name, left, right })
        })
        .collect();
    let casts = IMPLICIT_CASTS
        .iter()
        .map(|&(source, target)| CastSig { source, target })
        .collect();
    TemporalPatch { operators, casts }
}

/// Applies the patch inside the given transaction.
///
/// The transaction must be rolled back by the caller; the deletions below
/// are real catalog mutations and must never commit.
pub async fn apply(tx: &Transaction<'_>, patch: &TemporalPatch) -> Result<(), PostgresError> {
    debug!(
        operators = patch.operators.len(),
        casts = patch.casts.len(),
        "narrowing temporal operators and casts"
    );
    for op in &patch.operators {
        tx.execute(
            "DELETE FROM pg_operator
             WHERE oprname = $1 AND oprleft = $2::regtype AND oprright = $3::regtype",
            &[&op.name, &op.left, &op.right],
        )
        .await?;
    }
    for cast in &patch.casts {
        tx.execute(
            "UPDATE pg_cast SET castcontext = 'e'
             WHERE castsource = $1::regtype AND casttarget = $2::regtype",
            &[&cast.source, &cast.target],
        )
        .await?;
    }
    Ok(())
}
