//! The sandbox schema lifecycle.
//!
//! The sandbox manager owns everything that mutates the sandbox connection's
//! schema: fingerprinting and replaying migrations, the full reset, the
//! nullability index, branded column types, and keeping installed library
//! views in sync with the manifest. Probing (which never mutates anything)
//! lives in [`crate::validate`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_postgres::Client;
use tracing::{debug, info};

use pgvet_postgres_util::desc::{PgColumnDesc, PgRelationDesc, RelationIndex};
use pgvet_postgres_util::types::sql_brand_name;
use pgvet_postgres_util::{DbErrorInfo, PostgresError, quote_ident};

use crate::diagnostics::{
    Diagnostic, Span, migration_failure_diagnostic, view_create_diagnostic,
    view_wildcard_diagnostic,
};
use crate::manifest::{BrandedColumn, Manifest};
use crate::temporal;
use crate::views::{Resolution, ResolvedView, ViewId};

mod provenance;

/// One migration file, in replay order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, e.g. `V3__add_orders.sql`.
    pub name: String,
    /// File contents.
    pub contents: String,
}

/// The loaded migration set and its fingerprint.
#[derive(Debug, Clone)]
pub struct MigrationSet {
    /// Files in lexical name order.
    pub files: Vec<MigrationFile>,
    /// Hash over the sorted file names and contents.
    pub fingerprint: String,
}

/// An error loading migration files from disk.
#[derive(Debug, Error)]
pub enum MigrationLoadError {
    /// The migrations directory could not be read.
    #[error("failed to read migrations directory {path}")]
    Dir {
        /// The directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A migration file could not be read.
    #[error("failed to read migration file {path}")]
    File {
        /// The file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A `.sql` file does not follow the migration naming pattern.
    #[error("migration file name does not match V<digits>__<description>.sql: {name}")]
    BadFileName {
        /// The offending file name.
        name: String,
    },
}

/// Loads and fingerprints the migration directory.
///
/// Only `.sql` files participate; each must match
/// `V<digits>__<description>.sql`. Files replay in lexical name order.
pub fn load_migrations(dir: &Path) -> Result<MigrationSet, MigrationLoadError> {
    let pattern = Regex::new(r"^V\d+__.+\.sql$").expect("valid regex");
    let entries = fs::read_dir(dir).map_err(|source| MigrationLoadError::Dir {
        path: dir.to_owned(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrationLoadError::Dir {
            path: dir.to_owned(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();
        if !pattern.is_match(&name) {
            return Err(MigrationLoadError::BadFileName { name });
        }
        let contents = fs::read_to_string(&path).map_err(|source| MigrationLoadError::File {
            path: path.clone(),
            source,
        })?;
        files.push(MigrationFile { name, contents });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for file in &files {
        hasher.update(file.name.as_bytes());
        hasher.update([0]);
        hasher.update(file.contents.as_bytes());
        hasher.update([0]);
    }
    let fingerprint = format!("{:x}", hasher.finalize());
    Ok(MigrationSet { files, fingerprint })
}

/// State the sandbox manager maintains across runs.
///
/// Invalidated and rebuilt wholesale (never partially patched) whenever
/// the migrations fingerprint or the branded bindings change.
#[derive(Debug, Default)]
pub struct SandboxState {
    /// Fingerprint of the migrations currently applied, if any.
    pub migrations_fingerprint: Option<String>,
    /// Branded bindings currently applied.
    pub branded_bindings: Vec<BrandedColumn>,
    /// Library views currently installed, by generated name.
    pub installed_views: BTreeMap<String, ViewId>,
    /// The nullability index for the current schema.
    pub index: RelationIndex,
}

/// The result of provisioning the sandbox for a run.
#[derive(Debug)]
pub enum EnsureOutcome {
    /// Migration replay failed; the run is aborted with this single
    /// diagnostic.
    MigrationFailed(Diagnostic),
    /// The sandbox matches the manifest.
    Ready {
        /// Whether a full reset happened; the session must clear its
        /// validation cache when it did.
        reset: bool,
        /// Per-view diagnostics collected while reconciling the library.
        diagnostics: Vec<Diagnostic>,
    },
}

/// Owns the sandbox connection's schema lifecycle.
#[derive(Debug)]
pub struct SandboxManager {
    schema: String,
    postgres_version: u32,
}

impl SandboxManager {
    /// A manager for the given sandbox schema and server major version.
    pub fn new(schema: impl Into<String>, postgres_version: u32) -> SandboxManager {
        SandboxManager {
            schema: schema.into(),
            postgres_version,
        }
    }

    /// Brings the sandbox schema in line with the manifest.
    pub async fn ensure_schema(
        &self,
        client: &mut Client,
        state: &mut SandboxState,
        manifest: &Manifest,
        resolution: &Resolution,
        migrations: &MigrationSet,
    ) -> Result<EnsureOutcome, PostgresError> {
        let reset = state.migrations_fingerprint.as_deref() != Some(&migrations.fingerprint)
            || state.branded_bindings != manifest.branded_column_types;
        let mut diagnostics = Vec::new();
        if reset {
            info!(
                fingerprint = %migrations.fingerprint,
                migrations = migrations.files.len(),
                "rebuilding sandbox schema"
            );
            self.full_reset(client).await?;
            *state = SandboxState::default();
            if let Some(diag) = self.replay_migrations(client, migrations).await? {
                return Ok(EnsureOutcome::MigrationFailed(diag));
            }
            state.migrations_fingerprint = Some(migrations.fingerprint.clone());
            self.apply_branded_types(client, &manifest.branded_column_types, &mut diagnostics)
                .await?;
            state.branded_bindings = manifest.branded_column_types.clone();
        }
        self.reconcile_views(
            client,
            state,
            resolution,
            manifest.config.strict_temporal_typing,
            &mut diagnostics,
        )
        .await?;
        state.index = self.build_index(client).await?;
        Ok(EnsureOutcome::Ready { reset, diagnostics })
    }

    /// Drops every view, table, sequence, user type, and function in the
    /// sandbox schema.
    async fn full_reset(&self, client: &Client) -> Result<(), PostgresError> {
        let schema = quote_ident(&self.schema);
        for view in self.relation_names(client, 'v').await? {
            client
                .batch_execute(&format!(
                    "DROP VIEW IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&view)
                ))
                .await?;
        }
        for table in self.relation_names(client, 'r').await? {
            client
                .batch_execute(&format!(
                    "DROP TABLE IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&table)
                ))
                .await?;
        }
        for sequence in self.relation_names(client, 'S').await? {
            client
                .batch_execute(&format!(
                    "DROP SEQUENCE IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&sequence)
                ))
                .await?;
        }
        let routines = client
            .query(
                "SELECT p.oid::regprocedure::text AS signature
                 FROM pg_catalog.pg_proc p
                 JOIN pg_catalog.pg_namespace n ON p.pronamespace = n.oid
                 WHERE n.nspname = $1 AND p.prokind IN ('f', 'p')",
                &[&self.schema],
            )
            .await?;
        for row in routines {
            let signature: String = row.get("signature");
            client
                .batch_execute(&format!("DROP ROUTINE IF EXISTS {} CASCADE", signature))
                .await?;
        }
        let types = client
            .query(
                "SELECT t.typname
                 FROM pg_catalog.pg_type t
                 JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
                 LEFT JOIN pg_catalog.pg_class c ON c.oid = t.typrelid
                 WHERE n.nspname = $1
                   AND t.typtype IN ('d', 'e', 'r', 'c')
                   AND (t.typrelid = 0 OR c.relkind = 'c')",
                &[&self.schema],
            )
            .await?;
        for row in types {
            let name: String = row.get("typname");
            client
                .batch_execute(&format!(
                    "DROP TYPE IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&name)
                ))
                .await?;
        }
        Ok(())
    }

    async fn relation_names(&self, client: &Client, kind: char) -> Result<Vec<String>, PostgresError> {
        let kind = kind as u8 as i8;
        let rows = client
            .query(
                "SELECT c.relname
                 FROM pg_catalog.pg_class c
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 WHERE n.nspname = $1 AND c.relkind = $2
                 ORDER BY c.relname",
                &[&self.schema, &kind],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get("relname")).collect())
    }

    /// Replays every migration file in lexical order. A SQL error is fatal
    /// for the run and becomes the run's single diagnostic.
    async fn replay_migrations(
        &self,
        client: &Client,
        migrations: &MigrationSet,
    ) -> Result<Option<Diagnostic>, PostgresError> {
        for file in &migrations.files {
            debug!(file = %file.name, "applying migration");
            if let Err(err) = client.batch_execute(&file.contents).await {
                return match DbErrorInfo::from_error(&err) {
                    Some(info) => Ok(Some(migration_failure_diagnostic(
                        &file.name,
                        &file.contents,
                        &info,
                    ))),
                    None => Err(err.into()),
                };
            }
        }
        Ok(None)
    }

    /// Rewrites branded columns into range types over their base type.
    ///
    /// Two columns branded differently become structurally incompatible even
    /// though their storage type is identical; that incompatibility is what
    /// surfaces "passed a UserId where an OrderId was expected" during
    /// validation.
    async fn apply_branded_types(
        &self,
        client: &Client,
        bindings: &[BrandedColumn],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), PostgresError> {
        let mut created: BTreeSet<String> = BTreeSet::new();
        for binding in bindings {
            let Some((base_type, _, _)) =
                self.column_facts(client, &binding.table, &binding.column).await?
            else {
                diagnostics.push(Diagnostic {
                    file_name: "<config>".to_owned(),
                    file_contents: String::new(),
                    span: Span::File,
                    messages: vec![format!(
                        "branded column type {} refers to unknown column {}.{}",
                        binding.brand, binding.table, binding.column
                    )],
                    epilogue: None,
                    quick_fix: None,
                });
                continue;
            };
            let brand_type = sql_brand_name(&binding.brand);
            if created.insert(brand_type.clone()) && !self.type_exists(client, &brand_type).await? {
                client
                    .batch_execute(&format!(
                        "CREATE TYPE {}.{} AS RANGE (subtype = {})",
                        quote_ident(&self.schema),
                        quote_ident(&brand_type),
                        base_type
                    ))
                    .await?;
            }

            let mut targets = vec![(binding.table.clone(), binding.column.clone())];
            targets.extend(self.foreign_key_columns(client, &binding.table, &binding.column).await?);
            for (table, column) in targets {
                self.rewrite_column(client, &table, &column, &brand_type).await?;
            }
        }
        Ok(())
    }

    /// `(formatted base type, has_default, attnum)` for a column, if it
    /// exists.
    async fn column_facts(
        &self,
        client: &Client,
        table: &str,
        column: &str,
    ) -> Result<Option<(String, bool, i16)>, PostgresError> {
        let row = client
            .query_opt(
                "SELECT pg_catalog.format_type(a.atttypid, a.atttypmod) AS base_type,
                        a.atthasdef OR a.attidentity <> '' AS has_default,
                        a.attnum
                 FROM pg_catalog.pg_attribute a
                 JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3
                   AND a.attnum > 0 AND NOT a.attisdropped",
                &[&self.schema, &table, &column],
            )
            .await?;
        Ok(row.map(|row| {
            (
                row.get("base_type"),
                row.get("has_default"),
                row.get("attnum"),
            )
        }))
    }

    async fn type_exists(&self, client: &Client, name: &str) -> Result<bool, PostgresError> {
        let row = client
            .query_one(
                "SELECT EXISTS(
                     SELECT 1 FROM pg_catalog.pg_type t
                     JOIN pg_catalog.pg_namespace n ON t.typnamespace = n.oid
                     WHERE n.nspname = $1 AND t.typname = $2
                 ) AS exists",
                &[&self.schema, &name],
            )
            .await?;
        Ok(row.get("exists"))
    }

    /// Columns in other tables linked to `table.column` by a foreign key;
    /// they must carry the same brand or every join against them breaks.
    async fn foreign_key_columns(
        &self,
        client: &Client,
        table: &str,
        column: &str,
    ) -> Result<Vec<(String, String)>, PostgresError> {
        let rows = client
            .query(
                "SELECT rc.relname AS ftable, fa.attname AS fcolumn
                 FROM pg_catalog.pg_constraint con
                 JOIN pg_catalog.pg_class tc ON tc.oid = con.confrelid
                 JOIN pg_catalog.pg_namespace n ON tc.relnamespace = n.oid
                 JOIN pg_catalog.pg_attribute ra
                   ON ra.attrelid = con.confrelid AND ra.attname = $2
                 CROSS JOIN LATERAL generate_subscripts(con.confkey, 1) AS i
                 JOIN pg_catalog.pg_class rc ON rc.oid = con.conrelid
                 JOIN pg_catalog.pg_attribute fa
                   ON fa.attrelid = con.conrelid AND fa.attnum = con.conkey[i]
                 WHERE con.contype = 'f'
                   AND n.nspname = $1
                   AND tc.relname = $3
                   AND con.confkey[i] = ra.attnum",
                &[&self.schema, &column, &table],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("ftable"), row.get("fcolumn")))
            .collect())
    }

    /// Rewrites one column to the branded range type, dropping dependent
    /// constraints and indexes first and preserving has-a-default.
    async fn rewrite_column(
        &self,
        client: &Client,
        table: &str,
        column: &str,
        brand_type: &str,
    ) -> Result<(), PostgresError> {
        let Some((_, has_default, attnum)) = self.column_facts(client, table, column).await? else {
            return Ok(());
        };
        let schema = quote_ident(&self.schema);
        let qualified_table = format!("{}.{}", schema, quote_ident(table));

        let constraints = client
            .query(
                "SELECT con.conname
                 FROM pg_catalog.pg_constraint con
                 JOIN pg_catalog.pg_class c ON con.conrelid = c.oid
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 WHERE n.nspname = $1 AND c.relname = $2 AND $3 = ANY(con.conkey)",
                &[&self.schema, &table, &attnum],
            )
            .await?;
        for row in constraints {
            let name: String = row.get("conname");
            client
                .batch_execute(&format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {} CASCADE",
                    qualified_table,
                    quote_ident(&name)
                ))
                .await?;
        }
        let indexes = client
            .query(
                "SELECT ic.relname
                 FROM pg_catalog.pg_index x
                 JOIN pg_catalog.pg_class ic ON ic.oid = x.indexrelid
                 JOIN pg_catalog.pg_class tc ON tc.oid = x.indrelid
                 JOIN pg_catalog.pg_namespace n ON tc.relnamespace = n.oid
                 WHERE n.nspname = $1 AND tc.relname = $2
                   AND $3 = ANY(x.indkey::int2[])",
                &[&self.schema, &table, &attnum],
            )
            .await?;
        for row in indexes {
            let name: String = row.get("relname");
            client
                .batch_execute(&format!(
                    "DROP INDEX IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&name)
                ))
                .await?;
        }

        let qualified_type = format!("{}.{}", schema, quote_ident(brand_type));
        if has_default {
            client
                .batch_execute(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    qualified_table,
                    quote_ident(column)
                ))
                .await?;
        }
        client
            .batch_execute(&format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING NULL::{}",
                qualified_table,
                quote_ident(column),
                qualified_type,
                qualified_type
            ))
            .await?;
        if has_default {
            // The sandbox never stores rows; only the presence of a default
            // matters, for the insert completeness check.
            client
                .batch_execute(&format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT NULL",
                    qualified_table,
                    quote_ident(column)
                ))
                .await?;
        }
        Ok(())
    }

    /// Reconciles installed library views against the manifest's resolution.
    async fn reconcile_views(
        &self,
        client: &mut Client,
        state: &mut SandboxState,
        resolution: &Resolution,
        strict_temporal: bool,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), PostgresError> {
        let schema = quote_ident(&self.schema);
        let target: BTreeSet<&str> = resolution
            .views
            .iter()
            .map(|v| v.generated_name.as_str())
            .collect();
        let stale: Vec<String> = state
            .installed_views
            .keys()
            .filter(|name| !target.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            client
                .batch_execute(&format!(
                    "DROP VIEW IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&name)
                ))
                .await?;
            state.installed_views.remove(&name);
        }

        let mut pending: Vec<&ResolvedView> = resolution
            .views
            .iter()
            .filter(|v| !state.installed_views.contains_key(&v.generated_name))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        // An unqualified wildcard projection would freeze whatever column
        // set the schema happens to have today; reject it outright.
        pending.retain(|view| match unqualified_wildcard_offset(&view.sql) {
            Some(offset) => {
                diagnostics.push(view_wildcard_diagnostic(view, offset));
                false
            }
            None => true,
        });

        // Probe every creation inside a transaction that is always rolled
        // back; the rollback undoes the catalog narrowing below, not the
        // views, which are redone outside afterwards.
        let mut succeeded: BTreeSet<String> = BTreeSet::new();
        let mut tx = client.transaction().await?;
        if strict_temporal {
            let patch = temporal::patch_for_version(self.postgres_version);
            temporal::apply(&tx, &patch).await?;
        }
        for view in &pending {
            let (create, _) = self.create_view_sql(view);
            let savepoint = tx.savepoint("pgvet_view").await?;
            match savepoint.batch_execute(&create).await {
                Ok(()) => {
                    // Keep the view visible to its dependents within the
                    // probe transaction.
                    savepoint.commit().await?;
                    succeeded.insert(view.generated_name.clone());
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    let (_, prefix_len) = self.create_view_sql(view);
                    match DbErrorInfo::from_error(&err) {
                        Some(info) => {
                            diagnostics.push(view_create_diagnostic(view, &info, prefix_len));
                        }
                        None => return Err(err.into()),
                    }
                }
            }
        }
        tx.rollback().await?;

        for view in &pending {
            if !succeeded.contains(&view.generated_name) {
                continue;
            }
            let (create, prefix_len) = self.create_view_sql(view);
            match client.batch_execute(&create).await {
                Ok(()) => {
                    state
                        .installed_views
                        .insert(view.generated_name.clone(), view.id.clone());
                }
                Err(err) => match DbErrorInfo::from_error(&err) {
                    Some(info) => {
                        diagnostics.push(view_create_diagnostic(view, &info, prefix_len));
                    }
                    None => return Err(err.into()),
                },
            }
        }
        Ok(())
    }

    /// `(create statement, length of the preamble before the view body)`.
    fn create_view_sql(&self, view: &ResolvedView) -> (String, u32) {
        let preamble = format!(
            "CREATE OR REPLACE VIEW {}.{} AS ",
            quote_ident(&self.schema),
            quote_ident(&view.generated_name)
        );
        let prefix_len = u32::try_from(preamble.len()).expect("preamble fits in u32");
        (format!("{}{}", preamble, view.sql), prefix_len)
    }

    /// Derives the nullability index for the whole sandbox schema, views
    /// included.
    async fn build_index(&self, client: &Client) -> Result<RelationIndex, PostgresError> {
        let rows = client
            .query(
                "SELECT c.oid, c.relname, c.relkind = 'v' AS is_view,
                        a.attname, a.attnum, a.attnotnull,
                        a.atthasdef OR a.attidentity <> '' AS has_default,
                        t.typname
                 FROM pg_catalog.pg_class c
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
                 JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
                 WHERE n.nspname = $1 AND c.relkind IN ('r', 'v')
                   AND a.attnum > 0 AND NOT a.attisdropped
                 ORDER BY c.relname, a.attnum",
                &[&self.schema],
            )
            .await?;
        let mut relations: BTreeMap<u32, PgRelationDesc> = BTreeMap::new();
        for row in rows {
            let oid: u32 = row.get("oid");
            let name: String = row.get("relname");
            let is_view: bool = row.get("is_view");
            let desc = relations.entry(oid).or_insert_with(|| PgRelationDesc {
                name,
                is_view,
                columns: Vec::new(),
            });
            let col_num: i16 = row.get("attnum");
            desc.columns.push(PgColumnDesc {
                name: row.get("attname"),
                col_num: col_num.try_into().expect("positive attnum"),
                type_name: row.get("typname"),
                not_null: row.get("attnotnull"),
                has_default: row.get("has_default"),
            });
        }
        let mut index = RelationIndex::new(relations.into_iter().collect());

        let rows = client
            .query(
                "SELECT c.relname, pg_catalog.pg_get_viewdef(c.oid, true) AS def
                 FROM pg_catalog.pg_class c
                 JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
                 WHERE n.nspname = $1 AND c.relkind = 'v'",
                &[&self.schema],
            )
            .await?;
        let defs: BTreeMap<String, String> = rows
            .into_iter()
            .map(|row| (row.get("relname"), row.get("def")))
            .collect();
        provenance::patch_view_nullability(&mut index, &defs);
        Ok(index)
    }
}

/// The offset of the first unqualified `*` projection in a view body, if
/// any. Qualified wildcards (`t.*`) and `count(*)` pass.
fn unqualified_wildcard_offset(sql: &str) -> Option<u32> {
    let bytes = sql.as_bytes();
    let mut in_string = false;
    let mut in_ident = false;
    let mut prev: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if b == b'\'' {
                in_string = false;
            }
            continue;
        }
        if in_ident {
            if b == b'"' {
                in_ident = false;
            }
            continue;
        }
        match b {
            b'\'' => in_string = true,
            b'"' => in_ident = true,
            b'*' => {
                let flagged = match prev {
                    None => true,
                    Some(p) => match bytes[p] {
                        b',' => true,
                        b'.' | b'(' => false,
                        c if c.is_ascii_alphanumeric() || c == b'_' => {
                            let word_start = sql[..=p]
                                .rfind(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
                                .map(|pos| pos + 1)
                                .unwrap_or(0);
                            let word = &sql[word_start..=p];
                            word.eq_ignore_ascii_case("select")
                                || word.eq_ignore_ascii_case("distinct")
                        }
                        _ => false,
                    },
                };
                if flagged {
                    return Some(u32::try_from(i).expect("sql fits in u32"));
                }
            }
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            prev = Some(i);
        }
    }
    None
}
