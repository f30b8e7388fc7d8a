//! The validation session.
//!
//! A session is the explicit engine object that owns the sandbox connection,
//! the sandbox state, and the validation cache for as long as a caller keeps
//! validating manifests against the same sandbox. There is no module-level
//! state anywhere in the engine; everything lives here and is torn down when
//! the session drops.

use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tracing::debug;

use pgvet_postgres_util::types::TypeMapper;
use pgvet_postgres_util::{Config as PgConfig, PostgresError};

use crate::cache::{ValidationCache, statement_signature};
use crate::config::Config;
use crate::diagnostics::{Diagnostic, resolve_error_diagnostic, statement_diagnostics};
use crate::manifest::Manifest;
use crate::sandbox::{
    EnsureOutcome, MigrationLoadError, SandboxManager, SandboxState, load_migrations,
};
use crate::temporal;
use crate::validate::Validator;
use crate::views;

/// A fatal, run-aborting error.
///
/// Everything per-statement is a diagnostic, not an error; this enum covers
/// only the cases where the run itself cannot proceed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The sandbox connection failed or was lost.
    #[error(transparent)]
    Postgres(#[from] PostgresError),
    /// The migration directory could not be loaded.
    #[error(transparent)]
    Migrations(#[from] MigrationLoadError),
}

impl From<tokio_postgres::Error> for EngineError {
    fn from(err: tokio_postgres::Error) -> EngineError {
        EngineError::Postgres(PostgresError::Postgres(err))
    }
}

/// A long-lived validation session against one sandbox.
pub struct Session {
    client: Client,
    _connection: JoinHandle<()>,
    sandbox: SandboxManager,
    state: SandboxState,
    cache: ValidationCache,
    migrations_dir: PathBuf,
    postgres_version: u32,
    custom_mappings: Vec<(String, String)>,
    last_probes: usize,
}

impl Session {
    /// Connects to the sandbox and prepares an empty session.
    ///
    /// Long-running setup happens exactly once here; validation runs
    /// afterwards never re-enter it.
    pub async fn connect(pg: &PgConfig, config: &Config) -> Result<Session, EngineError> {
        let (client, connection) = pg.connect("pgvet_sandbox").await?;
        Ok(Session {
            client,
            _connection: connection,
            sandbox: SandboxManager::new("public", config.postgres_version),
            state: SandboxState::default(),
            cache: ValidationCache::default(),
            migrations_dir: config.migrations_dir.clone(),
            postgres_version: config.postgres_version,
            custom_mappings: config.custom_mappings().collect(),
            last_probes: 0,
        })
    }

    /// Number of statements the last run actually probed against the
    /// database (as opposed to serving from the cache).
    pub fn last_probe_count(&self) -> usize {
        self.last_probes
    }

    /// Number of outcomes currently cached.
    pub fn cached_outcomes(&self) -> usize {
        self.cache.len()
    }

    /// Runs one validation pass over a manifest.
    ///
    /// Statements are probed serially, in manifest order, over the single
    /// sandbox connection; one statement's error never prevents evaluation
    /// of the next. An empty result means the whole run passed.
    pub async fn validate_manifest(
        &mut self,
        manifest: &Manifest,
    ) -> Result<Vec<Diagnostic>, EngineError> {
        let mut diagnostics = Vec::new();

        let resolution = views::resolve(&manifest.view_library);
        diagnostics.extend(resolution.errors.iter().map(resolve_error_diagnostic));

        let migrations = load_migrations(&self.migrations_dir)?;
        let outcome = self
            .sandbox
            .ensure_schema(
                &mut self.client,
                &mut self.state,
                manifest,
                &resolution,
                &migrations,
            )
            .await?;
        match outcome {
            EnsureOutcome::MigrationFailed(diag) => {
                // Every cached outcome describes schema that no longer
                // exists.
                self.cache.clear();
                self.last_probes = 0;
                return Ok(vec![diag]);
            }
            EnsureOutcome::Ready {
                reset,
                diagnostics: mut view_diags,
            } => {
                if reset {
                    self.cache.clear();
                }
                diagnostics.append(&mut view_diags);
            }
        }

        let mapper = TypeMapper::new(
            self.custom_mappings.iter().cloned(),
            manifest.branded_column_types.iter().map(|b| b.brand.clone()),
        );
        let mut fresh = ValidationCache::default();
        let mut probes = 0usize;
        {
            let mut tx = self.client.transaction().await?;
            if manifest.config.strict_temporal_typing {
                let patch = temporal::patch_for_version(self.postgres_version);
                temporal::apply(&tx, &patch).await?;
            }
            let validator = Validator {
                index: &self.state.index,
                mapper: &mapper,
            };
            for stmt in &manifest.statements {
                let signature = statement_signature(stmt);
                let outcome = match self.cache.get(&signature) {
                    Some(outcome) => outcome.clone(),
                    None => {
                        probes += 1;
                        validator.validate(&mut tx, stmt).await?
                    }
                };
                diagnostics.extend(statement_diagnostics(
                    &outcome,
                    stmt,
                    &manifest.config.column_types_format,
                ));
                fresh.set(signature, outcome);
            }
            tx.rollback().await?;
        }
        debug!(
            statements = manifest.statements.len(),
            probes, "validation run complete"
        );
        // The fresh cache replaces the old one only now that the whole run
        // has completed; an interrupted run leaves the previous cache
        // untouched.
        self.cache = fresh;
        self.last_probes = probes;
        Ok(diagnostics)
    }
}

/// Coalesces validation runs requested while another run is in flight.
///
/// The sandbox admits exactly one run at a time. A long-lived caller (a
/// watch loop, say) offers each newly built manifest here; because manifests
/// are submitted wholesale and are immutable, folding a queued run into the
/// next one simply keeps the latest manifest. Nothing is ever interleaved
/// with an executing run.
#[derive(Debug, Default)]
pub struct RunCoalescer {
    pending: Option<Manifest>,
}

impl RunCoalescer {
    /// Queues a manifest for the next run, replacing any previously queued
    /// one.
    pub fn offer(&mut self, manifest: Manifest) {
        self.pending = Some(manifest);
    }

    /// Takes the manifest for the next run, if one is queued.
    pub fn take(&mut self) -> Option<Manifest> {
        self.pending.take()
    }

    /// Whether a run is queued.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
