//! PostgreSQL utility library for the pgvet sandbox.
//!
//! This crate owns the plumbing that the validation engine builds on: the
//! sandbox connection configuration (including the disposable-instance
//! guard), structured extraction of PostgreSQL's wire-level error fields,
//! and the mapping from SQL type names to host-side type names.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tokio_postgres::config::Host;
use tokio_postgres::error::ErrorPosition;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

pub mod desc;
pub mod types;

/// An error while connecting to or speaking with the sandbox database.
#[derive(Debug, Error)]
pub enum PostgresError {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidUrl(tokio_postgres::Error),
    /// The target server is not recognizably a local, disposable instance.
    ///
    /// The sandbox rewrites catalogs and drops whole schemas; pointing it at
    /// anything reachable over a network is refused outright.
    #[error("refusing to use {host:?} as a sandbox: only loopback or unix-socket instances are accepted")]
    NotDisposable { host: String },
    /// The driver reported an error.
    ///
    /// Loss of the sandbox connection surfaces here too, as the driver's
    /// closed-connection error.
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

/// Configuration for the sandbox connection.
///
/// Wraps [`tokio_postgres::Config`] so that the disposable-instance guard
/// runs before any connection is attempted.
#[derive(Clone)]
pub struct Config {
    inner: tokio_postgres::Config,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("hosts", &self.inner.get_hosts())
            .field("ports", &self.inner.get_ports())
            .field("dbname", &self.inner.get_dbname())
            .finish()
    }
}

impl Config {
    /// Parses a connection string and verifies that every host it names is
    /// loopback or a unix socket.
    pub fn from_url(url: &str) -> Result<Config, PostgresError> {
        let inner = tokio_postgres::Config::from_str(url).map_err(PostgresError::InvalidUrl)?;
        for host in inner.get_hosts() {
            match host {
                Host::Tcp(name) if is_loopback(name) => (),
                Host::Tcp(name) => {
                    return Err(PostgresError::NotDisposable { host: name.clone() });
                }
                Host::Unix(_) => (),
            }
        }
        Ok(Config { inner })
    }

    /// The database name the connection will use, if one was specified.
    pub fn dbname(&self) -> Option<&str> {
        self.inner.get_dbname()
    }

    /// Connects to the sandbox, spawning the connection future onto the
    /// current runtime.
    pub async fn connect(
        &self,
        task_name: &str,
    ) -> Result<(Client, tokio::task::JoinHandle<()>), PostgresError> {
        debug!(task = task_name, config = ?self, "connecting to sandbox");
        let (client, connection) = self.inner.connect(NoTls).await?;
        let task = task_name.to_owned();
        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(task = %task, "sandbox connection terminated: {}", e);
            }
        });
        Ok((client, handle))
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// The structured fields of a PostgreSQL error response.
///
/// PostgreSQL reports rich, structured errors over the wire; this captures
/// the subset the validation engine surfaces to users. Raw driver errors
/// that do not carry this shape fall through to a generic path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbErrorInfo {
    /// Five-character SQLSTATE code.
    pub code: String,
    /// Primary human-readable message.
    pub message: String,
    /// Optional secondary detail.
    pub detail: Option<String>,
    /// Optional hint on how to fix the problem.
    pub hint: Option<String>,
    /// Zero-based offset into the statement text, when the server reported
    /// one. PostgreSQL reports 1-based character positions; this is already
    /// rebased to zero.
    pub position: Option<u32>,
}

impl DbErrorInfo {
    /// Extracts the structured shape from a driver error, if present.
    pub fn from_error(err: &tokio_postgres::Error) -> Option<DbErrorInfo> {
        let db = err.as_db_error()?;
        let position = match db.position() {
            Some(ErrorPosition::Original(p)) | Some(ErrorPosition::Internal { position: p, .. }) => {
                Some(p.saturating_sub(1))
            }
            None => None,
        };
        Some(DbErrorInfo {
            code: db.code().code().to_owned(),
            message: db.message().to_owned(),
            detail: db.detail().map(|s| s.to_owned()),
            hint: db.hint().map(|s| s.to_owned()),
            position,
        })
    }
}

impl fmt::Display for DbErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\n  Detail: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  Hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Quotes an identifier for inclusion in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for inclusion in generated SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
