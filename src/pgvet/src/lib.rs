//! pgvet statically verifies that SQL statements embedded in a host program
//! match the column types the host program declares for them.
//!
//! Instead of re-implementing a SQL type checker, pgvet provisions a
//! disposable, schema-loaded PostgreSQL sandbox and asks the real server to
//! prepare and describe every statement inside transactions that are always
//! rolled back. The engine resolves a library of named, composable view
//! fragments into concrete views, replays migrations into the sandbox,
//! probes each query and insert, diffs the discovered result shape against
//! the declared one, and caches validated outcomes so repeated runs are
//! cheap.
//!
//! The entry point is [`Session`]: connect once, then feed it a [`Manifest`]
//! per validation run and render the returned [`Diagnostic`]s however the
//! front end likes.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod manifest;
pub mod sandbox;
pub mod session;
pub mod sourcemap;
pub mod temporal;
pub mod validate;
pub mod views;

pub use crate::config::{Config, ConfigError};
pub use crate::diagnostics::{Diagnostic, QuickFix, Span};
pub use crate::manifest::Manifest;
pub use crate::session::{EngineError, RunCoalescer, Session};
