//! # upm-registry
//!
//! A minimal read-only package registry speaking the npm registry HTTP
//! protocol, built for Unity Package Manager clients. Tarballs found in a
//! local directory are streaming-parsed (gzip + tar) to extract their
//! embedded `package/package.json` and `package/README.md`, digested, and
//! indexed into an in-memory catalog the HTTP layer renders as npm-shaped
//! JSON.
//!
//! ## Key modules
//!
//! - [`semver`]: SemVer 2.0.0 parsing and precedence
//! - [`tar`]: streaming tar reader (ustar, pax, GNU long names)
//! - [`ingest`]: tarball ingestion and directory scanning
//! - [`catalog`]: the in-memory registry snapshot
//! - [`handlers`] / [`server`]: the npm HTTP surface
//! - [`shell`]: the interactive control shell

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod json;
pub mod semver;
pub mod server;
pub mod shell;
pub mod state;
pub mod tar;

pub use catalog::{Catalog, CatalogBuilder, PackageEntry, VersionDoc};
pub use config::{Config, Verbosity};
pub use error::{AppError, AppResult};
pub use semver::SemVer;
pub use server::{router, ServerTask};
pub use state::AppState;
