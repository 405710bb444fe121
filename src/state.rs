//! Shared application state.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use crate::catalog::Catalog;

/// State shared by every request handler.
///
/// The catalog lives behind a single reference-swap slot: a scan builds a
/// fresh [`Catalog`] and replaces the `Arc` wholesale while serving is
/// paused, so handlers always observe one consistent snapshot for the
/// duration of a request.
pub struct AppState {
    /// Canonicalized packages directory tarballs are served from.
    pub packages_dir: PathBuf,
    /// Current catalog snapshot.
    catalog: RwLock<Arc<Catalog>>,
}

impl AppState {
    pub fn new(packages_dir: PathBuf, catalog: Catalog) -> Self {
        AppState {
            packages_dir,
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Grab the current snapshot; held for at most one request.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a freshly scanned catalog.
    pub fn replace_catalog(&self, catalog: Catalog) {
        *self
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
    }
}
