//! In-memory registry catalog.
//!
//! The catalog maps package ids (case-insensitive) to package entries, each
//! holding the insertion-ordered version documents produced by the ingester.
//! A catalog is assembled from scratch by every scan and swapped in
//! wholesale; nothing mutates a published snapshot.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

use crate::semver::SemVer;

/// One version's metadata document: the embedded `package.json` fields in
/// their original order plus the synthesized registry fields.
pub type VersionDoc = Map<String, Value>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("package {name} already has a version {version}")]
    DuplicateVersion { name: String, version: String },
}

/// All published versions of a single package id.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    /// Package id in its first-seen spelling.
    pub name: String,
    /// Version string → version document, in ingestion order.
    pub versions: IndexMap<String, VersionDoc>,
    /// Key in `versions` with the highest SemVer precedence.
    pub latest: String,
    /// Version string → publish timestamp (`yyyy-MM-ddTHH:mm:ssZ`).
    pub time: IndexMap<String, String>,
}

impl PackageEntry {
    /// Case-insensitive version lookup.
    pub fn version(&self, version: &str) -> Option<&VersionDoc> {
        self.versions
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(version))
            .map(|(_, doc)| doc)
    }

    pub fn latest_doc(&self) -> Option<&VersionDoc> {
        self.versions.get(&self.latest)
    }
}

/// Immutable snapshot of every package the server currently exposes.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Lowercased package id → entry, sorted by id.
    packages: IndexMap<String, PackageEntry>,
}

impl Catalog {
    pub fn empty() -> Self {
        Catalog::default()
    }

    /// Case-insensitive package lookup.
    pub fn get(&self, id: &str) -> Option<&PackageEntry> {
        self.packages.get(&id.to_ascii_lowercase())
    }

    /// Entries in sorted id order.
    pub fn packages(&self) -> impl Iterator<Item = &PackageEntry> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Accumulates ingested version documents into a [`Catalog`].
#[derive(Default)]
pub struct CatalogBuilder {
    packages: IndexMap<String, PackageEntry>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        CatalogBuilder::default()
    }

    /// Insert one version document.
    ///
    /// A version string that is already present for the package (compared
    /// case-insensitively) rejects the newcomer.
    pub fn add(
        &mut self,
        name: &str,
        version: &str,
        doc: VersionDoc,
        timestamp: String,
    ) -> Result<(), CatalogError> {
        let entry = self
            .packages
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| PackageEntry {
                name: name.to_string(),
                versions: IndexMap::new(),
                latest: String::new(),
                time: IndexMap::new(),
            });
        if entry.version(version).is_some() {
            return Err(CatalogError::DuplicateVersion {
                name: entry.name.clone(),
                version: version.to_string(),
            });
        }
        entry.versions.insert(version.to_string(), doc);
        entry.time.insert(version.to_string(), timestamp);
        Ok(())
    }

    /// Validate versions, select `latest`, and freeze the catalog.
    ///
    /// Versions that do not parse as SemVer are removed, packages left
    /// without versions are dropped, and the surviving entries are sorted
    /// by package id so iteration order is deterministic.
    pub fn finish(mut self) -> Catalog {
        self.packages.retain(|_, entry| {
            let mut best: Option<(SemVer, String)> = None;
            entry.versions.retain(|version, _| match version.parse::<SemVer>() {
                Ok(parsed) => {
                    if best.as_ref().map_or(true, |(b, _)| parsed > *b) {
                        best = Some((parsed, version.clone()));
                    }
                    true
                }
                Err(err) => {
                    error!(package = %entry.name, version = %version, error = %err,
                        "dropping version with invalid SemVer");
                    false
                }
            });
            entry
                .time
                .retain(|version, _| entry.versions.contains_key(version));
            match best {
                Some((_, latest)) => {
                    entry.latest = latest;
                    true
                }
                None => {
                    error!(package = %entry.name, "dropping package with no valid versions");
                    false
                }
            }
        });
        self.packages.sort_unstable_keys();
        Catalog {
            packages: self.packages,
        }
    }
}
