//! Tarball ingestion and directory scanning.
//!
//! Each candidate file is read twice: once to digest the compressed bytes,
//! then replayed through gzip into the tar reader to pull out
//! `package/package.json` and `package/README.md`. No other entry is
//! extracted and the archive is never buffered in memory.
//!
//! The pax/long-name chaining rules live here: `L` names and `x` records
//! apply to the next real entry and are cleared afterwards, `g` records
//! stick until overridden.

use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, CatalogBuilder, VersionDoc};
use crate::tar::{
    self, TarError, TarReader, TYPE_GNU_LONG_NAME, TYPE_PAX_GLOBAL, TYPE_PAX_NEXT,
};

pub const MANIFEST_PATH: &str = "package/package.json";
pub const README_PATH: &str = "package/README.md";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read tarball: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tar(#[from] TarError),
    #[error("invalid package.json: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("package.json is not a JSON object")]
    ManifestNotObject,
    #[error("archive contains no package/package.json")]
    MissingManifest,
    #[error("package.json has no {0}")]
    MissingField(&'static str),
}

/// One successfully ingested tarball.
#[derive(Debug)]
pub struct IngestedPackage {
    pub name: String,
    pub version: String,
    pub doc: VersionDoc,
    /// Base file name of the tarball on disk.
    pub file_name: String,
    /// Last-modified time of the tarball file.
    pub modified: DateTime<Utc>,
}

/// Counters reported after a scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub files: usize,
    pub versions: usize,
    pub errors: usize,
}

/// Ingest a single tarball file into a version document.
pub fn ingest_tarball(path: &Path) -> Result<IngestedPackage, IngestError> {
    let file = fs::File::open(path)?;
    let modified: DateTime<Utc> = file.metadata()?.modified()?.into();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // First pass: digest the compressed bytes as they sit on disk.
    let mut reader = BufReader::new(file);
    let mut hasher = Sha1::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    let shasum = format!("{:x}", hasher.finalize());

    // Second pass: replay through gzip into the tar reader.
    reader.seek(SeekFrom::Start(0))?;
    let (manifest, readme) = extract_entries(GzDecoder::new(reader))?;

    let mut doc = manifest.ok_or(IngestError::MissingManifest)?;
    let name = string_field(&doc, "name").ok_or(IngestError::MissingField("name"))?;
    let version = string_field(&doc, "version").ok_or(IngestError::MissingField("version"))?;

    doc.insert("category".into(), Value::String(String::new()));
    doc.insert("readmeFilename".into(), Value::String("README.md".into()));
    doc.insert("_id".into(), Value::String(format!("{name}@{version}")));
    let mut dist = VersionDoc::new();
    dist.insert("shasum".into(), Value::String(shasum));
    dist.insert("tarball".into(), Value::String(file_name.clone()));
    doc.insert("dist".into(), Value::Object(dist));
    if let Some(readme) = readme {
        doc.insert("readme".into(), Value::String(readme));
    }

    Ok(IngestedPackage {
        name,
        version,
        doc,
        file_name,
        modified,
    })
}

/// Walk the archive entries and pull out the manifest and readme.
fn extract_entries<R: Read>(
    source: R,
) -> Result<(Option<VersionDoc>, Option<String>), IngestError> {
    let mut archive = TarReader::new(source);
    let mut overrides = PendingOverrides::default();
    let mut manifest = None;
    let mut readme = None;
    let mut skipped = 0usize;

    while let Some(mut entry) = archive.next_entry()? {
        match entry.header.typeflag {
            TYPE_GNU_LONG_NAME => {
                let payload = entry.read_payload()?;
                overrides.long_name = Some(trimmed_utf8(&payload));
            }
            TYPE_PAX_NEXT => match tar::parse_pax_records(&entry.read_payload()?) {
                Ok(records) => overrides.next = records,
                // A bad pax block fails only this entry; the reader
                // realigns on the next 512-byte boundary.
                Err(err) => warn!(error = %err, "ignoring malformed pax header"),
            },
            TYPE_PAX_GLOBAL => match tar::parse_pax_records(&entry.read_payload()?) {
                Ok(records) => {
                    for (key, value) in records {
                        overrides
                            .global
                            .retain(|(existing, _)| *existing != key);
                        overrides.global.push((key, value));
                    }
                }
                Err(err) => warn!(error = %err, "ignoring malformed global pax header"),
            },
            _ => {
                let name = overrides.apply(&mut entry);
                if entry.header.is_file() {
                    if name.eq_ignore_ascii_case(MANIFEST_PATH) {
                        let payload = entry.read_payload()?;
                        let value: Value = serde_json::from_slice(&payload)?;
                        match value {
                            Value::Object(map) => manifest = Some(map),
                            _ => return Err(IngestError::ManifestNotObject),
                        }
                    } else if name.eq_ignore_ascii_case(README_PATH) {
                        readme = Some(trimmed_utf8(&entry.read_payload()?));
                    } else {
                        skipped += 1;
                    }
                } else if entry.header.is_dir() {
                    skipped += 1;
                } else {
                    debug!(name = %name, typeflag = entry.header.typeflag,
                        "skipping unsupported entry type");
                    skipped += 1;
                }
            }
        }
    }
    debug!(skipped, "archive walk complete");
    Ok((manifest, readme))
}

/// Long-name and pax state chained into the next real entry.
#[derive(Default)]
struct PendingOverrides {
    long_name: Option<String>,
    next: Vec<(String, String)>,
    global: Vec<(String, String)>,
}

impl PendingOverrides {
    /// Resolve the effective name for the entry and rewrite overridden
    /// header fields. Clears the one-shot state (`L` name, `x` records).
    fn apply<R: Read>(&mut self, entry: &mut tar::TarEntry<'_, R>) -> String {
        let mut name = entry.header.name.clone();
        if let Some(long) = self.long_name.take() {
            name = long;
        }
        // Global records first so per-entry records win on key collision.
        let next = std::mem::take(&mut self.next);
        for (key, value) in self.global.iter().chain(next.iter()) {
            match key.as_str() {
                "path" => name = value.clone(),
                "linkpath" => entry.header.linkname = value.clone(),
                "uname" => entry.header.uname = value.clone(),
                "gname" => entry.header.gname = value.clone(),
                "uid" => {
                    if let Ok(uid) = value.parse() {
                        entry.header.uid = uid;
                    }
                }
                "gid" => {
                    if let Ok(gid) = value.parse() {
                        entry.header.gid = gid;
                    }
                }
                "mtime" => {
                    // Decimal seconds, possibly fractional.
                    if let Ok(seconds) = value.parse::<f64>() {
                        entry.header.mtime = seconds as i64;
                    }
                }
                "size" => {
                    if let Ok(size) = value.parse() {
                        entry.override_size(size);
                    }
                }
                // hdrcharset is accepted (values already decoded as
                // UTF-8); anything else is irrelevant here.
                _ => {}
            }
        }
        name
    }
}

fn string_field(doc: &VersionDoc, key: &str) -> Option<String> {
    doc.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn trimmed_utf8(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Does the file name carry one of the configured extensions?
///
/// Extensions are matched case-insensitively against the end of the name,
/// so multi-part suffixes like `.tar.gz` work.
pub fn has_candidate_extension(file_name: &str, extensions: &[String]) -> bool {
    let lower = file_name.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
}

/// Rebuild the catalog from every candidate file in the packages directory.
///
/// Bad archives are logged and skipped; the scan never fails outright.
pub fn scan(dir: &Path, extensions: &[String]) -> (Catalog, ScanStats) {
    let mut stats = ScanStats::default();
    let mut builder = CatalogBuilder::new();

    let mut candidates = Vec::new();
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_file && has_candidate_extension(&name, extensions) {
                    candidates.push(path);
                }
            }
        }
        Err(err) => {
            error!(dir = %dir.display(), error = %err, "failed to read packages directory");
            stats.errors += 1;
            return (builder.finish(), stats);
        }
    }
    // Deterministic ingestion order keeps version maps stable across scans.
    candidates.sort();

    for path in candidates {
        stats.files += 1;
        match ingest_tarball(&path) {
            Ok(pkg) => {
                let timestamp = pkg.modified.format("%Y-%m-%dT%H:%M:%SZ").to_string();
                match builder.add(&pkg.name, &pkg.version, pkg.doc, timestamp) {
                    Ok(()) => {
                        debug!(package = %pkg.name, version = %pkg.version,
                            file = %pkg.file_name, "ingested tarball");
                        stats.versions += 1;
                    }
                    Err(err) => {
                        error!(file = %pkg.file_name, error = %err, "rejecting tarball");
                        stats.errors += 1;
                    }
                }
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "failed to ingest tarball");
                stats.errors += 1;
            }
        }
    }

    let catalog = builder.finish();
    info!(
        files = stats.files,
        packages = catalog.len(),
        versions = stats.versions,
        errors = stats.errors,
        "scan complete"
    );
    (catalog, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const BLOCK: usize = 512;

    fn header_block(name: &str, size: u64, typeflag: u8) -> [u8; BLOCK] {
        let mut block = [0u8; BLOCK];
        block[0..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(b"0000644");
        block[108..115].copy_from_slice(b"0000000");
        block[116..123].copy_from_slice(b"0000000");
        block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
        block[136..147].copy_from_slice(b"14210367074");
        block[156] = typeflag;
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block[148..156].copy_from_slice(b"        ");
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        block[148..154].copy_from_slice(format!("{sum:06o}").as_bytes());
        block[154] = 0;
        block[155] = b' ';
        block
    }

    fn tar_entry(name: &str, data: &[u8], typeflag: u8) -> Vec<u8> {
        let mut out = header_block(name, data.len() as u64, typeflag).to_vec();
        out.extend_from_slice(data);
        out.resize(out.len().div_ceil(BLOCK) * BLOCK, 0);
        out
    }

    fn gzip(tar: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(tar).unwrap();
        encoder.write_all(&[0u8; BLOCK * 2]).unwrap();
        encoder.finish().unwrap()
    }

    fn write_tgz(dir: &Path, file_name: &str, entries: &[(&str, &[u8], u8)]) -> Vec<u8> {
        let tar: Vec<u8> = entries
            .iter()
            .flat_map(|(name, data, flag)| tar_entry(name, data, *flag))
            .collect();
        let bytes = gzip(&tar);
        fs::write(dir.join(file_name), &bytes).unwrap();
        bytes
    }

    fn sha1_hex(data: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    #[test]
    fn ingests_manifest_and_readme() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = br#"{"name":"com.x.y","version":"1.2.3","description":"d"}"#;
        let bytes = write_tgz(
            dir.path(),
            "com.x.y-1.2.3.tgz",
            &[
                ("package/package.json", manifest, b'0'),
                ("package/README.md", b"hello readme", b'0'),
                ("package/Runtime/Code.cs", b"class C {}", b'0'),
            ],
        );

        let pkg = ingest_tarball(&dir.path().join("com.x.y-1.2.3.tgz")).unwrap();
        assert_eq!(pkg.name, "com.x.y");
        assert_eq!(pkg.version, "1.2.3");
        assert_eq!(pkg.file_name, "com.x.y-1.2.3.tgz");
        assert_eq!(pkg.doc["description"], "d");
        assert_eq!(pkg.doc["category"], "");
        assert_eq!(pkg.doc["readmeFilename"], "README.md");
        assert_eq!(pkg.doc["_id"], "com.x.y@1.2.3");
        assert_eq!(pkg.doc["readme"], "hello readme");
        assert_eq!(pkg.doc["dist"]["shasum"], sha1_hex(&bytes));
        assert_eq!(pkg.doc["dist"]["tarball"], "com.x.y-1.2.3.tgz");
    }

    #[test]
    fn manifest_name_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "p.tgz",
            &[(
                "Package/PACKAGE.JSON",
                br#"{"name":"p","version":"0.1.0"}"#,
                b'0',
            )],
        );
        let pkg = ingest_tarball(&dir.path().join("p.tgz")).unwrap();
        assert_eq!(pkg.name, "p");
    }

    #[test]
    fn rejects_archive_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(dir.path(), "x.tgz", &[("package/README.md", b"r", b'0')]);
        let err = ingest_tarball(&dir.path().join("x.tgz")).unwrap_err();
        assert!(matches!(err, IngestError::MissingManifest));
    }

    #[test]
    fn rejects_manifest_missing_name_or_version() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "noname.tgz",
            &[("package/package.json", br#"{"version":"1.0.0"}"#, b'0')],
        );
        write_tgz(
            dir.path(),
            "nover.tgz",
            &[("package/package.json", br#"{"name":"x","version":""}"#, b'0')],
        );
        assert!(matches!(
            ingest_tarball(&dir.path().join("noname.tgz")).unwrap_err(),
            IngestError::MissingField("name")
        ));
        assert!(matches!(
            ingest_tarball(&dir.path().join("nover.tgz")).unwrap_err(),
            IngestError::MissingField("version")
        ));
    }

    #[test]
    fn pax_path_record_renames_next_entry() {
        let dir = tempfile::tempdir().unwrap();
        let pax = b"29 path=package/package.json\n";
        write_tgz(
            dir.path(),
            "pax.tgz",
            &[
                ("PaxHeader/manifest", pax, b'x'),
                ("some/other/name", br#"{"name":"pax-pkg","version":"2.0.0"}"#, b'0'),
            ],
        );
        let pkg = ingest_tarball(&dir.path().join("pax.tgz")).unwrap();
        assert_eq!(pkg.name, "pax-pkg");
        assert_eq!(pkg.version, "2.0.0");
    }

    #[test]
    fn gnu_long_name_renames_next_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "long.tgz",
            &[
                ("././@LongLink", b"package/package.json\0", b'L'),
                ("package/packag", br#"{"name":"ln","version":"3.0.0"}"#, b'0'),
                ("package/README.md", b"readme body", b'0'),
            ],
        );
        let pkg = ingest_tarball(&dir.path().join("long.tgz")).unwrap();
        assert_eq!(pkg.name, "ln");
        // The long name applied only to the first entry; the readme kept
        // its own header name.
        assert_eq!(pkg.doc["readme"], "readme body");
    }

    #[test]
    fn malformed_pax_block_does_not_kill_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "badpax.tgz",
            &[
                ("PaxHeader/bad", b"totally not a pax record", b'x'),
                ("package/package.json", br#"{"name":"ok","version":"1.0.0"}"#, b'0'),
            ],
        );
        let pkg = ingest_tarball(&dir.path().join("badpax.tgz")).unwrap();
        assert_eq!(pkg.name, "ok");
    }

    #[test]
    fn scan_builds_catalog_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "a-1.0.0.tgz",
            &[("package/package.json", br#"{"name":"a","version":"1.0.0"}"#, b'0')],
        );
        write_tgz(
            dir.path(),
            "a-1.1.0.tgz",
            &[("package/package.json", br#"{"name":"a","version":"1.1.0"}"#, b'0')],
        );
        fs::write(dir.path().join("broken.tgz"), b"not gzip at all").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let extensions = vec![".tgz".to_string(), ".tar.gz".to_string()];
        let (catalog, stats) = scan(dir.path(), &extensions);

        assert_eq!(stats.files, 3);
        assert_eq!(stats.versions, 2);
        assert_eq!(stats.errors, 1);
        let entry = catalog.get("a").unwrap();
        assert_eq!(entry.latest, "1.1.0");
        assert_eq!(entry.versions.len(), 2);
    }

    #[test]
    fn scan_rejects_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        write_tgz(
            dir.path(),
            "dup-1.tgz",
            &[("package/package.json", br#"{"name":"dup","version":"1.0.0"}"#, b'0')],
        );
        write_tgz(
            dir.path(),
            "dup-2.tgz",
            &[("package/package.json", br#"{"name":"dup","version":"1.0.0"}"#, b'0')],
        );
        let (catalog, stats) = scan(dir.path(), &[".tgz".to_string()]);
        assert_eq!(stats.versions, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(catalog.get("dup").unwrap().versions.len(), 1);
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let exts = vec![".tgz".to_string(), ".tar.gz".to_string()];
        assert!(has_candidate_extension("pkg.TGZ", &exts));
        assert!(has_candidate_extension("pkg.tar.GZ", &exts));
        assert!(!has_candidate_extension("pkg.zip", &exts));
    }
}
