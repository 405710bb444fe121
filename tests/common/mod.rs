//! Shared fixtures: build real gzip-compressed tar archives on disk.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

pub const BLOCK: usize = 512;

/// Checksummed ustar header for a regular file.
pub fn header_block(name: &str, size: u64) -> [u8; BLOCK] {
    let mut block = [0u8; BLOCK];
    block[0..name.len()].copy_from_slice(name.as_bytes());
    block[100..107].copy_from_slice(b"0000644");
    block[108..115].copy_from_slice(b"0000000");
    block[116..123].copy_from_slice(b"0000000");
    block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
    block[136..147].copy_from_slice(b"14210367074");
    block[156] = b'0';
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[148..156].copy_from_slice(b"        ");
    let sum: u64 = block.iter().map(|&b| b as u64).sum();
    block[148..154].copy_from_slice(format!("{sum:06o}").as_bytes());
    block[154] = 0;
    block[155] = b' ';
    block
}

fn tar_entry(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = header_block(name, data.len() as u64).to_vec();
    out.extend_from_slice(data);
    out.resize(out.len().div_ceil(BLOCK) * BLOCK, 0);
    out
}

/// Gzip a tar stream built from regular-file entries.
pub fn tgz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar: Vec<u8> = entries
        .iter()
        .flat_map(|(name, data)| tar_entry(name, data))
        .collect();
    tar.extend_from_slice(&[0u8; BLOCK * 2]);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

/// Write a minimal package tarball into `dir` and return its bytes.
pub fn write_package(dir: &Path, file_name: &str, name: &str, version: &str) -> Vec<u8> {
    let manifest = format!(
        r#"{{"name":"{name}","version":"{version}","description":"d"}}"#
    );
    let bytes = tgz(&[("package/package.json", manifest.as_bytes())]);
    std::fs::write(dir.join(file_name), &bytes).unwrap();
    bytes
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
