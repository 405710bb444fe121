//! Streaming tar reader.
//!
//! Decodes the 512-byte header blocks of a POSIX tar stream from any
//! [`Read`] source without buffering the archive. Understands classic and
//! ustar headers (including the `prefix` field), surfaces pax `x`/`g`
//! blocks and GNU `L` long-name entries to the caller, and hands payloads
//! out as length-bounded substreams. Whatever the caller leaves unread is
//! skipped, together with the zero padding, before the next header.
//!
//! The pending-overrides state machine that chains pax records and long
//! names into the following entry lives in the ingester; this module only
//! decodes blocks and pax record syntax.

use std::io::{self, Read};

use thiserror::Error;

pub const BLOCK_SIZE: usize = 512;

/// Regular file, classic encoding.
pub const TYPE_FILE: u8 = b'0';
/// Regular file, pre-POSIX encoding.
pub const TYPE_FILE_OLD: u8 = 0;
/// Directory entry.
pub const TYPE_DIR: u8 = b'5';
/// GNU long-name record; payload overrides the next entry's name.
pub const TYPE_GNU_LONG_NAME: u8 = b'L';
/// Pax extended header applying to the next entry only.
pub const TYPE_PAX_NEXT: u8 = b'x';
/// Pax global extended header applying to all subsequent entries.
pub const TYPE_PAX_GLOBAL: u8 = b'g';

#[derive(Debug, Error)]
pub enum TarError {
    #[error("archive read failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed pax record: {0}")]
    Pax(String),
}

/// Decoded header fields of one archive entry.
#[derive(Debug, Clone)]
pub struct TarHeader {
    /// Entry name; already joined with the ustar `prefix` when present.
    pub name: String,
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    /// Payload length in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    pub typeflag: u8,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
}

impl TarHeader {
    pub fn is_file(&self) -> bool {
        self.typeflag == TYPE_FILE || self.typeflag == TYPE_FILE_OLD
    }

    pub fn is_dir(&self) -> bool {
        self.typeflag == TYPE_DIR
    }
}

/// Sequential reader over the entries of a tar stream.
pub struct TarReader<R: Read> {
    inner: R,
    /// Payload plus padding bytes of the current entry not yet consumed.
    pending: u64,
    done: bool,
}

impl<R: Read> TarReader<R> {
    pub fn new(inner: R) -> Self {
        TarReader {
            inner,
            pending: 0,
            done: false,
        }
    }

    /// Advance to the next entry.
    ///
    /// Returns `Ok(None)` at the end of the archive: either the zero
    /// terminator block, or a truncated header, both of which end the
    /// stream cleanly.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry<'_, R>>, TarError> {
        if self.done {
            return Ok(None);
        }
        self.skip_pending()?;

        let mut block = [0u8; BLOCK_SIZE];
        if !read_block(&mut self.inner, &mut block)? {
            self.done = true;
            return Ok(None);
        }
        let header = match parse_header(&block) {
            Some(header) => header,
            None => {
                // Empty name: the archive terminator.
                self.done = true;
                return Ok(None);
            }
        };
        let size = header.size;
        self.pending = padded_len(size);
        Ok(Some(TarEntry {
            header,
            remaining: size,
            reader: self,
        }))
    }

    fn skip_pending(&mut self) -> Result<(), TarError> {
        while self.pending > 0 {
            let mut sink = [0u8; 4096];
            let want = self.pending.min(sink.len() as u64) as usize;
            let n = self.inner.read(&mut sink[..want])?;
            if n == 0 {
                // Archive ends inside a payload; treat as done.
                self.done = true;
                self.pending = 0;
                return Ok(());
            }
            self.pending -= n as u64;
        }
        Ok(())
    }
}

/// One entry with its length-bounded payload substream.
///
/// Reading is optional: dropping the entry lets the [`TarReader`] skip the
/// remainder before the next header.
pub struct TarEntry<'a, R: Read> {
    pub header: TarHeader,
    remaining: u64,
    reader: &'a mut TarReader<R>,
}

impl<R: Read> TarEntry<'_, R> {
    /// Replace the payload length taken from the header.
    ///
    /// Used when a pax `size` record overrides the (possibly saturated)
    /// octal header field. Must be called before any payload is read.
    pub fn override_size(&mut self, size: u64) {
        self.header.size = size;
        self.remaining = size;
        self.reader.pending = padded_len(size);
    }

    /// Read the whole remaining payload into memory.
    pub fn read_payload(&mut self) -> Result<Vec<u8>, TarError> {
        let mut buf = Vec::with_capacity(self.remaining.min(64 * 1024) as usize);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> Read for TarEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = self.remaining.min(buf.len() as u64) as usize;
        let n = self.reader.inner.read(&mut buf[..want])?;
        self.remaining -= n as u64;
        self.reader.pending -= n as u64;
        Ok(n)
    }
}

/// Parse one pax extended-header payload into key/value records.
///
/// Each record is `"<length> <key>=<value>\n"` with `length` counting the
/// entire record including the newline. Values are decoded as UTF-8; a
/// `hdrcharset` record is accepted but other charsets are not honored.
pub fn parse_pax_records(data: &[u8]) -> Result<Vec<(String, String)>, TarError> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| TarError::Pax("missing length separator".into()))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TarError::Pax("unparseable record length".into()))?;
        if len <= space + 1 || len > rest.len() {
            return Err(TarError::Pax(format!(
                "record length {len} out of bounds ({} bytes left)",
                rest.len()
            )));
        }
        let record = &rest[..len];
        if record[len - 1] != b'\n' {
            return Err(TarError::Pax("record does not end in newline".into()));
        }
        let body = &record[space + 1..len - 1];
        let eq = body
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| TarError::Pax("record has no '='".into()))?;
        let key = String::from_utf8_lossy(&body[..eq]).into_owned();
        let value = String::from_utf8_lossy(&body[eq + 1..]).into_owned();
        records.push((key, value));
        rest = &rest[len..];
    }
    Ok(records)
}

/// Payload length rounded up to the 512-byte block boundary.
fn padded_len(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Fill a whole block, or report end-of-archive.
///
/// A clean EOF and a short final read are both `Ok(false)`: a truncated
/// header terminates the archive without error.
fn read_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK_SIZE]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = reader.read(&mut block[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

/// Decode a header block; `None` means the archive terminator.
fn parse_header(block: &[u8; BLOCK_SIZE]) -> Option<TarHeader> {
    let mut name = field_str(&block[0..100]);
    let magic = &block[257..263];
    if magic.starts_with(b"ustar") {
        let prefix = field_str(&block[345..500]);
        if !prefix.is_empty() {
            name = format!("{prefix}/{name}");
        }
    }
    if name.is_empty() {
        return None;
    }
    Some(TarHeader {
        name,
        mode: field_octal(&block[100..108]),
        uid: field_octal(&block[108..116]),
        gid: field_octal(&block[116..124]),
        size: field_octal(&block[124..136]),
        mtime: field_octal(&block[136..148]) as i64,
        typeflag: block[156],
        linkname: field_str(&block[157..257]),
        uname: field_str(&block[265..297]),
        gname: field_str(&block[297..329]),
    })
}

/// Null-terminated string field.
fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Zero-padded ASCII octal with optional leading spaces; parsing stops at
/// the first non-octal byte.
fn field_octal(field: &[u8]) -> u64 {
    let mut value = 0u64;
    let mut bytes = field.iter().skip_while(|&&b| b == b' ');
    for &b in &mut bytes {
        if !(b'0'..=b'7').contains(&b) {
            break;
        }
        value = value * 8 + (b - b'0') as u64;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a checksummed ustar header block.
    fn header_block(name: &str, size: u64, typeflag: u8, prefix: &str) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[0..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(b"0000644");
        block[108..115].copy_from_slice(b"0000000");
        block[116..123].copy_from_slice(b"0000000");
        block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
        block[136..147].copy_from_slice(b"14210367074"); // 2021-ish mtime
        block[156] = typeflag;
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block[345..345 + prefix.len()].copy_from_slice(prefix.as_bytes());
        // Checksum is computed with the field itself blanked to spaces.
        block[148..156].copy_from_slice(b"        ");
        let sum: u64 = block.iter().map(|&b| b as u64).sum();
        block[148..154].copy_from_slice(format!("{sum:06o}").as_bytes());
        block[154] = 0;
        block[155] = b' ';
        block
    }

    fn entry_bytes(name: &str, data: &[u8], typeflag: u8) -> Vec<u8> {
        let mut out = header_block(name, data.len() as u64, typeflag, "").to_vec();
        out.extend_from_slice(data);
        out.resize(out.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        out
    }

    fn archive(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut out: Vec<u8> = parts.iter().flatten().copied().collect();
        out.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
        out
    }

    #[test]
    fn reads_simple_entry() {
        let bytes = archive(&[entry_bytes("package/package.json", b"{}", TYPE_FILE)]);
        let mut reader = TarReader::new(&bytes[..]);
        let mut entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.header.name, "package/package.json");
        assert_eq!(entry.header.size, 2);
        assert!(entry.header.is_file());
        assert_eq!(entry.read_payload().unwrap(), b"{}");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn skips_unread_payload_and_padding() {
        let bytes = archive(&[
            entry_bytes("a.bin", &[7u8; 700], TYPE_FILE),
            entry_bytes("b.txt", b"second", TYPE_FILE),
        ]);
        let mut reader = TarReader::new(&bytes[..]);
        {
            let mut entry = reader.next_entry().unwrap().unwrap();
            let mut prefix = [0u8; 3];
            entry.read_exact(&mut prefix).unwrap();
            assert_eq!(prefix, [7, 7, 7]);
            // Remainder of the 700 bytes plus padding is left unread.
        }
        let mut entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.header.name, "b.txt");
        assert_eq!(entry.read_payload().unwrap(), b"second");
    }

    #[test]
    fn joins_ustar_prefix() {
        let mut bytes = header_block("package.json", 0, TYPE_FILE, "package").to_vec();
        bytes.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
        let mut reader = TarReader::new(&bytes[..]);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.header.name, "package/package.json");
    }

    #[test]
    fn octal_fields_allow_leading_spaces() {
        assert_eq!(field_octal(b"   755\0"), 0o755);
        assert_eq!(field_octal(b"00000644 "), 0o644);
        assert_eq!(field_octal(b"123x456"), 0o123);
        assert_eq!(field_octal(b"\0\0\0"), 0);
    }

    #[test]
    fn truncated_header_ends_archive_cleanly() {
        let mut bytes = entry_bytes("a.txt", b"abc", TYPE_FILE);
        bytes.extend_from_slice(&[1u8; 100]); // partial garbage header
        let mut reader = TarReader::new(&bytes[..]);
        assert!(reader.next_entry().unwrap().is_some());
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn surfaces_meta_entries() {
        let long = "package/a-directory-name-well-past-one-hundred-characters-\
                    which-therefore-needs-a-gnu-long-name-record/package.json";
        let bytes = archive(&[
            entry_bytes("././@LongLink", long.as_bytes(), TYPE_GNU_LONG_NAME),
            entry_bytes("package/truncated", b"{}", TYPE_FILE),
        ]);
        let mut reader = TarReader::new(&bytes[..]);
        let mut meta = reader.next_entry().unwrap().unwrap();
        assert_eq!(meta.header.typeflag, TYPE_GNU_LONG_NAME);
        assert_eq!(meta.read_payload().unwrap(), long.as_bytes());
        let entry = reader.next_entry().unwrap().unwrap();
        assert!(entry.header.is_file());
    }

    #[test]
    fn parses_pax_records() {
        let payload = b"29 path=package/package.json\n18 mtime=1234.567\n";
        let records = parse_pax_records(payload).unwrap();
        assert_eq!(
            records,
            vec![
                ("path".to_string(), "package/package.json".to_string()),
                ("mtime".to_string(), "1234.567".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_malformed_pax_records() {
        // Length overruns the payload.
        assert!(parse_pax_records(b"99 path=x\n").is_err());
        // No '=' in the record body.
        assert!(parse_pax_records(b"8 pathx\n").is_err());
        // Missing trailing newline.
        assert!(parse_pax_records(b"8 path=x").is_err());
        // Length is not a number.
        assert!(parse_pax_records(b"xx path=x\n").is_err());
    }

    #[test]
    fn pax_size_override_rebounds_payload() {
        // Header claims 4 bytes but the real payload is 6; the override
        // must widen the substream before reading.
        let mut out = header_block("file.bin", 4, TYPE_FILE, "").to_vec();
        out.extend_from_slice(b"abcdef");
        out.resize(out.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        out.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);

        let mut reader = TarReader::new(&out[..]);
        let mut entry = reader.next_entry().unwrap().unwrap();
        entry.override_size(6);
        assert_eq!(entry.read_payload().unwrap(), b"abcdef");
        assert!(reader.next_entry().unwrap().is_none());
    }
}
