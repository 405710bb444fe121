//! Semantic Versioning 2.0.0 parsing and precedence.
//!
//! A parsed [`SemVer`] keeps the original string plus byte ranges for the
//! five components, so comparison works on borrowed slices and never
//! allocates. Precedence follows semver.org §11: numeric core first,
//! pre-release labels compared identifier by identifier, build metadata
//! ignored entirely.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use thiserror::Error;

/// Rejection reason for a version string that is not valid SemVer 2.0.0.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid semantic version {0:?}")]
pub struct InvalidVersion(pub String);

/// A validated SemVer 2.0.0 version.
///
/// Holds the canonical text and component ranges into it. `label` and
/// `build` exclude their `-`/`+` introducers.
#[derive(Debug, Clone)]
pub struct SemVer {
    text: String,
    major: Range<usize>,
    minor: Range<usize>,
    patch: Range<usize>,
    label: Option<Range<usize>>,
    build: Option<Range<usize>>,
}

impl SemVer {
    pub fn major(&self) -> &str {
        &self.text[self.major.clone()]
    }

    pub fn minor(&self) -> &str {
        &self.text[self.minor.clone()]
    }

    pub fn patch(&self) -> &str {
        &self.text[self.patch.clone()]
    }

    /// Pre-release label without the leading `-`, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.clone().map(|r| &self.text[r])
    }

    /// Build metadata without the leading `+`, if any.
    pub fn build(&self) -> Option<&str> {
        self.build.clone().map(|r| &self.text[r])
    }
}

impl FromStr for SemVer {
    type Err = InvalidVersion;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Parser::new(input).parse()
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())?;
        if let Some(label) = self.label() {
            write!(f, "-{label}")?;
        }
        if let Some(build) = self.build() {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVer {}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_numeric(self.major(), other.major())
            .then_with(|| cmp_numeric(self.minor(), other.minor()))
            .then_with(|| cmp_numeric(self.patch(), other.patch()))
            .then_with(|| cmp_labels(self.label(), other.label()))
    }
}

/// Compare two digit strings as unsigned integers.
///
/// Valid SemVer numbers carry no leading zeros, so a longer digit string is
/// always the larger number; equal lengths fall back to byte order.
pub(crate) fn cmp_numeric(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

fn cmp_labels(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // A pre-release sorts below the bare version.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let mut ids_a = a.split('.');
            let mut ids_b = b.split('.');
            loop {
                match (ids_a.next(), ids_b.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(x), Some(y)) => match cmp_identifiers(x, y) {
                        Ordering::Equal => continue,
                        other => return other,
                    },
                }
            }
        }
    }
}

fn cmp_identifiers(a: &str, b: &str) -> Ordering {
    let a_numeric = a.bytes().all(|b| b.is_ascii_digit());
    let b_numeric = b.bytes().all(|b| b.is_ascii_digit());
    match (a_numeric, b_numeric) {
        (true, true) => cmp_numeric(a, b),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.as_bytes().cmp(b.as_bytes()),
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn parse(mut self) -> Result<SemVer, InvalidVersion> {
        if !self.input.is_ascii() {
            return Err(self.fail());
        }
        let major = self.number()?;
        self.expect(b'.')?;
        let minor = self.number()?;
        self.expect(b'.')?;
        let patch = self.number()?;
        let label = if self.eat(b'-') {
            Some(self.identifiers(true)?)
        } else {
            None
        };
        let build = if self.eat(b'+') {
            Some(self.identifiers(false)?)
        } else {
            None
        };
        if self.pos != self.input.len() {
            return Err(self.fail());
        }
        Ok(SemVer {
            text: self.input.to_string(),
            major,
            minor,
            patch,
            label,
            build,
        })
    }

    fn fail(&self) -> InvalidVersion {
        InvalidVersion(self.input.to_string())
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), InvalidVersion> {
        if self.eat(byte) {
            Ok(())
        } else {
            Err(self.fail())
        }
    }

    /// One or more ASCII digits, no leading zero unless the number is `0`.
    fn number(&mut self) -> Result<Range<usize>, InvalidVersion> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let range = start..self.pos;
        if range.is_empty() {
            return Err(self.fail());
        }
        if range.len() > 1 && self.input.as_bytes()[start] == b'0' {
            return Err(self.fail());
        }
        Ok(range)
    }

    /// Dot-separated identifier list for a pre-release label or build
    /// metadata. `strict_numeric` enforces the no-leading-zero rule that
    /// applies to pre-release identifiers only.
    fn identifiers(&mut self, strict_numeric: bool) -> Result<Range<usize>, InvalidVersion> {
        let start = self.pos;
        loop {
            let id_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'-') {
                self.pos += 1;
            }
            let id = &self.input[id_start..self.pos];
            if id.is_empty() {
                return Err(self.fail());
            }
            if strict_numeric
                && id.len() > 1
                && id.bytes().all(|b| b.is_ascii_digit())
                && id.as_bytes()[0] == b'0'
            {
                return Err(self.fail());
            }
            if !self.eat(b'.') {
                return Ok(start..self.pos);
            }
        }
    }
}
