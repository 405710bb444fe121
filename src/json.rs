//! ASCII-only JSON emission.
//!
//! Registry responses are plain-ASCII JSON: every code unit outside
//! `[0x20, 0x7E]` is written as a `\uHHHH` escape, so clients never see raw
//! multi-byte sequences. [`AsciiFormatter`] plugs that policy into
//! `serde_json`'s serializer; [`JsonAscii`] is the axum response wrapper
//! handlers return.

use std::io;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::ser::Formatter;

/// `serde_json` formatter that escapes all non-printable-ASCII characters.
///
/// Compact by default; [`AsciiFormatter::pretty`] indents with tabs.
pub struct AsciiFormatter {
    pretty: bool,
    indent: usize,
    has_value: bool,
}

impl AsciiFormatter {
    pub fn new() -> Self {
        AsciiFormatter {
            pretty: false,
            indent: 0,
            has_value: false,
        }
    }

    pub fn pretty() -> Self {
        AsciiFormatter {
            pretty: true,
            indent: 0,
            has_value: false,
        }
    }

    fn newline<W: ?Sized + io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b"\n")?;
        for _ in 0..self.indent {
            writer.write_all(b"\t")?;
        }
        Ok(())
    }
}

impl Default for AsciiFormatter {
    fn default() -> Self {
        AsciiFormatter::new()
    }
}

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        // serde_json has already routed `"`/`\`/control characters through
        // write_char_escape; fragments only need the non-ASCII escapes.
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(&bytes[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&bytes[start..])
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent += 1;
        self.has_value = false;
        writer.write_all(b"[")
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent -= 1;
        if self.pretty && self.has_value {
            self.newline(writer)?;
        }
        writer.write_all(b"]")
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if !first {
            writer.write_all(b",")?;
        }
        if self.pretty {
            self.newline(writer)?;
        }
        Ok(())
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent += 1;
        self.has_value = false;
        writer.write_all(b"{")
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.indent -= 1;
        if self.pretty && self.has_value {
            self.newline(writer)?;
        }
        writer.write_all(b"}")
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if !first {
            writer.write_all(b",")?;
        }
        if self.pretty {
            self.newline(writer)?;
        }
        Ok(())
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.pretty {
            writer.write_all(b": ")
        } else {
            writer.write_all(b":")
        }
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        self.has_value = true;
        Ok(())
    }
}

/// Serialize to compact ASCII-escaped JSON bytes.
pub fn to_vec<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter::new());
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Serialize to a compact ASCII-escaped JSON string.
pub fn to_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    // The formatter only ever emits ASCII, so the bytes are valid UTF-8.
    Ok(String::from_utf8_lossy(&to_vec(value)?).into_owned())
}

/// Serialize to tab-indented ASCII-escaped JSON.
pub fn to_string_pretty<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter::pretty());
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Response wrapper emitting ASCII-escaped `application/json` (UTF-8, no
/// byte-order mark).
pub struct JsonAscii<T>(pub T);

impl<T: Serialize> IntoResponse for JsonAscii<T> {
    fn into_response(self) -> Response {
        match to_vec(&self.0) {
            Ok(body) => (
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response body");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "application/json")],
                    br#"{"statusCode":500,"error":"serialization failure"}"#.to_vec(),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn escapes_non_ascii_as_utf16_units() {
        let value = json!({ "unicode": "Пр2ивет" });
        assert_eq!(
            to_string(&value).unwrap(),
            "{\"unicode\":\"\\u041f\\u04402\\u0438\\u0432\\u0435\\u0442\"}"
        );
    }

    #[test]
    fn reads_back_escaped_unicode() {
        let text = "{\"unicode\":\"\\u041f\\u04402\\u0438\\u0432\\u0435\\u0442\"}";
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["unicode"], "Пр2ивет");
    }

    #[test]
    fn escapes_astral_plane_as_surrogate_pair() {
        let value = json!("🦀");
        assert_eq!(to_string(&value).unwrap(), "\"\\ud83e\\udd80\"");
    }

    #[test]
    fn canonical_ascii_json_round_trips_byte_identical() {
        let source = r#"{"name":"pkg","n":42,"f":1.5,"ok":true,"none":null,"list":[1,"two"],"nested":{"a":"b"}}"#;
        let value: Value = serde_json::from_str(source).unwrap();
        assert_eq!(to_string(&value).unwrap(), source);
    }

    #[test]
    fn preserves_insertion_order() {
        let source = r#"{"zebra":1,"alpha":2,"mike":3}"#;
        let value: Value = serde_json::from_str(source).unwrap();
        assert_eq!(to_string(&value).unwrap(), source);
    }

    #[test]
    fn pretty_prints_with_tab_indent() {
        let value = json!({ "a": [1, 2], "b": {} });
        assert_eq!(
            to_string_pretty(&value).unwrap(),
            "{\n\t\"a\": [\n\t\t1,\n\t\t2\n\t],\n\t\"b\": {}\n}"
        );
    }

    #[test]
    fn escapes_standard_control_characters() {
        let value = json!("a\"b\\c\nd\te\u{8}f\u{c}g\rh");
        let text = to_string(&value).unwrap();
        assert_eq!(text, r#""a\"b\\c\nd\te\bf\fg\rh""#);
    }
}
