//! Byte formats: pretty JSON text and Apple property lists (XML or binary).

use crate::error::CodecError;
use crate::statics;
use crate::value::{Value, ValueKind, format_path};
use base64::Engine as _;
use chrono::{DateTime, SubsecRound, Utc};
use indexmap::IndexMap;
use std::{
    convert::Infallible,
    fmt,
    io::{self, Cursor},
    path::Path,
    time::SystemTime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Plist,
}

impl Format {
    /// Maps a file extension (case-insensitive) to its codec.
    pub fn from_extension(ext: &str) -> Result<Format, CodecError> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "plist" => Ok(Format::Plist),
            _ => Err(CodecError::UnsupportedFormat(ext.to_string())),
        }
    }

    pub fn from_path(path: &Path) -> Result<Format, CodecError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Format::from_extension(ext)
    }

    /// Whether a value of `kind` can be stored in a document of this format.
    pub fn supports(self, kind: ValueKind) -> bool {
        match self {
            Format::Json => !matches!(kind, ValueKind::Date | ValueKind::Binary),
            Format::Plist => kind != ValueKind::Null,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Json => "JSON",
            Format::Plist => "Plist",
        })
    }
}

/// Physical container of a Plist document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlistEncoding {
    #[default]
    Xml,
    Binary,
}

impl PlistEncoding {
    pub fn detect(bytes: &[u8]) -> PlistEncoding {
        if bytes.starts_with(statics::BPLIST_MAGIC) {
            PlistEncoding::Binary
        } else {
            PlistEncoding::Xml
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn newline(self) -> &'static str {
        match self {
            LineEnding::Lf => statics::NL_LF,
            LineEnding::CrLf => statics::NL_CRLF,
        }
    }

    pub fn detect(text_bytes: &[u8]) -> LineEnding {
        // Count terminators rather than looking for any CRLF, so a stray
        // "\r\n" inside an otherwise LF file does not flip the result.
        let mut lf_count = 0usize;
        let mut crlf_count = 0usize;

        for (i, b) in text_bytes.iter().enumerate() {
            if *b != b'\n' {
                continue;
            }
            if i > 0 && text_bytes[i - 1] == b'\r' {
                crlf_count += 1;
            } else {
                lf_count += 1;
            }
        }

        if crlf_count > lf_count {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

/// Physical details that do not change the decoded tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOptions {
    pub plist: PlistEncoding,
    pub line_ending: LineEnding,
}

impl EncodeOptions {
    /// Options that reproduce the physical layout of `bytes`.
    pub fn detect(bytes: &[u8], format: Format) -> EncodeOptions {
        match format {
            Format::Json => EncodeOptions {
                plist: PlistEncoding::default(),
                line_ending: LineEnding::detect(bytes),
            },
            Format::Plist => EncodeOptions {
                plist: PlistEncoding::detect(bytes),
                line_ending: LineEnding::default(),
            },
        }
    }
}

/// Decodes a whole document. The root must be an array or dictionary.
pub fn decode(bytes: &[u8], format: Format) -> Result<Value, CodecError> {
    let root = decode_fragment(bytes, format)?;
    check_root(&root)?;
    Ok(root)
}

/// Decodes any value, including a scalar (used for source editing of a subtree).
pub fn decode_fragment(bytes: &[u8], format: Format) -> Result<Value, CodecError> {
    let malformed = |message: String| CodecError::MalformedInput { format, message };
    match format {
        Format::Json => {
            let bytes = bytes.strip_prefix(statics::UTF8_BOM).unwrap_or(bytes);
            serde_json::from_slice::<Value>(bytes).map_err(|e| malformed(e.to_string()))
        }
        Format::Plist => {
            let parsed =
                plist::Value::from_reader(Cursor::new(bytes)).map_err(|e| malformed(e.to_string()))?;
            from_plist(parsed).map_err(malformed)
        }
    }
}

pub fn encode(value: &Value, format: Format) -> Result<Vec<u8>, CodecError> {
    encode_with(value, format, EncodeOptions::default())
}

/// Encodes a whole document. JSON refuses Date/Binary, Plist refuses Null,
/// and neither accepts non-finite numbers.
pub fn encode_with(value: &Value, format: Format, options: EncodeOptions) -> Result<Vec<u8>, CodecError> {
    check_root(value)?;
    encode_fragment(value, format, options)
}

pub fn encode_fragment(
    value: &Value,
    format: Format,
    options: EncodeOptions,
) -> Result<Vec<u8>, CodecError> {
    match format {
        Format::Json => {
            let mut writer = JsonWriter::new(options.line_ending.newline(), true);
            writer.write::<CodecError>(value, 0)?;
            writer.out.push_str(options.line_ending.newline());
            Ok(writer.out.into_bytes())
        }
        Format::Plist => {
            let mut path = Vec::new();
            let converted = to_plist(value, &mut path)?;
            let mut buf = Vec::new();
            write_plist(&converted, options.plist, &mut buf)?;
            Ok(buf)
        }
    }
}

fn write_plist(value: &plist::Value, encoding: PlistEncoding, out: impl io::Write) -> Result<(), CodecError> {
    let written = match encoding {
        PlistEncoding::Xml => value.to_writer_xml(out),
        PlistEncoding::Binary => value.to_writer_binary(out),
    };
    written.map_err(|e| CodecError::WriteFailed {
        format: Format::Plist,
        message: e.to_string(),
    })
}

/// Pretty source text of a value in the given format (JSON text or XML Plist).
pub fn to_source(value: &Value, format: Format) -> Result<String, CodecError> {
    let bytes = encode_fragment(value, format, EncodeOptions::default())?;
    // Both the JSON writer and the XML writer only produce UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn from_source(text: &str, format: Format) -> Result<Value, CodecError> {
    decode_fragment(text.as_bytes(), format)
}

/// One-line JSON-like rendering that never fails: dates become RFC 3339
/// strings, data becomes base64 strings and non-finite numbers become `null`.
pub(crate) fn to_compact_text(value: &Value) -> String {
    render_lenient(value, false)
}

/// Pretty JSON with the same lenient substitutions as [`to_compact_text`].
pub(crate) fn to_pretty_text(value: &Value) -> String {
    render_lenient(value, true)
}

fn render_lenient(value: &Value, pretty: bool) -> String {
    let mut writer = JsonWriter::new(statics::NL_LF, pretty);
    let Ok(()) = writer.write::<Infallible>(value, 0);
    writer.out
}

fn check_root(value: &Value) -> Result<(), CodecError> {
    if value.is_container() {
        Ok(())
    } else {
        Err(CodecError::UnsupportedRoot(value.kind()))
    }
}

/// Default decimal formatting: integral values without a fraction, otherwise
/// the shortest representation that parses back to the same `f64`.
pub(crate) fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    let mut buf = ryu::Buffer::new();
    buf.format(v).to_string()
}

/// What the JSON writer does with a value JSON has no form for.
trait Unencodable: Sized {
    /// Replacement text, or the error that stops the write.
    fn substitute(value: &Value, path: &[String]) -> Result<String, Self>;
}

/// Strict writes refuse with the offending kind and its location.
impl Unencodable for CodecError {
    fn substitute(value: &Value, path: &[String]) -> Result<String, Self> {
        Err(CodecError::UnencodableValue {
            format: Format::Json,
            kind: value.kind(),
            path: format_path(path),
        })
    }
}

/// Lenient writes always have a replacement.
impl Unencodable for Infallible {
    fn substitute(value: &Value, _path: &[String]) -> Result<String, Self> {
        let mut out = String::new();
        match value {
            Value::Date(d) => write_escaped_string(&mut out, &Value::format_date(d)),
            Value::Binary(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                write_escaped_string(&mut out, &encoded);
            }
            _ => out.push_str(statics::LITERAL_NULL),
        }
        Ok(out)
    }
}

struct JsonWriter<'a> {
    out: String,
    newline: &'a str,
    pretty: bool,
    path: Vec<String>,
}

impl<'a> JsonWriter<'a> {
    fn new(newline: &'a str, pretty: bool) -> Self {
        Self {
            out: String::new(),
            newline,
            pretty,
            path: Vec::new(),
        }
    }

    fn write<E: Unencodable>(&mut self, value: &Value, indent: usize) -> Result<(), E> {
        match value {
            Value::Null => self.out.push_str("null"),
            Value::Bool(v) => self.out.push_str(if *v { "true" } else { "false" }),
            Value::Number(n) if n.is_finite() => self.out.push_str(&format_number(*n)),
            Value::String(s) => write_escaped_string(&mut self.out, s),
            Value::Number(_) | Value::Date(_) | Value::Binary(_) => {
                let text = E::substitute(value, &self.path)?;
                self.out.push_str(&text);
            }
            Value::Array(values) => {
                self.out.push('[');
                for (i, v) in values.iter().enumerate() {
                    self.separator(i, indent);
                    self.path.push(i.to_string());
                    self.write::<E>(v, indent + statics::JSON_INDENT)?;
                    self.path.pop();
                }
                self.close(values.is_empty(), indent);
                self.out.push(']');
            }
            Value::Object(map) => {
                self.out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    self.separator(i, indent);
                    write_escaped_string(&mut self.out, k);
                    self.out.push_str(if self.pretty { ": " } else { ":" });
                    self.path.push(k.clone());
                    self.write::<E>(v, indent + statics::JSON_INDENT)?;
                    self.path.pop();
                }
                self.close(map.is_empty(), indent);
                self.out.push('}');
            }
        }
        Ok(())
    }

    fn separator(&mut self, i: usize, indent: usize) {
        if i > 0 {
            self.out.push(',');
        }
        if self.pretty {
            self.out.push_str(self.newline);
            self.out.push_str(&" ".repeat(indent + statics::JSON_INDENT));
        }
    }

    fn close(&mut self, empty: bool, indent: usize) {
        if self.pretty && !empty {
            self.out.push_str(self.newline);
            self.out.push_str(&" ".repeat(indent));
        }
    }
}

fn write_escaped_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write as _;
                write!(out, "\\u{:04x}", c as u32).ok();
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn to_plist(value: &Value, path: &mut Vec<String>) -> Result<plist::Value, CodecError> {
    let unencodable = |kind: ValueKind, path: &[String]| CodecError::UnencodableValue {
        format: Format::Plist,
        kind,
        path: format_path(path),
    };
    let converted = match value {
        Value::Null => return Err(unencodable(ValueKind::Null, path)),
        Value::Bool(b) => plist::Value::Boolean(*b),
        Value::Number(n) => {
            if !n.is_finite() {
                return Err(unencodable(ValueKind::Number, path));
            }
            if n.fract() == 0.0 && n.abs() < 1e15 {
                plist::Value::Integer((*n as i64).into())
            } else {
                plist::Value::Real(*n)
            }
        }
        Value::String(s) => plist::Value::String(s.clone()),
        Value::Date(d) => plist::Value::Date(plist::Date::from(SystemTime::from(d.trunc_subsecs(0)))),
        Value::Binary(bytes) => plist::Value::Data(bytes.clone()),
        Value::Array(values) => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                path.push(i.to_string());
                out.push(to_plist(v, path)?);
                path.pop();
            }
            plist::Value::Array(out)
        }
        Value::Object(map) => {
            let mut dict = plist::Dictionary::new();
            for (k, v) in map {
                path.push(k.clone());
                dict.insert(k.clone(), to_plist(v, path)?);
                path.pop();
            }
            plist::Value::Dictionary(dict)
        }
    };
    Ok(converted)
}

fn from_plist(value: plist::Value) -> Result<Value, String> {
    let converted = match value {
        plist::Value::Boolean(b) => Value::Bool(b),
        plist::Value::Integer(i) => match (i.as_signed(), i.as_unsigned()) {
            (Some(v), _) => Value::Number(v as f64),
            (None, Some(v)) => Value::Number(v as f64),
            (None, None) => return Err(format!("integer {i:?} out of range")),
        },
        plist::Value::Real(r) => Value::Number(r),
        plist::Value::String(s) => Value::String(s),
        plist::Value::Date(d) => Value::date(DateTime::<Utc>::from(SystemTime::from(d))),
        plist::Value::Data(bytes) => Value::Binary(bytes),
        plist::Value::Uid(uid) => Value::Number(uid.get() as f64),
        plist::Value::Array(values) => Value::Array(
            values
                .into_iter()
                .map(from_plist)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        plist::Value::Dictionary(dict) => {
            let mut map = IndexMap::with_capacity(dict.len());
            for (k, v) in dict {
                map.insert(k, from_plist(v)?);
            }
            Value::Object(map)
        }
        other => return Err(format!("unsupported plist value {other:?}")),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::{
        EncodeOptions, Format, LineEnding, PlistEncoding, decode, decode_fragment, encode,
        encode_with, format_number, to_compact_text, to_pretty_text, write_plist,
    };
    use crate::error::CodecError;
    use crate::value::{Value, ValueKind};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::{io, path::Path};

    struct FullDisk;

    impl io::Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn format_from_path_is_case_insensitive() {
        assert_eq!(Format::from_path(Path::new("a.JSON")), Ok(Format::Json));
        assert_eq!(Format::from_path(Path::new("dir/Info.plist")), Ok(Format::Plist));
        assert_eq!(
            Format::from_path(Path::new("notes.txt")),
            Err(CodecError::UnsupportedFormat("txt".to_string()))
        );
    }

    #[test]
    fn detect_line_ending_counts_terminators() {
        assert_eq!(LineEnding::detect(b"{\r\n}\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect(b"{\n\"a\": \"\\r\\n\"\n}\r\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect(b"{}"), LineEnding::Lf);
    }

    #[test]
    fn numbers_use_default_decimal_formatting() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1.5e300), "1.5e300");
    }

    #[test]
    fn json_is_pretty_printed() {
        let v = decode(br#"{"a":[1,"two",true],"b":{}}"#, Format::Json).unwrap();
        let text = String::from_utf8(encode(&v, Format::Json).unwrap()).unwrap();
        assert_eq!(
            text,
            "{\n  \"a\": [\n    1,\n    \"two\",\n    true\n  ],\n  \"b\": {}\n}\n"
        );
    }

    #[test]
    fn json_preserves_crlf_when_asked() {
        let v = Value::from_iter([("k", Value::Null)]);
        let options = EncodeOptions {
            line_ending: LineEnding::CrLf,
            ..EncodeOptions::default()
        };
        let bytes = encode_with(&v, Format::Json, options).unwrap();
        assert_eq!(bytes, b"{\r\n  \"k\": null\r\n}\r\n".to_vec());
    }

    #[test]
    fn scalar_root_is_rejected_both_ways() {
        assert_eq!(
            decode(b"42", Format::Json),
            Err(CodecError::UnsupportedRoot(ValueKind::Number))
        );
        assert_eq!(
            encode(&Value::from("x"), Format::Plist),
            Err(CodecError::UnsupportedRoot(ValueKind::String))
        );
        // Fragments allow scalars.
        assert_eq!(decode_fragment(b"42", Format::Json), Ok(Value::Number(42.0)));
    }

    #[test]
    fn malformed_input_is_reported() {
        assert!(matches!(
            decode(b"{\"a\": ", Format::Json),
            Err(CodecError::MalformedInput { format: Format::Json, .. })
        ));
        assert!(matches!(
            decode(b"<plist><dict>", Format::Plist),
            Err(CodecError::MalformedInput { format: Format::Plist, .. })
        ));
    }

    #[test]
    fn json_refuses_dates_and_data_with_path() {
        let v = Value::from_iter([(
            "outer",
            Value::Array(vec![Value::Null, Value::Binary(vec![1, 2])]),
        )]);
        assert_eq!(
            encode(&v, Format::Json),
            Err(CodecError::UnencodableValue {
                format: Format::Json,
                kind: ValueKind::Binary,
                path: "/outer/1".to_string(),
            })
        );
    }

    #[test]
    fn plist_refuses_null() {
        let v = Value::Array(vec![Value::Null]);
        assert!(matches!(
            encode(&v, Format::Plist),
            Err(CodecError::UnencodableValue { kind: ValueKind::Null, .. })
        ));
    }

    #[test]
    fn plist_encoding_is_detected_and_preserved() {
        let v = Value::from_iter([("n", Value::from(1)), ("s", Value::from("x"))]);
        let options = EncodeOptions {
            plist: PlistEncoding::Binary,
            ..EncodeOptions::default()
        };
        let bin = encode_with(&v, Format::Plist, options).unwrap();
        assert_eq!(PlistEncoding::detect(&bin), PlistEncoding::Binary);
        assert_eq!(decode(&bin, Format::Plist).unwrap(), v);

        let xml = encode(&v, Format::Plist).unwrap();
        assert_eq!(PlistEncoding::detect(&xml), PlistEncoding::Xml);
        assert!(String::from_utf8(xml).unwrap().contains("<key>n</key>"));
    }

    #[test]
    fn plist_integers_and_reals_both_decode_to_numbers() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<array>
	<integer>7</integer>
	<real>2.5</real>
	<true/>
</array>
</plist>"#;
        let v = decode(xml, Format::Plist).unwrap();
        assert_eq!(
            v,
            Value::Array(vec![Value::from(7), Value::from(2.5), Value::Bool(true)])
        );
    }

    #[test]
    fn plist_writer_failure_is_not_an_unencodable_value() {
        let value = plist::Value::Array(vec![plist::Value::Boolean(true)]);
        for encoding in [PlistEncoding::Xml, PlistEncoding::Binary] {
            let err = write_plist(&value, encoding, FullDisk).unwrap_err();
            assert!(matches!(err, CodecError::WriteFailed { format: Format::Plist, .. }));
            assert!(err.to_string().starts_with("Plist writer failed"));
        }
    }

    #[test]
    fn lenient_text_substitutes_instead_of_failing() {
        let date = Utc.with_ymd_and_hms(2021, 5, 6, 7, 8, 9).unwrap();
        let v = Value::Array(vec![
            Value::Date(date),
            Value::Binary(b"hi".to_vec()),
            Value::Number(f64::NAN),
        ]);
        assert_eq!(to_compact_text(&v), r#"["2021-05-06T07:08:09Z","aGk=",null]"#);
        assert_eq!(
            to_pretty_text(&Value::from_iter([("n", Value::Number(f64::INFINITY))])),
            "{\n  \"n\": null\n}"
        );
        assert!(encode(&v, Format::Json).is_err());
    }
}
