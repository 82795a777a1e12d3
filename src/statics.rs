// Central place for display tokens, labels and format constants.
// Keep these out of the codec/presentation code to make tweaks safer.

// Newline constants (used for JSON formatting).
pub const NL_LF: &str = "\n";
pub const NL_CRLF: &str = "\r\n";

// Spaces per nesting level in pretty JSON.
pub const JSON_INDENT: usize = 2;

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
pub const BPLIST_MAGIC: &[u8] = b"bplist";

// Data URLs pasted into a binary editor carry a header up to this marker.
pub const BASE64_MARKER: &str = "base64,";

// Boolean tokens shown in list rows.
pub const EN_BOOL_YES: &str = "YES";
pub const EN_BOOL_NO: &str = "NO";

// Boolean tokens used by the textual rendering.
pub const LITERAL_TRUE: &str = "true";
pub const LITERAL_FALSE: &str = "false";
pub const LITERAL_NULL: &str = "null";
pub const LITERAL_UNDEFINED: &str = "undefined";

// Kind labels shown to users.
pub const EN_TYPE_DICTIONARY: &str = "Dictionary";
pub const EN_TYPE_ARRAY: &str = "Array";
pub const EN_TYPE_STRING: &str = "String";
pub const EN_TYPE_NUMBER: &str = "Number";
pub const EN_TYPE_BOOLEAN: &str = "Boolean";
pub const EN_TYPE_DATA: &str = "Data";
pub const EN_TYPE_DATE: &str = "Date";
pub const EN_TYPE_NULL: &str = "Null";

// Title of the row describing the root container itself.
pub const EN_ROOT_KEY: &str = "Root";

// Row summaries are cut to this many characters (ellipsis included).
pub const SUMMARY_MAX_CHARS: usize = 60;
pub const EN_ELLIPSIS: &str = "...";

// Environment variable holding the CLI's tracing filter.
pub const ENV_LOG_FILTER: &str = "PLISTOR_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

// Save outcomes kept for `poll_saves`/`flush`; older ones are dropped first.
pub const MAX_UNREPORTED_SAVES: usize = 64;
