//! Core library for plistor, a structured editor for property lists and JSON.
//! Provides the shared value tree, the JSON/Plist codecs, retyping rules and
//! node views that keep several editors of one document consistent.

pub mod codec;
pub mod coerce;
mod document;
pub mod error;
pub mod present;
pub mod script;
pub mod statics;
mod value;
mod view;

pub use codec::{EncodeOptions, Format, LineEnding, PlistEncoding};
pub use document::{Document, DocumentOptions, DuplicateKeyPolicy, SaveOutcome};
pub use error::{CodecError, DocumentError, EditError};
pub use present::Row;
pub use script::ScriptValue;
pub use value::{Value, ValueKind, format_path, parse_path};
pub use view::{ViewId, ViewState};
