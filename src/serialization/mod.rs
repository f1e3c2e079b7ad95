//! Payload serialization to and from resource files.
//!
//! Every payload handed to a connector is written to a file whose extension names its format:
//!
//! | Payload | Files |
//! |---|---|
//! | [`Payload::Tabular`] | `<base>.csv` plus the `<base>.pmd` column metadata |
//! | [`Payload::TextStream`], [`Payload::ByteStream`] | `<base>.fo` |
//! | [`Payload::Opaque`] | `<base>.bin` |
//!
//! Reading dispatches on the extension of the primary file; see [`deserialize_from_file`].

pub mod csv;
pub mod table_json;

use std::borrow::Cow;
use std::ffi::OsString;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{Annotations, DataSet, Schema};

/// Extension of tabular text files.
pub const TABULAR_EXTENSION: &str = "csv";
/// Extension of the column metadata written next to tabular files.
pub const METADATA_EXTENSION: &str = "pmd";
/// Extension of raw stream files.
pub const STREAM_EXTENSION: &str = "fo";
/// Extension of serialized generic objects.
pub const OBJECT_EXTENSION: &str = "bin";

/// Prefix added to column names the backend cannot use as attribute names.
const COLUMN_PREFIX: &str = "att";

/// A value that can be handed to, or returned by, a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Tabular data, with its optional metadata side-channel.
    Tabular(DataSet),
    /// Text written as a raw stream.
    TextStream(String),
    /// Bytes written as a raw stream. Streams are always read back as bytes.
    ByteStream(Vec<u8>),
    /// Any other object, stored as JSON.
    Opaque(serde_json::Value),
}

impl Payload {
    /// The dataset, if this is a tabular payload.
    pub fn as_dataset(&self) -> Option<&DataSet> {
        match self {
            Payload::Tabular(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn into_dataset(self) -> Option<DataSet> {
        match self {
            Payload::Tabular(ds) => Some(ds),
            _ => None,
        }
    }

    /// Short kind name used in log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Tabular(_) => "tabular",
            Payload::TextStream(_) => "text stream",
            Payload::ByteStream(_) => "byte stream",
            Payload::Opaque(_) => "object",
        }
    }
}

impl From<DataSet> for Payload {
    fn from(ds: DataSet) -> Self {
        Payload::Tabular(ds)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::TextStream(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::TextStream(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::ByteStream(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Opaque(value)
    }
}

/// Resource file formats, keyed by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFormat {
    Tabular,
    Stream,
    Object,
}

impl ResourceFormat {
    /// Parse a resource format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            TABULAR_EXTENSION => Some(Self::Tabular),
            STREAM_EXTENSION => Some(Self::Stream),
            OBJECT_EXTENSION => Some(Self::Object),
            _ => None,
        }
    }

    /// Extension of the primary file.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tabular => TABULAR_EXTENSION,
            Self::Stream => STREAM_EXTENSION,
            Self::Object => OBJECT_EXTENSION,
        }
    }

    pub fn of_payload(payload: &Payload) -> Self {
        match payload {
            Payload::Tabular(_) => Self::Tabular,
            Payload::TextStream(_) | Payload::ByteStream(_) => Self::Stream,
            Payload::Opaque(_) => Self::Object,
        }
    }
}

/// Write `payload` next to `basename` and return the path of the primary file.
///
/// `basename` must not carry an extension; the one matching the payload kind is appended.
pub fn serialize_to_file(
    payload: &Payload,
    basename: impl AsRef<Path>,
) -> ConnectorResult<PathBuf> {
    let basename = basename.as_ref();
    let path = with_appended_extension(basename, ResourceFormat::of_payload(payload).extension());
    match payload {
        Payload::Tabular(ds) => {
            csv::write_dataset_to_path(ds, &path, &metadata_path(&path))?;
        }
        Payload::TextStream(text) => fs::write(&path, text.as_bytes())?,
        Payload::ByteStream(bytes) => fs::write(&path, bytes)?,
        Payload::Opaque(value) => {
            let file = BufWriter::new(fs::File::create(&path)?);
            serde_json::to_writer(file, value).map_err(|e| ConnectorError::Serialization {
                message: format!("could not serialize object to '{}': {e}", path.display()),
            })?;
        }
    }
    Ok(path)
}

/// Read a resource file back into a [`Payload`], dispatching on its extension.
///
/// - `.csv`: tabular data with the metadata from the sibling `.pmd`. A missing or unusable
///   metadata file is logged and the tabular text is read alone.
/// - `.bin`: a serialized object; a corrupt file is a [`ConnectorError::Deserialization`].
/// - `.fo`: the raw bytes.
/// - anything else: [`ConnectorError::UnsupportedFormat`].
pub fn deserialize_from_file(path: impl AsRef<Path>) -> ConnectorResult<Payload> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let format =
        ResourceFormat::from_extension(ext).ok_or_else(|| ConnectorError::UnsupportedFormat {
            extension: ext.to_string(),
        })?;

    match format {
        ResourceFormat::Tabular => {
            csv::read_dataset_from_path(path, &metadata_path(path)).map(Payload::Tabular)
        }
        ResourceFormat::Stream => Ok(Payload::ByteStream(fs::read(path)?)),
        ResourceFormat::Object => {
            let bytes = fs::read(path)?;
            serde_json::from_slice(&bytes).map(Payload::Opaque).map_err(|e| {
                ConnectorError::deserialization(format!(
                    "error while trying to load serialized object '{}': {e}",
                    path.display()
                ))
            })
        }
    }
}

/// Path of the metadata file belonging to a tabular file.
pub fn metadata_path(tabular_path: &Path) -> PathBuf {
    tabular_path.with_extension(METADATA_EXTENSION)
}

fn with_appended_extension(basename: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(basename.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Rewrite a column name the backend would reject: empty or all-digit names get an `att` prefix.
pub fn sanitize_column_name(name: &str) -> Cow<'_, str> {
    if name.chars().all(|c| c.is_ascii_digit()) {
        Cow::Owned(format!("{COLUMN_PREFIX}{name}"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Sanitize every name. Applying it twice gives the same result as applying it once.
pub fn sanitize_column_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    names
        .iter()
        .map(|n| sanitize_column_name(n.as_ref()).into_owned())
        .collect()
}

/// A sanitized view of a dataset's header: renamed schema and re-keyed annotations.
///
/// Rows are never touched, so the caller's dataset is left as it was.
pub(crate) fn sanitized_header(ds: &DataSet) -> (Cow<'_, Schema>, Option<Cow<'_, Annotations>>) {
    let renames: Vec<(usize, String)> = ds
        .schema
        .fields
        .iter()
        .enumerate()
        .filter_map(|(idx, f)| match sanitize_column_name(&f.name) {
            Cow::Owned(new_name) => Some((idx, new_name)),
            Cow::Borrowed(_) => None,
        })
        .collect();
    if renames.is_empty() {
        return (Cow::Borrowed(&ds.schema), ds.metadata.as_ref().map(Cow::Borrowed));
    }

    let mut schema = ds.schema.clone();
    let mut annotations = ds.metadata.clone();
    for (idx, new_name) in renames {
        let old_name = std::mem::replace(&mut schema.fields[idx].name, new_name.clone());
        if let Some(map) = annotations.as_mut() {
            if let Some(annotation) = map.remove(&old_name) {
                map.entry(new_name).or_insert(annotation);
            }
        }
    }
    (Cow::Owned(schema), annotations.map(Cow::Owned))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(ResourceFormat::from_extension("CSV"), Some(ResourceFormat::Tabular));
        assert_eq!(ResourceFormat::from_extension("fo"), Some(ResourceFormat::Stream));
        assert_eq!(ResourceFormat::from_extension("bin"), Some(ResourceFormat::Object));
        assert_eq!(ResourceFormat::from_extension("pmd"), None);
        assert_eq!(ResourceFormat::from_extension("xlsx"), None);
    }

    #[test]
    fn extension_is_appended_not_replaced() {
        assert_eq!(
            with_appended_extension(Path::new("/tmp/run.v2/input0"), "csv"),
            PathBuf::from("/tmp/run.v2/input0.csv")
        );
    }

    #[test]
    fn sanitizes_empty_and_numeric_names() {
        assert_eq!(sanitize_column_names(&["", "3", "ok", "a1"]), vec!["att", "att3", "ok", "a1"]);
    }
}
