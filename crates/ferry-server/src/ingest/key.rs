//! Structured naming for source files and staged objects
//!
//! Routing and classification never split path strings ad hoc: a source file
//! name is classified once into a [`FileType`], and every staged object is
//! addressed through a [`StagingKey`] that is validated when it is built or
//! parsed.
//!
//! Staged object layout:
//!
//! ```text
//! <prefix>/<file_type>/YYYY/MM/DD/<file_type>_YYYY-MM-DDTHH-MM-SS-ffffffZ_batchNN.csv.gz
//! ```

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or parsing keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid file type '{0}'")]
    InvalidFileType(String),

    #[error("object '{key}' is outside prefix '{prefix}'")]
    OutsidePrefix { key: String, prefix: String },

    #[error("object '{0}' does not follow <file_type>/YYYY/MM/DD/<name>")]
    Malformed(String),

    #[error("invalid date in object key '{0}'")]
    InvalidDate(String),
}

/// Routing classification of a partner file (`payments`, `providers`, ...)
///
/// Always lowercase, made of ASCII letters, digits and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileType(String);

impl FileType {
    pub fn new(raw: &str) -> Result<Self, KeyError> {
        let normalized = raw.trim().to_lowercase();
        let valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if valid {
            Ok(Self(normalized))
        } else {
            Err(KeyError::InvalidFileType(raw.to_string()))
        }
    }

    /// Classify a source file name: first `_` token of the stem, lowercased.
    ///
    /// `payments_2025-11-15.csv` -> `payments`. Returns `None` when the name
    /// yields no usable token.
    pub fn from_source_name(name: &str) -> Option<Self> {
        let stem = name.split('.').next().unwrap_or_default();
        let token = stem.split('_').next().unwrap_or_default();
        Self::new(token).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileType {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<FileType> for String {
    fn from(value: FileType) -> Self {
        value.0
    }
}

/// Logical date carried in a source file name, if any.
///
/// Accepts `YYYY-MM-DD` or `YYYYMMDD` tokens separated by `_`:
/// `payments_2025-11-15.csv` -> 2025-11-15.
pub fn logical_date_from_source_name(name: &str) -> Option<NaiveDate> {
    let stem = name.split('.').next().unwrap_or_default();
    stem.split('_').skip(1).find_map(|token| {
        NaiveDate::parse_from_str(token, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(token, "%Y%m%d"))
            .ok()
    })
}

/// Strip leading and trailing `/` so prefixes compare segment-wise
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

/// Address of one object in staging storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingKey {
    prefix: String,
    file_type: FileType,
    date: NaiveDate,
    file_name: String,
    sequence: Option<u32>,
}

impl StagingKey {
    /// Key for a file landed at `landed_at` as batch `sequence` of the run.
    ///
    /// Two files of one run never collide: the sequence differs even when the
    /// timestamps match. Separate runs are told apart by the microsecond
    /// timestamp.
    pub fn for_landing(
        prefix: &str,
        file_type: FileType,
        landed_at: DateTime<Utc>,
        sequence: u32,
    ) -> Self {
        let file_name = format!(
            "{}_{}_batch{:02}.csv.gz",
            file_type,
            landed_at.format("%Y-%m-%dT%H-%M-%S-%6fZ"),
            sequence
        );

        Self {
            prefix: normalize_prefix(prefix),
            file_type,
            date: landed_at.date_naive(),
            file_name,
            sequence: Some(sequence),
        }
    }

    /// Parse an object key that must live under `prefix`
    pub fn parse(prefix: &str, key: &str) -> Result<Self, KeyError> {
        let prefix = normalize_prefix(prefix);
        let rest = if prefix.is_empty() {
            Some(key)
        } else {
            key.strip_prefix(prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
        }
        .ok_or_else(|| KeyError::OutsidePrefix {
            key: key.to_string(),
            prefix: prefix.clone(),
        })?;

        let segments: Vec<&str> = rest.split('/').collect();
        let [file_type, year, month, day, file_name] = segments.as_slice() else {
            return Err(KeyError::Malformed(key.to_string()));
        };

        if file_name.is_empty() || year.len() != 4 || month.len() != 2 || day.len() != 2 {
            return Err(KeyError::Malformed(key.to_string()));
        }

        // Keys must round-trip exactly, so the type segment is not normalized.
        let parsed_type = FileType::new(file_type)?;
        if parsed_type.as_str() != *file_type {
            return Err(KeyError::InvalidFileType(file_type.to_string()));
        }
        let file_type = parsed_type;
        let date = NaiveDate::parse_from_str(&format!("{}-{}-{}", year, month, day), "%Y-%m-%d")
            .map_err(|_| KeyError::InvalidDate(key.to_string()))?;

        Ok(Self {
            prefix,
            sequence: parse_sequence(file_name),
            file_type,
            date,
            file_name: file_name.to_string(),
        })
    }

    pub fn file_type(&self) -> &FileType {
        &self.file_type
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn sequence(&self) -> Option<u32> {
        self.sequence
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<file_type>/YYYY/MM/DD/<file_name>`, the part preserved on relocation
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}/{}",
            self.file_type,
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.file_name
        )
    }

    /// Full object key including the prefix
    pub fn object_key(&self) -> String {
        if self.prefix.is_empty() {
            self.relative_path()
        } else {
            format!("{}/{}", self.prefix, self.relative_path())
        }
    }

    /// The same object under another namespace
    pub fn relocated(&self, prefix: &str) -> Self {
        Self {
            prefix: normalize_prefix(prefix),
            ..self.clone()
        }
    }
}

impl fmt::Display for StagingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_key())
    }
}

fn parse_sequence(file_name: &str) -> Option<u32> {
    let stem = file_name.split('.').next()?;
    let (_, batch) = stem.rsplit_once("_batch")?;
    batch.parse().ok()
}
