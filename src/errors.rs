//! Error types for the settings core and the analytics sampler.
//!
//! Every settings failure maps to one of the error kinds operators see in
//! the logs (`ConfigParseError`, `ConfigTypeError`, ...).  Init-time errors
//! abort startup; `save()` errors are returned to the caller with the file
//! on disk left untouched.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::schema::FieldKind;

/// A single constraint violation found by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Section name (`cert`, `auth`, ...).
    pub section: String,
    /// Field name in snake_case.
    pub field: String,
    /// Rule that failed, rendered the way it is declared (`url`, `min=1`).
    pub rule: String,
    /// Offending value. For list fields this is the failing element.
    pub value: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} failed `{}` with value {:?}",
            self.section, self.field, self.rule, self.value
        )
    }
}

/// Settings errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Malformed file syntax.
    #[error("{location}:{line}: {message}")]
    Parse {
        location: String,
        line: usize,
        message: String,
    },

    /// A value could not be coerced into the declared field type.
    #[error("[{section}] {field}: cannot read {value:?} as {expected}")]
    Type {
        section: String,
        field: String,
        value: String,
        expected: FieldKind,
    },

    /// One or more fields violate their constraints.
    #[error("invalid settings: {}", join_failures(.0))]
    Validation(Vec<ValidationFailure>),

    /// Reading, writing or renaming the settings file failed.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The legacy migrator could not write the new layout.
    #[error("legacy settings migration failed: {0}")]
    Migration(#[source] Box<SettingsError>),

    /// No section is registered under this name.
    #[error("unknown settings section {0:?}")]
    UnknownSection(String),
}

impl SettingsError {
    /// Return the error kind name used in logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            SettingsError::Parse { .. } => "ConfigParseError",
            SettingsError::Type { .. } => "ConfigTypeError",
            SettingsError::Validation(_) => "ConfigValidationError",
            SettingsError::Io { .. } => "ConfigIOError",
            SettingsError::Migration(_) => "MigrationError",
            SettingsError::UnknownSection(_) => "UnknownSection",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SettingsError::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Transient host-metric read failure.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The counter source could not be read.
    #[error("reading {source_name}: {error}")]
    Io {
        source_name: &'static str,
        #[source]
        error: std::io::Error,
    },

    /// The counter source was readable but not in the expected shape.
    #[error("malformed {source_name}: {detail}")]
    Malformed {
        source_name: &'static str,
        detail: String,
    },

    /// The probe is not available on this platform.
    #[error("{0} is not available on this platform")]
    Unsupported(&'static str),
}
