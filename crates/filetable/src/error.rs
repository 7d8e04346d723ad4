// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

// Error types for table materialization
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No converter handles {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Converter '{converter}' failed on {}: {message}", path.display())]
    ConversionFailure {
        path: PathBuf,
        converter: String,
        message: String,
    },

    #[error("Unknown converter '{id}'")]
    UnknownConverter { id: String },

    #[error("Ambiguous partition layout under {}: {reason}", root.display())]
    AmbiguousPartitionLayout { root: PathBuf, reason: String },

    #[error("Failed to persist conversion ledger {}: {source}", path.display())]
    LedgerPersistFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion ledger {} is unreadable: {message}", path.display())]
    LedgerCorrupt { path: PathBuf, message: String },

    #[error("Refresh of table '{table}' failed: {message}")]
    RefreshFailure { table: String, message: String },

    #[error("Refresh cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    pub fn unsupported_format<P: AsRef<Path>>(path: P) -> Self {
        Error::UnsupportedFormat {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn conversion<P: AsRef<Path>, S: Into<String>>(
        path: P,
        converter: &str,
        message: S,
    ) -> Self {
        Error::ConversionFailure {
            path: path.as_ref().to_path_buf(),
            converter: converter.to_string(),
            message: message.into(),
        }
    }

    pub fn ambiguous_layout<P: AsRef<Path>, S: Into<String>>(root: P, reason: S) -> Self {
        Error::AmbiguousPartitionLayout {
            root: root.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn refresh<S: Into<String>>(table: &str, message: S) -> Self {
        Error::RefreshFailure {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// The underlying error, looking through results shared between
    /// single-flight waiters.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// An owned error from one shared between single-flight waiters.
    ///
    /// The last holder gets the error itself. Other holders get a copy of
    /// the domain kinds, and `Shared` only for wrapped library errors.
    #[must_use]
    pub fn from_shared(shared: Arc<Error>) -> Self {
        match Arc::try_unwrap(shared) {
            Ok(owned) => owned,
            Err(shared) => shared.root().domain_copy().unwrap_or(Error::Shared(shared)),
        }
    }

    fn domain_copy(&self) -> Option<Error> {
        Some(match self {
            Error::UnsupportedFormat { path } => Error::UnsupportedFormat { path: path.clone() },
            Error::ConversionFailure {
                path,
                converter,
                message,
            } => Error::ConversionFailure {
                path: path.clone(),
                converter: converter.clone(),
                message: message.clone(),
            },
            Error::UnknownConverter { id } => Error::UnknownConverter { id: id.clone() },
            Error::AmbiguousPartitionLayout { root, reason } => Error::AmbiguousPartitionLayout {
                root: root.clone(),
                reason: reason.clone(),
            },
            Error::LedgerCorrupt { path, message } => Error::LedgerCorrupt {
                path: path.clone(),
                message: message.clone(),
            },
            Error::RefreshFailure { table, message } => Error::RefreshFailure {
                table: table.clone(),
                message: message.clone(),
            },
            Error::Cancelled => Error::Cancelled,
            _ => return None,
        })
    }

    /// True for errors scoped to a single source file.
    #[must_use]
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self.root(),
            Error::UnsupportedFormat { .. } | Error::ConversionFailure { .. }
        )
    }
}

impl From<Error> for datafusion::error::DataFusionError {
    fn from(err: Error) -> Self {
        match err {
            Error::DataFusion(inner) => inner,
            other => datafusion::error::DataFusionError::External(Box::new(other)),
        }
    }
}
