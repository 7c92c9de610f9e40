use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort a repair run.
///
/// Everything else the pipeline notices (bad checksums, unparseable parts,
/// dangling relationships) is recorded in the [`crate::DiagnosticReport`]
/// instead of being returned as an error.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("workbook not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("{} cannot be opened as a zip archive: {source}", .path.display())]
    NotAZip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl RepairError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        RepairError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = RepairError> = std::result::Result<T, E>;

/// Extension for attaching a human-readable context to `io::Result`s.
pub(crate) trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| RepairError::io(f(), err))
    }
}
