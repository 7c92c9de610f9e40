use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{IoContext, RepairError, Result};

const SCRATCH_PREFIX: &str = "xlsx_repair_";

/// Scratch state owned by one repair run.
///
/// Holds a private working copy of the source workbook and an (initially
/// empty) extraction root, both inside a uniquely named temp directory. The
/// directory is removed when the workspace is dropped, on success and error
/// paths alike.
#[derive(Debug)]
pub struct RepairWorkspace {
    source: PathBuf,
    scratch: TempDir,
    working_copy: PathBuf,
    extract_root: PathBuf,
}

impl RepairWorkspace {
    /// Check that `source` exists, then allocate scratch space and copy the
    /// workbook into it.
    ///
    /// A missing source fails with [`RepairError::InputNotFound`] before any
    /// temp directory is created.
    pub fn create(source: &Path) -> Result<Self> {
        if !source.is_file() {
            return Err(RepairError::InputNotFound(source.to_path_buf()));
        }
        let source = source
            .canonicalize()
            .io_context(|| format!("resolve {}", source.display()))?;

        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .io_context(|| "create scratch directory")?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workbook".to_string());
        let extension = source
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "xlsx".to_string());
        let working_copy = scratch.path().join(format!("{stem}_copy.{extension}"));
        fs::copy(&source, &working_copy).io_context(|| {
            format!(
                "copy {} to {}",
                source.display(),
                working_copy.display()
            )
        })?;

        let extract_root = scratch.path().join("unzipped");
        fs::create_dir(&extract_root)
            .io_context(|| format!("create {}", extract_root.display()))?;

        log::debug!("scratch directory: {}", scratch.path().display());

        Ok(Self {
            source,
            scratch,
            working_copy,
            extract_root,
        })
    }

    /// Canonical path of the workbook being inspected. Never written to.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn working_copy(&self) -> &Path {
        &self.working_copy
    }

    pub fn extract_root(&self) -> &Path {
        &self.extract_root
    }

    /// Remove the scratch directory now, reporting failures.
    pub fn close(self) -> Result<()> {
        let path = self.scratch.path().to_path_buf();
        log::info!("cleaning up {}", path.display());
        self.scratch
            .close()
            .io_context(|| format!("remove scratch directory {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_source_fails_before_allocating_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.xlsx");
        let err = RepairWorkspace::create(&missing).unwrap_err();
        assert!(matches!(err, RepairError::InputNotFound(p) if p == missing));
    }

    #[test]
    fn working_copy_is_separate_and_scratch_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Book.xlsm");
        fs::write(&source, b"PK-not-really").unwrap();

        let workspace = RepairWorkspace::create(&source).unwrap();
        let scratch = workspace.scratch_dir().to_path_buf();
        assert_ne!(workspace.working_copy(), workspace.source());
        assert!(workspace.working_copy().ends_with("Book_copy.xlsm"));
        assert_eq!(fs::read(workspace.working_copy()).unwrap(), b"PK-not-really");
        assert_eq!(fs::read_dir(workspace.extract_root()).unwrap().count(), 0);
        assert!(scratch.exists());

        drop(workspace);
        assert!(!scratch.exists());
        assert!(source.exists());
    }
}
