use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{IoContext, RepairError, Result};
use crate::opc::part_name_under;

/// `<stem>_repaired.<ext>` beside `source`, keeping the source extension.
pub fn default_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let extension = source
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());
    source.with_file_name(format!("{stem}_repaired.{extension}"))
}

/// Zip every regular file under `root` into `output` (deflate), naming each
/// member by its path relative to `root`. Returns the number of members.
///
/// Members are written in lexicographic path order. The archive is assembled
/// in a temp file next to `output` and renamed into place, so a failed run
/// never leaves a half-written archive behind.
pub fn repackage(root: &Path, output: &Path) -> Result<usize> {
    repackage_with(root, output, &mut |_| {})
}

/// [`repackage`], reporting the staging temp file's path to `on_temp_path`
/// before anything is written to it.
pub(crate) fn repackage_with(
    root: &Path,
    output: &Path,
    on_temp_path: &mut dyn FnMut(&Path),
) -> Result<usize> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let context = format!("walk {}", root.display());
            RepairError::io(context, err.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = part_name_under(root, entry.path()) {
            files.push((name, entry.into_path()));
        }
    }

    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    let count = files.len();
    atomic_write(output, on_temp_path, |file| -> Result<()> {
        let mut writer = ZipWriter::new(file);
        for (name, path) in &files {
            let bytes = fs::read(path).io_context(|| format!("read {}", path.display()))?;
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(&bytes)
                .io_context(|| format!("write zip member {name}"))?;
        }
        writer.finish()?;
        Ok(())
    })?;

    log::info!("repackaged workbook: {}", output.display());
    Ok(count)
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` is `Some("")` for bare relative names like `book.xlsx`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write `dest` atomically: temp file in the same directory, flush + sync,
/// then rename over `dest`. If `write_fn` fails, `dest` is left untouched.
///
/// `on_temp_path` sees the temp file's path as soon as it exists. The file is
/// removed when this returns early, but not if the process is killed.
pub(crate) fn atomic_write<T>(
    dest: &Path,
    on_temp_path: &mut dyn FnMut(&Path),
    write_fn: impl FnOnce(&mut File) -> Result<T>,
) -> Result<T> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir).io_context(|| format!("create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .io_context(|| format!("create temp file in {}", dir.display()))?;
    on_temp_path(tmp.path());
    let out = write_fn(tmp.as_file_mut())?;

    tmp.as_file_mut()
        .flush()
        .io_context(|| format!("flush {}", tmp.path().display()))?;
    tmp.as_file()
        .sync_all()
        .io_context(|| format!("sync {}", tmp.path().display()))?;
    tmp.persist(dest)
        .map_err(|err| RepairError::io(format!("rename into {}", dest.display()), err.error))?;

    Ok(out)
}

pub(crate) fn atomic_write_bytes(
    dest: &Path,
    bytes: &[u8],
    on_temp_path: &mut dyn FnMut(&Path),
) -> io::Result<()> {
    atomic_write(dest, on_temp_path, |file| {
        file.write_all(bytes)
            .io_context(|| format!("write {}", dest.display()))
    })
    .map_err(|err| match err {
        RepairError::Io { source, .. } => source,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    })
}
