use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use zip::ZipArchive;

use crate::error::{IoContext, RepairError, Result};

/// Maximum uncompressed size accepted for a single member.
///
/// ZIP metadata is untrusted; a tiny archive can advertise (or actually
/// inflate to) an enormous member.
pub(crate) const MAX_PART_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Number of files written under the extraction root.
    pub files: usize,
    /// Members that were skipped or written despite a read error.
    pub damaged: Vec<String>,
}

/// Unpack every member of `archive_path` into the empty directory `root`,
/// preserving stored relative paths.
///
/// Failing to open the archive at all is fatal. Individual members that fail
/// their checksum are still written (the decompressed bytes are usually
/// intact) and listed in [`Extraction::damaged`]; members that cannot be read,
/// are oversized, or whose names escape `root` are skipped and listed too.
pub fn extract_package(archive_path: &Path, root: &Path) -> Result<Extraction> {
    let not_empty = fs::read_dir(root)
        .io_context(|| format!("read {}", root.display()))?
        .next()
        .is_some();
    if not_empty {
        return Err(RepairError::io(
            format!("extract into {}", root.display()),
            io::Error::new(io::ErrorKind::AlreadyExists, "extraction root is not empty"),
        ));
    }

    let file =
        File::open(archive_path).io_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(file).map_err(|source| RepairError::NotAZip {
        path: archive_path.to_path_buf(),
        source,
    })?;

    log::info!("extracting workbook contents to {}", root.display());

    let mut extraction = Extraction::default();
    for i in 0..archive.len() {
        let name = archive
            .name_for_index(i)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{i}"));

        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable zip member {name}: {err}");
                extraction.damaged.push(name);
                continue;
            }
        };

        let Some(relative) = entry.enclosed_name() else {
            log::warn!("skipping zip member with unsafe path: {name}");
            extraction.damaged.push(name);
            continue;
        };
        let dest = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest).io_context(|| format!("create {}", dest.display()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
        }

        // Do not trust the advertised size for allocation.
        let mut buf = Vec::new();
        let read = (&mut entry).take(MAX_PART_BYTES + 1).read_to_end(&mut buf);
        if buf.len() as u64 > MAX_PART_BYTES {
            log::warn!("skipping zip member {name}: larger than {MAX_PART_BYTES} bytes");
            extraction.damaged.push(name);
            continue;
        }
        if let Err(err) = read {
            if buf.is_empty() {
                log::warn!("skipping zip member {name}: {err}");
                extraction.damaged.push(name);
                continue;
            }
            log::warn!("zip member {name} extracted despite read error: {err}");
            extraction.damaged.push(name.clone());
        }

        fs::write(&dest, &buf).io_context(|| format!("write {}", dest.display()))?;
        log::debug!("extracted {name} ({} bytes)", buf.len());
        extraction.files += 1;
    }

    Ok(extraction)
}
