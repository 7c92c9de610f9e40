use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{IoContext, RepairError, Result};
use crate::opc::part_name_under;
use crate::part_kind::classify_part;
use crate::report::{CorruptPart, DiagnosticReport};
use crate::xml::check_well_formed;

/// A part that failed the well-formedness check, with its on-disk location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedPart {
    pub part: String,
    pub path: PathBuf,
}

/// Every `.xml` file under `root`, in lexicographic path order.
pub(crate) fn xml_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let context = format!("walk {}", root.display());
            RepairError::io(context, err.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_xml = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Parse every XML part under `root` and record those that are not well-formed.
///
/// Nothing is modified. Failures are recorded in `report` (in traversal order)
/// and returned so the repair stage knows what to work on.
pub fn scan_parts(root: &Path, report: &mut DiagnosticReport) -> Result<Vec<MalformedPart>> {
    log::info!("scanning for XML corruption");

    let mut malformed = Vec::new();
    for path in xml_files(root)? {
        let Some(part) = part_name_under(root, &path) else {
            continue;
        };
        let bytes = fs::read(&path).io_context(|| format!("read {}", path.display()))?;
        match check_well_formed(&bytes) {
            Ok(()) => log::debug!("{part}: ok"),
            Err(err) => {
                log::warn!("{part}: {err}");
                report.record_corrupt_part(CorruptPart {
                    kind: classify_part(&part),
                    part: part.clone(),
                    error: err.to_string(),
                });
                malformed.push(MalformedPart { part, path });
            }
        }
    }

    if malformed.is_empty() {
        log::info!("no corrupt XML parts found");
    } else {
        log::warn!("{} corrupt XML part(s) found", malformed.len());
    }
    Ok(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::part_kind::PartKind;

    fn write(root: &Path, part: &str, bytes: &[u8]) {
        let path = root.join(part);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn records_only_malformed_parts_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "xl/worksheets/sheet2.xml", b"<worksheet><sheetData>");
        write(root, "xl/workbook.xml", b"<workbook/>");
        write(root, "xl/worksheets/sheet1.xml", b"<worksheet></sheet>");
        write(root, "docProps/app.xml", b"<Properties/>");
        write(root, "xl/_rels/workbook.xml.rels", b"<not closed");
        write(root, "xl/media/image1.png", b"\x89PNG");

        let mut report = DiagnosticReport::new();
        let malformed = scan_parts(root, &mut report).unwrap();

        let parts: Vec<&str> = malformed.iter().map(|m| m.part.as_str()).collect();
        assert_eq!(
            parts,
            vec!["xl/worksheets/sheet1.xml", "xl/worksheets/sheet2.xml"]
        );
        assert_eq!(report.corrupt_count(), 2);
        assert_eq!(report.corrupt_parts()[0].kind, PartKind::Worksheet);
        assert!(!report.corrupt_parts()[0].error.is_empty());
        assert_eq!(
            fs::read(root.join("xl/worksheets/sheet1.xml")).unwrap(),
            b"<worksheet></sheet>"
        );
    }

    #[test]
    fn clean_tree_yields_no_findings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "xl/workbook.xml", b"<?xml version=\"1.0\"?><workbook/>");
        let mut report = DiagnosticReport::new();
        assert!(scan_parts(dir.path(), &mut report).unwrap().is_empty());
        assert_eq!(report.corrupt_count(), 0);
    }

    #[test]
    fn undecodable_bytes_count_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "xl/styles.xml", b"<styleSheet>\xFF\xFE\xFD</styleSheet>");
        let mut report = DiagnosticReport::new();
        let malformed = scan_parts(dir.path(), &mut report).unwrap();
        assert_eq!(malformed.len(), 1);
        assert_eq!(report.corrupt_parts()[0].kind, PartKind::Styles);
    }
}
