use std::fs;

use crate::error::{IoContext, Result};
use crate::part_kind::{classify_part, PartKind};
use crate::report::{DiagnosticReport, RepairRecord};
use crate::salvage::{rebuild_worksheet, SalvageStrategy};
use crate::scan::MalformedPart;
use crate::xml::{check_well_formed, decode_xml_bytes_lossy};

/// Rewrite each malformed worksheet part in place with its salvaged rows.
///
/// Only parts the scanner flagged are touched, and only worksheets have a
/// repair strategy; other malformed parts are left as they are. The rewritten
/// part is re-parsed and the outcome appended to `report.repairs`.
pub fn repair_parts(
    malformed: &[MalformedPart],
    strategy: SalvageStrategy,
    report: &mut DiagnosticReport,
) -> Result<()> {
    log::info!("attempting to repair corrupt XML parts");

    for part in malformed {
        let kind = classify_part(&part.part);
        if kind != PartKind::Worksheet {
            log::warn!("{}: no repair strategy for {kind} parts, left unchanged", part.part);
            continue;
        }

        let bytes =
            fs::read(&part.path).io_context(|| format!("read {}", part.path.display()))?;
        let text = decode_xml_bytes_lossy(&bytes);
        let rebuilt = rebuild_worksheet(&text, strategy);

        fs::write(&part.path, rebuilt.document.as_bytes())
            .io_context(|| format!("write {}", part.path.display()))?;

        let well_formed = check_well_formed(rebuilt.document.as_bytes()).is_ok();
        if well_formed {
            log::info!(
                "repaired {} ({} row(s) salvaged)",
                part.part,
                rebuilt.rows
            );
        } else {
            log::warn!(
                "{} rewritten with {} row(s) but still does not parse",
                part.part,
                rebuilt.rows
            );
        }

        report.repairs.push(RepairRecord {
            part: part.part.clone(),
            rows_salvaged: rebuilt.rows,
            strategy: rebuilt.strategy,
            well_formed,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    fn malformed(root: &Path, part: &str, bytes: &[u8]) -> MalformedPart {
        let path = root.join(part);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        MalformedPart {
            part: part.to_string(),
            path,
        }
    }

    #[test]
    fn rewrites_worksheets_and_leaves_other_parts_alone() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = malformed(
            dir.path(),
            "xl/worksheets/sheet1.xml",
            b"<worksheet><sheetData>\n<row r=\"1\"><c><v>1</v></c></row>\n<oops",
        );
        let styles = malformed(dir.path(), "xl/styles.xml", b"<styleSheet>");

        let mut report = DiagnosticReport::new();
        repair_parts(
            &[sheet.clone(), styles.clone()],
            SalvageStrategy::Auto,
            &mut report,
        )
        .unwrap();

        let repaired = fs::read_to_string(&sheet.path).unwrap();
        assert!(repaired.starts_with("<?xml version=\"1.0\""));
        assert!(repaired.contains("<row r=\"1\"><c><v>1</v></c></row>"));
        check_well_formed(repaired.as_bytes()).unwrap();
        assert_eq!(fs::read(&styles.path).unwrap(), b"<styleSheet>");

        assert_eq!(
            report.repairs,
            vec![RepairRecord {
                part: "xl/worksheets/sheet1.xml".to_string(),
                rows_salvaged: 1,
                strategy: SalvageStrategy::Markup,
                well_formed: true,
            }]
        );
    }

    #[test]
    fn broken_row_content_is_carried_over_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = malformed(
            dir.path(),
            "xl/worksheets/sheet1.xml",
            b"<worksheet>\n<row r=\"1\"><c><v>1</c></row>\n",
        );
        let mut report = DiagnosticReport::new();
        repair_parts(&[sheet], SalvageStrategy::Lines, &mut report).unwrap();
        assert_eq!(report.repairs.len(), 1);
        assert_eq!(report.repairs[0].rows_salvaged, 1);
        assert!(!report.repairs[0].well_formed);
        assert_eq!(report.corrupt_count(), 0);
    }
}
