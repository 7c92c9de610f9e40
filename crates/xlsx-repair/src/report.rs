use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{IoContext, Result};
use crate::part_kind::PartKind;
use crate::salvage::SalvageStrategy;

/// Maximum number of shared strings retained in the report.
pub const SHARED_STRING_SAMPLE_LIMIT: usize = 100;

/// Outcome of the container-level integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContainerStatus {
    #[default]
    Ok,
    NotAZip {
        reason: String,
    },
    CorruptMember {
        member: String,
    },
}

impl ContainerStatus {
    pub fn is_suspect(&self) -> bool {
        !matches!(self, ContainerStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptPart {
    pub part: String,
    pub kind: PartKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRange {
    pub name: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokenRelationship {
    pub rels_part: String,
    pub id: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairRecord {
    pub part: String,
    pub rows_salvaged: usize,
    pub strategy: SalvageStrategy,
    pub well_formed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub corrupt_count: usize,
    pub output_file: Option<String>,
}

/// Findings accumulated across every stage of a run.
///
/// Fields are only ever appended to. The corrupt-part list is private so the
/// summary count cannot drift from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub summary: Summary,
    pub container: ContainerStatus,
    pub damaged_members: Vec<String>,
    corrupt_files: Vec<CorruptPart>,
    pub named_ranges: Vec<NamedRange>,
    pub slicers: Vec<String>,
    pub data_connections: Vec<BTreeMap<String, String>>,
    pub pivot_caches: BTreeMap<String, Vec<String>>,
    pub shared_strings: Vec<String>,
    pub shared_string_count: usize,
    pub media_issues: Vec<String>,
    pub broken_relationships: Vec<BrokenRelationship>,
    pub repairs: Vec<RepairRecord>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrupt_parts(&self) -> &[CorruptPart] {
        &self.corrupt_files
    }

    pub fn corrupt_count(&self) -> usize {
        self.summary.corrupt_count
    }

    pub(crate) fn record_corrupt_part(&mut self, part: CorruptPart) {
        self.corrupt_files.push(part);
        self.summary.corrupt_count = self.corrupt_files.len();
    }

    /// Record a shared string, keeping only the first
    /// [`SHARED_STRING_SAMPLE_LIMIT`] in document order.
    pub(crate) fn record_shared_string(&mut self, text: String) {
        self.shared_string_count += 1;
        if self.shared_strings.len() < SHARED_STRING_SAMPLE_LIMIT {
            self.shared_strings.push(text);
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the complete report as pretty-printed JSON (2-space indent).
    pub fn write_json(&self, path: &Path) -> Result<()> {
        self.write_json_with(path, &mut |_| {})
    }

    /// [`Self::write_json`], reporting the staging temp file to `on_temp_path`.
    pub(crate) fn write_json_with(
        &self,
        path: &Path,
        on_temp_path: &mut dyn FnMut(&Path),
    ) -> Result<()> {
        let mut json = self
            .to_json_pretty()
            .map_err(|err| crate::RepairError::io("serialize diagnostic report", err.into()))?;
        json.push('\n');
        crate::package::atomic_write_bytes(path, json.as_bytes(), on_temp_path)
            .io_context(|| format!("write diagnostic report {}", path.display()))
    }
}

/// `<stem>_diagnostic.json` beside `source`.
pub fn default_report_path(source: &Path) -> std::path::PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    source.with_file_name(format!("{stem}_diagnostic.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_count_tracks_corrupt_list() {
        let mut report = DiagnosticReport::new();
        assert_eq!(report.corrupt_count(), 0);
        for i in 0..3 {
            report.record_corrupt_part(CorruptPart {
                part: format!("xl/worksheets/sheet{i}.xml"),
                kind: PartKind::Worksheet,
                error: "unexpected end of stream".to_string(),
            });
            assert_eq!(report.corrupt_count(), report.corrupt_parts().len());
        }
        assert_eq!(report.corrupt_count(), 3);
    }

    #[test]
    fn shared_string_sample_keeps_first_entries() {
        let mut report = DiagnosticReport::new();
        for i in 0..250 {
            report.record_shared_string(format!("s{i}"));
        }
        assert_eq!(report.shared_strings.len(), SHARED_STRING_SAMPLE_LIMIT);
        assert_eq!(report.shared_strings.first().map(String::as_str), Some("s0"));
        assert_eq!(report.shared_strings.last().map(String::as_str), Some("s99"));
        assert_eq!(report.shared_string_count, 250);
    }

    #[test]
    fn json_uses_two_space_indent_and_stable_keys() {
        let report = DiagnosticReport::new();
        let json = report.to_json_pretty().unwrap();
        assert!(json.starts_with("{\n  \"summary\": {\n    \"corrupt_count\": 0,"));
        let summary = json.find("\"summary\"").unwrap();
        let corrupt = json.find("\"corrupt_files\"").unwrap();
        let media = json.find("\"media_issues\"").unwrap();
        assert!(summary < corrupt && corrupt < media);
        assert!(json.contains("\"container\": {\n    \"status\": \"ok\"\n  }"));
    }

    #[test]
    fn default_report_path_sits_beside_source() {
        assert_eq!(
            default_report_path(Path::new("/data/Budget.xlsx")),
            Path::new("/data/Budget_diagnostic.json")
        );
    }
}
