//! Corruption detection and row-salvage repair for XLSX packages.
//!
//! A run works on a private copy of the workbook: the ZIP container is
//! checked, unpacked into a scratch directory, every XML part is checked for
//! well-formedness, cross-references (named ranges, connections, slicers,
//! pivot caches, shared strings, media, relationships) are collected, damaged
//! worksheets are optionally rebuilt from their surviving `<row>` records, and
//! the tree is zipped back up. Findings accumulate in a [`DiagnosticReport`].
//!
//! The source workbook is never written to.

pub mod cli;
mod deps;
mod error;
mod extract;
mod opc;
mod package;
mod part_kind;
mod repair;
mod report;
mod salvage;
mod scan;
mod verify;
mod workspace;
mod xml;

use std::path::{Path, PathBuf};

use crate::package::repackage_with;

pub use deps::{analyze_dependencies, DependencyError};
pub use error::{RepairError, Result};
pub use extract::{extract_package, Extraction};
pub use package::{default_output_path, repackage};
pub use part_kind::{classify_part, PartKind};
pub use repair::repair_parts;
pub use report::{
    default_report_path, BrokenRelationship, ContainerStatus, CorruptPart, DiagnosticReport,
    NamedRange, RepairRecord, Summary, SHARED_STRING_SAMPLE_LIMIT,
};
pub use salvage::{
    rebuild_worksheet, salvage_rows, salvage_rows_by_lines, salvage_rows_by_markup,
    wrap_fragments, RebuiltWorksheet, Salvage, SalvageStrategy,
};
pub use scan::{scan_parts, MalformedPart};
pub use verify::verify_container;
pub use workspace::RepairWorkspace;
pub use xml::{DecodeError, XmlError, SPREADSHEETML_NS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOptions {
    /// Rewrite malformed worksheet parts. When false the run only detects,
    /// analyzes, and repackages.
    pub repair: bool,
    /// Write the report as `<stem>_diagnostic.json` beside the source.
    pub emit_report: bool,
    /// Output archive. Defaults to [`default_output_path`].
    pub output: Option<PathBuf>,
    pub salvage: SalvageStrategy,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            repair: true,
            emit_report: false,
            output: None,
            salvage: SalvageStrategy::default(),
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: DiagnosticReport,
    pub output: PathBuf,
    /// Set when the report was written to disk.
    pub report_path: Option<PathBuf>,
}

/// Run the full pipeline on `source`.
pub fn repair_workbook(source: &Path, options: &RepairOptions) -> Result<RunOutcome> {
    repair_workbook_with(source, options, |_| {})
}

/// Like [`repair_workbook`], but calls `on_temp_path` with every temporary
/// path the run creates, as soon as it exists: the scratch directory first,
/// then the temp files staged next to the output archive and the report.
///
/// A normal return (success or error) removes all of them. The hook lets a
/// caller clean up when the process is killed before the run returns.
pub fn repair_workbook_with<F>(
    source: &Path,
    options: &RepairOptions,
    mut on_temp_path: F,
) -> Result<RunOutcome>
where
    F: FnMut(&Path),
{
    let workspace = RepairWorkspace::create(source)?;
    on_temp_path(workspace.scratch_dir());

    // The workspace is dropped (and the scratch directory removed) on every
    // early return below.
    let outcome = run_stages(&workspace, options, &mut on_temp_path)?;
    workspace.close()?;
    Ok(outcome)
}

fn run_stages(
    workspace: &RepairWorkspace,
    options: &RepairOptions,
    on_temp_path: &mut dyn FnMut(&Path),
) -> Result<RunOutcome> {
    let mut report = DiagnosticReport::new();
    let source = workspace.source();
    log::info!("analyzing {}", source.display());

    report.container = verify_container(workspace.working_copy())?;
    if report.container.is_suspect() {
        log::warn!("container is suspect, attempting extraction anyway");
    }

    let extraction = extract_package(workspace.working_copy(), workspace.extract_root())?;
    log::info!("extracted {} file(s)", extraction.files);
    report.damaged_members = extraction.damaged;

    let root = workspace.extract_root();
    let malformed = scan_parts(root, &mut report)?;
    analyze_dependencies(root, &mut report);

    if options.repair && !malformed.is_empty() {
        repair_parts(&malformed, options.salvage, &mut report)?;
    }

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(source));
    let members = repackage_with(root, &output, on_temp_path)?;
    log::debug!("{members} member(s) written to {}", output.display());
    report.summary.output_file = Some(output.display().to_string());

    let report_path = if options.emit_report {
        let path = default_report_path(source);
        report.write_json_with(&path, on_temp_path)?;
        log::info!("diagnostic report saved: {}", path.display());
        Some(path)
    } else {
        None
    };

    Ok(RunOutcome {
        report,
        output,
        report_path,
    })
}
