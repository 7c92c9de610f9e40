//! Best-effort cross-reference extraction from well-known package parts.
//!
//! Each lookup owns one report field and runs independently: a missing part
//! leaves its field empty, and a part that fails to parse is logged as a
//! warning without touching the corrupt-part list (that belongs to the
//! scanner).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use thiserror::Error;
use walkdir::WalkDir;

use crate::opc::{part_name_under, relationship_target_part};
use crate::report::{BrokenRelationship, DiagnosticReport, NamedRange};
use crate::xml::{attribute_key, decode_xml_bytes, parse_document, text_content, DecodeError};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const CONNECTIONS_PART: &str = "xl/connections.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const SLICER_CACHE_DIR: &str = "xl/slicerCaches";
const PIVOT_CACHE_DIR: &str = "xl/pivotCache";
const PIVOT_CACHE_DEFINITION_PREFIX: &str = "pivotCacheDefinition";
const MEDIA_DIR: &str = "xl/media";

#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{part} could not be decoded: {source}")]
    Decode {
        part: String,
        #[source]
        source: DecodeError,
    },
    #[error("{part} is not parseable: {source}")]
    Xml {
        part: String,
        #[source]
        source: roxmltree::Error,
    },
}

type Lookup = fn(&Path, &mut DiagnosticReport) -> Result<(), DependencyError>;

/// Known package locations and the lookup that reads each of them.
const LOOKUPS: &[(&str, Lookup)] = &[
    ("named ranges", named_ranges),
    ("data connections", data_connections),
    ("slicer caches", slicer_caches),
    ("pivot cache fields", pivot_cache_fields),
    ("shared strings", shared_strings),
    ("media", media_issues),
    ("relationships", relationships),
];

/// Run every lookup against the extracted tree at `root`.
pub fn analyze_dependencies(root: &Path, report: &mut DiagnosticReport) {
    log::info!("analyzing named ranges, slicers, and data sources");
    for (name, lookup) in LOOKUPS {
        if let Err(err) = lookup(root, report) {
            log::warn!("{name}: {err}");
        }
    }
}

fn part_path(root: &Path, part: &str) -> PathBuf {
    part.split('/').fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Read, decode and parse `part`, handing the document to `f`.
///
/// Returns `Ok(None)` when the part does not exist.
fn with_part<T>(
    root: &Path,
    part: &str,
    f: impl FnOnce(&Document<'_>) -> T,
) -> Result<Option<T>, DependencyError> {
    let path = part_path(root, part);
    if !path.is_file() {
        log::debug!("{part} not present");
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(|source| DependencyError::Io { path, source })?;
    let text = decode_xml_bytes(&bytes).map_err(|source| DependencyError::Decode {
        part: part.to_string(),
        source,
    })?;
    let doc = parse_document(&text).map_err(|source| DependencyError::Xml {
        part: part.to_string(),
        source,
    })?;
    Ok(Some(f(&doc)))
}

fn elements_named<'a, 'input>(
    doc: &'a Document<'input>,
    local: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    doc.descendants()
        .filter(move |node| node.is_element() && node.tag_name().name() == local)
}

/// Regular files directly inside `dir` whose name passes `keep`, sorted by name.
fn files_in(
    root: &Path,
    dir: &str,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>, DependencyError> {
    let dir = part_path(root, dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&dir).map_err(|source| DependencyError::Io {
        path: dir.clone(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DependencyError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(&keep)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_xml_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
}

fn named_ranges(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let Some(names) = with_part(root, WORKBOOK_PART, |doc| {
        elements_named(doc, "definedName")
            .filter(|node| {
                node.parent_element()
                    .is_some_and(|parent| parent.tag_name().name() == "definedNames")
            })
            .map(|node| {
                let value = text_content(node);
                NamedRange {
                    name: node.attribute("name").map(str::to_string),
                    value: (!value.is_empty()).then_some(value),
                }
            })
            .collect::<Vec<_>>()
    })?
    else {
        return Ok(());
    };

    for range in &names {
        log::debug!(
            "defined name {} = {}",
            range.name.as_deref().unwrap_or("<unnamed>"),
            range.value.as_deref().unwrap_or("")
        );
    }
    log::info!("{} named range(s)", names.len());
    report.named_ranges.extend(names);
    Ok(())
}

fn data_connections(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let Some(connections) = with_part(root, CONNECTIONS_PART, |doc| {
        elements_named(doc, "connection")
            .map(|node| {
                node.attributes()
                    .map(|attr| (attribute_key(&attr), attr.value().to_string()))
                    .collect::<BTreeMap<_, _>>()
            })
            .collect::<Vec<_>>()
    })?
    else {
        return Ok(());
    };

    log::info!("{} data connection(s)", connections.len());
    report.data_connections.extend(connections);
    Ok(())
}

fn slicer_caches(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let files = files_in(root, SLICER_CACHE_DIR, has_xml_extension)?;
    let parts: Vec<String> = files
        .iter()
        .filter_map(|path| part_name_under(root, path))
        .collect();
    if !parts.is_empty() {
        log::info!("{} slicer cache(s)", parts.len());
    }
    report.slicers.extend(parts);
    Ok(())
}

fn pivot_cache_fields(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let files = files_in(root, PIVOT_CACHE_DIR, |name| {
        name.starts_with(PIVOT_CACHE_DEFINITION_PREFIX) && has_xml_extension(name)
    })?;

    for path in files {
        let Some(part) = part_name_under(root, &path) else {
            continue;
        };
        let parsed = with_part(root, &part, |doc| {
            elements_named(doc, "cacheField")
                .filter(|node| {
                    node.parent_element()
                        .is_some_and(|parent| parent.tag_name().name() == "cacheFields")
                })
                .filter_map(|node| node.attribute("name"))
                .map(str::to_string)
                .collect::<Vec<_>>()
        });
        match parsed {
            Ok(Some(fields)) => {
                log::info!("{part}: {} cache field(s)", fields.len());
                report.pivot_caches.insert(part, fields);
            }
            Ok(None) => {}
            // One unreadable definition must not hide the others.
            Err(err) => log::warn!("pivot cache fields: {err}"),
        }
    }
    Ok(())
}

fn shared_strings(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let Some(strings) = with_part(root, SHARED_STRINGS_PART, |doc| {
        elements_named(doc, "t").map(text_content).collect::<Vec<_>>()
    })?
    else {
        return Ok(());
    };

    log::info!("{} shared string text element(s)", strings.len());
    for text in strings {
        report.record_shared_string(text);
    }
    Ok(())
}

fn media_issues(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    for path in files_in(root, MEDIA_DIR, |_| true)? {
        let metadata = fs::metadata(&path).map_err(|source| DependencyError::Io {
            path: path.clone(),
            source,
        })?;
        if metadata.len() != 0 {
            continue;
        }
        if let Some(name) = path.file_name() {
            let name = name.to_string_lossy().into_owned();
            log::warn!("empty media file: {name}");
            report.media_issues.push(name);
        }
    }
    Ok(())
}

fn relationships(root: &Path, report: &mut DiagnosticReport) -> Result<(), DependencyError> {
    let rels_files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("rels"))
        })
        .collect();

    for path in rels_files {
        let Some(rels_part) = part_name_under(root, &path) else {
            continue;
        };
        let parsed = with_part(root, &rels_part, |doc| {
            elements_named(doc, "Relationship")
                .filter(|node| {
                    !node
                        .attribute("TargetMode")
                        .is_some_and(|mode| mode.eq_ignore_ascii_case("External"))
                })
                .filter_map(|node| {
                    Some((
                        node.attribute("Id").unwrap_or_default().to_string(),
                        node.attribute("Target")?.to_string(),
                    ))
                })
                .collect::<Vec<_>>()
        });
        let targets = match parsed {
            Ok(Some(targets)) => targets,
            Ok(None) => continue,
            Err(err) => {
                log::warn!("relationships: {err}");
                continue;
            }
        };

        for (id, target) in targets {
            let Some(resolved) = relationship_target_part(&rels_part, &target) else {
                continue;
            };
            if part_path(root, &resolved).exists() {
                continue;
            }
            log::warn!("{rels_part}: relationship {id} points at missing part {resolved}");
            report.broken_relationships.push(BrokenRelationship {
                rels_part: rels_part.clone(),
                id,
                target,
            });
        }
    }
    Ok(())
}
