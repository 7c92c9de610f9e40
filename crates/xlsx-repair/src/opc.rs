//! Open Packaging Convention path helpers.

use std::borrow::Cow;
use std::path::Path;

/// Normalize an OPC part name: strip leading `/`, convert `\` to `/`, and
/// resolve `.`/`..` segments.
pub(crate) fn normalize_part_name(part_name: &str) -> String {
    normalize_opc_path(part_name.trim_start_matches(['/', '\\']))
}

pub(crate) fn normalize_opc_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            _ => out.push(segment),
        }
    }
    out.join("/")
}

/// Part name of `path` relative to the extraction `root`, with forward slashes.
///
/// Returns `None` when `path` does not live under `root`.
pub(crate) fn part_name_under(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Part a non-external relationship in `rels_part` points at, as it would be
/// named under the extraction root.
///
/// The target's fragment is dropped and its percent escapes decoded. Absolute
/// targets start at the package root; relative ones start at the source part's
/// directory. Returns `None` when the target names no part (a bare fragment in
/// the package-level `_rels/.rels`).
pub(crate) fn relationship_target_part(rels_part: &str, target: &str) -> Option<String> {
    let path = target.split_once('#').map_or(target, |(path, _)| path);
    let path = percent_decode(path).replace('\\', "/");
    let (source_dir, source_file) = split_rels_part(rels_part);

    let part = if path.is_empty() {
        // A bare fragment refers back to the source part.
        normalize_opc_path(&format!("{source_dir}{source_file}"))
    } else if let Some(absolute) = path.strip_prefix('/') {
        normalize_opc_path(absolute)
    } else if path
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("xl/"))
    {
        // Producers often write `xl/media/image1.png` inside
        // `xl/_rels/workbook.xml.rels`, meaning the package root.
        normalize_opc_path(&path)
    } else {
        normalize_opc_path(&format!("{source_dir}{path}"))
    };
    (!part.is_empty()).then_some(part)
}

/// Split a rels part name into the source part's directory (with a trailing
/// `/`, or empty at the package root) and the source part's file name.
///
/// `xl/worksheets/_rels/sheet1.xml.rels` gives `("xl/worksheets/", "sheet1.xml")`
/// and `_rels/.rels` gives `("", "")`.
fn split_rels_part(rels_part: &str) -> (&str, &str) {
    let (dir, file) = if let Some(file) = rels_part.strip_prefix("_rels/") {
        ("", file)
    } else if let Some(pos) = rels_part.rfind("/_rels/") {
        (&rels_part[..pos + 1], &rels_part[pos + "/_rels/".len()..])
    } else {
        ("", rels_part)
    };
    (dir, file.strip_suffix(".rels").unwrap_or(file))
}

/// Decode `%XX` escapes. Malformed escapes are kept literally, and so is the
/// whole input when the decoded bytes are not UTF-8.
fn percent_decode(text: &str) -> Cow<'_, str> {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    if !text.contains('%') {
        return Cow::Borrowed(text);
    }
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = match bytes.get(i + 1..i + 3) {
            Some(&[hi, lo]) if bytes[i] == b'%' => hex_val(hi).zip(hex_val(lo)),
            _ => None,
        };
        match escaped {
            Some((hi, lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    match String::from_utf8(out) {
        Ok(decoded) => Cow::Owned(decoded),
        Err(_) => Cow::Borrowed(text),
    }
}
