//! Row salvage for malformed worksheet parts.
//!
//! Worksheet damage is usually confined to a truncated or mangled header or
//! footer while the individual `<row>` records survive byte-intact. Instead of
//! attempting general XML repair, we cut out every complete row and wrap the
//! rows in a freshly synthesized minimal worksheet. The wrapper is fixed and
//! rows are embedded as opaque text, so rows that are themselves broken are
//! carried over as-is; callers re-check the result.
//!
//! Two ways of finding rows are available:
//!
//! - [`SalvageStrategy::Markup`] walks the text tag by tag (skipping comments,
//!   CDATA, processing instructions and quoted attribute values) and captures
//!   each span from a `<row` start tag to its `</row>` end tag.
//! - [`SalvageStrategy::Lines`] keeps whole lines, from a line holding a
//!   `<row` start marker through the line holding the matching `</row>`.
//!
//! [`SalvageStrategy::Auto`] uses markup scanning unless the line pass keeps
//! more rows. In every mode a row still open at end of input is dropped.

use std::collections::{BTreeMap, BTreeSet};

use clap::ValueEnum;
use serde::Serialize;

use crate::xml::SPREADSHEETML_NS;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Prefixes that show up on worksheet rows in files written by Excel.
const WELL_KNOWN_PREFIXES: &[(&str, &str)] = &[
    (
        "r",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
    ),
    (
        "mc",
        "http://schemas.openxmlformats.org/markup-compatibility/2006",
    ),
    (
        "x14ac",
        "http://schemas.microsoft.com/office/spreadsheetml/2009/9/ac",
    ),
    (
        "x14",
        "http://schemas.microsoft.com/office/spreadsheetml/2009/9/main",
    ),
    (
        "xr",
        "http://schemas.microsoft.com/office/spreadsheetml/2014/revision",
    ),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SalvageStrategy {
    /// Markup scanning, falling back to lines when it salvages nothing.
    #[default]
    Auto,
    /// Tag-aware scanning of row start/end tags.
    Markup,
    /// Whole-line capture between row marker lines.
    Lines,
}

/// Rows cut out of a damaged worksheet, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salvage {
    pub fragments: Vec<String>,
    /// The strategy that produced `fragments` (never `Auto`).
    pub strategy: SalvageStrategy,
}

/// A rebuilt worksheet document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuiltWorksheet {
    pub document: String,
    pub rows: usize,
    pub strategy: SalvageStrategy,
}

pub fn salvage_rows(text: &str, strategy: SalvageStrategy) -> Salvage {
    match strategy {
        SalvageStrategy::Markup => Salvage {
            fragments: salvage_rows_by_markup(text),
            strategy: SalvageStrategy::Markup,
        },
        SalvageStrategy::Lines => Salvage {
            fragments: salvage_rows_by_lines(text),
            strategy: SalvageStrategy::Lines,
        },
        SalvageStrategy::Auto => {
            let markup = salvage_rows_by_markup(text);
            let lines = salvage_rows_by_lines(text);
            // Markup wins ties; it never keeps fewer rows than the lines pass.
            if !markup.is_empty() && markup.len() >= lines.len() {
                Salvage {
                    fragments: markup,
                    strategy: SalvageStrategy::Markup,
                }
            } else {
                Salvage {
                    fragments: lines,
                    strategy: SalvageStrategy::Lines,
                }
            }
        }
    }
}

/// Salvage rows from `text` and wrap them in a minimal worksheet document.
pub fn rebuild_worksheet(text: &str, strategy: SalvageStrategy) -> RebuiltWorksheet {
    let salvage = salvage_rows(text, strategy);
    let document = wrap_fragments(text, &salvage.fragments);
    RebuiltWorksheet {
        document,
        rows: salvage.fragments.len(),
        strategy: salvage.strategy,
    }
}

/// Capture whole lines from a row start marker through its closing marker.
///
/// Each returned fragment is the concatenation of its lines, line endings
/// included. Lines outside any row span are discarded.
pub fn salvage_rows_by_lines(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current: Option<String> = None;

    for line in text.split_inclusive('\n') {
        match current.as_mut() {
            None => {
                let markers = line_markers(line);
                if !markers.iter().any(|m| m.opens_row()) {
                    continue;
                }
                if row_open_after(&markers, false) {
                    current = Some(line.to_string());
                } else {
                    fragments.push(line.to_string());
                }
            }
            Some(fragment) => {
                fragment.push_str(line);
                let markers = line_markers(line);
                if !markers.is_empty() && !row_open_after(&markers, true) {
                    if let Some(done) = current.take() {
                        fragments.push(done);
                    }
                }
            }
        }
    }

    fragments
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMarker {
    Open,
    SelfClosing,
    Close,
}

impl LineMarker {
    fn opens_row(self) -> bool {
        matches!(self, LineMarker::Open | LineMarker::SelfClosing)
    }
}

fn line_markers(line: &str) -> Vec<LineMarker> {
    let mut markers = Vec::new();
    for (idx, _) in line.match_indices('<') {
        let rest = &line[idx..];
        if let Some(after) = rest.strip_prefix("<row") {
            if !starts_with_name_boundary(after) {
                continue;
            }
            let self_closing = after
                .find('>')
                .is_some_and(|end| after[..end].ends_with('/'));
            markers.push(if self_closing {
                LineMarker::SelfClosing
            } else {
                LineMarker::Open
            });
        } else if let Some(after) = rest.strip_prefix("</row") {
            if after.trim_start().starts_with('>') {
                markers.push(LineMarker::Close);
            }
        }
    }
    markers
}

fn row_open_after(markers: &[LineMarker], mut open: bool) -> bool {
    for marker in markers {
        open = matches!(marker, LineMarker::Open);
    }
    open
}

fn starts_with_name_boundary(after_name: &str) -> bool {
    after_name
        .chars()
        .next()
        .is_some_and(|c| c.is_whitespace() || c == '>' || c == '/')
}

/// Capture each `<row …>…</row>` (or self-closing `<row …/>`) span, tag-aware.
///
/// A row start tag seen while another row is still open means the earlier row
/// lost its end tag; the earlier span is discarded.
pub fn salvage_rows_by_markup(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut open: Option<(usize, String)> = None;

    for tag in Tags::new(text) {
        let raw = &text[tag.start..tag.end];
        match classify_row_tag(raw) {
            Some(RowTag::Start { name, self_closing }) => {
                if self_closing {
                    open = None;
                    fragments.push(raw.to_string());
                } else {
                    open = Some((tag.start, name));
                }
            }
            Some(RowTag::End { name }) => {
                if let Some((start, open_name)) = open.take() {
                    if open_name == name {
                        fragments.push(text[start..tag.end].to_string());
                    }
                }
            }
            None => {}
        }
    }

    fragments
}

#[derive(Debug, PartialEq, Eq)]
enum RowTag {
    Start { name: String, self_closing: bool },
    End { name: String },
}

fn classify_row_tag(raw: &str) -> Option<RowTag> {
    let inner = raw.strip_prefix('<')?.strip_suffix('>')?;
    if let Some(end) = inner.strip_prefix('/') {
        let name = end.trim_end();
        return is_row_name(name).then(|| RowTag::End {
            name: name.to_string(),
        });
    }

    let name_len = inner
        .find(|c: char| c.is_whitespace() || c == '/')
        .unwrap_or(inner.len());
    let name = &inner[..name_len];
    if !is_row_name(name) {
        return None;
    }
    Some(RowTag::Start {
        name: name.to_string(),
        self_closing: inner.ends_with('/'),
    })
}

fn is_row_name(name: &str) -> bool {
    let local = name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name);
    local == "row"
}

/// Byte span of a complete element tag (`<…>`), end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagSpan {
    start: usize,
    end: usize,
}

/// Iterator over complete element tags, skipping comments, CDATA sections,
/// processing instructions and declarations.
///
/// A `<` met before the current tag's closing `>` (outside a comment/CDATA)
/// abandons the broken tag and resumes at that `<`, including from inside an
/// unterminated attribute value. Unterminated comments, CDATA sections, PIs
/// and declarations are abandoned the same way.
struct Tags<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tags<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Position of the first `<` after `start`, or end of input.
    fn next_open_after(&self, start: usize) -> usize {
        self.text[start + 1..]
            .find('<')
            .map_or(self.text.len(), |offset| start + 1 + offset)
    }

    /// Step over a comment, CDATA section, processing instruction or
    /// declaration whose body begins at `body`.
    ///
    /// Comments and CDATA may legally contain `<`; PIs and declarations may
    /// not, so a `<` met first there means the construct is broken. A broken
    /// or unterminated construct is abandoned and scanning resumes at the
    /// next `<`.
    fn skip_construct(&mut self, start: usize, body: usize, terminator: &str, allows_lt: bool) {
        let rest = &self.text[body..];
        let end = rest.find(terminator);
        let stray = if allows_lt { None } else { rest.find('<') };
        self.pos = match (end, stray) {
            (Some(end), Some(stray)) if stray < end => body + stray,
            (Some(end), _) => body + end + terminator.len(),
            (None, _) => self.next_open_after(start),
        };
    }
}

impl Iterator for Tags<'_> {
    type Item = TagSpan;

    fn next(&mut self) -> Option<TagSpan> {
        let bytes = self.text.as_bytes();
        loop {
            let start = self.pos + self.text[self.pos..].find('<')?;
            let rest = &self.text[start..];

            if rest.starts_with("<!--") {
                self.skip_construct(start, start + 4, "-->", true);
                continue;
            }
            if rest.starts_with("<![CDATA[") {
                self.skip_construct(start, start + 9, "]]>", true);
                continue;
            }
            if rest.starts_with("<?") {
                self.skip_construct(start, start + 2, "?>", false);
                continue;
            }
            if rest.starts_with("<!") {
                self.skip_construct(start, start + 2, ">", false);
                continue;
            }

            let mut quote: Option<u8> = None;
            let mut idx = start + 1;
            let mut resume = None;
            let mut end = None;
            while idx < bytes.len() {
                let b = bytes[idx];
                if b == b'<' {
                    resume = Some(idx);
                    break;
                }
                match quote {
                    Some(q) if b == q => quote = None,
                    Some(_) => {}
                    None if b == b'"' || b == b'\'' => quote = Some(b),
                    None if b == b'>' => {
                        end = Some(idx + 1);
                        break;
                    }
                    None => {}
                }
                idx += 1;
            }

            match (end, resume) {
                (Some(end), _) => {
                    self.pos = end;
                    return Some(TagSpan { start, end });
                }
                (None, Some(resume)) => {
                    self.pos = resume;
                }
                (None, None) => {
                    self.pos = self.text.len();
                    return None;
                }
            }
        }
    }
}

/// Wrap salvaged rows in the fixed worksheet document.
///
/// Namespace prefixes used by the rows are declared on the root: first from
/// `xmlns:` declarations found in the damaged `source`, then from a table of
/// well-known SpreadsheetML prefixes.
pub fn wrap_fragments(source: &str, fragments: &[String]) -> String {
    let mut out = String::new();
    out.push_str(XML_DECLARATION);
    out.push('\n');
    out.push_str("<worksheet xmlns=\"");
    out.push_str(SPREADSHEETML_NS);
    out.push('"');

    let used = used_prefixes(fragments);
    if !used.is_empty() {
        let declared = recover_namespace_declarations(source);
        for prefix in &used {
            let uri = declared.get(prefix.as_str()).copied().or_else(|| {
                WELL_KNOWN_PREFIXES
                    .iter()
                    .find(|(p, _)| *p == prefix.as_str())
                    .map(|(_, uri)| *uri)
            });
            if let Some(uri) = uri {
                out.push_str(&format!(" xmlns:{prefix}=\"{uri}\""));
            }
        }
    }

    out.push_str(">\n<sheetData>\n");
    for fragment in fragments {
        out.push_str(fragment);
        if !fragment.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str("</sheetData>\n</worksheet>");
    out
}

fn used_prefixes(fragments: &[String]) -> BTreeSet<String> {
    let mut prefixes = BTreeSet::new();
    for fragment in fragments {
        for tag in Tags::new(fragment) {
            collect_tag_prefixes(&fragment[tag.start..tag.end], &mut prefixes);
        }
    }
    prefixes
}

fn collect_tag_prefixes(tag: &str, out: &mut BTreeSet<String>) {
    fn note(token: &str, out: &mut BTreeSet<String>) {
        if let Some((prefix, local)) = token.split_once(':') {
            if !prefix.is_empty() && !local.is_empty() && prefix != "xml" && prefix != "xmlns" {
                out.insert(prefix.to_string());
            }
        }
    }

    let inner = tag.trim_start_matches('<').trim_start_matches('/');
    let mut quote: Option<char> = None;
    let mut token = String::new();
    for ch in inner.chars() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                token.clear();
            }
            c if c.is_whitespace() || c == '=' || c == '/' || c == '>' => {
                note(&token, out);
                token.clear();
            }
            c => token.push(c),
        }
    }
    note(&token, out);
}

/// `prefix -> uri` for every `xmlns:prefix="uri"` in `source` (first wins).
fn recover_namespace_declarations(source: &str) -> BTreeMap<&str, &str> {
    let mut declared = BTreeMap::new();
    for (idx, _) in source.match_indices("xmlns:") {
        let rest = &source[idx + "xmlns:".len()..];
        let Some(eq) = rest.find('=') else {
            continue;
        };
        let prefix = rest[..eq].trim();
        if prefix.is_empty() || prefix.contains(|c: char| c.is_whitespace() || c == '<' || c == '>')
        {
            continue;
        }
        let value = rest[eq + 1..].trim_start();
        let Some(quote) = value.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let value = &value[1..];
        let Some(end) = value.find(quote) else {
            continue;
        };
        let uri = &value[..end];
        if uri.contains(['"', '<']) {
            continue;
        }
        declared.entry(prefix).or_insert(uri);
    }
    declared
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const DAMAGED_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\n\
<sheetData>\n\
<row r=\"1\"><c r=\"A1\"><v>1</v></c></row>\n\
<row r=\"2\">\n\
<c r=\"A2\"><v>2</v></c>\n\
</row>\n\
</sheetData>\n\
<pageMargins left=\"0.7\" \n\
</worksheet>\n";

    #[test]
    fn lines_keep_whole_row_lines_in_order() {
        let fragments = salvage_rows_by_lines(DAMAGED_HEADER);
        assert_eq!(
            fragments,
            vec![
                "<row r=\"1\"><c r=\"A1\"><v>1</v></c></row>\n".to_string(),
                "<row r=\"2\">\n<c r=\"A2\"><v>2</v></c>\n</row>\n".to_string(),
            ]
        );
    }

    #[test]
    fn markup_matches_lines_on_pretty_printed_rows() {
        let markup = salvage_rows_by_markup(DAMAGED_HEADER);
        assert_eq!(
            markup,
            vec![
                "<row r=\"1\"><c r=\"A1\"><v>1</v></c></row>".to_string(),
                "<row r=\"2\">\n<c r=\"A2\"><v>2</v></c>\n</row>".to_string(),
            ]
        );
    }

    #[test]
    fn truncated_trailing_row_is_dropped() {
        let text = "<sheetData>\n<row r=\"1\"><c><v>1</v></c></row>\n<row r=\"2\">\n<c><v>2";
        assert_eq!(salvage_rows_by_lines(text).len(), 1);
        assert_eq!(salvage_rows_by_markup(text).len(), 1);
    }

    #[test]
    fn row_breaks_and_similar_names_are_not_rows() {
        let text = "<rowBreaks count=\"1\">\n<brk id=\"3\"/>\n</rowBreaks>\n";
        assert!(salvage_rows_by_lines(text).is_empty());
        assert!(salvage_rows_by_markup(text).is_empty());
    }

    #[test]
    fn markup_ignores_markers_in_comments_and_cdata() {
        let text = "<!-- <row r=\"9\"> --><sheetData>\
<row r=\"1\" ht=\"a>b\"><c><v>1</v></c></row>\
<![CDATA[</row>]]></sheetData>";
        assert_eq!(
            salvage_rows_by_markup(text),
            vec!["<row r=\"1\" ht=\"a>b\"><c><v>1</v></c></row>".to_string()]
        );
    }

    #[test]
    fn markup_handles_single_line_documents() {
        let text = "<?xml version=\"1.0\"?><worksheet xmlns=\"urn:x\"><sheetData>\
<row r=\"1\"><c><v>1</v></c></row><row r=\"2\"/><row r=\"3\"><c><v>3</v></c></row>\
</sheetData><broken";
        let fragments = salvage_rows_by_markup(text);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[1], "<row r=\"2\"/>");
    }

    #[test]
    fn markup_drops_row_whose_end_tag_went_missing() {
        let text = "<row r=\"1\"><c><v>1</v></c>\n<row r=\"2\"><c><v>2</v></c></row>";
        assert_eq!(
            salvage_rows_by_markup(text),
            vec!["<row r=\"2\"><c><v>2</v></c></row>".to_string()]
        );
    }

    #[test]
    fn broken_tag_does_not_hide_following_rows() {
        let text = "<sheetData><c r=\"A1><row r=\"1\"><v>1</v></row></sheetData>";
        assert_eq!(
            salvage_rows_by_markup(text),
            vec!["<row r=\"1\"><v>1</v></row>".to_string()]
        );
    }

    #[test]
    fn auto_falls_back_to_lines_when_markup_finds_nothing() {
        assert_eq!(
            salvage_rows("<sheetData></sheetData>", SalvageStrategy::Auto).strategy,
            SalvageStrategy::Lines
        );
        assert_eq!(
            salvage_rows(DAMAGED_HEADER, SalvageStrategy::Auto).strategy,
            SalvageStrategy::Markup
        );
    }

    const ROW_1: &str = "<row r=\"1\"><c><v>1</v></c></row>";
    const ROW_2: &str = "<row r=\"2\"><c><v>2</v></c></row>";

    fn assert_both_rows_kept(text: &str) {
        let expected = vec![ROW_1.to_string(), ROW_2.to_string()];
        assert_eq!(salvage_rows_by_markup(text), expected);
        let auto = salvage_rows(text, SalvageStrategy::Auto);
        assert_eq!(auto.fragments.len(), 2);
    }

    #[test]
    fn unterminated_comment_between_rows_keeps_later_rows() {
        assert_both_rows_kept(&format!("<sheetData>\n{ROW_1}\n<!-- spacer --\n{ROW_2}\n"));
    }

    #[test]
    fn unterminated_processing_instruction_keeps_later_rows() {
        assert_both_rows_kept(&format!("<sheetData>\n{ROW_1}\n<?mso-note broken\n{ROW_2}\n"));
    }

    #[test]
    fn broken_declaration_does_not_swallow_next_row() {
        assert_both_rows_kept(&format!("<sheetData><!broken\n{ROW_1}\n{ROW_2}\n"));
    }

    #[test]
    fn unterminated_cdata_keeps_later_rows() {
        assert_both_rows_kept(&format!("<sheetData>{ROW_1}<![CDATA[lost{ROW_2}"));
    }

    #[test]
    fn auto_never_keeps_fewer_rows_than_lines() {
        // The comment closes only after row 2, so markup sees a single row.
        let text = format!("<sheetData>\n{ROW_1}\n<!-- note\n{ROW_2}\n<!-- tail -->\n");
        assert_eq!(salvage_rows_by_markup(&text).len(), 1);

        let auto = salvage_rows(&text, SalvageStrategy::Auto);
        assert_eq!(auto.strategy, SalvageStrategy::Lines);
        assert_eq!(auto.fragments.len(), 2);
    }

    #[test]
    fn rebuilt_worksheet_parses_and_keeps_rows_in_order() {
        let rebuilt = rebuild_worksheet(DAMAGED_HEADER, SalvageStrategy::Lines);
        assert_eq!(rebuilt.rows, 2);

        let doc = crate::xml::parse_document(&rebuilt.document).expect("rebuilt worksheet parses");
        let root = doc.root_element();
        assert_eq!(root.tag_name().name(), "worksheet");
        assert_eq!(root.tag_name().namespace(), Some(SPREADSHEETML_NS));

        let sheet_data: Vec<_> = root.children().filter(|n| n.is_element()).collect();
        assert_eq!(sheet_data.len(), 1);
        assert_eq!(sheet_data[0].tag_name().name(), "sheetData");

        let rows: Vec<_> = sheet_data[0]
            .children()
            .filter(|n| n.is_element())
            .map(|n| (n.tag_name().name(), n.attribute("r")))
            .collect();
        assert_eq!(rows, vec![("row", Some("1")), ("row", Some("2"))]);
    }

    #[test]
    fn wrapper_is_fixed_when_rows_use_no_prefixes() {
        let document = wrap_fragments("", &["<row r=\"1\"/>".to_string()]);
        assert_eq!(
            document,
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\n\
<sheetData>\n<row r=\"1\"/>\n</sheetData>\n</worksheet>"
        );
    }

    #[test]
    fn wrapper_declares_prefixes_used_by_rows() {
        let source = "<worksheet xmlns:x14ac=\"urn:recovered\" xmlns:mc='urn:mc'>\n\
<row r=\"1\" x14ac:dyDescent=\"0.25\" xr:uid=\"{1}\"><c r=\"A1\"/></row>\n";
        let rebuilt = rebuild_worksheet(source, SalvageStrategy::Markup);
        assert!(rebuilt.document.contains("xmlns:x14ac=\"urn:recovered\""));
        assert!(rebuilt.document.contains(
            "xmlns:xr=\"http://schemas.microsoft.com/office/spreadsheetml/2014/revision\""
        ));
        assert!(!rebuilt.document.contains("xmlns:mc"));
        crate::xml::parse_document(&rebuilt.document).expect("prefixed rows parse");
    }

    #[test]
    fn no_rows_yields_empty_sheet_data() {
        let rebuilt = rebuild_worksheet("garbage", SalvageStrategy::Auto);
        assert_eq!(rebuilt.rows, 0);
        crate::xml::parse_document(&rebuilt.document).expect("empty worksheet parses");
    }
}
