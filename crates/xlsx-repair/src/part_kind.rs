use std::fmt;

use serde::Serialize;

/// High-level category for a part (file inside the ZIP/OPC package).
///
/// Used to decide which corrupt parts have a repair strategy and to group
/// findings in the diagnostic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PartKind {
    ContentTypes,
    Rels,
    DocProps,
    Workbook,
    Worksheet,
    Styles,
    SharedStrings,
    Theme,
    CalcChain,
    Connections,
    SlicerCache,
    Pivot,
    Media,
    Drawings,
    Charts,
    Tables,
    Other,
}

impl PartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PartKind::ContentTypes => "content_types",
            PartKind::Rels => "rels",
            PartKind::DocProps => "doc_props",
            PartKind::Workbook => "workbook",
            PartKind::Worksheet => "worksheet",
            PartKind::Styles => "styles",
            PartKind::SharedStrings => "shared_strings",
            PartKind::Theme => "theme",
            PartKind::CalcChain => "calc_chain",
            PartKind::Connections => "connections",
            PartKind::SlicerCache => "slicer_cache",
            PartKind::Pivot => "pivot",
            PartKind::Media => "media",
            PartKind::Drawings => "drawings",
            PartKind::Charts => "charts",
            PartKind::Tables => "tables",
            PartKind::Other => "other",
        }
    }
}

impl fmt::Display for PartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a part name into a [`PartKind`].
///
/// Classification is shape based: it follows the directory conventions Excel
/// uses (e.g. `xl/worksheets/` for worksheets) and treats every `.rels` part
/// as [`PartKind::Rels`]. Names are normalized first (leading `/` stripped,
/// `\` converted to `/`).
pub fn classify_part(part_name: &str) -> PartKind {
    let part = crate::opc::normalize_part_name(part_name);

    if part.eq_ignore_ascii_case("[Content_Types].xml") {
        return PartKind::ContentTypes;
    }

    let lower = part.to_ascii_lowercase();
    let part = lower.as_str();

    if part.ends_with(".rels") {
        return PartKind::Rels;
    }

    if part.starts_with("docprops/") {
        return PartKind::DocProps;
    }

    if part == "xl/workbook.xml" {
        return PartKind::Workbook;
    }

    // Dialog and macro sheets share the worksheet `<sheetData>/<row>` layout.
    if part.starts_with("xl/worksheets/")
        || part.starts_with("xl/dialogsheets/")
        || part.starts_with("xl/macrosheets/")
    {
        return PartKind::Worksheet;
    }

    if part == "xl/styles.xml" || part == "xl/tablestyles.xml" {
        return PartKind::Styles;
    }

    if part == "xl/sharedstrings.xml" {
        return PartKind::SharedStrings;
    }

    if part.starts_with("xl/theme/") {
        return PartKind::Theme;
    }

    if part == "xl/calcchain.xml" {
        return PartKind::CalcChain;
    }

    if part == "xl/connections.xml" {
        return PartKind::Connections;
    }

    if part.starts_with("xl/slicercaches/") {
        return PartKind::SlicerCache;
    }

    if part.starts_with("xl/pivot") {
        return PartKind::Pivot;
    }

    if part.starts_with("xl/media/") {
        return PartKind::Media;
    }

    if part.starts_with("xl/drawings/") {
        return PartKind::Drawings;
    }

    if part.starts_with("xl/charts/") || part.starts_with("xl/chartsheets/") {
        return PartKind::Charts;
    }

    if part.starts_with("xl/tables/") {
        return PartKind::Tables;
    }

    PartKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_parts() {
        let cases = [
            ("[Content_Types].xml", PartKind::ContentTypes),
            ("_rels/.rels", PartKind::Rels),
            ("xl/_rels/workbook.xml.rels", PartKind::Rels),
            ("docProps/core.xml", PartKind::DocProps),
            ("xl/workbook.xml", PartKind::Workbook),
            ("xl/worksheets/sheet1.xml", PartKind::Worksheet),
            ("xl/sharedStrings.xml", PartKind::SharedStrings),
            ("xl/connections.xml", PartKind::Connections),
            ("xl/slicerCaches/slicerCache1.xml", PartKind::SlicerCache),
            ("xl/pivotCache/pivotCacheDefinition1.xml", PartKind::Pivot),
            ("xl/pivotTables/pivotTable1.xml", PartKind::Pivot),
            ("xl/media/image1.png", PartKind::Media),
            ("customXml/item1.xml", PartKind::Other),
        ];
        for (part, expected) in cases {
            assert_eq!(classify_part(part), expected, "part {part}");
        }
    }

    #[test]
    fn normalizes_before_classifying() {
        assert_eq!(
            classify_part("/xl\\worksheets\\sheet2.xml"),
            PartKind::Worksheet
        );
        assert_eq!(classify_part("/XL/Workbook.xml"), PartKind::Workbook);
    }
}
