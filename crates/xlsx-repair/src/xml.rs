use std::borrow::Cow;

use roxmltree::{Document, Node, ParsingOptions};
use thiserror::Error;

pub const SPREADSHEETML_NS: &str =
    "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid utf-16: {0}")]
    Utf16(#[from] std::string::FromUtf16Error),
    #[error("invalid utf-16 byte length: {0}")]
    OddUtf16Length(usize),
}

#[derive(Debug, Error)]
pub enum XmlError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Parse(#[from] roxmltree::Error),
}

/// Decode raw bytes for an XML part.
///
/// `roxmltree` expects an already-decoded `&str`. Supports UTF-8 with or
/// without a BOM (the BOM is stripped) and UTF-16LE/BE, either via BOM or via
/// a leading `<\0` / `\0<` pair.
pub(crate) fn decode_xml_bytes(bytes: &[u8]) -> Result<Cow<'_, str>, DecodeError> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return Ok(Cow::Borrowed(std::str::from_utf8(rest)?));
    }

    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, Utf16Endian::Little).map(Cow::Owned);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, Utf16Endian::Big).map(Cow::Owned);
    }

    match bytes {
        [b'<', 0x00, ..] => return decode_utf16(bytes, Utf16Endian::Little).map(Cow::Owned),
        [0x00, b'<', ..] => return decode_utf16(bytes, Utf16Endian::Big).map(Cow::Owned),
        _ => {}
    }

    Ok(Cow::Borrowed(std::str::from_utf8(bytes)?))
}

/// Like [`decode_xml_bytes`], but never fails: undecodable input is read as
/// lossy UTF-8.
pub(crate) fn decode_xml_bytes_lossy(bytes: &[u8]) -> Cow<'_, str> {
    match decode_xml_bytes(bytes) {
        Ok(text) => text,
        Err(_) => {
            let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            String::from_utf8_lossy(bytes)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Utf16Endian {
    Little,
    Big,
}

fn decode_utf16(bytes: &[u8], endian: Utf16Endian) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddUtf16Length(bytes.len()));
    }

    let words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| match endian {
            Utf16Endian::Little => u16::from_le_bytes([chunk[0], chunk[1]]),
            Utf16Endian::Big => u16::from_be_bytes([chunk[0], chunk[1]]),
        })
        .collect();

    Ok(String::from_utf16(&words)?)
}

/// Parse an already-decoded XML document.
///
/// DTDs are tolerated: well-formedness is all we check, and some producers
/// emit a `<!DOCTYPE>` in custom XML parts.
pub(crate) fn parse_document(text: &str) -> Result<Document<'_>, roxmltree::Error> {
    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    Document::parse_with_options(text, options)
}

/// Check that `bytes` decode and parse as XML.
pub(crate) fn check_well_formed(bytes: &[u8]) -> Result<(), XmlError> {
    let text = decode_xml_bytes(bytes)?;
    parse_document(&text)?;
    Ok(())
}

/// Concatenated text content of an element (all descendant text nodes).
pub(crate) fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Attribute name in Clark notation (`{namespace}local`) when namespaced.
pub(crate) fn attribute_key(attr: &roxmltree::Attribute<'_, '_>) -> String {
    match attr.namespace() {
        Some(ns) => format!("{{{ns}}}{}", attr.name()),
        None => attr.name().to_string(),
    }
}
