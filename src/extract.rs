//! Format-dispatched text extraction for uploaded documents (DOCX, PDF, TXT).
//!
//! Dispatch is by file extension. DOCX goes through an intermediate HTML
//! rendering (paragraphs, headings, list items, tables, links, images) that
//! is then flattened to plain text, so paragraph breaks survive while images
//! and link targets are dropped. PDF text is extracted page by page; a page
//! that fails contributes an empty string instead of aborting the document.

use std::io::Read;
use std::path::Path;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

use crate::error::{AdvisorError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Docx,
    Pdf,
    Txt,
}

/// Resolve the document format from a file name.
///
/// Upload intake calls this before reading any content so that unsupported
/// files are rejected without a parse attempt.
pub fn detect_format(filename: &str) -> Result<DocumentFormat> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("docx") => Ok(DocumentFormat::Docx),
        Some("pdf") => Ok(DocumentFormat::Pdf),
        Some("txt") => Ok(DocumentFormat::Txt),
        Some(other) => Err(AdvisorError::UnsupportedFormat(format!(".{}", other))),
        None => Err(AdvisorError::UnsupportedFormat(format!(
            "{} has no extension",
            filename
        ))),
    }
}

/// Extract plain text from an uploaded file.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    match detect_format(filename)? {
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Txt => extract_txt(bytes),
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn extract_txt(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        AdvisorError::Extraction(format!(
            "text file is not valid UTF-8 (transcode before upload): {}",
            e
        ))
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| AdvisorError::Extraction(format!("PDF could not be loaded: {}", e)))?;

    let mut out = String::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => out.push_str(&text),
            Err(e) => {
                tracing::warn!(page = page_number, error = %e, "PDF page extraction failed");
            }
        }
        out.push('\n');
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| AdvisorError::Extraction(format!("DOCX is not a valid archive: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| AdvisorError::Extraction("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| AdvisorError::Extraction(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(AdvisorError::Extraction(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    let html = docx_to_html(&doc_xml)?;
    html_to_text(&html)
}

/// Paragraph kind decided from `w:pPr` once the paragraph closes.
#[derive(Clone, Copy)]
enum ParagraphKind {
    Body,
    Heading(u8),
    ListItem,
}

impl ParagraphKind {
    fn tag(&self) -> String {
        match self {
            ParagraphKind::Body => "p".to_string(),
            ParagraphKind::Heading(level) => format!("h{}", level),
            ParagraphKind::ListItem => "li".to_string(),
        }
    }
}

fn xml_err(e: impl std::fmt::Display) -> AdvisorError {
    AdvisorError::Extraction(format!("malformed document markup: {}", e))
}

fn attr_value(e: &BytesStart, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

fn heading_level(style: &str) -> Option<u8> {
    let style = style.to_ascii_lowercase().replace(' ', "");
    if style == "title" {
        return Some(1);
    }
    style
        .strip_prefix("heading")
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=6).contains(n))
}

/// Render WordprocessingML as a small XHTML fragment.
fn docx_to_html(xml: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut html = String::new();
    let mut para = String::new();
    let mut kind = ParagraphKind::Body;
    let mut in_para = false;
    let mut in_text = false;
    let mut drawing_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(xml_err)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.local_name();
                if drawing_depth > 0 {
                    if !is_empty {
                        drawing_depth += 1;
                    }
                    continue;
                }
                match name.as_ref() {
                    b"p" => {
                        in_para = true;
                        kind = ParagraphKind::Body;
                        para.clear();
                    }
                    b"pStyle" => {
                        if let Some(level) = attr_value(e, b"val").as_deref().and_then(heading_level)
                        {
                            kind = ParagraphKind::Heading(level);
                        }
                    }
                    b"numPr" => {
                        if !matches!(kind, ParagraphKind::Heading(_)) {
                            kind = ParagraphKind::ListItem;
                        }
                    }
                    b"t" if !is_empty => in_text = true,
                    b"tab" if in_para => para.push('\t'),
                    b"br" | b"cr" if in_para => para.push_str("<br/>"),
                    b"hyperlink" if !is_empty => para.push_str("<a>"),
                    b"drawing" | b"pict" => {
                        para.push_str("<img/>");
                        if !is_empty {
                            drawing_depth = 1;
                        }
                    }
                    b"tbl" if !is_empty => html.push_str("<table>"),
                    b"tr" if !is_empty => html.push_str("<tr>"),
                    b"tc" if !is_empty => html.push_str("<td>"),
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if in_text && drawing_depth == 0 {
                    let text = t.unescape().map_err(xml_err)?.into_owned();
                    para.push_str(&escape(text.as_str()));
                }
            }
            Event::End(ref e) => {
                if drawing_depth > 0 {
                    drawing_depth -= 1;
                    continue;
                }
                match e.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"hyperlink" => para.push_str("</a>"),
                    b"p" => {
                        let tag = kind.tag();
                        html.push_str(&format!("<{tag}>{para}</{tag}>"));
                        para.clear();
                        in_para = false;
                    }
                    b"tc" => html.push_str("</td>"),
                    b"tr" => html.push_str("</tr>"),
                    b"tbl" => html.push_str("</table>"),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(format!("<html>{}</html>", html))
}

/// Flatten the XHTML produced by [`docx_to_html`] into plain text.
///
/// Blocks are separated by a blank line; headings get `#` prefixes, list
/// items `* `, table rows are `cell | cell`. Link text is kept, images are
/// dropped.
fn html_to_text(html: &str) -> Result<String> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().trim_text(false);

    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prefix = String::new();
    let mut in_cell = false;
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" => {
                    let level = (e.local_name().as_ref()[1] - b'0') as usize;
                    prefix = format!("{} ", "#".repeat(level));
                }
                b"li" => prefix = "* ".to_string(),
                b"p" => prefix.clear(),
                b"td" => {
                    in_cell = true;
                    cell.clear();
                }
                b"tr" => row.clear(),
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"br" {
                    current.push('\n');
                }
            }
            Event::Text(t) => {
                current.push_str(&t.unescape().map_err(xml_err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"p" | b"li" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" => {
                    let text = current.trim().to_string();
                    current.clear();
                    if text.is_empty() {
                        continue;
                    }
                    if in_cell {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(&text);
                    } else {
                        blocks.push(format!("{}{}", prefix, text));
                    }
                    prefix.clear();
                }
                b"td" => {
                    in_cell = false;
                    row.push(cell.trim().to_string());
                }
                b"tr" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        blocks.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(blocks.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_extension_rejected_before_parsing() {
        let err = extract_text(b"whatever", "contract.rtf").unwrap_err();
        assert!(matches!(err, AdvisorError::UnsupportedFormat(_)));
        let err = extract_text(b"whatever", "README").unwrap_err();
        assert!(matches!(err, AdvisorError::UnsupportedFormat(_)));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(detect_format("A.DOCX").unwrap(), DocumentFormat::Docx);
        assert_eq!(detect_format("scan.Pdf").unwrap(), DocumentFormat::Pdf);
    }

    #[test]
    fn txt_round_trips_utf8() {
        let text = "Договор поставки\n\nParty A - Party B";
        assert_eq!(extract_text(text.as_bytes(), "notes.txt").unwrap(), text);
    }

    #[test]
    fn txt_with_invalid_utf8_is_extraction_error() {
        let err = extract_text(&[0xff, 0xfe, 0x41], "legacy.txt").unwrap_err();
        assert!(matches!(err, AdvisorError::Extraction(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", "x.pdf").unwrap_err();
        assert!(matches!(err, AdvisorError::Extraction(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", "x.docx").unwrap_err();
        assert!(matches!(err, AdvisorError::Extraction(_)));
    }

    #[test]
    fn docx_paragraphs_are_separated_by_blank_lines() {
        let docx = docx_with_body(
            "<w:p><w:r><w:t>Service Agreement</w:t></w:r></w:p>\
             <w:p><w:r><w:t xml:space=\"preserve\">between A </w:t></w:r><w:r><w:t>and B</w:t></w:r></w:p>",
        );
        let text = extract_text(&docx, "contract.docx").unwrap();
        assert_eq!(text, "Service Agreement\n\nbetween A and B");
    }

    #[test]
    fn docx_headings_lists_and_tables() {
        let docx = docx_with_body(
            "<w:p><w:pPr><w:pStyle w:val=\"Heading2\"/></w:pPr><w:r><w:t>Payment</w:t></w:r></w:p>\
             <w:p><w:pPr><w:numPr><w:ilvl w:val=\"0\"/></w:numPr></w:pPr><w:r><w:t>Net 30</w:t></w:r></w:p>\
             <w:tbl><w:tr><w:tc><w:p><w:r><w:t>Party</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Role</w:t></w:r></w:p></w:tc></w:tr></w:tbl>",
        );
        let text = extract_text(&docx, "c.docx").unwrap();
        assert_eq!(text, "## Payment\n\n* Net 30\n\nParty | Role");
    }

    #[test]
    fn docx_drops_images_and_keeps_link_text() {
        let docx = docx_with_body(
            "<w:p><w:r><w:drawing><wp:inline xmlns:wp=\"urn:wp\"><wp:docPr name=\"logo\"/></wp:inline></w:drawing></w:r>\
             <w:hyperlink><w:r><w:t>see terms</w:t></w:r></w:hyperlink></w:p>",
        );
        let text = extract_text(&docx, "c.docx").unwrap();
        assert_eq!(text, "see terms");
    }

    #[test]
    fn docx_escaped_entities_survive() {
        let docx = docx_with_body("<w:p><w:r><w:t>A &amp; B &lt;Ltd&gt;</w:t></w:r></w:p>");
        assert_eq!(extract_text(&docx, "c.docx").unwrap(), "A & B <Ltd>");
    }

    #[test]
    fn docx_without_document_xml_is_extraction_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_text(&buf, "c.docx").unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }
}
