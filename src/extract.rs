//! Plain-text extraction for uploaded documents.
//!
//! The format is chosen from the file extension: `txt`/`md` are decoded as
//! UTF-8, `pdf` goes through `pdf-extract`, and `docx`/`pptx` are read as
//! OOXML zip archives. Paragraphs become lines so the chunker can see
//! headings; every pptx slide starts with a `SLIDE n` line.
//!
//! Images are rejected: OCR is not supported.

use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "gif", "webp"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
    Docx,
    Pptx,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "txt" | "md" => Ok(DocumentKind::Text),
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "pptx" => Ok(DocumentKind::Pptx),
            ext if IMAGE_EXTENSIONS.contains(&ext) => Err(ExtractError::Unsupported(format!(
                "{ext} (image text recognition is not supported)"
            ))),
            "" => Err(ExtractError::Unsupported("file has no extension".to_string())),
            other => Err(ExtractError::Unsupported(other.to_string())),
        }
    }
}

/// Extract plain text from an uploaded file.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    match DocumentKind::from_filename(filename)? {
        DocumentKind::Text => Ok(decode_text(bytes)),
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::Pptx => extract_pptx(bytes),
    }
}

/// Lossy UTF-8 decode without a leading byte-order mark.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_paragraphs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = String::new();
    for (position, (_, name)) in slides.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_paragraphs(&xml)?;
        if text.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("SLIDE {}\n", position + 1));
        out.push_str(&text);
    }
    Ok(out)
}

/// Text of every `<*:t>` element, one line per `<*:p>` paragraph.
///
/// Works for both WordprocessingML (`w:p`/`w:t`) and DrawingML
/// (`a:p`/`a:t`), which share local names.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut line = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                line.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        out.push_str(trimmed);
                        out.push('\n');
                    }
                    line.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let trimmed = line.trim();
    if !trimmed.is_empty() {
        out.push_str(trimmed);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_filename("notes.TXT").unwrap(), DocumentKind::Text);
        assert_eq!(DocumentKind::from_filename("a.b.md").unwrap(), DocumentKind::Text);
        assert_eq!(DocumentKind::from_filename("deck.pptx").unwrap(), DocumentKind::Pptx);
        assert!(matches!(
            DocumentKind::from_filename("scan.png"),
            Err(ExtractError::Unsupported(_))
        ));
        assert!(matches!(
            DocumentKind::from_filename("archive.tar"),
            Err(ExtractError::Unsupported(_))
        ));
        assert!(DocumentKind::from_filename("README").is_err());
    }

    #[test]
    fn test_plain_text_strips_bom() {
        let text = extract_text(b"\xEF\xBB\xBFCS101 teaches Algorithms.", "notes.txt").unwrap();
        assert_eq!(text, "CS101 teaches Algorithms.");
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", "paper.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", "essay.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_docx_paragraphs_become_lines() {
        let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>INTRODUCTION</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">CS101 teaches </w:t></w:r><w:r><w:t>Algorithms &amp; Data.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", document)]);
        let text = extract_text(&bytes, "essay.docx").unwrap();
        assert_eq!(text, "INTRODUCTION\nCS101 teaches Algorithms & Data.\n");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |body: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{body}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
            )
        };
        let s1 = slide("Promotion Mix");
        let s2 = slide("Advertising is paid communication.");
        let s10 = slide("Summary of the course.");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);

        let text = extract_text(&bytes, "deck.pptx").unwrap();
        assert_eq!(
            text,
            "SLIDE 1\nPromotion Mix\nSLIDE 2\nAdvertising is paid communication.\nSLIDE 3\nSummary of the course.\n"
        );
    }
}
