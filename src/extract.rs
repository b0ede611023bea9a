//! Text extraction from raw document payloads.
//!
//! Every function here is a pure transform from bytes to a UTF-8 string.
//! PDFs go through `pdf_oxide` first and `lopdf` second; plain text is
//! decoded with the first encoding that accepts the bytes; DOCX files are
//! read straight out of the `word/document.xml` part of the archive.

use std::{
    borrow::Cow,
    io::{Cursor, Read},
    path::Path,
};

use quick_xml::{Reader, events::Event};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Supported document kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Text,
    Docx,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [Self::Pdf, Self::Text, Self::Docx];

    /// Resolve a MIME type, file name or bare extension into a source type.
    ///
    /// # Examples
    ///
    /// ```
    /// use docrag::extract::SourceType;
    ///
    /// assert_eq!(SourceType::from_hint("application/pdf").unwrap(), SourceType::Pdf);
    /// assert_eq!(SourceType::from_hint("Report.DOCX").unwrap(), SourceType::Docx);
    /// assert_eq!(SourceType::from_hint("text/plain; charset=utf-8").unwrap(), SourceType::Text);
    /// assert!(SourceType::from_hint("image/png").is_err());
    /// ```
    pub fn from_hint(hint: &str) -> Result<Self> {
        let lower = hint.trim().to_ascii_lowercase();
        // MIME parameters follow the first `;`; file names may contain one.
        let essence = lower.split(';').next().unwrap_or_default().trim();
        let extension = Path::new(&lower)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension);

        let detected = match essence {
            "application/pdf" => Some(Self::Pdf),
            DOCX_MIME => Some(Self::Docx),
            _ => extension
                .or_else(|| essence.starts_with("text/").then_some(Self::Text))
                .or_else(|| Self::from_extension(&lower)),
        };

        detected.ok_or_else(|| Error::UnsupportedFormat {
            hint: hint.to_string(),
        })
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" => Some(Self::Text),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Docx => "docx",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
            Self::Docx => "docx",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character encodings tried when decoding plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    /// UTF-16 with a byte-order mark (either endianness).
    Utf16,
    Windows1252,
    Latin1,
}

/// Bytes left undefined by Windows-1252.
const WINDOWS_1252_UNDEFINED: [u8; 5] = [0x81, 0x8d, 0x8f, 0x90, 0x9d];

impl TextEncoding {
    pub const DEFAULT_ORDER: [TextEncoding; 4] =
        [Self::Utf8, Self::Utf16, Self::Windows1252, Self::Latin1];

    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16" | "utf16" => Some(Self::Utf16),
            "windows-1252" | "cp1252" => Some(Self::Windows1252),
            "latin-1" | "latin1" | "iso-8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16 => "utf-16",
            Self::Windows1252 => "windows-1252",
            Self::Latin1 => "latin-1",
        }
    }

    /// Decode `bytes`, or `None` if they are not valid in this encoding.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            Self::Utf8 => {
                let body = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
                encoding_rs::UTF_8
                    .decode_without_bom_handling_and_without_replacement(body)
            }
            Self::Utf16 => {
                let (encoding, bom_len) = encoding_rs::Encoding::for_bom(bytes)?;
                if encoding == encoding_rs::UTF_8 {
                    return None;
                }
                encoding.decode_without_bom_handling_and_without_replacement(
                    &bytes[bom_len..],
                )
            }
            Self::Windows1252 => {
                if bytes.iter().any(|b| WINDOWS_1252_UNDEFINED.contains(b)) {
                    return None;
                }
                encoding_rs::WINDOWS_1252
                    .decode_without_bom_handling_and_without_replacement(bytes)
            }
            Self::Latin1 => {
                Some(Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()))
            }
        }
    }
}

/// Convert a raw payload into UTF-8 text.
pub fn extract(
    bytes: &[u8],
    source_type: SourceType,
    encodings: &[TextEncoding],
) -> Result<String> {
    match source_type {
        SourceType::Pdf => extract_pdf(bytes),
        SourceType::Text => decode_text(bytes, encodings),
        SourceType::Docx => extract_docx(bytes),
    }
}

/// Decode plain text with the first encoding that accepts the bytes.
pub fn decode_text(bytes: &[u8], encodings: &[TextEncoding]) -> Result<String> {
    for encoding in encodings {
        if let Some(text) = encoding.decode(bytes) {
            tracing::debug!(encoding = encoding.label(), "decoded plain text");
            return Ok(text.into_owned());
        }
    }

    Err(Error::UndecodableText {
        tried: encodings
            .iter()
            .map(TextEncoding::label)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Extract visible PDF text, one page after another.
///
/// A parse failure (or a blank result) from the primary parser is retried
/// with the secondary one before giving up.
pub fn extract_pdf(bytes: &[u8]) -> Result<String> {
    first_readable(|| pdf_oxide_extract(bytes), || lopdf_extract(bytes))
}

/// Run `primary`, and `secondary` when `primary` errors or finds no text.
///
/// A document either parser could read but that holds no text is empty,
/// not corrupt. Only when both parsers error is it [`Error::CorruptDocument`].
fn first_readable<P, S>(primary: P, secondary: S) -> Result<String>
where
    P: FnOnce() -> std::result::Result<String, String>,
    S: FnOnce() -> std::result::Result<String, String>,
{
    let primary = match primary() {
        Ok(text) if !text.trim().is_empty() => return Ok(text),
        other => other,
    };
    match &primary {
        Ok(_) => tracing::debug!("pdf_oxide extracted no text, trying lopdf"),
        Err(e) => tracing::warn!(
            error = %e,
            "primary PDF parser failed, falling back to lopdf"
        ),
    }

    match (primary, secondary()) {
        (Err(_), Ok(text)) => Ok(text),
        (Ok(primary_text), Ok(text)) => {
            Ok(if text.trim().is_empty() { primary_text } else { text })
        }
        (Ok(primary_text), Err(e)) => {
            tracing::debug!(error = %e, "lopdf failed on a readable PDF");
            Ok(primary_text)
        }
        (Err(primary_err), Err(fallback_err)) => Err(Error::CorruptDocument {
            kind: "pdf",
            reason: format!("pdf_oxide: {primary_err}; lopdf: {fallback_err}"),
        }),
    }
}

fn pdf_oxide_extract(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut doc = pdf_oxide::PdfDocument::from_bytes(bytes.to_vec())
        .map_err(|e| e.to_string())?;
    let page_count = doc.page_count().map_err(|e| e.to_string())?;

    let mut pages = Vec::with_capacity(page_count);
    for page in 0..page_count {
        pages.push(doc.extract_text(page).map_err(|e| e.to_string())?);
    }
    Ok(join_pages(pages))
}

fn lopdf_extract(bytes: &[u8]) -> std::result::Result<String, String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;

    let mut pages = Vec::new();
    for page_num in doc.get_pages().into_keys() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                tracing::debug!(page = page_num, error = %e, "lopdf skipped page");
            }
        }
    }

    if pages.is_empty() {
        return Err("no readable pages".to_string());
    }
    Ok(join_pages(pages))
}

fn join_pages(pages: Vec<String>) -> String {
    pages
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extract paragraph and table-cell text from a DOCX payload.
///
/// Top-level paragraphs become one line each; every table cell becomes one
/// line holding its paragraphs separated by spaces. Lines keep document
/// order.
pub fn extract_docx(bytes: &[u8]) -> Result<String> {
    let corrupt = |reason: String| Error::CorruptDocument {
        kind: "docx",
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| corrupt(format!("not a zip archive: {e}")))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| corrupt(format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| corrupt(format!("unreadable word/document.xml: {e}")))?;

    docx_body_text(&xml).map_err(corrupt)
}

fn docx_body_text(xml: &str) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(xml);

    let mut lines: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    // Open table cells, innermost last.
    let mut cells: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tc" => cells.push(String::new()),
                b"tab" => paragraph.push('\t'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                paragraph.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = std::mem::take(&mut paragraph);
                    match cells.last_mut() {
                        Some(cell) => {
                            let text = text.trim();
                            if !text.is_empty() {
                                if !cell.is_empty() {
                                    cell.push(' ');
                                }
                                cell.push_str(text);
                            }
                        }
                        None => lines.push(text),
                    }
                }
                b"tc" => {
                    if let Some(cell) = cells.pop() {
                        lines.push(cell);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(lines.join("\n"))
}
