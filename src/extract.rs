//! Format-specific text extraction for ingested files.
//!
//! The format is chosen from the file extension; anything unrecognised is
//! read as plain text. Extraction never panics: corrupt input comes back as
//! an [`ExtractError`] and the ingestion is aborted before anything is
//! written.

use std::path::Path;

use scraper::Html;
use thiserror::Error;

/// Elements whose text never reaches the index.
const HTML_SKIPPED: [&str; 5] = ["script", "style", "noscript", "template", "head"];
/// Elements whose text continues the surrounding line.
const HTML_INLINE: [&str; 14] = [
    "a", "abbr", "b", "code", "em", "i", "mark", "q", "small", "span", "strong", "sub", "sup", "u",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("CSV extraction failed: {0}")]
    Csv(String),
    #[error("document contains no text")]
    Empty,
}

/// Parser selected for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Html,
    Pdf,
    Csv,
}

impl DocumentFormat {
    /// Picks a parser by extension (case-insensitive). Unknown → plain text.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => DocumentFormat::Pdf,
            "html" | "htm" => DocumentFormat::Html,
            "csv" => DocumentFormat::Csv,
            _ => DocumentFormat::PlainText,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::PlainText => "text/plain",
            DocumentFormat::Html => "text/html",
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Csv => "text/csv",
        }
    }
}

/// Reads and parses a file, returning its format and extracted text.
pub fn extract_file(path: &Path) -> Result<(DocumentFormat, String), ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let format = DocumentFormat::from_path(path);
    let text = extract_text(&bytes, format)?;
    Ok((format, text))
}

/// Extracts plain UTF-8 text from raw bytes. Blank output is an error.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    let text = match format {
        DocumentFormat::PlainText => String::from_utf8_lossy(bytes).into_owned(),
        DocumentFormat::Html => extract_html(&String::from_utf8_lossy(bytes)),
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Csv => extract_csv(bytes)?,
    };
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked on malformed input".into())),
    }
}

fn extract_html(source: &str) -> String {
    let document = Html::parse_document(source);
    let mut out = String::new();
    let mut last_block = None;

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HTML_SKIPPED.contains(&e.name()))
        });
        if skipped {
            continue;
        }
        let words = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if words.is_empty() {
            continue;
        }

        // Text nodes under the same block element share a line.
        let block = node
            .ancestors()
            .find(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| !HTML_INLINE.contains(&e.name()))
            })
            .map(|a| a.id());
        if !out.is_empty() {
            out.push(if block == last_block { ' ' } else { '\n' });
        }
        out.push_str(&words);
        last_block = block;
    }
    out
}

/// One `column: value` block per row, rows separated by a blank line.
fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Csv(e.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let lines: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let column = headers.get(i).unwrap_or("");
                format!("{}: {}", column.trim(), value.trim())
            })
            .collect();
        rows.push(lines.join("\n"));
    }
    Ok(rows.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.PDF")),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("page.htm")),
            DocumentFormat::Html
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("rows.csv")),
            DocumentFormat::Csv
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("notes.md")),
            DocumentFormat::PlainText
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("no_extension")),
            DocumentFormat::PlainText
        );
    }

    #[test]
    fn test_plain_text_lossy() {
        let text = extract_text(b"hello \xff world", DocumentFormat::PlainText).unwrap();
        assert!(text.starts_with("hello"));
        assert!(text.ends_with("world"));
    }

    #[test]
    fn test_html_strips_markup_and_scripts() {
        let html = "<html><head><title>T</title><style>p{}</style></head><body>\
            <h1>Access Financials</h1><p>This is a <b>sample</b> HTML article.</p>\
            <script>var x = 1;</script></body></html>";
        let text = extract_text(html.as_bytes(), DocumentFormat::Html).unwrap();
        assert_eq!(text, "Access Financials\nThis is a sample HTML article.");
    }

    #[test]
    fn test_csv_rows_become_blocks() {
        let csv = "name,role\nAda,engineer\nGrace,admiral\n";
        let text = extract_text(csv.as_bytes(), DocumentFormat::Csv).unwrap();
        assert_eq!(text, "name: Ada\nrole: engineer\n\nname: Grace\nrole: admiral");
    }

    #[test]
    fn test_corrupt_pdf_is_error() {
        let err = extract_text(b"not a pdf at all", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_blank_document_is_error() {
        let err = extract_text(b"  \n\t ", DocumentFormat::PlainText).unwrap_err();
        assert!(matches!(err, ExtractError::Empty));

        let err = extract_text(b"<html><body></body></html>", DocumentFormat::Html).unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = extract_file(Path::new("/no/such/file.txt")).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
