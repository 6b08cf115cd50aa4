
use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use pulldown_cmark::{Event, Options, Parser, TagEnd};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::models::PageMark;

/// Document formats the loader knows how to turn into plain text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
    Pdf,
}

impl DocumentFormat {
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" | "xhtml" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    #[inline]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/plain" => Some(Self::PlainText),
            "text/markdown" | "text/x-markdown" => Some(Self::Markdown),
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Guess the format from the leading bytes of the content
    #[inline]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            return Some(Self::Pdf);
        }

        let text = std::str::from_utf8(bytes).ok()?;
        if text.contains('\0') {
            return None;
        }

        let head: String = text
            .trim_start_matches('\u{feff}')
            .trim_start()
            .chars()
            .take(64)
            .collect::<String>()
            .to_ascii_lowercase();
        if head.starts_with("<!doctype html") || head.starts_with("<html") {
            Some(Self::Html)
        } else {
            Some(Self::PlainText)
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocumentFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text pulled out of a source document, before the loader wraps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub title: Option<String>,
    /// Page starts within `text`; empty for formats without pages
    pub pages: Vec<PageMark>,
}

/// Resolve the format of a document from its hints.
///
/// A recognized content type wins, then the extension. An extension that is
/// present but unknown makes the source unsupported; with no extension the
/// content is sniffed.
#[inline]
pub fn detect_format(
    extension: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Option<DocumentFormat> {
    if let Some(format) = content_type.and_then(DocumentFormat::from_content_type) {
        return Some(format);
    }

    match extension {
        Some(extension) => DocumentFormat::from_extension(extension),
        None => DocumentFormat::sniff(bytes),
    }
}

/// Extract normalized plain text from raw document bytes
#[inline]
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<ExtractedText> {
    let (text, title) = match format {
        DocumentFormat::PlainText => (decode_utf8(bytes)?.to_string(), None),
        DocumentFormat::Markdown => (markdown_to_text(decode_utf8(bytes)?), None),
        DocumentFormat::Html => html_to_text(decode_utf8(bytes)?),
        DocumentFormat::Pdf => return pdf_to_text(bytes),
    };

    let text = normalize_whitespace(&text);
    let title = title.map(|t| normalize_whitespace(&t)).filter(|t| !t.is_empty());
    debug!(
        "Extracted {} chars of {} text (title: {:?})",
        text.len(),
        format,
        title
    );

    Ok(ExtractedText {
        text,
        title,
        pages: Vec::new(),
    })
}

/// Extract a PDF page by page, joining non-blank pages with a blank line
fn pdf_to_text(bytes: &[u8]) -> Result<ExtractedText> {
    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| anyhow!("Failed to extract PDF text: {}", e))?;

    let mut text = String::new();
    let mut pages = Vec::new();
    for (index, raw) in raw_pages.iter().enumerate() {
        let page = normalize_whitespace(raw);
        if page.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        pages.push(PageMark {
            offset: text.len(),
            number: index + 1,
        });
        text.push_str(&page);
    }

    debug!(
        "Extracted {} chars from {} of {} PDF pages",
        text.len(),
        pages.len(),
        raw_pages.len()
    );

    Ok(ExtractedText {
        text,
        title: None,
        pages,
    })
}

fn decode_utf8(bytes: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(bytes).context("Document is not valid UTF-8")?;
    Ok(text.trim_start_matches('\u{feff}'))
}

/// Normalize whitespace so that identical content always yields identical text.
///
/// Line endings become `\n`, control characters are dropped, runs of
/// horizontal whitespace collapse to one space, lines are trimmed and runs of
/// blank lines collapse to a single blank line.
#[inline]
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = false;

    for line in unified.split('\n') {
        let cleaned: String = line
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .filter(|c| !c.is_control())
            .collect();
        let collapsed = cleaned.split_whitespace().join(" ");

        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }

        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        pending_blank = false;
    }

    out
}

/// Strip Markdown syntax, keeping only the readable text
fn markdown_to_text(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Text(content) | Event::Code(content) => text.push_str(&content),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak | Event::Rule => text.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock) => {
                text.push_str("\n\n");
            }
            Event::End(TagEnd::Item | TagEnd::TableRow | TagEnd::TableHead) => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push(' '),
            _ => {}
        }
    }

    text
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "svg", "nav", "header", "footer",
    "aside", "form", "button", "head",
];

const BLOCK_TAGS: &[&str] = &[
    "p",
    "div",
    "section",
    "article",
    "main",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "ul",
    "ol",
    "li",
    "dl",
    "dt",
    "dd",
    "table",
    "tr",
    "pre",
    "blockquote",
    "figure",
    "figcaption",
    "br",
    "hr",
];

/// Extract readable text and the title from an HTML page
fn html_to_text(html: &str) -> (String, Option<String>) {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("valid selector");
    let heading_selector = Selector::parse("h1").expect("valid selector");
    let main_content_selector =
        Selector::parse("main, article, [role=main], #content, .content").expect("valid selector");
    let body_selector = Selector::parse("body").expect("valid selector");

    let title = document
        .select(&title_selector)
        .next()
        .or_else(|| document.select(&heading_selector).next())
        .map(|element| element.text().collect::<String>());

    let root = document
        .select(&main_content_selector)
        .next()
        .or_else(|| document.select(&body_selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    collect_text(root, false, &mut text);

    (text, title)
}

fn collect_text(element: ElementRef<'_>, in_pre: bool, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            if in_pre {
                out.push_str(text);
            } else {
                push_collapsed(text, out);
            }
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }

            let is_block = BLOCK_TAGS.contains(&name);
            if is_block {
                out.push('\n');
            }
            collect_text(child_element, in_pre || name == "pre", out);
            if is_block {
                out.push('\n');
            }
        }
    }
}

/// Append text collapsing whitespace runs the way a browser renders them
fn push_collapsed(text: &str, out: &mut String) {
    for c in text.chars() {
        if c.is_whitespace() {
            if !out.ends_with([' ', '\n']) && !out.is_empty() {
                out.push(' ');
            }
        } else {
            out.push(c);
        }
    }
}
