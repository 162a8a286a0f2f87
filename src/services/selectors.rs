//! Selector-based narrowing of fetched documents.
//!
//! Turns raw HTML into plain text, optionally restricted to the regions
//! matching a CSS selector.

use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{AppError, Result};

/// Elements whose content is never part of the watched text.
const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template", "svg"];

/// Elements that start a new line in the extracted text.
const BLOCKS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "caption",
    "dd",
    "details",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "summary",
    "table",
    "tbody",
    "tfoot",
    "thead",
    "tr",
    "ul",
];

/// Elements separated by a space so adjacent cells do not run together.
const CELLS: &[&str] = &["td", "th"];

/// Narrows raw content to text.
pub trait SelectorEngine: Send + Sync {
    /// Return the text of the regions matching `selector`, in document order,
    /// or of the whole document when no selector is given.
    ///
    /// A selector that matches nothing yields empty text, not an error.
    fn select(&self, raw: &str, selector: Option<&str>) -> Result<String>;
}

/// HTML selector engine backed by `scraper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSelectorEngine;

impl HtmlSelectorEngine {
    pub fn new() -> Self {
        Self
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

impl SelectorEngine for HtmlSelectorEngine {
    fn select(&self, raw: &str, selector: Option<&str>) -> Result<String> {
        if raw.contains('\0') {
            return Err(AppError::extract(
                "content contains NUL bytes and is not a text document",
            ));
        }

        let document = Html::parse_document(raw);
        let mut text = String::new();

        match selector {
            Some(selector) => {
                let selector = Self::parse_selector(selector)
                    .map_err(|e| AppError::extract(e.to_string()))?;
                for element in document.select(&selector) {
                    collect_text(element, &mut text);
                    text.push('\n');
                }
            }
            None => collect_text(document.root_element(), &mut text),
        }

        Ok(text)
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED.contains(&name) {
                    continue;
                }
                let separator = if BLOCKS.contains(&name) {
                    Some('\n')
                } else if CELLS.contains(&name) {
                    Some(' ')
                } else {
                    None
                };

                if let Some(sep) = separator {
                    out.push(sep);
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if let Some(sep) = separator {
                    out.push(sep);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|l| !l.is_empty())
            .collect()
    }

    #[test]
    fn test_whole_document_blocks() {
        let html = "<html><head><title>T</title></head><body>\
                    <h1>Title</h1><p>First <b>bold</b> para</p><p>Second</p></body></html>";
        let text = HtmlSelectorEngine.select(html, None).unwrap();
        assert_eq!(lines(&text), vec!["Title", "First bold para", "Second"]);
    }

    #[test]
    fn test_scripts_and_comments_dropped() {
        let html = "<body><script>var x = 1;</script><style>p{}</style>\
                    <!-- hidden --><p>Visible</p></body>";
        let text = HtmlSelectorEngine.select(html, None).unwrap();
        assert_eq!(lines(&text), vec!["Visible"]);
    }

    #[test]
    fn test_selector_narrows_in_document_order() {
        let html = r#"<body><div class="a">one</div><p>skip</p><div class="a">two</div></body>"#;
        let text = HtmlSelectorEngine.select(html, Some("div.a")).unwrap();
        assert_eq!(lines(&text), vec!["one", "two"]);
    }

    #[test]
    fn test_selector_without_match_is_empty() {
        let html = "<body><p>content</p></body>";
        let text = HtmlSelectorEngine.select(html, Some("#missing")).unwrap();
        assert!(lines(&text).is_empty());
    }

    #[test]
    fn test_table_cells_are_spaced() {
        let html = "<table><tr><td>Price</td><td>$10</td></tr></table>";
        let text = HtmlSelectorEngine.select(html, None).unwrap();
        assert_eq!(lines(&text), vec!["Price $10"]);
    }

    #[test]
    fn test_binary_content_is_rejected() {
        let err = HtmlSelectorEngine.select("PK\0\u{3}\u{4}", None).unwrap_err();
        assert!(matches!(err, AppError::Extract(_)));
    }

    #[test]
    fn test_invalid_selector_is_extract_error() {
        let err = HtmlSelectorEngine.select("<p>x</p>", Some("[[")).unwrap_err();
        assert!(matches!(err, AppError::Extract(_)));
    }
}
