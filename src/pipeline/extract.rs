// src/pipeline/extract.rs

//! Content extraction.
//!
//! Raw content → selector narrowing → whitespace normalization → ignore
//! patterns. Patterns run on the normalized text and nothing is normalized
//! after them, so running the same set again changes nothing.

use std::sync::Arc;

use regex::Regex;

use crate::error::Result;
use crate::services::SelectorEngine;

/// Matched text is replaced with this.
pub const PLACEHOLDER: &str = "";

/// A compiled set of ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Regex>,
}

impl IgnoreSet {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Blank every match of every pattern.
    ///
    /// Passes repeat until nothing changes, so a removal that splices two
    /// halves into a new match is removed too. The placeholder is empty, so
    /// every pass that changes the text shortens it and the loop terminates.
    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            let mut next = current.clone();
            for pattern in &self.patterns {
                next = pattern.replace_all(&next, PLACEHOLDER).into_owned();
            }
            if next == current {
                return current;
            }
            current = next;
        }
    }
}

/// Collapse whitespace runs inside each line, trim lines and drop blank ones.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces normalized snapshots from fetched content.
#[derive(Clone)]
pub struct ContentExtractor {
    engine: Arc<dyn SelectorEngine>,
}

impl ContentExtractor {
    pub fn new(engine: Arc<dyn SelectorEngine>) -> Self {
        Self { engine }
    }

    /// Extract the normalized text of `raw`.
    ///
    /// Fails only when the engine cannot read the content at all; a selector
    /// that matches nothing gives empty text.
    pub fn extract(&self, raw: &str, selector: Option<&str>, ignore: &IgnoreSet) -> Result<String> {
        let narrowed = self.engine.select(raw, selector)?;
        if selector.is_some() && narrowed.trim().is_empty() {
            log::warn!("Selector {:?} matched no content", selector.unwrap_or_default());
        }
        let normalized = normalize_whitespace(&narrowed);
        Ok(ignore.apply(&normalized))
    }
}
