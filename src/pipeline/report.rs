//! Text and HTML renderings of a change report.

use std::fmt::Write;

use crate::pipeline::diff::{ChangeReport, EditKind};

const STYLE: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.6; margin: 0; padding: 20px; }
.header { background: #f4f4f4; padding: 15px; margin-bottom: 20px; border-bottom: 1px solid #ddd; }
.diff-table { width: 100%; border-collapse: collapse; font-size: 14px; table-layout: fixed; }
.diff-table td { word-wrap: break-word; padding: 5px; border: 1px solid #ddd; vertical-align: top; }
.diff-table .line-no { width: 48px; text-align: right; background: #f8f8f8; color: #888; }
.diff-table .add { background-color: #e6ffed; }
.diff-table .chg { background-color: #fff5b1; }
.diff-table .sub { background-color: #ffdce0; }
@media (max-width: 768px) { .diff-table { font-size: 12px; } .diff-table td { padding: 3px; } }";

impl ChangeReport {
    /// `- removed` / `+ added` lines, one hunk per edit span.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for edit in &self.edits {
            let _ = writeln!(
                out,
                "@@ -{},{} +{},{} @@",
                edit.old_start + 1,
                edit.old_lines.len(),
                edit.new_start + 1,
                edit.new_lines.len()
            );
            for line in &edit.old_lines {
                let _ = writeln!(out, "- {line}");
            }
            for line in &edit.new_lines {
                let _ = writeln!(out, "+ {line}");
            }
        }
        out
    }

    /// Standalone side-by-side HTML page for the report.
    pub fn to_html(&self) -> String {
        let mut rows = String::new();
        for edit in &self.edits {
            let class = match edit.kind {
                EditKind::Insert => "add",
                EditKind::Delete => "sub",
                EditKind::Replace => "chg",
            };
            let height = edit.old_lines.len().max(edit.new_lines.len());
            for offset in 0..height {
                let old = edit.old_lines.get(offset);
                let new = edit.new_lines.get(offset);
                let _ = writeln!(
                    rows,
                    "<tr><td class=\"line-no\">{}</td><td class=\"{}\">{}</td>\
                     <td class=\"line-no\">{}</td><td class=\"{}\">{}</td></tr>",
                    old.map(|_| (edit.old_start + offset + 1).to_string())
                        .unwrap_or_default(),
                    if old.is_some() { class } else { "" },
                    old.map(|l| escape_html(l)).unwrap_or_default(),
                    new.map(|_| (edit.new_start + offset + 1).to_string())
                        .unwrap_or_default(),
                    if new.is_some() { class } else { "" },
                    new.map(|l| escape_html(l)).unwrap_or_default(),
                );
            }
        }

        let name = escape_html(&self.site_name);
        let url = escape_html(&self.url);
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
             <title>{name}: changes</title>\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n\
             <div class=\"header\">\n<h2>{name}</h2>\n\
             <p><a href=\"{url}\" target=\"_blank\">{url}</a></p>\n\
             <p>Change detected: {detected}</p>\n<p>{summary}</p>\n</div>\n\
             <table class=\"diff-table\">\n\
             <thead><tr><th></th><th>Previous version</th><th></th><th>Current version</th></tr></thead>\n\
             <tbody>\n{rows}</tbody>\n</table>\n</body>\n</html>\n",
            detected = self.detected_at.format("%Y-%m-%d %H:%M:%S UTC"),
            summary = escape_html(&self.summary()),
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
