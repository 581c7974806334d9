//! HTML to Markdown conversion.

use anyhow::{Context, Result};
use htmd::HtmlToMarkdown;

/// Pure HTML to Markdown conversion
pub trait MarkdownConverter: Send + Sync {
    fn convert(&self, html: &str) -> Result<String>;
}

/// Default converter backed by `htmd`
#[derive(Debug, Clone)]
pub struct HtmdConverter {
    skip_tags: Vec<&'static str>,
}

impl Default for HtmdConverter {
    fn default() -> Self {
        Self {
            skip_tags: vec!["script", "style", "noscript", "template", "head"],
        }
    }
}

impl MarkdownConverter for HtmdConverter {
    fn convert(&self, html: &str) -> Result<String> {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(self.skip_tags.clone())
            .build();
        let markdown = converter
            .convert(html)
            .context("Failed to convert HTML to Markdown")?;
        Ok(collapse_blank_lines(&markdown))
    }
}

/// Squeeze runs of blank lines down to one and trim the ends
fn collapse_blank_lines(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
#[path = "markdown_test.rs"]
mod markdown_test;
