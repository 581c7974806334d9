//! Element locator resolution.
//!
//! Builds XPath expressions for nodes of a [`Document`] snapshot. Every
//! expression is evaluated against the snapshot before it is returned: an
//! XPath handed out here resolves to exactly that node and nothing else.

use tracing::trace;

use crate::dom::{Document, NodeId};
use crate::query::{XPathIndex, select_css, select_xpath, xpath_literal};
use crate::types::{Locator, Rect};

/// Attributes that usually identify an element semantically
const SEMANTIC_ATTRIBUTES: &[&str] = &[
    "name",
    "data-testid",
    "data-test-id",
    "data-test",
    "aria-label",
    "title",
    "role",
    "type",
];

/// Text longer than this is not used for text-based locators
const MAX_TEXT_LOCATOR_CHARS: usize = 50;

/// Builds verified locators against one document snapshot
pub struct LocatorResolver<'a> {
    doc: &'a Document,
    xpath: XPathIndex,
}

impl<'a> LocatorResolver<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            xpath: XPathIndex::new(doc),
        }
    }

    /// Full locator for an element: verified XPath plus a CSS path
    pub fn locate(&self, node: NodeId, bounding_box: Option<Rect>) -> Option<Locator> {
        let xpath = self.build_xpath(node)?;
        let css_path = Some(self.css_path(node)).filter(|path| {
            matches!(select_css(self.doc, path).as_deref(), Ok([only]) if *only == node)
        });
        Some(Locator {
            xpath,
            css_path,
            bounding_box,
        })
    }

    /// XPath for `node`, trying the most stable forms first. Returns `None`
    /// only for nodes that are not attached elements.
    pub fn build_xpath(&self, node: NodeId) -> Option<String> {
        let tag = self.doc.tag(node)?;
        if !self.doc.is_attached(node) {
            return None;
        }

        let attempts = [
            self.by_id(node),
            self.by_class(node, tag),
            self.by_semantic_attributes(node, tag),
            self.by_text(node, tag),
            Some(self.sibling_path(node)),
            Some(self.typed_path(node)),
        ];
        for (strategy, candidate) in attempts.into_iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            if self.xpath.identifies(&candidate, node) {
                trace!("Locator strategy {} accepted: {}", strategy + 1, candidate);
                return Some(candidate);
            }
        }
        None
    }

    fn by_id(&self, node: NodeId) -> Option<String> {
        let id = self.doc.attr(node, "id").filter(|id| !id.trim().is_empty())?;
        Some(format!("//*[@id={}]", xpath_literal(id)))
    }

    fn by_class(&self, node: NodeId, tag: &str) -> Option<String> {
        let class = self.doc.attr(node, "class").filter(|c| !c.trim().is_empty())?;
        Some(format!("//{}[@class={}]", tag, xpath_literal(class)))
    }

    fn by_semantic_attributes(&self, node: NodeId, tag: &str) -> Option<String> {
        let present: Vec<String> = SEMANTIC_ATTRIBUTES
            .iter()
            .filter_map(|&name| {
                self.doc
                    .attr(node, name)
                    .filter(|value| !value.is_empty())
                    .map(|value| format!("@{}={}", name, xpath_literal(value)))
            })
            .collect();

        for predicate in &present {
            let candidate = format!("//{tag}[{predicate}]");
            if self.xpath.identifies(&candidate, node) {
                return Some(candidate);
            }
        }
        if present.len() > 1 {
            return Some(format!("//{}[{}]", tag, present.join(" and ")));
        }
        None
    }

    fn by_text(&self, node: NodeId, tag: &str) -> Option<String> {
        let text = self.doc.normalized_text(node);
        if text.is_empty() || text.chars().count() >= MAX_TEXT_LOCATOR_CHARS {
            return None;
        }
        let literal = xpath_literal(&text);
        let exact = format!("//{tag}[normalize-space()={literal}]");
        if self.xpath.identifies(&exact, node) {
            return Some(exact);
        }
        Some(format!("//{tag}[contains(normalize-space(), {literal})]"))
    }

    /// `/*[i]/*[j]/...` with indices counted among all element siblings
    pub fn sibling_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = node;
        while let Some(parent) = self.doc.parent(current) {
            let index = self
                .doc
                .element_children(parent)
                .iter()
                .position(|&child| child == current)
                .map(|i| i + 1)
                .unwrap_or(1);
            segments.push(format!("*[{index}]"));
            current = parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// `/html[1]/body[1]/div[2]` with indices counted among same-tag siblings
    pub fn typed_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = node;
        while let Some(parent) = self.doc.parent(current) {
            let tag = self.doc.tag(current).unwrap_or("*");
            let index = self
                .doc
                .element_children(parent)
                .into_iter()
                .filter(|&child| self.doc.tag(child) == Some(tag))
                .position(|child| child == current)
                .map(|i| i + 1)
                .unwrap_or(1);
            segments.push(format!("{tag}[{index}]"));
            current = parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    /// `html > body > div:nth-of-type(2)`, stopping early at an element with an id
    pub fn css_path(&self, node: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(tag) = self.doc.tag(id) else {
                break;
            };
            if let Some(element_id) = self.doc.attr(id, "id").filter(|v| is_plain_ident(v)) {
                segments.push(format!("{tag}#{element_id}"));
                break;
            }
            let siblings = self
                .doc
                .parent(id)
                .map(|parent| self.doc.element_children(parent))
                .unwrap_or_default();
            let same_type: Vec<NodeId> = siblings
                .into_iter()
                .filter(|&s| self.doc.tag(s) == Some(tag))
                .collect();
            if same_type.len() > 1 {
                let index = same_type.iter().position(|&s| s == id).unwrap_or(0) + 1;
                segments.push(format!("{tag}:nth-of-type({index})"));
            } else {
                segments.push(tag.to_string());
            }
            current = self.doc.parent(id);
        }
        segments.reverse();
        segments.join(" > ")
    }
}

fn is_plain_ident(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Follow 1-based element-child indices from the document root
pub fn node_at_path(doc: &Document, path: &[usize]) -> Option<NodeId> {
    let mut current = doc.root();
    for &index in path {
        current = *doc.element_children(current).get(index.checked_sub(1)?)?;
    }
    (current != doc.root()).then_some(current)
}

/// Re-find a node from a stored locator: XPath first, then CSS path
pub fn resolve(doc: &Document, locator: &Locator) -> Option<NodeId> {
    if let Ok(nodes) = select_xpath(doc, &locator.xpath)
        && nodes.len() == 1
    {
        return Some(nodes[0]);
    }
    let css = locator.css_path.as_deref()?;
    match select_css(doc, css).as_deref() {
        Ok([only]) => Some(*only),
        _ => None,
    }
}

#[cfg(test)]
#[path = "locator_test.rs"]
mod locator_test;
