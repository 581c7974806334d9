//! Query evaluation over [`Document`] snapshots.
//!
//! CSS selectors go through `scraper`. XPath is evaluated by `sxd_xpath`
//! over a mirror of the snapshot built once per [`XPathIndex`]; each
//! mirrored element carries the position of its source node so results map
//! back to [`NodeId`]s.

use scraper::Selector;
use sxd_document::Package;
use sxd_document::dom;
use sxd_xpath::nodeset::Node as XNode;
use sxd_xpath::{Context, Factory, Value};

use crate::dom::{Document, NodeId};

/// Attribute on mirrored elements holding the index of the source node
const SOURCE_ATTR: &str = "data-pagesift-source";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind} '{expr}': {message}")]
pub struct QueryError {
    pub kind: &'static str,
    pub expr: String,
    pub message: String,
}

impl QueryError {
    fn xpath(expr: &str, message: impl ToString) -> Self {
        Self {
            kind: "xpath",
            expr: expr.to_string(),
            message: message.to_string(),
        }
    }
}

/// Parse a CSS selector
pub fn css(expr: &str) -> Result<Selector, QueryError> {
    Selector::parse(expr).map_err(|e| QueryError {
        kind: "css selector",
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// Evaluate a CSS selector; results are in document order
pub fn select_css(doc: &Document, expr: &str) -> Result<Vec<NodeId>, QueryError> {
    Ok(doc.select(&css(expr)?))
}

/// Evaluate an XPath expression; results are in document order
pub fn select_xpath(doc: &Document, expr: &str) -> Result<Vec<NodeId>, QueryError> {
    XPathIndex::new(doc).select(expr)
}

/// True when `expr` matches `node` and nothing else
pub fn identifies(doc: &Document, expr: &str, node: NodeId) -> bool {
    XPathIndex::new(doc).identifies(expr, node)
}

/// XPath view of one document state. Build a new one after editing the
/// document.
pub struct XPathIndex {
    package: Package,
    sources: Vec<NodeId>,
    factory: Factory,
}

impl XPathIndex {
    pub fn new(doc: &Document) -> Self {
        let package = Package::new();
        let mut sources = Vec::new();
        // A fragment's root is its synthetic `<html>`; a document's is above it
        let top = if doc.is_element(doc.root()) {
            Some(doc.root())
        } else {
            doc.element_children(doc.root()).into_iter().next()
        };
        if let Some(top) = top {
            let mirror = package.as_document();
            if let Some(element) = mirror_element(doc, &mirror, top, &mut sources) {
                mirror.root().append_child(element);
            }
        }
        Self {
            package,
            sources,
            factory: Factory::new(),
        }
    }

    pub fn select(&self, expr: &str) -> Result<Vec<NodeId>, QueryError> {
        let xpath = self
            .factory
            .build(expr)
            .map_err(|e| QueryError::xpath(expr, e))?
            .ok_or_else(|| QueryError::xpath(expr, "empty expression"))?;
        let document = self.package.as_document();
        let value = xpath
            .evaluate(&Context::new(), document.root())
            .map_err(|e| QueryError::xpath(expr, e))?;
        let Value::Nodeset(nodes) = value else {
            return Err(QueryError::xpath(expr, "does not select nodes"));
        };
        Ok(nodes
            .document_order()
            .into_iter()
            .filter_map(|node| match node {
                XNode::Element(element) => element.attribute_value(SOURCE_ATTR),
                _ => None,
            })
            .filter_map(|index| index.parse::<usize>().ok())
            .filter_map(|index| self.sources.get(index).copied())
            .collect())
    }

    /// True when `expr` matches `node` and nothing else
    pub fn identifies(&self, expr: &str, node: NodeId) -> bool {
        matches!(self.select(expr).as_deref(), Ok([only]) if *only == node)
    }
}

fn mirror_element<'d>(
    doc: &Document,
    mirror: &dom::Document<'d>,
    node: NodeId,
    sources: &mut Vec<NodeId>,
) -> Option<dom::Element<'d>> {
    let tag = doc.tag(node)?;
    let element = mirror.create_element(tag);
    for (name, value) in doc.attrs(node) {
        if name != SOURCE_ATTR {
            element.set_attribute_value(name, value);
        }
    }
    element.set_attribute_value(SOURCE_ATTR, &sources.len().to_string());
    sources.push(node);

    for child in doc.children(node) {
        if let Some(text) = doc.text(child) {
            element.append_child(mirror.create_text(text));
        } else if let Some(mirrored) = mirror_element(doc, mirror, child, sources) {
            element.append_child(mirrored);
        }
    }
    Some(element)
}

/// Quote a string as an XPath literal, falling back to `concat()` when it
/// contains both quote characters
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let parts: Vec<String> = value
        .split('"')
        .map(|part| format!("\"{part}\""))
        .collect();
    format!("concat({})", parts.join(", '\"', "))
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
