//! Merges revealed fragments back into the page document.
//!
//! Each fragment is placed by the first strategy that finds a target:
//! stored XPath, stored CSS path, best same-tag similarity match, and
//! finally the end of `<body>`.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::dom::{Document, NodeId};
use crate::page::PageDriver;
use crate::query;
use crate::sanitize;
use crate::types::RevealedContentItem;

pub const REVEALED_ATTR: &str = "data-pagesift-revealed";
pub const INTERACTION_ATTR: &str = "data-pagesift-interaction";
pub const SELECTOR_ATTR: &str = "data-pagesift-selector";
pub const CHANGE_ATTR: &str = "data-pagesift-change";

const TEXT_MATCH_SCORE: u32 = 3;
const ID_MATCH_SCORE: u32 = 5;

/// Where a fragment ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    XPath(NodeId),
    CssPath(NodeId),
    Similar(NodeId),
    BodyAppend(NodeId),
}

impl Placement {
    pub fn node(self) -> NodeId {
        match self {
            Placement::XPath(id)
            | Placement::CssPath(id)
            | Placement::Similar(id)
            | Placement::BodyAppend(id) => id,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Placement::XPath(_) => "xpath",
            Placement::CssPath(_) => "css-path",
            Placement::Similar(_) => "similarity",
            Placement::BodyAppend(_) => "body-append",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("document has no body to append revealed content to")]
    NoBody,
}

/// Merge the revealed items into the live page's current HTML.
///
/// Never fails on merge problems: if merging does not work the page content
/// is returned unmodified. Only an unreadable page is an error.
pub async fn combine(page: &dyn PageDriver, items: &[RevealedContentItem]) -> Result<String> {
    let html = page
        .content()
        .await
        .context("Failed to read page content")?;
    if items.is_empty() {
        return Ok(sanitize::sanitize_html(&html));
    }
    match merge(&html, items) {
        Ok(merged) => Ok(merged),
        Err(e) => {
            warn!("Merging revealed content failed, returning page as-is: {}", e);
            Ok(html)
        }
    }
}

/// Place every item into `html` and sanitize the result
pub fn merge(html: &str, items: &[RevealedContentItem]) -> Result<String, MergeError> {
    let mut doc = Document::parse(html);
    let mut placed = 0;
    for item in items {
        if place_item(&mut doc, item)?.is_some() {
            placed += 1;
        }
    }
    info!("Merged {} of {} revealed items", placed, items.len());
    Ok(sanitize::sanitize_html(&doc.html()))
}

/// Insert one item; `None` when its fragment holds no content
pub fn place_item(
    doc: &mut Document,
    item: &RevealedContentItem,
) -> Result<Option<Placement>, MergeError> {
    let fragment = Document::parse_fragment(&item.revealed_html);
    let Some(revealed) = import_fragment(doc, fragment) else {
        warn!("Revealed content from '{}' is empty, skipping", item.selector);
        return Ok(None);
    };

    let placement = find_placement(doc, item, revealed)?;
    debug!(
        "Placing content from '{}' via {}",
        item.selector,
        placement.as_str()
    );
    match placement {
        Placement::BodyAppend(body) => {
            tag_origin(doc, revealed, item);
            doc.append_child(body, revealed);
        }
        Placement::XPath(target) | Placement::CssPath(target) | Placement::Similar(target) => {
            insert_at(doc, target, revealed, item);
        }
    }
    Ok(Some(placement))
}

/// Run the placement cascade for a fragment already imported into `doc`
pub fn find_placement(
    doc: &Document,
    item: &RevealedContentItem,
    revealed: NodeId,
) -> Result<Placement, MergeError> {
    if let Some(target) = unique_match(doc, query::select_xpath(doc, &item.position.xpath).ok())
        && let Some(placement) = anchorable(doc, target, Placement::XPath)
    {
        return Ok(placement);
    }
    if let Some(css_path) = &item.position.css_path
        && let Some(target) = unique_match(doc, query::select_css(doc, css_path).ok())
        && let Some(placement) = anchorable(doc, target, Placement::CssPath)
    {
        return Ok(placement);
    }
    if let Some(target) = most_similar(doc, revealed) {
        return Ok(Placement::Similar(target));
    }
    doc.body().map(Placement::BodyAppend).ok_or(MergeError::NoBody)
}

fn unique_match(doc: &Document, matches: Option<Vec<NodeId>>) -> Option<NodeId> {
    match matches.as_deref() {
        Some([node]) if doc.is_attached(*node) => Some(*node),
        _ => None,
    }
}

/// The document element and `<head>` cannot take content; `<body>` gets an append
fn anchorable(doc: &Document, target: NodeId, wrap: fn(NodeId) -> Placement) -> Option<Placement> {
    match doc.tag(target) {
        Some("html") | Some("head") => None,
        Some("body") => Some(Placement::BodyAppend(target)),
        Some(_) => Some(wrap(target)),
        None => None,
    }
}

/// Score elements sharing the fragment's tag. Exact text is worth 3, each
/// shared class 1 and an identical id 5. The first best-scoring element in
/// document order wins; zero never wins.
pub fn most_similar(doc: &Document, revealed: NodeId) -> Option<NodeId> {
    let tag = doc.tag(revealed)?;
    let text = doc.normalized_text(revealed);
    let classes = doc.classes(revealed);
    let id = doc.attr(revealed, "id").filter(|id| !id.is_empty());

    let mut best: Option<(NodeId, u32)> = None;
    for candidate in doc.elements_by_tag(tag) {
        if candidate == revealed || is_inserted(doc, candidate) {
            continue;
        }
        let mut score = 0;
        if !text.is_empty() && doc.normalized_text(candidate) == text {
            score += TEXT_MATCH_SCORE;
        }
        score += doc
            .classes(candidate)
            .iter()
            .filter(|class| classes.contains(class))
            .count() as u32;
        if id.is_some() && doc.attr(candidate, "id") == id {
            score += ID_MATCH_SCORE;
        }
        if score > 0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(node, _)| node)
}

fn is_inserted(doc: &Document, node: NodeId) -> bool {
    std::iter::once(node)
        .chain(doc.ancestors(node))
        .any(|id| doc.attr(id, INTERACTION_ATTR).is_some())
}

fn insert_at(doc: &mut Document, target: NodeId, revealed: NodeId, item: &RevealedContentItem) {
    let same_text = doc.normalized_text(target) == doc.normalized_text(revealed);
    if same_text || doc.children(target).is_empty() {
        doc.clear_children(target);
        if doc.tag(target) == doc.tag(revealed) {
            // The target is the revealed element itself: take its children
            for child in doc.children(revealed).to_vec() {
                doc.append_child(target, child);
            }
            tag_origin(doc, target, item);
        } else {
            tag_origin(doc, revealed, item);
            doc.append_child(target, revealed);
        }
        return;
    }

    let wrapper = doc.create_element("div");
    doc.set_attr(wrapper, REVEALED_ATTR, "true");
    doc.append_child(wrapper, revealed);
    tag_origin(doc, wrapper, item);
    doc.insert_after(target, wrapper);
}

fn tag_origin(doc: &mut Document, node: NodeId, item: &RevealedContentItem) {
    doc.set_attr(node, INTERACTION_ATTR, item.interaction_type.as_str());
    doc.set_attr(node, SELECTOR_ATTR, &item.selector);
    doc.set_attr(node, CHANGE_ATTR, item.change_type.as_str());
}

/// Move a fragment into `doc` as one detached node. A single top-level
/// element is taken as-is; anything else is gathered under a `<div>`.
fn import_fragment(doc: &mut Document, fragment: Document) -> Option<NodeId> {
    let root = fragment.root();
    if fragment.element_children(root).is_empty() && fragment.normalized_text(root).is_empty() {
        return None;
    }

    let nodes = doc.adopt_fragment(fragment);
    let elements: Vec<NodeId> = nodes.iter().copied().filter(|&n| doc.is_element(n)).collect();
    let only_element = elements.len() == 1
        && nodes
            .iter()
            .all(|&node| node == elements[0] || doc.normalized_text(node).is_empty());
    if only_element {
        return Some(elements[0]);
    }

    let container = doc.create_element("div");
    for node in nodes {
        doc.append_child(container, node);
    }
    Some(container)
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
