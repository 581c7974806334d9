//! Mutable HTML document used for snapshot analysis and merging.
//!
//! A thin layer over [`scraper::Html`]: the parsed `ego_tree` is edited in
//! place and serialized back with `html5ever`. Detached nodes stay in the
//! tree as orphans and are never serialized or matched.

use ego_tree::NodeRef;
use html5ever::serialize::{Serialize, SerializeOpts, TraversalScope, serialize};
use html5ever::{LocalName, QualName, ns};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

pub type NodeId = ego_tree::NodeId;

/// Parsed HTML document or fragment
#[derive(Debug, Clone)]
pub struct Document {
    html: Html,
    /// The document node, or the synthetic `<html>` holding a fragment
    root: NodeId,
}

impl Document {
    /// Parse a full HTML document
    pub fn parse(markup: &str) -> Self {
        let html = Html::parse_document(markup);
        let root = html.tree.root().id();
        Self { html, root }
    }

    /// Parse an HTML fragment; its top-level nodes become children of the root
    pub fn parse_fragment(markup: &str) -> Self {
        let html = Html::parse_fragment(markup);
        let root = html.root_element().id();
        Self { html, root }
    }

    fn node(&self, id: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(id)
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id)?.value().as_element()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// Lowercase tag name for elements
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(Element::name)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    /// Attributes in serialization order
    pub fn attrs(&self, id: NodeId) -> Vec<(&str, &str)> {
        self.element(id)
            .map(|el| el.attrs().collect())
            .unwrap_or_default()
    }

    /// Set an attribute. `id` and `class` are cached by the parser and must
    /// not be changed this way.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return;
        };
        let Node::Element(el) = node.value() else {
            return;
        };
        // Kept sorted: `Element::attr` binary-searches
        let key = QualName::new(None, ns!(), LocalName::from(name));
        match el.attrs.binary_search_by(|(existing, _)| existing.cmp(&key)) {
            Ok(index) => el.attrs[index].1 = value.into(),
            Err(index) => el.attrs.insert(index, (key, value.into())),
        }
    }

    /// Distinct class tokens
    pub fn classes(&self, id: NodeId) -> Vec<&str> {
        self.element(id)
            .map(|el| el.classes().collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        if id == self.root {
            return None;
        }
        self.node(id)?.parent().map(|parent| parent.id())
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| node.children().map(|child| child.id()).collect())
            .unwrap_or_default()
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| {
                node.children()
                    .filter(|child| child.value().is_element())
                    .map(|child| child.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All nodes below `id` in document order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| node.descendants().skip(1).map(|n| n.id()).collect())
            .unwrap_or_default()
    }

    /// Every element reachable from the root, in document order
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&id| self.is_element(id))
            .collect()
    }

    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&id| self.tag(id) == Some(tag))
            .collect()
    }

    /// Attached elements matching a CSS selector, in document order
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&id| {
                self.node(id)
                    .and_then(ElementRef::wrap)
                    .is_some_and(|el| selector.matches(&el))
            })
            .collect()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.html
            .root_element()
            .child_elements()
            .find(|el| el.value().name() == "body")
            .map(|el| el.id())
    }

    /// True when `node` is `ancestor` or lies below it
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor
            || self
                .node(node)
                .is_some_and(|n| n.ancestors().any(|a| a.id() == ancestor))
    }

    /// Still reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    /// Ancestors of `id`, nearest first, excluding the root
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| {
                node.ancestors()
                    .map(|a| a.id())
                    .take_while(|&a| a != self.root)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Content of a text node
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.value().as_text().map(|text| &**text)
    }

    /// Concatenated text of `id` and every descendant text node
    pub fn text_content(&self, id: NodeId) -> String {
        let Some(node) = self.node(id) else {
            return String::new();
        };
        node.descendants()
            .filter_map(|n| n.value().as_text())
            .map(|text| &**text)
            .collect()
    }

    /// Text content with whitespace runs collapsed, as XPath `normalize-space()` does
    pub fn normalized_text(&self, id: NodeId) -> String {
        normalize_space(&self.text_content(id))
    }

    /// Create a detached HTML element
    pub fn create_element(&mut self, name: &str) -> NodeId {
        let name = QualName::new(None, ns!(html), LocalName::from(name.to_lowercase()));
        self.html
            .tree
            .orphan(Node::Element(Element::new(name, Vec::new())))
            .id()
    }

    /// Move the top-level nodes of `fragment` into this tree, detached
    pub fn adopt_fragment(&mut self, fragment: Document) -> Vec<NodeId> {
        // `Html::parse_fragment` yields fragment > html > content
        let adopted = self.html.tree.extend_tree(fragment.html.tree).id();
        let container = self
            .node(adopted)
            .and_then(|root| root.children().find(|n| n.value().is_element()))
            .map(|n| n.id());
        let Some(container) = container else {
            return Vec::new();
        };
        let nodes = self.children(container);
        for &node in &nodes {
            self.detach(node);
        }
        nodes
    }

    /// Remove a node (and its subtree) from its parent
    pub fn detach(&mut self, id: NodeId) {
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.detach();
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if parent == child || self.contains(child, parent) {
            return;
        }
        if let Some(mut node) = self.html.tree.get_mut(parent) {
            node.append_id(child);
        }
    }

    /// Insert `new` as the next sibling of `reference`. Falls back to
    /// appending under the root when `reference` has no parent.
    pub fn insert_after(&mut self, reference: NodeId, new: NodeId) {
        if reference == new || self.contains(new, reference) {
            return;
        }
        if self.parent(reference).is_none() {
            self.append_child(self.root, new);
            return;
        }
        if let Some(mut node) = self.html.tree.get_mut(reference) {
            node.insert_id_after(new);
        }
    }

    pub fn clear_children(&mut self, id: NodeId) {
        for child in self.children(id) {
            self.detach(child);
        }
    }

    /// Serialize the whole document
    pub fn html(&self) -> String {
        if self.root == self.html.tree.root().id() {
            return to_html(&self.html, TraversalScope::IncludeNode);
        }
        match self.node(self.root).and_then(ElementRef::wrap) {
            Some(container) => to_html(&container, TraversalScope::ChildrenOnly(None)),
            None => String::new(),
        }
    }

    /// Markup of an element, or the raw text of any other node
    pub fn outer_html(&self, id: NodeId) -> String {
        match self.node(id).and_then(ElementRef::wrap) {
            Some(element) => to_html(&element, TraversalScope::IncludeNode),
            None => self.text_content(id),
        }
    }
}

/// `<noscript>` was parsed with scripting on, so it serializes as raw text too
fn to_html<T: Serialize>(node: &T, traversal_scope: TraversalScope) -> String {
    let opts = SerializeOpts {
        scripting_enabled: true,
        traversal_scope,
        create_missing_parent: false,
    };
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail
    let _ = serialize(&mut buf, node, opts);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collapse whitespace runs and trim, like XPath `normalize-space()`
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "dom_test.rs"]
mod dom_test;
