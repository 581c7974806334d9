// Unit tests for dom module

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_parse_document_structure() {
    let doc = Document::parse("<!DOCTYPE html><html><body><div id=\"a\">Hi</div></body></html>");
    let top = doc.element_children(doc.root());
    assert_eq!(top.len(), 1);
    assert_eq!(doc.tag(top[0]), Some("html"));
    assert_eq!(doc.parent(doc.root()), None);

    let body = doc.body().unwrap();
    let children = doc.element_children(body);
    assert_eq!(children.len(), 1);
    assert_eq!(doc.attr(children[0], "id"), Some("a"));
    assert_eq!(doc.text_content(children[0]), "Hi");
}

#[test]
fn test_parse_fragment_has_no_wrapper() {
    let doc = Document::parse_fragment("<p>one</p><p>two</p>");
    let top = doc.element_children(doc.root());
    assert_eq!(top.len(), 2);
    assert_eq!(doc.tag(top[0]), Some("p"));
    assert_eq!(doc.parent(top[0]), Some(doc.root()));
    assert_eq!(doc.html(), "<p>one</p><p>two</p>");
}

#[test]
fn test_serialization_escapes_and_void_elements() {
    let doc = Document::parse_fragment("<p title=\"a &quot;b&quot;\">x &lt; y<br>z</p><img src=\"i.png\">");
    assert_eq!(
        doc.html(),
        "<p title=\"a &quot;b&quot;\">x &lt; y<br>z</p><img src=\"i.png\">"
    );
}

#[test]
fn test_raw_text_not_escaped() {
    let doc = Document::parse("<html><head><style>a > b { color: red; }</style></head><body></body></html>");
    assert!(doc.html().contains("<style>a > b { color: red; }</style>"));
}

#[test]
fn test_noscript_round_trips_verbatim() {
    let markup = r#"<noscript><iframe src="https://gtm"></iframe></noscript>"#;
    let doc = Document::parse(&format!("<html><head></head><body>{markup}<p>x</p></body></html>"));
    let html = doc.html();
    assert!(html.contains(markup), "{html}");

    let again = Document::parse(&html).html();
    assert_eq!(again, html);
}

#[test]
fn test_normalized_text() {
    let doc = Document::parse_fragment("<div>\n  Hello\n   <b>big</b>   world \n</div>");
    let div = doc.element_children(doc.root())[0];
    assert_eq!(doc.normalized_text(div), "Hello big world");
}

#[test]
fn test_insert_after_and_detach() {
    let mut doc = Document::parse_fragment("<ul><li>a</li><li>c</li></ul>");
    let ul = doc.element_children(doc.root())[0];
    let first = doc.element_children(ul)[0];

    let b = doc.create_element("LI");
    doc.set_attr(b, "data-new", "1");
    let text = doc.adopt_fragment(Document::parse_fragment("b"));
    assert_eq!(text.len(), 1);
    doc.append_child(b, text[0]);
    doc.insert_after(first, b);
    assert_eq!(doc.html(), "<ul><li>a</li><li data-new=\"1\">b</li><li>c</li></ul>");

    doc.detach(first);
    assert!(!doc.is_attached(first));
    assert_eq!(doc.html(), "<ul><li data-new=\"1\">b</li><li>c</li></ul>");
}

#[test]
fn test_adopt_fragment_moves_top_level_nodes() {
    let mut target = Document::parse("<html><body></body></html>");
    let body = target.body().unwrap();
    let nodes = target.adopt_fragment(Document::parse_fragment(
        "<section><h2>T</h2><p>body</p></section> tail",
    ));
    assert_eq!(nodes.len(), 2);
    assert!(!target.is_attached(nodes[0]));

    target.append_child(body, nodes[0]);
    assert_eq!(target.outer_html(nodes[0]), "<section><h2>T</h2><p>body</p></section>");
    assert!(target.contains(body, nodes[0]));
    assert_eq!(target.text(nodes[1]), Some(" tail"));
    assert_eq!(target.elements_by_tag("h2").len(), 1);
}

#[test]
fn test_append_child_refuses_cycles() {
    let mut doc = Document::parse_fragment("<div><span></span></div>");
    let div = doc.element_children(doc.root())[0];
    let span = doc.element_children(div)[0];
    doc.append_child(span, div);
    doc.append_child(div, div);
    assert_eq!(doc.html(), "<div><span></span></div>");
}

#[test]
fn test_attribute_editing() {
    let mut doc = Document::parse_fragment("<div id=\"x\" class=\"a  b\" onclick=\"go()\"></div>");
    let div = doc.element_children(doc.root())[0];
    let classes = doc.classes(div);
    assert_eq!(classes.len(), 2);
    assert!(classes.contains(&"a") && classes.contains(&"b"));

    doc.set_attr(div, "data-k", "v");
    doc.set_attr(div, "onclick", "stop()");
    assert_eq!(doc.attr(div, "id"), Some("x"));
    assert_eq!(doc.attr(div, "data-k"), Some("v"));
    assert_eq!(doc.attr(div, "onclick"), Some("stop()"));
    assert_eq!(doc.attrs(div).len(), 4);
}

#[test]
fn test_detached_nodes_are_not_selected() {
    let mut doc = Document::parse_fragment("<p>a</p>");
    let orphan = doc.create_element("p");
    let selector = Selector::parse("p").unwrap();
    assert_eq!(doc.select(&selector).len(), 1);
    assert!(!doc.select(&selector).contains(&orphan));
    assert!(!doc.is_attached(orphan));
}

#[test]
fn test_clear_children_and_ancestors() {
    let mut doc = Document::parse_fragment("<div><span><i>x</i></span></div>");
    let div = doc.element_children(doc.root())[0];
    let span = doc.element_children(div)[0];
    let i = doc.element_children(span)[0];

    assert_eq!(doc.ancestors(i), vec![span, div]);
    doc.clear_children(div);
    assert_eq!(doc.html(), "<div></div>");
    assert!(!doc.is_attached(i));
}

#[test]
fn test_elements_in_document_order() {
    let doc = Document::parse_fragment("<a><b></b><c><d></d></c></a><e></e>");
    let tags: Vec<&str> = doc.elements().into_iter().filter_map(|id| doc.tag(id)).collect();
    assert_eq!(tags, vec!["a", "b", "c", "d", "e"]);
}
