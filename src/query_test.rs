// Unit tests for query module

use super::*;
use pretty_assertions::assert_eq;

const PAGE: &str = r#"<html><body>
  <div id="main" class="content wide">
    <h2>Tabs</h2>
    <button class="tab" data-testid="specs">Specs</button>
    <button class="tab" data-testid="reviews">  Customer
       reviews </button>
  </div>
  <div class="content">
    <p>One</p><p>Two</p>
  </div>
</body></html>"#;

fn tags(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
    nodes
        .iter()
        .map(|&n| doc.tag(n).unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_absolute_positional_path() {
    let doc = Document::parse(PAGE);
    let nodes = select_xpath(&doc, "/html/body/div[2]/p[2]").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "Two");

    let nodes = select_xpath(&doc, "/html/*[2]/*[1]/*[1]").unwrap();
    assert_eq!(tags(&doc, &nodes), vec!["h2"]);
}

#[test]
fn test_descendant_with_attribute_predicates() {
    let doc = Document::parse(PAGE);
    let nodes = select_xpath(&doc, "//*[@id=\"main\"]").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.attr(nodes[0], "class"), Some("content wide"));

    let nodes = select_xpath(&doc, "//button[@class='tab' and @data-testid='reviews']").unwrap();
    assert_eq!(nodes.len(), 1);

    let nodes = select_xpath(&doc, "//div[@class=\"content\"]").unwrap();
    assert_eq!(nodes.len(), 1);

    let nodes = select_xpath(&doc, "//button[@data-testid]").unwrap();
    assert_eq!(nodes.len(), 2);
}

#[test]
fn test_text_predicates() {
    let doc = Document::parse(PAGE);
    let nodes = select_xpath(&doc, "//button[normalize-space()=\"Customer reviews\"]").unwrap();
    assert_eq!(nodes.len(), 1);

    let nodes = select_xpath(&doc, "//*[contains(normalize-space(.), 'Spec')]").unwrap();
    // The button plus every ancestor whose text contains it
    assert!(nodes.len() >= 2);
    assert_eq!(doc.tag(*nodes.last().unwrap()), Some("button"));
}

#[test]
fn test_descendant_positional_is_per_parent() {
    let doc = Document::parse(PAGE);
    let nodes = select_xpath(&doc, "//div[1]").unwrap();
    assert_eq!(nodes.len(), 1);
    let nodes = select_xpath(&doc, "//p[1]").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "One");
}

#[test]
fn test_concat_literal() {
    let doc = Document::parse_fragment(r#"<span title="it's &quot;x&quot;">q</span>"#);
    let literal = xpath_literal("it's \"x\"");
    assert!(literal.starts_with("concat("));
    let nodes = select_xpath(&doc, &format!("//span[@title={literal}]")).unwrap();
    assert_eq!(nodes.len(), 1);
}

#[test]
fn test_xpath_literal_quoting() {
    assert_eq!(xpath_literal("plain"), "\"plain\"");
    assert_eq!(xpath_literal("say \"hi\""), "'say \"hi\"'");
}

#[test]
fn test_identifies() {
    let doc = Document::parse(PAGE);
    let main = select_xpath(&doc, "//*[@id='main']").unwrap()[0];
    assert!(identifies(&doc, "//*[@id='main']", main));
    assert!(!identifies(&doc, "//div", main));
    assert!(!identifies(&doc, "not a path", main));
}

#[test]
fn test_invalid_xpath() {
    let doc = Document::parse(PAGE);
    assert!(select_xpath(&doc, "//div[").is_err());
    assert!(select_xpath(&doc, "").is_err());
    assert!(select_xpath(&doc, "count(//div)").is_err());
    let err = select_xpath(&doc, "//div[").unwrap_err();
    assert_eq!(err.kind, "xpath");
    assert_eq!(err.expr, "//div[");
}

#[test]
fn test_xpath_index_reused_across_queries() {
    let doc = Document::parse(PAGE);
    let index = XPathIndex::new(&doc);
    let buttons = index.select("//button").unwrap();
    assert_eq!(buttons.len(), 2);
    assert!(index.identifies("//button[@data-testid='specs']", buttons[0]));
    assert_eq!(index.select("//div/p").unwrap().len(), 2);
}

#[test]
fn test_xpath_over_fragment() {
    let doc = Document::parse_fragment("<ul><li>a</li><li>b</li></ul>");
    let nodes = select_xpath(&doc, "//li[2]").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "b");
}

#[test]
fn test_css_path() {
    let doc = Document::parse(PAGE);
    let nodes = select_css(&doc, "html > body > div:nth-of-type(2) > p:nth-of-type(1)").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "One");

    let nodes = select_css(&doc, "div#main button.tab[data-testid=\"specs\"]").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "Specs");

    let nodes = select_css(&doc, "div.content").unwrap();
    assert_eq!(nodes.len(), 2);

    let nodes = select_css(&doc, "#main > *:nth-child(1)").unwrap();
    assert_eq!(tags(&doc, &nodes), vec!["h2"]);
}

#[test]
fn test_css_escaped_identifiers() {
    let doc = Document::parse_fragment(r#"<div id="1st:item">x</div>"#);
    let nodes = select_css(&doc, "#\\31 st\\:item").unwrap();
    assert_eq!(nodes.len(), 1);
}

#[test]
fn test_css_structural_and_attribute_selectors() {
    let doc = Document::parse_fragment(
        r##"<ul><li><a href="#top">Top</a></li><li><a href="/next">Next</a></li></ul><b>bold</b>"##,
    );
    let nodes = select_css(&doc, "li:first-child").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.text_content(nodes[0]), "Top");

    let nodes = select_css(&doc, r##"a[href^="#"]"##).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(doc.attr(nodes[0], "href"), Some("#top"));

    let nodes = select_css(&doc, "b, a").unwrap();
    assert_eq!(tags(&doc, &nodes), vec!["a", "a", "b"]);

    let nodes = select_css(&doc, "li + li > a").unwrap();
    assert_eq!(doc.text_content(nodes[0]), "Next");
}

#[test]
fn test_invalid_css() {
    assert!(select_css(&Document::parse(PAGE), "").is_err());
    assert!(css("> div").is_err());
    assert!(css("div[").is_err());
    let err = css("div[").unwrap_err();
    assert_eq!(err.kind, "css selector");
}
