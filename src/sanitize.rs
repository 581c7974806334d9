//! HTML clean-up passes.
//!
//! [`sanitize_html`] prepares a page for conversion: scripts and styles are
//! removed and attributes are reduced to `class`, `id`, `data-*` and
//! `aria-*`, except inside tables, iframes and code blocks where markup is
//! kept verbatim. [`reduce_for_model`] is the more aggressive pass applied
//! to snapshots sent to the content model.
//!
//! Both rewrite markup with `lol_html`, so untouched parts of the page are
//! passed through byte for byte.

use lol_html::{HtmlRewriter, Settings, doc_comments, element};

use crate::dom::Document;

/// Elements whose whole subtree keeps its attributes
const PROTECTED: &str = "table, table *, thead, thead *, tbody, tbody *, tfoot, tfoot *, \
                         tr, tr *, th, th *, td, td *, caption, caption *, colgroup, colgroup *, \
                         col, iframe, iframe *, code, code *, pre, pre *";

/// Set on protected elements between the two sanitize passes
const PROTECTED_MARK: &str = "data-pagesift-keep";

const MODEL_STRIPPED: &str = "script, style, noscript, svg, link, meta, template";

const MODEL_KEPT_ATTRIBUTES: &[&str] = &["id", "class", "role", "href", "type", "name", "title", "hidden"];

fn keeps_attribute(name: &str) -> bool {
    name == "class" || name == "id" || name.starts_with("data-") || name.starts_with("aria-")
}

fn model_keeps_attribute(name: &str) -> bool {
    MODEL_KEPT_ATTRIBUTES.contains(&name) || name.starts_with("data-") || name.starts_with("aria-")
}

/// Run one rewriter pass; on a rewriting error the input comes back unchanged
fn rewrite(html: &str, settings: Settings<'_, '_>) -> String {
    let mut output = String::new();
    let mut rewriter = HtmlRewriter::new(settings, |c: &[u8]| {
        output.push_str(&String::from_utf8_lossy(c));
    });

    if rewriter.write(html.as_bytes()).is_err() {
        return html.to_string();
    }
    if rewriter.end().is_err() {
        return html.to_string();
    }
    output
}

/// Strip scripts, styles and non-essential attributes
pub fn sanitize_html(html: &str) -> String {
    let marked = rewrite(
        html,
        Settings {
            element_content_handlers: vec![
                element!("script, style", |el| {
                    el.remove();
                    Ok(())
                }),
                element!(PROTECTED, |el| {
                    el.set_attribute(PROTECTED_MARK, "")?;
                    Ok(())
                }),
            ],
            ..Default::default()
        },
    );

    rewrite(
        &marked,
        Settings {
            element_content_handlers: vec![element!("*", |el| {
                if el.has_attribute(PROTECTED_MARK) {
                    el.remove_attribute(PROTECTED_MARK);
                    return Ok(());
                }
                let dropped: Vec<String> = el
                    .attributes()
                    .iter()
                    .map(|attr| attr.name())
                    .filter(|name| !keeps_attribute(name))
                    .collect();
                for name in dropped {
                    el.remove_attribute(&name);
                }
                Ok(())
            })],
            ..Default::default()
        },
    )
}

/// Shrink a page snapshot before it is sent to the content model
pub fn reduce_for_model(html: &str) -> String {
    let stripped = rewrite(
        html,
        Settings {
            element_content_handlers: vec![
                element!(MODEL_STRIPPED, |el| {
                    el.remove();
                    Ok(())
                }),
                element!("*", |el| {
                    let dropped: Vec<String> = el
                        .attributes()
                        .iter()
                        .map(|attr| attr.name())
                        .filter(|name| !model_keeps_attribute(name))
                        .collect();
                    for name in dropped {
                        el.remove_attribute(&name);
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![doc_comments!(|comment| {
                comment.remove();
                Ok(())
            })],
            ..Default::default()
        },
    );

    let mut doc = Document::parse(&stripped);
    let Some(body) = doc.body() else {
        return doc.html();
    };
    let blank: Vec<_> = doc
        .descendants(body)
        .into_iter()
        .filter(|&id| doc.text(id).is_some_and(|text| text.trim().is_empty()))
        .collect();
    for id in blank {
        doc.detach(id);
    }
    doc.outer_html(body)
}

#[cfg(test)]
#[path = "sanitize_test.rs"]
mod sanitize_test;
